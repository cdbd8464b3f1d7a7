//! Access to the host's process list and each process's argument vector.

#[cfg(any(test, not(target_os = "linux")))]
use std::io;
#[cfg(any(test, target_os = "linux"))]
use std::path::PathBuf;

#[cfg(any(test, not(target_os = "linux")))]
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, UpdateKind};

use crate::error::{Result, WatchError};

/// A source of running processes.
///
/// Argument vectors are returned NUL-joined with a trailing NUL, the layout
/// of `/proc/<pid>/cmdline`. Arguments are raw bytes and need not be UTF-8.
pub trait ProcessTable: Send {
    /// Ids of all running processes.
    fn pids(&mut self) -> Result<Vec<u32>>;
    /// The argument vector of `pid`.
    fn cmdline(&mut self, pid: u32) -> Result<Vec<u8>>;
    /// Whether `pid` still has an entry in the table.
    fn is_alive(&mut self, pid: u32) -> bool;
}

/// Reads processes straight from procfs.
#[cfg(any(test, target_os = "linux"))]
#[derive(Debug, Clone)]
pub struct ProcFs {
    root: PathBuf,
}

#[cfg(any(test, target_os = "linux"))]
impl ProcFs {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn cmdline_path(&self, pid: u32) -> PathBuf {
        self.root.join(pid.to_string()).join("cmdline")
    }
}

#[cfg(any(test, target_os = "linux"))]
impl Default for ProcFs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, target_os = "linux"))]
impl ProcessTable for ProcFs {
    fn pids(&mut self) -> Result<Vec<u32>> {
        let entries = std::fs::read_dir(&self.root).map_err(|source| WatchError::ProcessRead {
            target: self.root.display().to_string(),
            source,
        })?;
        let mut pids: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_dir()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().to_str()?.parse().ok())
            .collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn cmdline(&mut self, pid: u32) -> Result<Vec<u8>> {
        let path = self.cmdline_path(pid);
        std::fs::read(&path).map_err(|source| WatchError::ProcessRead {
            target: path.display().to_string(),
            source,
        })
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        self.cmdline_path(pid).exists()
    }
}

/// Portable process table backed by `sysinfo`, for hosts without procfs.
#[cfg(any(test, not(target_os = "linux")))]
pub struct SysinfoTable {
    sys: sysinfo::System,
}

#[cfg(any(test, not(target_os = "linux")))]
impl SysinfoTable {
    pub fn new() -> Self {
        Self {
            sys: sysinfo::System::new(),
        }
    }
}

#[cfg(any(test, not(target_os = "linux")))]
impl Default for SysinfoTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(any(test, not(target_os = "linux")))]
impl ProcessTable for SysinfoTable {
    fn pids(&mut self) -> Result<Vec<u32>> {
        self.sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cmd(UpdateKind::OnlyIfNotSet),
        );
        let mut pids: Vec<u32> = self.sys.processes().keys().map(|pid| pid.as_u32()).collect();
        pids.sort_unstable();
        Ok(pids)
    }

    fn cmdline(&mut self, pid: u32) -> Result<Vec<u8>> {
        let process = self
            .sys
            .process(Pid::from_u32(pid))
            .ok_or_else(|| WatchError::ProcessRead {
                target: format!("process {pid}"),
                source: io::Error::new(io::ErrorKind::NotFound, "process exited"),
            })?;
        let mut line = Vec::new();
        for arg in process.cmd() {
            line.extend_from_slice(arg.as_encoded_bytes());
            line.push(0);
        }
        Ok(line)
    }

    fn is_alive(&mut self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        self.sys
            .refresh_processes_specifics(ProcessesToUpdate::Some(&[pid]), true, ProcessRefreshKind::new());
        self.sys.process(pid).is_some()
    }
}
