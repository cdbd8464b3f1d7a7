use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::WatchError;

pub const DEFAULT_HOME: &str = "/home/pi";
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
pub const MIN_TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_DEBOUNCE_SECS: u64 = 600;

/// Root settings structure. Deserialized from ~/.config/romwatch/config.toml.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

/// Timing of the process scan.
#[derive(Debug, Deserialize)]
pub struct WatchConfig {
    /// Milliseconds between process table scans. Clamped to at least 100.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,
    /// Seconds a non-emulator process is left alone before being re-read.
    #[serde(default = "default_debounce")]
    pub debounce_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            debounce_secs: DEFAULT_DEBOUNCE_SECS,
        }
    }
}

impl WatchConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(MIN_TICK_INTERVAL_MS))
    }

    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }
}

/// Where events are reported besides the log.
#[derive(Debug, Default, Deserialize)]
pub struct NotifyConfig {
    /// Program run with `<OP> <system> <full name> <title>` on every event.
    pub script: Option<PathBuf>,
    /// TOML file rewritten with the current state after every event.
    pub status_file: Option<PathBuf>,
}

/// Reads the romwatch settings at `path`. A missing file means all defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(e) => return Err(e).with_context(|| format!("cannot read romwatch settings {}", path.display())),
    };
    toml::from_str(&content).with_context(|| format!("invalid romwatch settings in {}", path.display()))
}

/// One `<system>` entry of EmulationStation's `es_systems.cfg`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    #[serde(rename = "fullname")]
    pub full_name: String,
    /// Rom directory. May start with `~/`.
    pub path: String,
    pub platform: String,
    /// Launch command template, e.g. `retroarch -L core.so %ROM%`.
    pub command: String,
}

/// `<system>` entries need not be adjacent; other elements may sit between
/// them.
#[derive(Debug, Deserialize)]
struct SystemListXml {
    #[serde(rename = "system", default)]
    systems: Vec<SystemConfig>,
}

/// Loads the systems from the first existing file in `candidates`.
pub fn load_systems(candidates: &[PathBuf]) -> std::result::Result<Vec<SystemConfig>, WatchError> {
    let Some(path) = candidates.iter().find(|p| p.exists()) else {
        let tried: Vec<String> = candidates.iter().map(|p| p.display().to_string()).collect();
        return Err(WatchError::Config(format!("{} not found", tried.join(" and "))));
    };
    let content = std::fs::read_to_string(path)
        .map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))?;
    parse_systems(&content).map_err(|e| WatchError::Config(format!("{}: {e}", path.display())))
}

fn parse_systems(content: &str) -> std::result::Result<Vec<SystemConfig>, quick_xml::de::DeError> {
    let list: SystemListXml = quick_xml::de::from_str(content)?;
    Ok(list.systems)
}

fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

fn default_debounce() -> u64 {
    DEFAULT_DEBOUNCE_SECS
}
