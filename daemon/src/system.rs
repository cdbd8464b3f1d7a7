/// Per-emulator descriptors built from `es_systems.cfg` entries.
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::SystemConfig;
use crate::error::Result;
use crate::gamelist::{self, Game};
use crate::paths;
use crate::pattern::CommandMatcher;

/// Public identity of a system, copied into every event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInfo {
    pub name: String,
    pub full_name: String,
    pub platform: String,
    /// Rom directory with `~/` expanded.
    pub path: String,
}

/// An emulator the watcher knows how to recognize.
#[derive(Debug, Clone)]
pub struct System {
    info: SystemInfo,
    matcher: CommandMatcher,
    gamelist: Option<PathBuf>,
}

impl System {
    /// Builds a system, locating its gamelist in the usual places.
    pub fn init(config: SystemConfig, home: &Path) -> Result<Self> {
        let root = paths::expand_home(&config.path, home);
        let gamelist = paths::gamelist_candidates(&root, home, &config.name)
            .into_iter()
            .find(|p| p.exists());
        Self::with_gamelist(config, home, gamelist)
    }

    /// Builds a system with an explicit gamelist location.
    pub fn with_gamelist(config: SystemConfig, home: &Path, gamelist: Option<PathBuf>) -> Result<Self> {
        let matcher = CommandMatcher::compile(&config.command)?;
        let root = paths::expand_home(&config.path, home);
        Ok(Self {
            info: SystemInfo {
                name: config.name,
                full_name: config.full_name,
                platform: config.platform,
                path: root.to_string_lossy().into_owned(),
            },
            matcher,
            gamelist,
        })
    }

    pub fn info(&self) -> &SystemInfo {
        &self.info
    }

    pub fn gamelist(&self) -> Option<&Path> {
        self.gamelist.as_deref()
    }

    /// Returns the rom launched by `cmdline` if it is this system's emulator.
    pub fn match_command(&self, cmdline: &[u8]) -> Option<String> {
        self.matcher.extract(cmdline)
    }

    /// Looks up `rom` in this system's gamelist.
    pub fn game(&self, rom: &str) -> Result<Game> {
        gamelist::lookup(self.gamelist(), rom, self.matcher.placeholder())
    }
}
