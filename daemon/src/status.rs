use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;
use tracing::warn;

use crate::event::{Event, Op};
use crate::gamelist::Game;
use crate::system::SystemInfo;

/// What the host is currently doing.
#[derive(Debug, Serialize, PartialEq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum WatchState {
    /// No emulator is running a game.
    Idle,
    /// An emulator is running a game.
    Playing,
}

/// Runtime status written after every event, for frontends and scripts
/// that poll rather than subscribe.
#[derive(Debug, Serialize, Clone)]
pub struct WatchStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: WatchState,
    /// RFC 3339 timestamp of the last transition, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub since: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub game: Option<Game>,
}

impl WatchStatus {
    /// Constructs the initial idle status on daemon startup.
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: WatchState::Idle,
            since: None,
            system: None,
            game: None,
        }
    }

    /// Updates the status to reflect `event`.
    pub fn apply(&mut self, event: &Event) {
        self.since = Some(event.time.to_rfc3339());
        match event.op {
            Op::Start => {
                self.state = WatchState::Playing;
                self.system = Some(event.system.clone());
                self.game = Some(event.game.clone());
            }
            Op::Stop => {
                self.state = WatchState::Idle;
                self.system = None;
                self.game = None;
            }
        }
    }
}

impl Default for WatchStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Publishes `status` at `path`. Failures are only logged.
pub fn write_status(path: &Path, status: &WatchStatus) {
    if let Err(e) = save_status(path, status) {
        warn!(target: "status", "{e:#}");
    }
}

/// Writes `status` as TOML, creating the parent directory as needed.
fn save_status(path: &Path, status: &WatchStatus) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("cannot create status directory {}", parent.display()))?;
    }
    let content = toml::to_string_pretty(status).context("cannot encode watch status")?;
    std::fs::write(path, content).with_context(|| format!("cannot publish status to {}", path.display()))
}
