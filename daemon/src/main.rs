mod config;
mod error;
mod event;
mod gamelist;
mod hook;
mod paths;
mod pattern;
mod process_monitor;
mod process_table;
mod status;
mod system;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::process_monitor::{WatchSettings, Watcher};
use crate::system::System;

/// Reports which game an EmulationStation emulator is running.
#[derive(Debug, Parser)]
#[command(name = "romwatch", version)]
struct Args {
    /// Home folder of the user running EmulationStation.
    #[arg(long, default_value = config::DEFAULT_HOME)]
    home: PathBuf,
    /// Settings file [default: <home>/.config/romwatch/config.toml]
    #[arg(long)]
    config: Option<PathBuf>,
    /// Program run on every event with `<OP> <system> <full name> <title>`.
    #[arg(long)]
    script: Option<PathBuf>,
    /// File rewritten with the current state after every event.
    #[arg(long)]
    status_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths::config_file_path(&args.home));
    let config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!(target: "config", "{e:#} (using defaults)");
        config::Config::default()
    });
    let script = args.script.or(config.notify.script);
    let status_path = args.status_file.or(config.notify.status_file);

    let systems = load_systems(&args.home)?;
    let settings = WatchSettings {
        tick_interval: config.watch.tick_interval(),
        debounce_window: config.watch.debounce_window(),
    };

    // ── Initial status ────────────────────────────────────────────────────────
    let mut current_status = status::WatchStatus::new();
    if let Some(path) = &status_path {
        status::write_status(path, &current_status);
    }

    info!(
        "romwatch v{} started, watching {} systems",
        env!("CARGO_PKG_VERSION"),
        systems.len()
    );
    let mut watcher = Watcher::spawn(systems, default_table(), settings);

    // ── Event loop ────────────────────────────────────────────────────────────
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            Some(event) = watcher.events.recv() => {
                info!(
                    target: "event",
                    op = %event.op,
                    system = %event.system.name,
                    rom = %event.game.path,
                    "{}",
                    event.game.display_title()
                );
                current_status.apply(&event);
                if let Some(path) = &status_path {
                    status::write_status(path, &current_status);
                }
                if let Some(script) = &script {
                    if let Err(e) = hook::run_script(script, &event).await {
                        warn!(target: "hook", "{e:#}");
                    }
                }
            }
            Some(err) = watcher.errors.recv() => {
                warn!(target: "monitor", "{err}");
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }

    watcher.close().await;
    if let Some(path) = &status_path {
        status::write_status(path, &status::WatchStatus::new());
    }
    Ok(())
}

/// Loads `es_systems.cfg` and prepares every system in it.
fn load_systems(home: &Path) -> Result<Vec<System>> {
    let configs = config::load_systems(&paths::systems_config_candidates(home))
        .context("Failed to load emulator systems")?;
    configs
        .into_iter()
        .map(|c| {
            let name = c.name.clone();
            System::init(c, home).with_context(|| format!("Failed to initialize system {name}"))
        })
        .collect()
}

#[cfg(target_os = "linux")]
fn default_table() -> process_table::ProcFs {
    process_table::ProcFs::new()
}

#[cfg(not(target_os = "linux"))]
fn default_table() -> process_table::SysinfoTable {
    process_table::SysinfoTable::new()
}
