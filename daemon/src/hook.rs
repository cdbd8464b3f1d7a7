/// Runs the user's notification script for each event.
use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;

use crate::event::Event;

/// Runs `script <OP> <system> <full name> <title>` and waits for it.
pub async fn run_script(script: &Path, event: &Event) -> Result<()> {
    let status = Command::new(script)
        .arg(event.op.as_str())
        .arg(&event.system.name)
        .arg(&event.system.full_name)
        .arg(event.game.display_title())
        .status()
        .await
        .with_context(|| format!("Failed to run {}", script.display()))?;
    if !status.success() {
        bail!("{} exited with {status}", script.display());
    }
    Ok(())
}
