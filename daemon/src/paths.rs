/// Canonical file locations used by romwatch and EmulationStation.
///
/// EmulationStation keeps per-user files under `~/.emulationstation/` and
/// system-wide defaults under `/etc/emulationstation/`; the user copy wins.
use std::path::{Path, PathBuf};

const USER_ES_DIR: &str = ".emulationstation";
pub const SYSTEM_ES_DIR: &str = "/etc/emulationstation";
pub const SYSTEMS_FILE_NAME: &str = "es_systems.cfg";
pub const GAMELIST_FILE_NAME: &str = "gamelist.xml";

const APP_DIR_NAME: &str = "romwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Candidate `es_systems.cfg` locations, in order of precedence.
pub fn systems_config_candidates(home: &Path) -> Vec<PathBuf> {
    vec![
        home.join(USER_ES_DIR).join(SYSTEMS_FILE_NAME),
        Path::new(SYSTEM_ES_DIR).join(SYSTEMS_FILE_NAME),
    ]
}

/// Candidate `gamelist.xml` locations for a system, in order of precedence.
pub fn gamelist_candidates(root: &Path, home: &Path, system: &str) -> Vec<PathBuf> {
    vec![
        root.join(GAMELIST_FILE_NAME),
        home.join(USER_ES_DIR)
            .join("gamelists")
            .join(system)
            .join(GAMELIST_FILE_NAME),
        Path::new(SYSTEM_ES_DIR)
            .join("gamelists")
            .join(system)
            .join(GAMELIST_FILE_NAME),
    ]
}

/// Default daemon settings file: `~/.config/romwatch/config.toml`
pub fn config_file_path(home: &Path) -> PathBuf {
    home.join(".config").join(APP_DIR_NAME).join(CONFIG_FILE_NAME)
}

/// Expands a leading `~/` against `home`.
pub fn expand_home(path: &str, home: &Path) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(path),
    }
}
