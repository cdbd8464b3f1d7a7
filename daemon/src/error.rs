//! Error types for the watcher and its collaborators.

use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while loading systems, scanning processes or resolving
/// game metadata.
#[derive(Debug, Error)]
pub enum WatchError {
    /// No usable `es_systems.cfg` was found, or it could not be parsed.
    #[error("systems config: {0}")]
    Config(String),

    /// A system's command template did not compile.
    #[error("invalid command template {template:?}: {source}")]
    Pattern {
        template: String,
        #[source]
        source: regex::Error,
    },

    /// The process table or a process's argument vector could not be read.
    #[error("failed to read {target}: {source}")]
    ProcessRead {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// The system has no gamelist.xml.
    #[error("no gamelist.xml")]
    NoCatalog,

    /// The gamelist exists but could not be read or parsed.
    #[error("failed to parse gamelist {}: {reason}", path.display())]
    CatalogParse { path: PathBuf, reason: String },

    /// The gamelist has no entry for the launched rom.
    #[error("{0}: not found")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, WatchError>;
