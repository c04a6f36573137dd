use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading a catalogue or patching a binary.
#[derive(Error, Debug)]
pub enum PatchError {
    #[error("invalid patch catalogue: {0}")]
    InvalidCatalogue(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("window at offset 0x{offset:X} changed during the write session")]
    WindowChanged { offset: u64 },

    #[error("failed to back up {} to {}: {source}", path.display(), backup.display())]
    BackupFailed {
        path: PathBuf,
        backup: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no backup found at {}", .0.display())]
    NoBackup(PathBuf),
}

impl PatchError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors raised while editing the host document.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum InjectError {
    #[error("anchor {0} not found in document")]
    MissingAnchor(&'static str),

    #[error("addon block {instance} for '{id}' has no end marker")]
    UnterminatedBlock { id: String, instance: String },
}
