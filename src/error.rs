use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Absolute path required: {path}\nResolve the path against a working directory first.")]
    RelativePath { path: PathBuf },

    #[error("Path is outside the synchronized root: {path}\nRoot: {root}")]
    OutsideRoot { path: PathBuf, root: PathBuf },

    #[error("Failed to read metadata: {path}\nCause: {source}")]
    Metadata {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read directory: {path}\nCause: {source}\nCheck that the directory exists and you have read permissions.")]
    ReadDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to create directory: {path}\nCause: {source}\nCheck write permissions on the destination.")]
    CreateDirError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to copy file: {path}\nCause: {source}\nCheck disk space and write permissions on the destination.")]
    CopyError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to remove: {path}\nCause: {source}")]
    RemoveError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("{path} is neither a file nor a directory, don't know how to delete it.")]
    UnsupportedNodeKind { path: PathBuf },

    #[error("Watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

/// Whether an I/O error means the path is simply gone
pub fn is_not_found(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::NotFound
}
