//! Upload lifecycle error types.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by upload preconditions and the lifecycle manager.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] cloudlift_api::ApiError),

    #[error(transparent)]
    Task(#[from] cloudlift_api::TaskError),

    #[error(transparent)]
    Transfer(#[from] cloudlift_transfer::TransferError),

    #[error("an item named {0:?} already exists in the target container")]
    NameCollision(String),

    #[error("file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("file is empty: {0}")]
    EmptyFile(PathBuf),

    #[error("{0} is not a valid ISO image")]
    NotAnIso(PathBuf),

    #[error("{path} is {actual} bytes on disk, descriptor declares {expected}")]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("no package descriptor found in {0}")]
    MissingDescriptor(PathBuf),

    #[error("remote import failed: {0}")]
    ImportFailed(String),

    #[error("upload links did not appear within {0:?}")]
    LinkTimeout(Duration),

    #[error("background transfer aborted: {0}")]
    Background(String),
}
