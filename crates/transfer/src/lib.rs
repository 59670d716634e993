//! Chunked upload of packaged VM images and ISO media.
//!
//! A package descriptor declares one or more files, some pre-split into
//! fixed-size chunks on disk. The [`PieceUploader`] pushes the bytes of one
//! local file to one remote write endpoint in bounded-size pieces, and the
//! [`PackageTransfer`] coordinator drives it across every file while
//! aggregating byte-level progress into a single shared percentage.

mod chunked;
mod coordinator;
mod descriptor;
mod progress;

pub use chunked::{PieceUploader, effective_piece_size};
pub use coordinator::{PackageTransfer, UploadTarget};
pub use descriptor::{DescriptorFile, PackageDescriptor};
pub use progress::{ErrorSlot, ProgressCell};

use std::path::PathBuf;

/// Default piece size: 1 MiB.
pub const DEFAULT_PIECE_SIZE: u64 = 1024 * 1024;

/// Requested piece sizes must exceed this; 1024 itself falls back to the
/// default.
pub const MIN_PIECE_SIZE: u64 = 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Api(#[from] cloudlift_api::ApiError),

    #[error("descriptor error: {0}")]
    Descriptor(String),

    #[error("short read in {path} at offset {offset}: expected {expected} bytes, got {actual}")]
    UnexpectedEof {
        path: PathBuf,
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("chunk {path} is {actual} bytes on disk, descriptor declares {expected}")]
    ChunkSizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("no upload target for file {0}")]
    MissingUploadTarget(String),

    #[error("transfer cancelled")]
    Cancelled,
}
