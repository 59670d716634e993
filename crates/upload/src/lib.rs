//! Upload lifecycle for catalog items and media.
//!
//! Bridges the synchronous "create remote item, discover upload targets"
//! phase with the asynchronous transfer phase, and owns the cross-system
//! cleanup protocol invoked when either the local transfer or the remote
//! import fails.

pub mod checks;
mod cleanup;
mod error;
mod lifecycle;

pub use error::UploadError;
pub use lifecycle::{UploadHandle, UploadLifecycleManager, UploadOptions};
