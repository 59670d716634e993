//! Multi-file transfer coordinator.
//!
//! Drives the piece engine across every file a package descriptor declares,
//! in manifest order, and folds byte-level progress from all files into one
//! shared percentage. Files are not uploaded concurrently: sequential
//! transfer keeps the range accounting trivial at the cost of throughput.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use cloudlift_api::Transport;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::{PieceUploader, effective_piece_size};
use crate::descriptor::PackageDescriptor;
use crate::progress::ProgressCell;

/// Server-side write endpoint for one logical file.
#[derive(Debug, Clone)]
pub struct UploadTarget {
    /// Upload link href.
    pub href: String,
    /// Bytes the server reports as already received. Non-zero files are
    /// skipped entirely; the gate identifies unsent files only.
    pub bytes_transferred: u64,
}

/// Uploads every file a package descriptor declares.
///
/// The first failing file or chunk aborts the remaining files; cleanup of
/// the partially created remote item is the lifecycle manager's job, not
/// the coordinator's.
pub struct PackageTransfer {
    transport: Arc<dyn Transport>,
    descriptor: PackageDescriptor,
    /// Upload targets keyed by the descriptor's logical filename.
    targets: HashMap<String, UploadTarget>,
    /// Directory holding the unpacked package files.
    local_dir: PathBuf,
    /// Caller-requested piece size; validated per file.
    piece_size: u64,
    progress: Arc<ProgressCell>,
    cancel: CancellationToken,
    /// Extraction directory removed after a fully successful run.
    cleanup_dir: Option<PathBuf>,
}

impl PackageTransfer {
    pub fn new(
        transport: Arc<dyn Transport>,
        descriptor: PackageDescriptor,
        targets: HashMap<String, UploadTarget>,
        local_dir: PathBuf,
        piece_size: u64,
        progress: Arc<ProgressCell>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            transport,
            descriptor,
            targets,
            local_dir,
            piece_size,
            progress,
            cancel,
            cleanup_dir: None,
        }
    }

    /// Removes `dir` once the whole package has been uploaded.
    pub fn with_cleanup_dir(mut self, dir: PathBuf) -> Self {
        self.cleanup_dir = Some(dir);
        self
    }

    /// Uploads the package, file by file.
    pub async fn run(self) -> Result<(), TransferError> {
        let total = self.descriptor.total_bytes();
        if total == 0 {
            self.progress.set(100);
            return Ok(());
        }

        let uploader = PieceUploader::new(self.transport.as_ref(), self.cancel.clone());
        let mut uploaded: u64 = 0;

        for entry in self.descriptor.files() {
            let Some(target) = self.targets.get(&entry.href) else {
                return Err(TransferError::MissingUploadTarget(entry.href.clone()));
            };
            if target.bytes_transferred != 0 {
                debug!(file = %entry.href, "server already holds file, skipping");
                continue;
            }

            let piece_size = effective_piece_size(self.piece_size, entry.size);

            if entry.is_chunked() {
                // Pre-split chunks address one continuous logical file, so
                // the offset carries across chunk boundaries.
                let mut offset: u64 = 0;
                for (name, expected) in entry.chunk_names().iter().zip(entry.chunk_sizes()) {
                    let path = self.local_dir.join(name);
                    let actual = tokio::fs::metadata(&path).await?.len();
                    if actual != expected {
                        return Err(TransferError::ChunkSizeMismatch {
                            path,
                            expected,
                            actual,
                        });
                    }
                    let sent = uploader
                        .upload_file(
                            &path,
                            &target.href,
                            piece_size,
                            offset,
                            entry.size,
                            &mut |n| {
                                uploaded += n;
                                self.progress.set(uploaded * 100 / total);
                            },
                        )
                        .await?;
                    offset += sent;
                }
            } else {
                let path = self.local_dir.join(&entry.href);
                uploader
                    .upload_file(&path, &target.href, piece_size, 0, entry.size, &mut |n| {
                        uploaded += n;
                        self.progress.set(uploaded * 100 / total);
                    })
                    .await?;
            }

            info!(file = %entry.href, "file transferred");
        }

        // Files already held by the server contribute no pieces, so force
        // the terminal percentage.
        self.progress.set(100);
        info!(bytes = uploaded, "package transfer complete");

        if let Some(dir) = &self.cleanup_dir {
            if let Err(err) = tokio::fs::remove_dir_all(dir).await {
                warn!(dir = %dir.display(), error = %err, "failed to remove extraction directory");
            }
        }
        Ok(())
    }
}
