//! Single-file piece upload engine.

use std::path::Path;

use cloudlift_api::{ContentRange, Transport};
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::{DEFAULT_PIECE_SIZE, MIN_PIECE_SIZE, TransferError};

/// Selects the piece size for a transfer.
///
/// A requested size is honored only when it exceeds [`MIN_PIECE_SIZE`] and
/// is strictly smaller than the file itself; anything else falls back to
/// [`DEFAULT_PIECE_SIZE`]. This rejects degenerate tiny-piece
/// configurations while still letting callers tune throughput.
pub fn effective_piece_size(requested: u64, file_total: u64) -> u64 {
    if requested > MIN_PIECE_SIZE && requested < file_total {
        requested
    } else {
        DEFAULT_PIECE_SIZE
    }
}

/// Uploads the bytes of exactly one local file to one remote write endpoint.
///
/// Pieces are sent strictly in file-offset order, one attempt each; any
/// transport failure aborts the file. The cancellation token is checked at
/// piece boundaries, so a cancelled transfer stops after at most one more
/// piece.
pub struct PieceUploader<'a> {
    transport: &'a dyn Transport,
    cancel: CancellationToken,
}

impl<'a> PieceUploader<'a> {
    pub fn new(transport: &'a dyn Transport, cancel: CancellationToken) -> Self {
        Self { transport, cancel }
    }

    /// Sends `path` to `target` in pieces of at most `piece_size` bytes.
    ///
    /// `base_offset` positions this file within a logical remote file of
    /// `logical_total` bytes, so pre-split chunks produce one continuous
    /// range sequence. `on_piece` receives the byte count of every
    /// acknowledged piece. Returns the number of bytes sent.
    pub async fn upload_file(
        &self,
        path: &Path,
        target: &str,
        piece_size: u64,
        base_offset: u64,
        logical_total: u64,
        on_piece: &mut (dyn FnMut(u64) + Send),
    ) -> Result<u64, TransferError> {
        let mut file = File::open(path).await?;
        let file_len = file.metadata().await?.len();
        let mut buf = vec![0u8; piece_size as usize];
        let mut sent: u64 = 0;

        while sent < file_len {
            if self.cancel.is_cancelled() {
                return Err(TransferError::Cancelled);
            }

            let want = piece_size.min(file_len - sent) as usize;
            let got = fill_buf(&mut file, &mut buf[..want]).await?;
            if got < want {
                // The file shrank underneath us; this is not the expected
                // end-of-file short read.
                return Err(TransferError::UnexpectedEof {
                    path: path.to_path_buf(),
                    offset: sent + got as u64,
                    expected: want,
                    actual: got,
                });
            }

            let range = ContentRange {
                start: base_offset + sent,
                end: base_offset + sent + want as u64 - 1,
                total: logical_total,
            };
            trace!(endpoint = target, %range, "sending piece");
            self.transport
                .put_piece(target, range, buf[..want].to_vec())
                .await?;

            sent += want as u64;
            on_piece(want as u64);
        }

        debug!(path = %path.display(), bytes = sent, "file upload complete");
        Ok(sent)
    }
}

/// Reads until `buf` is full or end of file.
async fn fill_buf(file: &mut File, buf: &mut [u8]) -> Result<usize, TransferError> {
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..]).await?;
        if n == 0 {
            break;
        }
        read += n;
    }
    Ok(read)
}
