//! Static validation performed before any remote call.
//!
//! Every check here runs against local state only; a failed precondition
//! means nothing was created remotely and no cleanup is needed.

use std::io::Read;
use std::path::{Path, PathBuf};

use cloudlift_api::types::Container;
use cloudlift_transfer::PackageDescriptor;

use crate::UploadError;

/// Number of leading bytes inspected for the ISO magic.
const ISO_PROBE_LEN: usize = 37000;
/// "CD001" — the ISO 9660 volume descriptor identifier.
const ISO_MAGIC: [u8; 5] = *b"CD001";
/// Offsets of the identifier for the three standard descriptor sectors.
const ISO_MAGIC_OFFSETS: [usize; 3] = [32769, 34817, 36865];

/// Resolves `path` to an absolute path, rejecting missing or empty files.
pub fn check_local_file(path: &Path) -> Result<PathBuf, UploadError> {
    let abs = std::fs::canonicalize(path)
        .map_err(|_| UploadError::FileNotFound(path.to_path_buf()))?;
    if std::fs::metadata(&abs)?.len() == 0 {
        return Err(UploadError::EmptyFile(abs));
    }
    Ok(abs)
}

/// Rejects `name` when the target container already lists an item with
/// that name.
pub fn check_name_collision(container: &Container, name: &str) -> Result<(), UploadError> {
    if container.contains_item(name) {
        return Err(UploadError::NameCollision(name.to_string()));
    }
    Ok(())
}

/// Confirms the ISO 9660 magic within the first 37000 bytes of `path`.
pub fn check_iso(path: &Path) -> Result<(), UploadError> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; ISO_PROBE_LEN];
    let mut read = 0;
    while read < buf.len() {
        let n = file.read(&mut buf[read..])?;
        if n == 0 {
            break;
        }
        read += n;
    }
    buf.truncate(read);

    let found = ISO_MAGIC_OFFSETS.iter().any(|&offset| {
        buf.len() >= offset + ISO_MAGIC.len() && buf[offset..offset + ISO_MAGIC.len()] == ISO_MAGIC
    });
    if found {
        Ok(())
    } else {
        Err(UploadError::NotAnIso(path.to_path_buf()))
    }
}

/// Confirms every file or chunk the descriptor declares exists locally
/// with exactly the declared size.
pub fn check_package_files(
    descriptor: &PackageDescriptor,
    dir: &Path,
) -> Result<(), UploadError> {
    for entry in descriptor.files() {
        if entry.is_chunked() {
            for (name, expected) in entry.chunk_names().iter().zip(entry.chunk_sizes()) {
                check_size(&dir.join(name), expected)?;
            }
        } else {
            check_size(&dir.join(&entry.href), entry.size)?;
        }
    }
    Ok(())
}

fn check_size(path: &Path, expected: u64) -> Result<(), UploadError> {
    let meta = std::fs::metadata(path)
        .map_err(|_| UploadError::FileNotFound(path.to_path_buf()))?;
    if meta.len() != expected {
        return Err(UploadError::SizeMismatch {
            path: path.to_path_buf(),
            expected,
            actual: meta.len(),
        });
    }
    Ok(())
}
