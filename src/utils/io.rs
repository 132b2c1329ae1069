//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::io;
use std::path::Path;

use sha2::{Digest, Sha256};

/// Read file contents with standardized error handling.
pub fn read_file(path: &Path, operation: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}

/// Create the parent directory of `path` if it does not exist yet.
pub fn ensure_parent_dir(path: &Path, operation: &str) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() && !parent.exists() => {
            fs::create_dir_all(parent)
                .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
        }
        _ => Ok(()),
    }
}

/// Size and hex SHA-256 of a file, streamed.
pub fn file_digest(path: &Path, operation: &str) -> Result<(u64, String)> {
    let mut file = fs::File::open(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;
    Ok((size, format!("{:x}", hasher.finalize())))
}

/// Hex SHA-256 of an in-memory buffer.
pub fn digest_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}
