//! BLAKE3 content hashing.

use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::Path;

use blake3::Hasher;
use filesage_core::{ContentHash, ScanError};

/// Read buffer used for sequential hashing.
pub const HASH_BUFFER_SIZE: usize = 64 * 1024;

/// Hash the full content of the file at `path`.
///
/// Content is read sequentially through a fixed buffer, so a file that
/// shrinks while it is read yields a short digest instead of a fault.
/// Any I/O failure is reported as [`ScanError::HashIo`]; the caller decides
/// whether the record is kept without a hash.
pub fn hash_file(path: &Path) -> Result<ContentHash, ScanError> {
    let hash_err = |source| ScanError::HashIo {
        path: path.to_path_buf(),
        source,
    };

    let mut file = File::open(path).map_err(hash_err)?;
    let mut hasher = Hasher::new();
    let mut buffer = vec![0u8; HASH_BUFFER_SIZE];
    loop {
        match file.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => {
                hasher.update(&buffer[..n]);
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(hash_err(e)),
        }
    }

    Ok(ContentHash::new(*hasher.finalize().as_bytes()))
}
