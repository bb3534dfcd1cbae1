//! SHA-256 digests of the files inside a tar stream.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

use crate::remote::{ChecksumMap, normalise_relative};

/// Hashes every regular file in the tar read from `reader`.
///
/// Keys are paths relative to the archive root without a `./` prefix, the
/// same keys the remote `sha256sum` listing produces.
///
/// # Errors
///
/// Returns the I/O error when the archive is unreadable.
pub fn checksum_tar(reader: impl Read) -> io::Result<ChecksumMap> {
    let mut archive = tar::Archive::new(reader);
    let mut checksums = ChecksumMap::new();
    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = normalise_relative(&entry.path()?.to_string_lossy());
        let mut hasher = Sha256::new();
        io::copy(&mut entry, &mut hasher)?;
        checksums.insert(path, format!("{:x}", hasher.finalize()));
    }
    Ok(checksums)
}

/// Files present in either map whose digests differ, sorted.
#[must_use]
pub fn mismatched_files(expected: &ChecksumMap, actual: &ChecksumMap) -> Vec<String> {
    let mut files: Vec<String> = expected
        .keys()
        .chain(actual.keys())
        .filter(|path| expected.get(*path) != actual.get(*path))
        .cloned()
        .collect();
    files.sort();
    files.dedup();
    files
}
