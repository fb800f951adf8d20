// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Removal of consumed records and of the directories they leave empty

use crate::error::StoreError;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, trace};

/// Delete the file at `path`.
///
/// Returns `false` if there was no such file: whoever deleted it first consumed it.
///
/// # Errors
///
/// Any other failure to remove the file.
pub fn reap_file(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!("removed {}", path.display());
            Ok(true)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            trace!("{} already gone", path.display());
            Ok(false)
        }
        Err(e) => Err(StoreError::io(path)(e)),
    }
}

/// Delete the directory `dir` if it contains no entries.
///
/// Returns `true` if the directory was removed. A directory which does not exist is already
/// clean. A directory which is not empty, which gains an entry concurrently, or which is busy
/// (a mount point) is kept.
///
/// # Errors
///
/// Failures to list or remove the directory other than the ones above.
pub fn reap_dir_if_empty(dir: &Path) -> Result<bool, StoreError> {
    let mut entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(StoreError::io(dir)(e)),
    };
    if entries.next().is_some() {
        trace!("{} is not empty, keeping it", dir.display());
        return Ok(false);
    }
    match std::fs::remove_dir(dir) {
        Ok(()) => {
            debug!("removed empty directory {}", dir.display());
            Ok(true)
        }
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::NotFound | ErrorKind::DirectoryNotEmpty | ErrorKind::ResourceBusy
            ) =>
        {
            trace!("keeping {}: {e}", dir.display());
            Ok(false)
        }
        Err(e) => Err(StoreError::io(dir)(e)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_reap_file_and_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data");
        std::fs::create_dir(&dir).unwrap();
        let file = dir.join("local-net0.json");
        std::fs::write(&file, b"{}").unwrap();

        assert!(reap_file(&file).unwrap());
        assert!(reap_dir_if_empty(&dir).unwrap());
        assert!(!file.exists());
        assert!(!dir.exists());
    }

    #[test]
    fn test_reap_keeps_non_empty_dir() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("data");
        std::fs::create_dir(&dir).unwrap();
        let file = dir.join("local-net0.json");
        let other = dir.join("local-net1.json");
        std::fs::write(&file, b"{}").unwrap();
        std::fs::write(&other, b"{}").unwrap();

        assert!(reap_file(&file).unwrap());
        assert!(!reap_dir_if_empty(&dir).unwrap());
        assert!(!file.exists());
        assert!(other.exists());
        assert!(dir.exists());
    }

    #[test]
    fn test_reap_missing_things_is_fine() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("gone");
        assert!(!reap_file(&dir.join("x.json")).unwrap());
        assert!(!reap_dir_if_empty(&dir).unwrap());
    }
}
