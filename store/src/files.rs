// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Low level file primitives shared by the stores

use crate::error::StoreError;
use nix::fcntl::{Flock, FlockArg};
use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt};
use std::path::Path;
use tracing::{debug, trace};

const DIR_MODE: u32 = 0o700;
const FILE_MODE: u32 = 0o600;
/// Times a lock is retried when the locked directory is replaced under us.
const LOCK_ATTEMPTS: usize = 64;

/// Create `dir` (and its parents) with owner-only permissions. An existing directory is fine:
/// concurrent first writers may race here.
pub(crate) fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    DirBuilder::new()
        .recursive(true)
        .mode(DIR_MODE)
        .create(dir)
        .map_err(StoreError::io(dir))?;
    trace!("directory {} ready", dir.display());
    Ok(())
}

/// Write `bytes` as the content of the file at `path`, replacing any previous content.
///
/// The data is first written to a hidden temporary file in the same directory and then renamed
/// over `path`, so readers never observe a partially written record.
pub(crate) fn write_record(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(StoreError::io(path)(std::io::Error::new(
            ErrorKind::InvalidInput,
            "record path has no parent directory",
        )));
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

    let write = || -> std::io::Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(FILE_MODE)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()
    };
    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(StoreError::io(&tmp)(e));
    }
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(StoreError::io(path)(e));
    }
    debug!("wrote {} ({} bytes)", path.display(), bytes.len());
    Ok(())
}

/// Read the file at `path`. A missing file is `Ok(None)`.
pub(crate) fn read_record(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path)(e)),
    }
}

/// Exclusive advisory lock on a directory, released on drop.
///
/// Multi-file operations on a directory (staging a remote config with its companion, or
/// claiming them) hold this lock so that they appear atomic to each other.
#[derive(Debug)]
pub(crate) struct DirLock {
    lock: Flock<File>,
}

impl DirLock {
    /// Lock `dir`, blocking until the lock is available. Returns `Ok(None)` if the directory
    /// does not exist.
    pub(crate) fn acquire(dir: &Path) -> Result<Option<DirLock>, StoreError> {
        let file = match File::open(dir) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError::io(dir)(e)),
        };
        let lock = Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| StoreError::io(dir)(std::io::Error::from(errno)))?;
        trace!("locked {}", dir.display());
        Ok(Some(DirLock { lock }))
    }

    /// Whether the locked directory is still the one at `dir`. A directory removed while we
    /// waited for its lock has no links left, and a new one may have been created at `dir`.
    fn is_live(&self, dir: &Path) -> Result<bool, StoreError> {
        let locked = self.lock.metadata().map_err(StoreError::io(dir))?;
        if locked.nlink() == 0 {
            return Ok(false);
        }
        match std::fs::metadata(dir) {
            Ok(current) => Ok(current.dev() == locked.dev() && current.ino() == locked.ino()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::io(dir)(e)),
        }
    }

    /// Lock `dir` like [`DirLock::acquire`], making sure that the lock is held on the directory
    /// currently at `dir` and not on one reaped while we waited.
    pub(crate) fn acquire_live(dir: &Path) -> Result<Option<DirLock>, StoreError> {
        for _ in 0..LOCK_ATTEMPTS {
            let Some(lock) = DirLock::acquire(dir)? else {
                return Ok(None);
            };
            if lock.is_live(dir)? {
                return Ok(Some(lock));
            }
            debug!("{} was replaced while locking it, retrying", dir.display());
        }
        Err(replaced(dir))
    }

    /// Create `dir` if needed and lock it. A directory reaped between its creation and the
    /// lock is created again.
    pub(crate) fn acquire_created(dir: &Path) -> Result<DirLock, StoreError> {
        for _ in 0..LOCK_ATTEMPTS {
            ensure_dir(dir)?;
            if let Some(lock) = DirLock::acquire_live(dir)? {
                return Ok(lock);
            }
            debug!("{} was reaped before it could be locked, retrying", dir.display());
        }
        Err(replaced(dir))
    }
}

fn replaced(dir: &Path) -> StoreError {
    StoreError::io(dir)(std::io::Error::new(
        ErrorKind::Interrupted,
        "directory keeps being replaced",
    ))
}

#[cfg(test)]
mod test {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_write_and_read_record() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("local-net0.json");
        assert_eq!(read_record(&path).unwrap(), None);

        write_record(&path, b"{}").unwrap();
        assert_eq!(read_record(&path).unwrap().as_deref(), Some(&b"{}"[..]));

        // overwrite, and no temporary files left behind
        write_record(&path, b"{\"a\":1}").unwrap();
        assert_eq!(read_record(&path).unwrap().as_deref(), Some(&b"{\"a\":1}"[..]));
        let entries: Vec<_> = std::fs::read_dir(root.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, FILE_MODE);
    }

    #[test]
    fn test_write_record_in_missing_directory_fails() {
        let root = tempfile::tempdir().unwrap();
        let path = root.path().join("missing").join("local-net0.json");
        assert!(matches!(
            write_record(&path, b"{}"),
            Err(StoreError::Io { .. })
        ));
    }

    #[test]
    fn test_ensure_dir_is_idempotent() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("b");
        ensure_dir(&dir).unwrap();
        ensure_dir(&dir).unwrap();
        let mode = std::fs::metadata(&dir).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, DIR_MODE);
    }

    #[test]
    fn test_lock_missing_directory() {
        let root = tempfile::tempdir().unwrap();
        assert!(DirLock::acquire(&root.path().join("nope")).unwrap().is_none());
        assert!(DirLock::acquire(root.path()).unwrap().is_some());
        assert!(
            DirLock::acquire_live(&root.path().join("nope"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn test_lock_of_removed_directory_is_not_live() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("c1");
        ensure_dir(&dir).unwrap();
        let lock = DirLock::acquire(&dir).unwrap().unwrap();
        assert!(lock.is_live(&dir).unwrap());

        std::fs::remove_dir(&dir).unwrap();
        assert!(!lock.is_live(&dir).unwrap());
        ensure_dir(&dir).unwrap();
        assert!(!lock.is_live(&dir).unwrap());
        drop(lock);

        let lock = DirLock::acquire_live(&dir).unwrap().unwrap();
        assert!(lock.is_live(&dir).unwrap());
    }

    #[test]
    fn test_acquire_created_makes_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("a").join("c1");
        let lock = DirLock::acquire_created(&dir).unwrap();
        assert!(dir.is_dir());
        assert!(lock.is_live(&dir).unwrap());
    }
}
