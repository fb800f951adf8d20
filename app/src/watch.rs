// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use inotify::{Event, EventMask, Inotify, WatchMask};
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::io::ErrorKind;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use store::naming::parse_staged_record_file;
use store::{InterfaceName, StagedKind};
use tokio::fs::create_dir_all;
use tokio::io::unix::AsyncFd;
use tracing::{debug, trace};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum WatchError {
    #[error("failed to create directory {}: {source}", dir.display())]
    CreateDir {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to watch directory {}: {source}", dir.display())]
    Watch {
        dir: PathBuf,
        source: std::io::Error,
    },
    #[error("watched directory {} is gone", dir.display())]
    Gone { dir: PathBuf },
}

/// What an event reported by `Inotify` means to us.
#[derive(Debug, PartialEq, Eq)]
enum Observed {
    Staged(InterfaceName),
    Gone,
}

/// A remote config becomes visible either by a write of its final name being closed, or by a
/// rename onto its final name. Anything else (temporary files, lock files, auxiliary data) is
/// ignored.
fn check_event(event: &Event<&OsStr>) -> Option<Observed> {
    if event.mask.contains(EventMask::IGNORED) || event.mask.contains(EventMask::DELETE_SELF) {
        return Some(Observed::Gone);
    }
    if !event.mask.intersects(EventMask::CLOSE_WRITE | EventMask::MOVED_TO) {
        return None;
    }
    let filename = event.name?.to_str()?;
    parse_staged_record_file(StagedKind::RemoteConfig, filename).map(Observed::Staged)
}

/// Watches the directory into which remote configs of this container are staged.
pub struct StagingWatcher {
    dir: PathBuf,
    inotify: Inotify,
    async_fd: AsyncFd<std::os::fd::RawFd>,
}

impl StagingWatcher {
    /// Start watching `dir`. If the directory does not exist, it gets created.
    ///
    /// Remote configs staged before this returns are not reported: look for them after the
    /// watcher is created, so that none is missed.
    ///
    /// # Errors
    ///
    /// If the directory or the watch cannot be created.
    pub async fn new(dir: &Path) -> Result<Self, WatchError> {
        create_dir_all(dir)
            .await
            .map_err(|source| WatchError::CreateDir {
                dir: dir.to_path_buf(),
                source,
            })?;
        let watch_error = |source| WatchError::Watch {
            dir: dir.to_path_buf(),
            source,
        };
        let inotify = Inotify::init().map_err(watch_error)?;
        inotify
            .watches()
            .add(
                dir,
                WatchMask::CLOSE_WRITE | WatchMask::MOVED_TO | WatchMask::DELETE_SELF,
            )
            .map_err(watch_error)?;
        let async_fd = AsyncFd::new(inotify.as_raw_fd()).map_err(watch_error)?;
        debug!("watching {} for staged configurations", dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            inotify,
            async_fd,
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Wait until at least one remote config is staged, and return the interfaces they are
    /// for.
    ///
    /// # Errors
    ///
    /// [`WatchError::Gone`] if the watched directory is removed, [`WatchError::Watch`] if the
    /// watch fails.
    pub async fn staged(&mut self) -> Result<BTreeSet<InterfaceName>, WatchError> {
        let mut buffer = [0u8; 4096];
        loop {
            trace!("waiting for changes...");
            let mut guard = self
                .async_fd
                .readable()
                .await
                .map_err(|source| WatchError::Watch {
                    dir: self.dir.clone(),
                    source,
                })?;

            let events = match self.inotify.read_events(&mut buffer) {
                Ok(events) => events,
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    guard.clear_ready();
                    continue;
                }
                Err(source) => {
                    return Err(WatchError::Watch {
                        dir: self.dir.clone(),
                        source,
                    });
                }
            };
            // collapse all events by interface name
            let mut staged = BTreeSet::new();
            for observed in events.filter_map(|e| check_event(&e)) {
                match observed {
                    Observed::Staged(ifname) => {
                        staged.insert(ifname);
                    }
                    Observed::Gone => {
                        return Err(WatchError::Gone {
                            dir: self.dir.clone(),
                        });
                    }
                }
            }
            if !staged.is_empty() {
                return Ok(staged);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn event(mask: EventMask, name: &str) -> Option<Observed> {
        let fd = Inotify::init().unwrap();
        let wd = fd
            .watches()
            .add(std::env::temp_dir(), WatchMask::CLOSE_WRITE)
            .unwrap();
        check_event(&Event {
            wd,
            mask,
            cookie: 0,
            name: Some(OsStr::new(name)),
        })
    }

    #[test]
    fn test_check_event() {
        let net0 = InterfaceName::new("net0").unwrap();
        assert_eq!(
            event(EventMask::CLOSE_WRITE, "remote-net0.json"),
            Some(Observed::Staged(net0.clone()))
        );
        assert_eq!(
            event(EventMask::MOVED_TO, "remote-net0.json"),
            Some(Observed::Staged(net0))
        );
        assert_eq!(event(EventMask::CLOSE_WRITE, "addData-net0.json"), None);
        assert_eq!(event(EventMask::CLOSE_WRITE, ".remote-net0.json.tmp"), None);
        assert_eq!(event(EventMask::CLOSE_WRITE, "local-c1-net0.json"), None);
        assert_eq!(event(EventMask::IGNORED, ""), Some(Observed::Gone));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_staged() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("c1");
        let mut watcher = StagingWatcher::new(&dir).await.unwrap();
        assert!(dir.is_dir());
        assert_eq!(watcher.dir(), dir.as_path());
        assert!(logs_contain("for staged configurations"));

        let target = dir.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            std::fs::write(target.join("addData-net0.json"), b"{}").unwrap();
            std::fs::write(target.join(".tmp-net1"), b"{}").unwrap();
            std::fs::rename(target.join(".tmp-net1"), target.join("remote-net1.json")).unwrap();
        });
        let staged = tokio::time::timeout(Duration::from_secs(10), watcher.staged())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            staged.into_iter().collect::<Vec<_>>(),
            vec![InterfaceName::new("net1").unwrap()]
        );

        std::fs::remove_dir_all(&dir).unwrap();
        let err = tokio::time::timeout(Duration::from_secs(10), watcher.staged())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, WatchError::Gone { .. }));
    }
}
