// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Remote handoff queue.
//!
//! The host side stages a network configuration, together with an auxiliary data record, into the
//! directory of the container it is meant for:
//!
//! ```text
//!   {container_root}/{container id}/remote-{ifname}.json
//!   {container_root}/{container id}/addData-{ifname}.json
//! ```
//!
//! That directory is what the container side sees as its shared directory. A later invocation
//! claims any pending configuration, looking both in the shared directory and in every
//! per-container directory.
//!
//! Lifecycle of a staged configuration:
//!
//! ```text
//!   UNSTAGED --stage--> STAGED --claim--> CONSUMED
//!                          |
//!                          +--discard--> ABANDONED
//! ```
//!
//! The order in which pending configurations are claimed is unspecified: it is the order in which
//! the filesystem lists directory entries, which does not reflect the order of arrival.

use crate::codec;
use crate::error::StoreError;
use crate::files::{DirLock, read_record, write_record};
use crate::naming::{
    ContainerId, Identifier, InterfaceName, InvalidName, RecordKind, StagedKind,
    parse_staged_record_file, staged_record_file,
};
use crate::reaper::{reap_dir_if_empty, reap_file};
use crate::records::AuxiliaryData;
use crate::Store;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// A staged configuration, as claimed by [`Store::claim_pending_remote_config`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingConfig<C> {
    /// Interface name the configuration was staged for.
    pub ifname: InterfaceName,
    /// The configuration exactly as staged.
    pub config: C,
    /// The companion record.
    pub aux: AuxiliaryData,
}

impl<C> PendingConfig<C> {
    /// Id of the container the configuration was staged for.
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        self.aux.container_id()
    }
}

/// Outcome of an attempt to claim the configuration staged for an interface in some directory.
enum Claim<C> {
    Claimed(PendingConfig<C>),
    /// Somebody else got there first.
    Lost,
}

fn malformed(path: &Path) -> impl FnOnce(codec::CodecError) -> StoreError {
    let path = path.to_path_buf();
    move |e| StoreError::MalformedRecord {
        path,
        kind: e.kind,
        reason: e.reason,
    }
}

/// List the interface names of the remote configs staged in `dir`, in listing order.
fn staged_in(dir: &Path) -> Result<Vec<InterfaceName>, StoreError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
        Err(e) => return Err(StoreError::io(dir)(e)),
    };
    let mut found = vec![];
    for entry in entries {
        let entry = entry.map_err(StoreError::io(dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(ifname) = parse_staged_record_file(StagedKind::RemoteConfig, name) {
            found.push(ifname);
        }
    }
    Ok(found)
}

impl Store {
    /// The staging directory of `container`, refusing ids which would alias the shared directory.
    pub(crate) fn staging_dir(&self, container: &ContainerId) -> Result<PathBuf, StoreError> {
        let dir = self.container_dir(container);
        if dir == self.shared_dir() {
            return Err(InvalidName::Reserved(
                Identifier::ContainerId,
                container.as_str().to_owned(),
            )
            .into());
        }
        Ok(dir)
    }

    /// Stage `config` for the container named in `aux`, for interface `ifname`.
    ///
    /// The remote config is written first, then its auxiliary data. Both writes happen under the
    /// lock of the staging directory, so a concurrent claim sees both records or none. A staging
    /// directory reaped by a concurrent claim before it could be locked is created again. If the
    /// second write fails, the remote config stays staged without its companion: a claim of it
    /// will report [`StoreError::MissingCompanionRecord`].
    #[tracing::instrument(level = "debug", skip(self, config, aux), fields(container = %aux.container_id()))]
    pub fn stage_remote_config<C: Serialize>(
        &self,
        ifname: &InterfaceName,
        config: &C,
        aux: &AuxiliaryData,
    ) -> Result<(), StoreError> {
        let dir = self.staging_dir(aux.container_id())?;
        let remote = dir.join(staged_record_file(StagedKind::RemoteConfig, ifname));
        let companion = dir.join(staged_record_file(StagedKind::AuxiliaryData, ifname));
        let remote_bytes =
            codec::encode(RecordKind::RemoteConfig, config).map_err(malformed(&remote))?;
        let companion_bytes =
            codec::encode(RecordKind::AuxiliaryData, aux).map_err(malformed(&companion))?;

        let _lock = DirLock::acquire_created(&dir)?;
        write_record(&remote, &remote_bytes)?;
        write_record(&companion, &companion_bytes)?;
        info!(
            "staged remote config for interface {ifname} of container {}",
            aux.container_id()
        );
        Ok(())
    }

    /// Directories searched for pending configs: the shared directory, then every directory
    /// under the container root.
    fn pending_dirs(&self) -> Result<Vec<PathBuf>, StoreError> {
        let mut dirs = vec![self.shared_dir().to_path_buf()];
        let root = &self.config().container_root;
        let entries = match std::fs::read_dir(root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(dirs),
            Err(e) => return Err(StoreError::io(root)(e)),
        };
        for entry in entries {
            let entry = entry.map_err(StoreError::io(root))?;
            let path = entry.path();
            if path != self.shared_dir() && path.is_dir() {
                dirs.push(path);
            }
        }
        Ok(dirs)
    }

    /// Claim one pending remote config, if any.
    ///
    /// The configuration and its auxiliary data are decoded and then deleted: a configuration
    /// is delivered at most once. A configuration claimed concurrently by another process is
    /// skipped in favor of the next one.
    ///
    /// # Errors
    ///
    /// * [`StoreError::MalformedRecord`] if a record does not decode. Undecodable records are
    ///   left in place.
    /// * [`StoreError::MissingCompanionRecord`] if the remote config was claimed but has no
    ///   auxiliary data. The remote config remains deleted.
    /// * [`StoreError::Io`] on filesystem failures.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn claim_pending_remote_config<C: DeserializeOwned>(
        &self,
    ) -> Result<Option<PendingConfig<C>>, StoreError> {
        for dir in self.pending_dirs()? {
            for ifname in staged_in(&dir)? {
                match self.claim_in(&dir, ifname)? {
                    Claim::Claimed(pending) => return Ok(Some(pending)),
                    Claim::Lost => {}
                }
            }
        }
        debug!("no pending remote config");
        Ok(None)
    }

    fn claim_in<C: DeserializeOwned>(
        &self,
        dir: &Path,
        ifname: InterfaceName,
    ) -> Result<Claim<C>, StoreError> {
        let Some(lock) = DirLock::acquire_live(dir)? else {
            trace!("{} vanished", dir.display());
            return Ok(Claim::Lost);
        };
        let remote = dir.join(staged_record_file(StagedKind::RemoteConfig, &ifname));
        let Some(bytes) = read_record(&remote)? else {
            debug!("lost the race for {}", remote.display());
            return Ok(Claim::Lost);
        };
        let config: C = codec::decode(RecordKind::RemoteConfig, &bytes).map_err(malformed(&remote))?;
        if !reap_file(&remote)? {
            debug!("lost the race for {}", remote.display());
            return Ok(Claim::Lost);
        }

        let companion = dir.join(staged_record_file(StagedKind::AuxiliaryData, &ifname));
        let Some(bytes) = read_record(&companion)? else {
            warn!(
                "claimed {} but {} is missing",
                remote.display(),
                companion.display()
            );
            return Err(StoreError::MissingCompanionRecord { remote, companion });
        };
        let aux: AuxiliaryData =
            codec::decode(RecordKind::AuxiliaryData, &bytes).map_err(malformed(&companion))?;
        reap_file(&companion)?;
        // reaped under the lock: a stager waiting on it sees the directory gone and recreates it
        if dir != self.shared_dir() {
            reap_dir_if_empty(dir)?;
        }
        drop(lock);
        info!(
            "claimed remote config for interface {ifname} of container {}",
            aux.container_id()
        );
        Ok(Claim::Claimed(PendingConfig {
            ifname,
            config,
            aux,
        }))
    }

    /// Drop everything staged for `container`, claimed or not. Succeeds if nothing was staged.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn discard_container_state(&self, container: &ContainerId) -> Result<(), StoreError> {
        let dir = self.staging_dir(container)?;
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!("discarded staged state of container {container}");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("nothing staged for container {container}");
                Ok(())
            }
            Err(e) => Err(StoreError::io(dir)(e)),
        }
    }
}
