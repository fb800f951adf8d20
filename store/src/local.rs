// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Local state store: backend handles kept between an "add" and the matching "delete"

use crate::codec;
use crate::error::StoreError;
use crate::files::{DirLock, read_record, write_record};
use crate::naming::{
    ContainerId, InterfaceName, RecordKind, interface_record_file, legacy_interface_record_file,
};
use crate::reaper::{reap_dir_if_empty, reap_file};
use crate::records::InterfaceRecord;
use crate::Store;
use tracing::{debug, info, warn};

impl Store {
    /// Persist the state of interface `ifname` of `container`.
    ///
    /// The shared directory is created if needed, and locked while the record is written. A
    /// record already saved under the same key is overwritten.
    #[tracing::instrument(level = "debug", skip(self, record), fields(handle = %record.handle))]
    pub fn save_interface_state(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
        record: &InterfaceRecord,
    ) -> Result<(), StoreError> {
        let dir = self.shared_dir();
        let path = dir.join(interface_record_file(container, ifname));
        let bytes = codec::encode(RecordKind::Interface, record).map_err(|e| {
            StoreError::MalformedRecord {
                path: path.clone(),
                kind: e.kind,
                reason: e.reason,
            }
        })?;
        let _lock = DirLock::acquire_created(dir)?;
        write_record(&path, &bytes)?;
        info!(
            "saved state of interface {ifname} of container {} (handle {})",
            container.prefix(),
            record.handle
        );
        Ok(())
    }

    /// Take the state of interface `ifname` of `container` out of the store.
    ///
    /// This read is destructive: on success the record is deleted, together with the shared
    /// directory if it is left empty. `Ok(None)` means that there is nothing to clean up, which
    /// is the normal outcome of a repeated delete.
    ///
    /// Records written in the legacy, container-less naming are found as well.
    ///
    /// # Errors
    ///
    /// [`StoreError::MalformedRecord`] if a record exists but does not decode; that file is left
    /// in place. [`StoreError::Io`] on filesystem failures.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn take_interface_state(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
    ) -> Result<Option<InterfaceRecord>, StoreError> {
        let dir = self.shared_dir();
        let Some(_lock) = DirLock::acquire_live(dir)? else {
            debug!("no shared directory at {}", dir.display());
            return Ok(None);
        };
        let candidates = [
            (dir.join(interface_record_file(container, ifname)), true),
            (dir.join(legacy_interface_record_file(ifname)), false),
        ];
        for (path, is_scoped) in candidates {
            let Some(bytes) = read_record(&path)? else {
                continue;
            };
            let record: InterfaceRecord =
                codec::decode(RecordKind::Interface, &bytes).map_err(|e| {
                    StoreError::MalformedRecord {
                        path: path.clone(),
                        kind: e.kind,
                        reason: e.reason,
                    }
                })?;
            if !reap_file(&path)? {
                warn!("state at {} was consumed concurrently", path.display());
                continue;
            }
            if !is_scoped {
                warn!(
                    "took legacy state {} for container {}: legacy records are not scoped by container",
                    path.display(),
                    container.prefix()
                );
            }
            reap_dir_if_empty(dir)?;
            info!(
                "took state of interface {ifname} of container {} (handle {})",
                container.prefix(),
                record.handle
            );
            return Ok(Some(record));
        }
        debug!(
            "no state for interface {ifname} of container {}",
            container.prefix()
        );
        Ok(None)
    }
}
