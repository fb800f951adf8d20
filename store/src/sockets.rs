// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Default location of vhost-user sockets.
//!
//! A vhost-user interface configured without a socket file gets one in the staging directory of
//! its container, named after the container and the interface. From inside the container, the
//! same socket is found in the shared directory.

use crate::error::StoreError;
use crate::files::{DirLock, ensure_dir};
use crate::naming::{ContainerId, InterfaceName, vhost_socket_file};
use crate::reaper::{reap_dir_if_empty, reap_file};
use crate::Store;
use std::path::PathBuf;
use tracing::debug;

impl Store {
    /// Host side path of the default socket of interface `ifname` of `container`.
    pub fn vhost_socket_path(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
    ) -> Result<PathBuf, StoreError> {
        Ok(self
            .staging_dir(container)?
            .join(vhost_socket_file(container, ifname)))
    }

    /// Like [`Store::vhost_socket_path`], creating the directory the socket goes in.
    pub fn prepare_vhost_socket(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
    ) -> Result<PathBuf, StoreError> {
        let dir = self.staging_dir(container)?;
        ensure_dir(&dir)?;
        let path = dir.join(vhost_socket_file(container, ifname));
        debug!("vhost-user socket of {ifname} at {}", path.display());
        Ok(path)
    }

    /// Remove the default socket of interface `ifname` of `container`, and its directory if
    /// nothing else is left in it. Nothing to remove is fine.
    pub fn release_vhost_socket(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
    ) -> Result<(), StoreError> {
        let dir = self.staging_dir(container)?;
        reap_file(&dir.join(vhost_socket_file(container, ifname)))?;
        if let Some(_lock) = DirLock::acquire_live(&dir)? {
            reap_dir_if_empty(&dir)?;
        }
        Ok(())
    }

    /// Container side path of the default socket of interface `ifname` of `container`.
    #[must_use]
    pub fn shared_vhost_socket_path(
        &self,
        container: &ContainerId,
        ifname: &InterfaceName,
    ) -> PathBuf {
        self.shared_dir().join(vhost_socket_file(container, ifname))
    }
}
