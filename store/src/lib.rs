// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A small, durable store used to hand state from one plugin invocation to another.
//!
//! Plugin invocations are separate, short-lived processes. This crate lets them cooperate through
//! the filesystem:
//!
//! * The [local state store](Store::save_interface_state) keeps the backend handles created by an
//!   "add" so that the matching "delete" can tear the interface down.
//! * The [remote handoff queue](Store::stage_remote_config) stages a configuration for the
//!   container side, where a later, independent invocation
//!   [claims](Store::claim_pending_remote_config) it.
//! * Vhost-user interfaces configured without a socket file get a
//!   [default one](Store::vhost_socket_path) next to the staged records of their container.
//!
//! All reads of records are destructive: a record is delivered at most once.
//!
//! The store is a coordination primitive between trusting processes on a single host. It is not
//! a general purpose key-value store.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]

pub mod codec;
mod error;
mod files;
mod local;
pub mod naming;
pub mod reaper;
mod records;
mod remote;
mod sockets;

pub use error::StoreError;
pub use naming::{ContainerId, InterfaceName, InvalidName, RecordKind, StagedKind};
pub use records::{AddressFamily, AuxiliaryData, InterfaceHandle, InterfaceRecord, IpAssignment};
pub use remote::PendingConfig;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default directory for interface state, and where the container side finds staged records.
pub const DEFAULT_SHARED_DIR: &str = "/var/run/vpp/cni/data";
/// Default root of the per-container staging directories.
pub const DEFAULT_CONTAINER_ROOT: &str = "/var/run/vpp/cni";

/// Location of the directories used by a [`Store`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Directory holding interface state. From inside a container, it is also where the staged
    /// records of that container are visible.
    pub shared_dir: PathBuf,
    /// Root of the per-container directories into which remote configs are staged.
    pub container_root: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            shared_dir: PathBuf::from(DEFAULT_SHARED_DIR),
            container_root: PathBuf::from(DEFAULT_CONTAINER_ROOT),
        }
    }
}

impl StoreConfig {
    /// A configuration with both directories under `root`, as used for hermetic setups.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            shared_dir: root.join("data"),
            container_root: root.to_path_buf(),
        }
    }
}

/// Handle on the filesystem state shared by plugin invocations.
///
/// A `Store` holds no state besides its configuration: every operation goes to the filesystem.
#[derive(Clone, Debug)]
pub struct Store {
    config: StoreConfig,
}

impl Store {
    #[must_use]
    pub fn new(config: StoreConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    #[must_use]
    pub fn shared_dir(&self) -> &Path {
        &self.config.shared_dir
    }

    /// The staging directory of the given container.
    #[must_use]
    pub fn container_dir(&self, container: &ContainerId) -> PathBuf {
        self.config.container_root.join(container.as_str())
    }
}
