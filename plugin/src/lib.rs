// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Container network plugin provisioning user space interfaces (memif, vhost-user) on a VPP-like
//! or OVS-like dataplane.

#![deny(clippy::all, clippy::pedantic)]

pub mod dispatch;
pub mod engine;
pub mod ipam;
mod logging;
pub mod result;

pub use dispatch::{Applied, DispatchError, Dispatcher};
pub use engine::{
    EngineError, ExecEngine, InterfaceKind, InterfaceRequest, Provisioner, Provisioners, random_mac,
};
pub use ipam::{ExecIpam, Ipam, IpamError};
pub use logging::init_logging;
pub use result::{CniResult, ErrorReply, PluginError, VersionReply};

use args::{Invocation, LaunchConfiguration};
use store::Store;
use tracing::debug;

/// What to print on success.
#[derive(Debug)]
pub enum Reply {
    Added(CniResult),
    Version(VersionReply),
    /// Nothing to print.
    Done,
}

impl Reply {
    /// The JSON document to print, if any.
    ///
    /// # Errors
    ///
    /// If the reply can't be serialized.
    pub fn to_json(&self) -> Result<Option<String>, serde_json::Error> {
        match self {
            Reply::Added(result) => serde_json::to_string(result).map(Some),
            Reply::Version(version) => serde_json::to_string(version).map(Some),
            Reply::Done => Ok(None),
        }
    }
}

/// Run one invocation of the plugin, with the network configuration `stdin`.
///
/// # Errors
///
/// See [`DispatchError`].
pub fn run(
    launch: &LaunchConfiguration,
    stdin: &[u8],
    provisioners: Provisioners,
    ipam: &dyn Ipam,
) -> Result<Reply, PluginError> {
    let dispatcher = Dispatcher::new(Store::new(launch.store.clone()), provisioners);
    match &launch.invocation {
        Invocation::Version => Ok(Reply::Version(VersionReply::default())),
        Invocation::Add(attachment) => Ok(Reply::Added(
            dispatcher.cmd_add(attachment, stdin, ipam)?,
        )),
        Invocation::Del(attachment) => {
            dispatcher.cmd_del(attachment, stdin, ipam)?;
            Ok(Reply::Done)
        }
        Invocation::Check(attachment) => {
            dispatcher.cmd_check(attachment, stdin)?;
            Ok(Reply::Done)
        }
        Invocation::Gc | Invocation::Status => {
            debug!("nothing to do for {}", launch.invocation.command());
            Ok(Reply::Done)
        }
    }
}

/// The version of the result format requested by `stdin`, if it can be found.
#[must_use]
pub fn requested_cni_version(stdin: &[u8]) -> String {
    #[derive(serde::Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct Version {
        #[serde(default)]
        cni_version: String,
    }
    serde_json::from_slice::<Version>(stdin)
        .map(|v| v.cni_version)
        .unwrap_or_default()
}
