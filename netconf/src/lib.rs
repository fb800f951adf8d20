// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network configuration of the user space plugin.
//!
//! A configuration describes an interface pair: a `host` side, provisioned on the dataplane
//! running on the host, and an optional `container` side. When the host side is
//! [remote](Location::Remote), the container side is provisioned later, by an invocation running
//! for the container, from the [container view](NetConf::container_view) of the configuration.

#![deny(clippy::all, clippy::pedantic)]

mod conf;
mod view;

pub use conf::{
    BridgeConf, Engine, InterfaceType, Ipam, Location, MemifConf, MemifMode, MemifRole, NetConf,
    NetType, UserSpaceConf, VhostConf, VhostMode,
};

/// A field a usable configuration must set.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum RequiredField {
    #[strum(serialize = "host.engine")]
    Engine,
    #[strum(serialize = "host.iftype")]
    InterfaceType,
    #[strum(serialize = "host.memif.role")]
    MemifRole,
    #[strum(serialize = "host.memif.mode")]
    MemifMode,
    #[strum(serialize = "host.vhost.mode")]
    VhostMode,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum NetConfError {
    #[error("failed to load network configuration: {0}")]
    #[diagnostic(code(netconf::decode))]
    Decode(#[from] serde_json::Error),
    #[error("network configuration lacks {0}")]
    #[diagnostic(code(netconf::missing))]
    Missing(RequiredField),
}

impl NetConf {
    /// Parse and [validate](NetConf::validate) a configuration.
    ///
    /// # Errors
    ///
    /// [`NetConfError::Decode`] if the input is not a configuration; see [`NetConf::validate`]
    /// for the rest.
    pub fn from_slice(bytes: &[u8]) -> Result<NetConf, NetConfError> {
        let conf: NetConf = serde_json::from_slice(bytes)?;
        conf.validate()?;
        Ok(conf)
    }

    /// Check that the host side carries everything needed to provision it.
    ///
    /// # Errors
    ///
    /// [`NetConfError::Missing`] naming the first missing field.
    pub fn validate(&self) -> Result<(), NetConfError> {
        let host = &self.host;
        if host.engine.is_none() {
            return Err(NetConfError::Missing(RequiredField::Engine));
        }
        match host.iftype {
            None => Err(NetConfError::Missing(RequiredField::InterfaceType)),
            Some(InterfaceType::Memif) if host.memif.role.is_none() => {
                Err(NetConfError::Missing(RequiredField::MemifRole))
            }
            Some(InterfaceType::Memif) if host.memif.mode.is_none() => {
                Err(NetConfError::Missing(RequiredField::MemifMode))
            }
            Some(InterfaceType::Vhostuser) if host.vhost.mode.is_none() => {
                Err(NetConfError::Missing(RequiredField::VhostMode))
            }
            Some(_) => Ok(()),
        }
    }

    /// Name of the interface: `if0name` if configured, otherwise `runtime_ifname`.
    #[must_use]
    pub fn ifname<'a>(&'a self, runtime_ifname: &'a str) -> &'a str {
        self.if0name.as_deref().unwrap_or(runtime_ifname)
    }

    /// Serialize the configuration.
    ///
    /// # Errors
    ///
    /// Only fails if a preserved unknown field cannot be serialized, which does not happen for
    /// configurations parsed from JSON.
    pub fn to_vec(&self) -> Result<Vec<u8>, NetConfError> {
        Ok(serde_json::to_vec(self)?)
    }
}
