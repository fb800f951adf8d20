// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Network configuration types, as found on the standard input of the plugin

use serde::{Deserialize, Serialize};

/// Fields which older releases write as empty strings when unset.
///
/// Empty (or blank) strings read as `None`, anything else must parse. `None` is not written.
pub(crate) mod blank {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::fmt::Display;
    use std::str::FromStr;

    #[allow(clippy::ref_option)]
    pub(crate) fn serialize<S, T>(value: &Option<T>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        T: Display,
    {
        match value {
            Some(value) => serializer.collect_str(value),
            None => serializer.serialize_none(),
        }
    }

    pub(crate) fn deserialize<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
    where
        D: Deserializer<'de>,
        T: FromStr,
        T::Err: Display,
    {
        match Option::<String>::deserialize(deserializer)?.as_deref().map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw
                .parse()
                .map(Some)
                .map_err(|e| D::Error::custom(format!("invalid value '{raw}': {e}"))),
        }
    }
}

/// Dataplane owning an interface.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum Engine {
    Vpp,
    OvsDpdk,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InterfaceType {
    Memif,
    Vhostuser,
}

/// How the interface is attached on the dataplane side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum NetType {
    /// Standalone interface.
    Interface,
    /// Member of a bridge domain.
    Bridge,
}

/// Where an interface is to be provisioned, relative to the invocation reading the config.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Location {
    /// By this invocation.
    #[default]
    Local,
    /// By a later invocation on the container side.
    Remote,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum MemifRole {
    Master,
    Slave,
}

impl MemifRole {
    /// The role of the other end of the memif.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            MemifRole::Master => MemifRole::Slave,
            MemifRole::Slave => MemifRole::Master,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "kebab-case")]
pub enum MemifMode {
    Ethernet,
    Ip,
    InjectPunt,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum VhostMode {
    Client,
    Server,
}

impl VhostMode {
    /// The mode of the other end of the vhost-user socket.
    #[must_use]
    pub fn peer(self) -> Self {
        match self {
            VhostMode::Client => VhostMode::Server,
            VhostMode::Server => VhostMode::Client,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemifConf {
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub role: Option<MemifRole>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub mode: Option<MemifMode>,
    #[serde(default)]
    pub socket_id: u32,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub socket_file: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VhostConf {
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub mode: Option<VhostMode>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub socket_file: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConf {
    #[serde(default)]
    pub bridge_id: u32,
    /// Zero means untagged.
    #[serde(default)]
    pub vlan_id: u16,
}

/// One side (host or container) of a user space interface.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSpaceConf {
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub engine: Option<Engine>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub iftype: Option<InterfaceType>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub net_type: Option<NetType>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default)]
    pub memif: MemifConf,
    #[serde(default)]
    pub vhost: VhostConf,
    #[serde(default)]
    pub bridge: BridgeConf,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub ifname: Option<String>,
    #[serde(default, with = "blank", skip_serializing_if = "Option::is_none")]
    pub ifmac: Option<String>,
}

impl UserSpaceConf {
    /// True if nothing at all is configured for this side.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &UserSpaceConf::default()
    }

    /// The location of the interface; unset means [`Location::Local`].
    #[must_use]
    pub fn location(&self) -> Location {
        self.location.unwrap_or_default()
    }

    /// The network type of the interface; unset means [`NetType::Interface`].
    #[must_use]
    pub fn net_type(&self) -> NetType {
        self.net_type.unwrap_or(NetType::Interface)
    }
}

/// Address management section. Only the plugin type is interpreted, everything else is handed
/// to the address management plugin untouched.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Ipam {
    #[serde(
        rename = "type",
        default,
        with = "blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub plugin: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Ipam {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.plugin.is_none() && self.extra.is_empty()
    }
}

/// Network configuration of the plugin.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetConf {
    #[serde(default)]
    pub cni_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub plugin: String,
    #[serde(default, skip_serializing_if = "Ipam::is_empty")]
    pub ipam: Ipam,
    /// Interface on the host side.
    #[serde(default)]
    pub host: UserSpaceConf,
    /// Interface on the container side.
    #[serde(default, skip_serializing_if = "UserSpaceConf::is_empty")]
    pub container: UserSpaceConf,
    /// Name of the interface, overriding the one given by the runtime.
    #[serde(
        rename = "if0name",
        default,
        with = "blank",
        skip_serializing_if = "Option::is_none"
    )]
    pub if0name: Option<String>,
    /// Anything else (runtime config, previous results, ...), preserved as is.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}
