// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The records persisted by the store

use crate::naming::ContainerId;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Opaque, backend-assigned identifier of a provisioned interface (e.g. a VPP `sw_if_index`).
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterfaceHandle(u32);

impl InterfaceHandle {
    #[must_use]
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for InterfaceHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl Display for InterfaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What an "add" has to leave behind for the matching "delete" to tear the interface down.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceRecord {
    #[serde(rename = "swIfIndex")]
    pub handle: InterfaceHandle,
    /// Socket id the interface was attached to, if the backend uses them (memif).
    #[serde(
        rename = "memifSocketId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub socket_id: Option<u32>,
}

impl InterfaceRecord {
    #[must_use]
    pub fn new(handle: impl Into<InterfaceHandle>) -> Self {
        Self {
            handle: handle.into(),
            socket_id: None,
        }
    }

    #[must_use]
    pub fn with_socket_id(mut self, socket_id: u32) -> Self {
        self.socket_id = Some(socket_id);
        self
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum AddressFamily {
    Ipv4,
    Ipv6,
}

#[derive(Clone, Debug, Deserialize)]
struct IpAssignmentRepr {
    address: IpNet,
    family: AddressFamily,
}

/// Address assigned to the container interface by address management on the host side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "IpAssignmentRepr")]
pub struct IpAssignment {
    address: IpNet,
    family: AddressFamily,
}

impl IpAssignment {
    #[must_use]
    pub fn new(address: IpNet) -> Self {
        let family = match address {
            IpNet::V4(_) => AddressFamily::Ipv4,
            IpNet::V6(_) => AddressFamily::Ipv6,
        };
        Self { address, family }
    }

    #[must_use]
    pub fn address(&self) -> IpNet {
        self.address
    }

    #[must_use]
    pub fn prefix_len(&self) -> u8 {
        self.address.prefix_len()
    }

    #[must_use]
    pub fn family(&self) -> AddressFamily {
        self.family
    }
}

impl TryFrom<IpAssignmentRepr> for IpAssignment {
    type Error = String;

    fn try_from(value: IpAssignmentRepr) -> Result<Self, Self::Error> {
        let assignment = IpAssignment::new(value.address);
        if assignment.family == value.family {
            Ok(assignment)
        } else {
            Err(format!(
                "address {} does not belong to family {}",
                value.address, value.family
            ))
        }
    }
}

impl Display for IpAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.address)
    }
}

/// Data handed to the container side along with a staged network configuration, which does not
/// fit in the configuration itself.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryData {
    #[serde(rename = "containerId")]
    container_id: ContainerId,
    #[serde(rename = "ipData", default, skip_serializing_if = "Option::is_none")]
    ip: Option<IpAssignment>,
}

impl AuxiliaryData {
    #[must_use]
    pub fn new(container_id: ContainerId, ip: Option<IpAssignment>) -> Self {
        Self { container_id, ip }
    }

    /// Id of the container the configuration was staged for.
    #[must_use]
    pub fn container_id(&self) -> &ContainerId {
        &self.container_id
    }

    #[must_use]
    pub fn ip(&self) -> Option<&IpAssignment> {
        self.ip.as_ref()
    }
}
