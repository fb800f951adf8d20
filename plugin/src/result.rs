// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! What the plugin prints on its standard output: a result on success, an error object
//! otherwise.

use crate::dispatch::DispatchError;
use crate::engine::EngineError;
use args::InvalidCmdArguments;
use netconf::NetConfError;
use serde::{Deserialize, Serialize};
use store::{AddressFamily, InterfaceName, IpAssignment, StoreError};

/// Version of the result format used when the configuration does not name one.
pub const DEFAULT_CNI_VERSION: &str = "1.0.0";
/// Versions of the result format the plugin can produce.
pub const SUPPORTED_VERSIONS: [&str; 5] = ["0.3.0", "0.3.1", "0.4.0", "1.0.0", "1.1.0"];

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionReply {
    pub cni_version: String,
    pub supported_versions: Vec<String>,
}

impl Default for VersionReply {
    fn default() -> Self {
        VersionReply {
            cni_version: DEFAULT_CNI_VERSION.to_string(),
            supported_versions: SUPPORTED_VERSIONS.iter().map(ToString::to_string).collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultInterface {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultIp {
    /// Only written for results older than 1.0.0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<usize>,
}

/// Result of a successful add.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CniResult {
    pub cni_version: String,
    pub interfaces: Vec<ResultInterface>,
    pub ips: Vec<ResultIp>,
}

impl CniResult {
    /// The result of adding interface `ifname` in `sandbox`, with address `ip`.
    #[must_use]
    pub fn new(
        cni_version: &str,
        ifname: &InterfaceName,
        mac: Option<String>,
        sandbox: Option<String>,
        ip: Option<&IpAssignment>,
    ) -> Self {
        let cni_version = if cni_version.is_empty() {
            DEFAULT_CNI_VERSION
        } else {
            cni_version
        };
        let legacy = cni_version.starts_with("0.");
        CniResult {
            cni_version: cni_version.to_string(),
            interfaces: vec![ResultInterface {
                name: ifname.to_string(),
                mac,
                sandbox,
            }],
            ips: ip
                .map(|ip| ResultIp {
                    version: legacy.then(|| match ip.family() {
                        AddressFamily::Ipv4 => "4".to_string(),
                        AddressFamily::Ipv6 => "6".to_string(),
                    }),
                    address: ip.to_string(),
                    interface: Some(0),
                })
                .into_iter()
                .collect(),
        }
    }
}

/// Everything that can make an invocation of the plugin fail.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PluginError {
    #[error(transparent)]
    Arguments(#[from] InvalidCmdArguments),
    #[error("failed to read the network configuration: {0}")]
    Stdin(std::io::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

// well known error codes
const CODE_INVALID_ENVIRONMENT: u32 = 4;
const CODE_IO_FAILURE: u32 = 5;
const CODE_DECODING_FAILURE: u32 = 6;
const CODE_INVALID_NETWORK_CONFIG: u32 = 7;
// plugin specific error codes
const CODE_MALFORMED_RECORD: u32 = 100;
const CODE_MISSING_COMPANION: u32 = 101;
const CODE_ENGINE_FAILURE: u32 = 102;
const CODE_IPAM_FAILURE: u32 = 103;

fn store_error_code(error: &StoreError) -> u32 {
    match error {
        StoreError::Io { .. } => CODE_IO_FAILURE,
        StoreError::MalformedRecord { .. } => CODE_MALFORMED_RECORD,
        StoreError::MissingCompanionRecord { .. } => CODE_MISSING_COMPANION,
        StoreError::InvalidName(_) => CODE_INVALID_ENVIRONMENT,
    }
}

impl PluginError {
    /// The error code reported to the runtime.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            PluginError::Arguments(_) => CODE_INVALID_ENVIRONMENT,
            PluginError::Stdin(_) => CODE_IO_FAILURE,
            PluginError::Dispatch(error) => match error {
                DispatchError::NetConf(NetConfError::Decode(_)) => CODE_DECODING_FAILURE,
                DispatchError::NetConf(NetConfError::Missing(_))
                | DispatchError::Engine(EngineError::NoProvisioner(_))
                | DispatchError::InvalidName(_) => CODE_INVALID_NETWORK_CONFIG,
                DispatchError::Store(error) => store_error_code(error),
                DispatchError::Engine(_) => CODE_ENGINE_FAILURE,
                DispatchError::Ipam(_) => CODE_IPAM_FAILURE,
            },
        }
    }

    /// Further details: the underlying errors not already spelled out in the message.
    #[must_use]
    pub fn details(&self) -> Option<String> {
        let mut known = self.to_string();
        let mut details = vec![];
        let mut source = std::error::Error::source(self);
        while let Some(error) = source {
            let text = error.to_string();
            if !known.contains(&text) {
                known.push_str(&text);
                details.push(text);
            }
            source = error.source();
        }
        (!details.is_empty()).then(|| details.join(": "))
    }
}

/// Error object printed in place of a result.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReply {
    pub cni_version: String,
    pub code: u32,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorReply {
    #[must_use]
    pub fn new(cni_version: &str, error: &PluginError) -> Self {
        ErrorReply {
            cni_version: if cni_version.is_empty() {
                DEFAULT_CNI_VERSION.to_string()
            } else {
                cni_version.to_string()
            },
            code: error.code(),
            msg: error.to_string(),
            details: error.details(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use netconf::RequiredField;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::str::FromStr;

    #[test]
    fn test_result() {
        let ifname = InterfaceName::new("net0").unwrap();
        let ip = IpAssignment::new(ipnet::IpNet::from_str("10.0.0.5/24").unwrap());

        let result = CniResult::new("1.0.0", &ifname, None, Some("/var/run/netns/c1".to_string()), Some(&ip));
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "cniVersion": "1.0.0",
                "interfaces": [{"name": "net0", "sandbox": "/var/run/netns/c1"}],
                "ips": [{"address": "10.0.0.5/24", "interface": 0}]
            })
        );

        let result = CniResult::new("0.3.1", &ifname, None, None, Some(&ip));
        assert_eq!(result.ips[0].version.as_deref(), Some("4"));

        let result = CniResult::new("", &ifname, None, None, None);
        assert_eq!(result.cni_version, DEFAULT_CNI_VERSION);
        assert!(result.ips.is_empty());
    }

    #[test]
    fn test_error_codes() {
        let missing = PluginError::from(DispatchError::NetConf(NetConfError::Missing(
            RequiredField::Engine,
        )));
        assert_eq!(missing.code(), 7);

        let malformed = PluginError::from(DispatchError::Store(StoreError::MalformedRecord {
            path: PathBuf::from("/var/run/vpp/cni/data/local-c1-net0.json"),
            kind: store::RecordKind::Interface,
            reason: "expected value".to_string(),
        }));
        assert_eq!(malformed.code(), 100);

        let reply = ErrorReply::new("0.4.0", &malformed);
        assert_eq!(reply.cni_version, "0.4.0");
        assert_eq!(reply.code, 100);
        assert!(reply.msg.contains("local-c1-net0.json"), "{}", reply.msg);

        let json = serde_json::to_value(ErrorReply::new("", &missing)).unwrap();
        assert_eq!(json["cniVersion"], DEFAULT_CNI_VERSION);
        assert_eq!(json["code"], 7);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("dataplane socket closed")]
    struct Cause;

    #[derive(Debug, thiserror::Error)]
    #[error("helper went away")]
    struct Wrapped(#[source] Cause);

    #[test]
    fn test_details_do_not_repeat_the_message() {
        let io = PluginError::from(DispatchError::Store(StoreError::Io {
            path: PathBuf::from("/var/run/vpp/cni/data"),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        }));
        assert_eq!(io.code(), 5);
        assert!(io.to_string().contains("/var/run/vpp/cni/data"));
        assert_eq!(io.details(), None);
        assert_eq!(ErrorReply::new("", &io).details, None);

        let nested = PluginError::from(DispatchError::Store(StoreError::Io {
            path: PathBuf::from("/var/run/vpp/cni/data"),
            source: std::io::Error::other(Wrapped(Cause)),
        }));
        assert!(nested.to_string().contains("helper went away"));
        assert_eq!(nested.details().as_deref(), Some("dataplane socket closed"));
    }

    #[test]
    fn test_version() {
        let json = serde_json::to_value(VersionReply::default()).unwrap();
        assert_eq!(json["cniVersion"], "1.0.0");
        assert_eq!(json["supportedVersions"][1], "0.3.1");
    }
}
