// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Delegation of address management to another plugin.

use args::Attachment;
use serde::Deserialize;
use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use store::IpAssignment;
use tracing::{debug, info};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum IpamError {
    #[error("address management plugin {0} not found in CNI_PATH")]
    NotFound(String),
    #[error("failed to run address management plugin {}: {source}", plugin.display())]
    Spawn {
        plugin: PathBuf,
        source: std::io::Error,
    },
    #[error("address management plugin {} failed: {msg}", plugin.display())]
    Failed { plugin: PathBuf, msg: String },
    #[error("unexpected result from address management plugin {}: {reason}", plugin.display())]
    BadResult { plugin: PathBuf, reason: String },
}

/// Address management, as seen by the dispatcher.
pub trait Ipam {
    /// Allocate an address, as configured by the network configuration `stdin`.
    ///
    /// # Errors
    ///
    /// If the allocation fails, or if it yields no address.
    fn add(&self, plugin: &str, stdin: &[u8]) -> Result<IpAssignment, IpamError>;

    /// Release what [`Ipam::add`] allocated.
    ///
    /// # Errors
    ///
    /// If the release fails.
    fn del(&self, plugin: &str, stdin: &[u8]) -> Result<(), IpamError>;
}

#[derive(Deserialize)]
struct AddressEntry {
    address: ipnet::IpNet,
}

#[derive(Deserialize)]
struct LegacyAddress {
    ip: ipnet::IpNet,
}

/// The part of a plugin result holding the addresses, current or pre 0.3.0.
#[derive(Deserialize)]
struct AddressesResult {
    #[serde(default)]
    ips: Vec<AddressEntry>,
    ip4: Option<LegacyAddress>,
    ip6: Option<LegacyAddress>,
}

/// Error object printed by a failed plugin.
#[derive(Deserialize)]
struct ErrorResult {
    code: u32,
    msg: String,
}

/// Address management by a plugin found on `CNI_PATH`, run with the environment of the current
/// invocation.
#[derive(Clone, Debug, Default)]
pub struct ExecIpam {
    env: Vec<(&'static str, String)>,
    cni_path: Vec<PathBuf>,
}

impl ExecIpam {
    #[must_use]
    pub fn new(attachment: &Attachment) -> Self {
        let cni_args = attachment
            .cni_args
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(";");
        let cni_path = std::env::join_paths(&attachment.cni_path)
            .map(|path| path.to_string_lossy().into_owned())
            .unwrap_or_default();
        let netns = attachment
            .netns
            .as_ref()
            .map(|ns| ns.display().to_string())
            .unwrap_or_default();
        ExecIpam {
            env: vec![
                ("CNI_CONTAINERID", attachment.container_id.to_string()),
                ("CNI_NETNS", netns),
                ("CNI_IFNAME", attachment.ifname.to_string()),
                ("CNI_ARGS", cni_args),
                ("CNI_PATH", cni_path),
            ],
            cni_path: attachment.cni_path.clone(),
        }
    }

    fn find(&self, plugin: &str) -> Result<PathBuf, IpamError> {
        if plugin.contains('/') {
            return Err(IpamError::NotFound(plugin.to_string()));
        }
        self.cni_path
            .iter()
            .map(|dir| dir.join(plugin))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| IpamError::NotFound(plugin.to_string()))
    }

    fn exec(&self, command: &str, plugin: &str, stdin: &[u8]) -> Result<Vec<u8>, IpamError> {
        let path = self.find(plugin)?;
        debug!("delegating {command} to {}", path.display());
        let spawn_error = |source| IpamError::Spawn {
            plugin: path.clone(),
            source,
        };
        let mut child = Command::new(&path)
            .envs(self.env.iter().map(|(key, value)| (*key, value)))
            .env("CNI_COMMAND", command)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;
        if let Some(mut input) = child.stdin.take() {
            input.write_all(stdin).map_err(spawn_error)?;
        }
        let output = child.wait_with_output().map_err(spawn_error)?;
        if !output.status.success() {
            let msg = match serde_json::from_slice::<ErrorResult>(&output.stdout) {
                Ok(error) => format!("{} (code {})", error.msg, error.code),
                Err(_) => output.status.to_string(),
            };
            return Err(IpamError::Failed { plugin: path, msg });
        }
        Ok(output.stdout)
    }
}

/// The first address of a plugin result.
fn first_address(result: &[u8]) -> Result<IpAssignment, String> {
    let result: AddressesResult = serde_json::from_slice(result).map_err(|e| e.to_string())?;
    result
        .ips
        .into_iter()
        .map(|entry| entry.address)
        .chain(result.ip4.map(|ip| ip.ip))
        .chain(result.ip6.map(|ip| ip.ip))
        .next()
        .map(IpAssignment::new)
        .ok_or_else(|| "no address in result".to_string())
}

impl Ipam for ExecIpam {
    #[tracing::instrument(level = "debug", skip(self, stdin))]
    fn add(&self, plugin: &str, stdin: &[u8]) -> Result<IpAssignment, IpamError> {
        let result = self.exec("ADD", plugin, stdin)?;
        let ip = first_address(&result).map_err(|reason| IpamError::BadResult {
            plugin: PathBuf::from(plugin),
            reason,
        })?;
        info!("{plugin} assigned {ip}");
        Ok(ip)
    }

    #[tracing::instrument(level = "debug", skip(self, stdin))]
    fn del(&self, plugin: &str, stdin: &[u8]) -> Result<(), IpamError> {
        self.exec("DEL", plugin, stdin)?;
        info!("{plugin} released its address");
        Ok(())
    }
}
