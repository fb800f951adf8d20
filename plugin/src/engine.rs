// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Provisioning of interfaces on a dataplane.

use netconf::{
    BridgeConf, Engine, InterfaceType, MemifMode, MemifRole, NetConfError, NetType, RequiredField,
    UserSpaceConf, VhostMode,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use rand::Rng;
use std::process::{Command, Output};
use store::{ContainerId, InterfaceName, InterfaceRecord, IpAssignment};
use tracing::{debug, info};

/// A random, locally administered, unicast MAC address.
#[must_use]
pub fn random_mac() -> String {
    let mut octets = [0u8; 6];
    rand::rng().fill_bytes(&mut octets);
    octets[0] = (octets[0] | 0x02) & 0xfe;
    octets
        .iter()
        .map(|octet| format!("{octet:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// The flavor of a user space interface, with its parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InterfaceKind {
    Memif {
        role: MemifRole,
        mode: MemifMode,
        socket_id: u32,
        socket_file: Option<String>,
    },
    Vhost {
        mode: VhostMode,
        socket_file: Option<String>,
    },
}

/// What a dataplane needs to know to create (or delete) an interface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InterfaceRequest {
    pub container_id: ContainerId,
    pub ifname: InterfaceName,
    pub kind: InterfaceKind,
    /// Bridge domain to attach the interface to, if any.
    pub bridge: Option<BridgeConf>,
    pub mac: Option<String>,
    pub ip: Option<IpAssignment>,
}

impl InterfaceRequest {
    /// Build the request for the interface described by `conf`.
    ///
    /// # Errors
    ///
    /// [`NetConfError::Missing`] if `conf` lacks what its interface type requires.
    pub fn new(
        container_id: ContainerId,
        ifname: InterfaceName,
        conf: &UserSpaceConf,
        ip: Option<IpAssignment>,
    ) -> Result<InterfaceRequest, NetConfError> {
        let missing = NetConfError::Missing;
        let kind = match conf.iftype {
            None => return Err(missing(RequiredField::InterfaceType)),
            Some(InterfaceType::Memif) => InterfaceKind::Memif {
                role: conf.memif.role.ok_or(missing(RequiredField::MemifRole))?,
                mode: conf.memif.mode.ok_or(missing(RequiredField::MemifMode))?,
                socket_id: conf.memif.socket_id,
                socket_file: conf.memif.socket_file.clone(),
            },
            Some(InterfaceType::Vhostuser) => InterfaceKind::Vhost {
                mode: conf.vhost.mode.ok_or(missing(RequiredField::VhostMode))?,
                socket_file: conf.vhost.socket_file.clone(),
            },
        };
        let bridge = match conf.net_type() {
            NetType::Bridge => Some(conf.bridge.clone()),
            NetType::Interface => None,
        };
        Ok(InterfaceRequest {
            container_id,
            ifname,
            kind,
            bridge,
            mac: conf.ifmac.clone(),
            ip,
        })
    }

    /// True for a vhost-user interface configured without a socket file.
    #[must_use]
    pub fn uses_default_socket(&self) -> bool {
        matches!(self.kind, InterfaceKind::Vhost { socket_file: None, .. })
    }

    /// Use the socket at `path` for a vhost-user interface configured without one.
    #[must_use]
    pub fn with_default_socket(mut self, path: &Path) -> Self {
        if let InterfaceKind::Vhost { socket_file, .. } = &mut self.kind {
            socket_file.get_or_insert_with(|| path.display().to_string());
        }
        self
    }

    /// Give a vhost-user interface configured without a MAC address a random one.
    #[must_use]
    pub fn with_default_mac(mut self) -> Self {
        if matches!(self.kind, InterfaceKind::Vhost { .. }) && self.mac.is_none() {
            self.mac = Some(random_mac());
        }
        self
    }
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum EngineError {
    #[error("failed to run {}: {source}", helper.display())]
    Spawn {
        helper: PathBuf,
        source: std::io::Error,
    },
    #[error("{} {action} failed ({status}): {stderr}", helper.display())]
    Failed {
        helper: PathBuf,
        action: &'static str,
        status: std::process::ExitStatus,
        stderr: String,
    },
    #[error("{} returned no interface handle: \"{output}\"", helper.display())]
    BadOutput { helper: PathBuf, output: String },
    #[error("no provisioner for engine {0}")]
    #[diagnostic(help("check the engine named in the network configuration"))]
    NoProvisioner(Engine),
}

/// Something able to create and delete interfaces on a dataplane.
pub trait Provisioner {
    /// Create the interface. The returned record is what [`Provisioner::del_interface`] needs to
    /// delete it.
    ///
    /// # Errors
    ///
    /// If the interface could not be created.
    fn add_interface(&self, request: &InterfaceRequest) -> Result<InterfaceRecord, EngineError>;

    /// Delete an interface created by [`Provisioner::add_interface`].
    ///
    /// # Errors
    ///
    /// If the interface could not be deleted.
    fn del_interface(
        &self,
        request: &InterfaceRequest,
        record: &InterfaceRecord,
    ) -> Result<(), EngineError>;
}

/// The provisioner of each engine.
#[derive(Default)]
pub struct Provisioners {
    by_engine: BTreeMap<Engine, Box<dyn Provisioner>>,
}

impl Provisioners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Provisioners running the given helper programs.
    #[must_use]
    pub fn exec(vpp_helper: &Path, ovs_helper: &Path) -> Self {
        let mut provisioners = Self::new();
        provisioners.register(Engine::Vpp, ExecEngine::new(vpp_helper));
        provisioners.register(Engine::OvsDpdk, ExecEngine::new(ovs_helper));
        provisioners
    }

    pub fn register(&mut self, engine: Engine, provisioner: impl Provisioner + 'static) {
        self.by_engine.insert(engine, Box::new(provisioner));
    }

    /// The provisioner of `engine`.
    ///
    /// # Errors
    ///
    /// [`EngineError::NoProvisioner`] if none is registered.
    pub fn get(&self, engine: Engine) -> Result<&dyn Provisioner, EngineError> {
        self.by_engine
            .get(&engine)
            .map(AsRef::as_ref)
            .ok_or(EngineError::NoProvisioner(engine))
    }
}

/// A provisioner running a helper program.
///
/// Creation runs `helper create` with the request as options. The helper prints the handle of
/// the new interface on its standard output. Deletion runs `helper delete --handle <handle>`,
/// with the same options.
#[derive(Clone, Debug)]
pub struct ExecEngine {
    helper: PathBuf,
}

impl ExecEngine {
    #[must_use]
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    fn options(request: &InterfaceRequest) -> Vec<String> {
        let mut options = vec![
            "--container-id".to_string(),
            request.container_id.to_string(),
            "--ifname".to_string(),
            request.ifname.to_string(),
        ];
        match &request.kind {
            InterfaceKind::Memif {
                role,
                mode,
                socket_id,
                socket_file,
            } => {
                options.extend([
                    "--iftype".to_string(),
                    InterfaceType::Memif.to_string(),
                    "--role".to_string(),
                    role.to_string(),
                    "--mode".to_string(),
                    mode.to_string(),
                    "--socket-id".to_string(),
                    socket_id.to_string(),
                ]);
                if let Some(file) = socket_file {
                    options.extend(["--socket-file".to_string(), file.clone()]);
                }
            }
            InterfaceKind::Vhost { mode, socket_file } => {
                options.extend([
                    "--iftype".to_string(),
                    InterfaceType::Vhostuser.to_string(),
                    "--mode".to_string(),
                    mode.to_string(),
                ]);
                if let Some(file) = socket_file {
                    options.extend(["--socket-file".to_string(), file.clone()]);
                }
            }
        }
        if let Some(bridge) = &request.bridge {
            options.extend(["--bridge-id".to_string(), bridge.bridge_id.to_string()]);
            if bridge.vlan_id != 0 {
                options.extend(["--vlan-id".to_string(), bridge.vlan_id.to_string()]);
            }
        }
        if let Some(mac) = &request.mac {
            options.extend(["--mac".to_string(), mac.clone()]);
        }
        if let Some(ip) = &request.ip {
            options.extend(["--ip".to_string(), ip.to_string()]);
        }
        options
    }

    fn run(&self, action: &'static str, args: &[String]) -> Result<Output, EngineError> {
        debug!("running {} {action} {}", self.helper.display(), args.join(" "));
        let output = Command::new(&self.helper)
            .arg(action)
            .args(args)
            .output()
            .map_err(|source| EngineError::Spawn {
                helper: self.helper.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(EngineError::Failed {
                helper: self.helper.clone(),
                action,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(output)
    }
}

impl Provisioner for ExecEngine {
    #[tracing::instrument(level = "debug", skip(self), fields(helper = %self.helper.display()))]
    fn add_interface(&self, request: &InterfaceRequest) -> Result<InterfaceRecord, EngineError> {
        let output = self.run("create", &Self::options(request))?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let handle = stdout
            .split_whitespace()
            .next()
            .and_then(|token| token.parse::<u32>().ok())
            .ok_or_else(|| EngineError::BadOutput {
                helper: self.helper.clone(),
                output: stdout.trim().to_string(),
            })?;
        let record = match request.kind {
            InterfaceKind::Memif { socket_id, .. } => {
                InterfaceRecord::new(handle).with_socket_id(socket_id)
            }
            InterfaceKind::Vhost { .. } => InterfaceRecord::new(handle),
        };
        info!(
            "created interface {} of container {} (handle {handle})",
            request.ifname,
            request.container_id.prefix()
        );
        Ok(record)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(helper = %self.helper.display()))]
    fn del_interface(
        &self,
        request: &InterfaceRequest,
        record: &InterfaceRecord,
    ) -> Result<(), EngineError> {
        let mut args = vec!["--handle".to_string(), record.handle.to_string()];
        args.extend(Self::options(request));
        self.run("delete", &args)?;
        info!(
            "deleted interface {} of container {} (handle {})",
            request.ifname,
            request.container_id.prefix(),
            record.handle
        );
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use netconf::{MemifConf, VhostConf};
    use pretty_assertions::assert_eq;
    use std::os::unix::fs::PermissionsExt;

    fn memif_conf() -> UserSpaceConf {
        UserSpaceConf {
            engine: Some(Engine::Vpp),
            iftype: Some(InterfaceType::Memif),
            net_type: Some(NetType::Bridge),
            memif: MemifConf {
                role: Some(MemifRole::Master),
                mode: Some(MemifMode::Ethernet),
                socket_id: 2,
                socket_file: None,
            },
            bridge: BridgeConf {
                bridge_id: 4,
                vlan_id: 0,
            },
            ..Default::default()
        }
    }

    fn request(conf: &UserSpaceConf) -> Result<InterfaceRequest, NetConfError> {
        InterfaceRequest::new(
            ContainerId::new("c1").unwrap(),
            InterfaceName::new("net0").unwrap(),
            conf,
            None,
        )
    }

    fn helper(dir: &Path, script: &str) -> PathBuf {
        let path = dir.join("helper");
        std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[test]
    fn test_request() {
        let request = request(&memif_conf()).unwrap();
        assert_eq!(
            request.kind,
            InterfaceKind::Memif {
                role: MemifRole::Master,
                mode: MemifMode::Ethernet,
                socket_id: 2,
                socket_file: None,
            }
        );
        assert_eq!(request.bridge.as_ref().map(|b| b.bridge_id), Some(4));
        assert_eq!(
            ExecEngine::options(&request).join(" "),
            "--container-id c1 --ifname net0 --iftype memif --role master --mode ethernet \
             --socket-id 2 --bridge-id 4"
        );
    }

    #[test]
    fn test_request_needs_a_mode() {
        let conf = UserSpaceConf {
            iftype: Some(InterfaceType::Vhostuser),
            vhost: VhostConf::default(),
            ..Default::default()
        };
        assert!(matches!(
            request(&conf),
            Err(NetConfError::Missing(RequiredField::VhostMode))
        ));
    }

    #[test]
    fn test_random_mac() {
        let mac = random_mac();
        let octets: Vec<u8> = mac
            .split(':')
            .map(|octet| u8::from_str_radix(octet, 16).unwrap())
            .collect();
        assert_eq!(octets.len(), 6);
        assert_eq!(mac.len(), 17);
        assert_eq!(mac, mac.to_lowercase());
        // locally administered, unicast
        assert_eq!(octets[0] & 0x03, 0x02);
    }

    #[test]
    fn test_vhost_defaults() {
        let conf = UserSpaceConf {
            iftype: Some(InterfaceType::Vhostuser),
            vhost: VhostConf {
                mode: Some(VhostMode::Server),
                socket_file: None,
            },
            ..Default::default()
        };
        let bare = request(&conf).unwrap();
        assert!(bare.uses_default_socket());
        let vhost = bare
            .with_default_socket(Path::new("/var/run/vpp/cni/c1/c1-net0"))
            .with_default_mac();
        assert!(!vhost.uses_default_socket());
        assert_eq!(
            vhost.kind,
            InterfaceKind::Vhost {
                mode: VhostMode::Server,
                socket_file: Some("/var/run/vpp/cni/c1/c1-net0".to_string()),
            }
        );
        assert!(vhost.mac.is_some());

        // configured values are kept
        let configured = UserSpaceConf {
            ifmac: Some("02:00:00:00:00:01".to_string()),
            vhost: VhostConf {
                mode: Some(VhostMode::Server),
                socket_file: Some("/tmp/sock".to_string()),
            },
            ..conf
        };
        let vhost = request(&configured)
            .unwrap()
            .with_default_socket(Path::new("/elsewhere"))
            .with_default_mac();
        assert!(matches!(vhost.kind, InterfaceKind::Vhost { socket_file: Some(ref f), .. } if f == "/tmp/sock"));
        assert_eq!(vhost.mac.as_deref(), Some("02:00:00:00:00:01"));

        // memif interfaces are left alone
        let memif = request(&memif_conf()).unwrap();
        assert!(!memif.uses_default_socket());
        let unchanged = memif.clone().with_default_socket(Path::new("/elsewhere")).with_default_mac();
        assert_eq!(unchanged, memif);
    }

    #[test]
    fn test_exec_engine() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("calls");
        let helper = helper(
            dir.path(),
            &format!("echo \"$@\" >> {}\necho 17", log.display()),
        );
        let engine = ExecEngine::new(helper);
        let request = request(&memif_conf()).unwrap();

        let record = engine.add_interface(&request).unwrap();
        assert_eq!(record, InterfaceRecord::new(17).with_socket_id(2));
        engine.del_interface(&request, &record).unwrap();

        let calls = std::fs::read_to_string(&log).unwrap();
        let calls: Vec<_> = calls.lines().collect();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("create --container-id c1"));
        assert!(calls[1].starts_with("delete --handle 17 --container-id c1"));
    }

    #[test]
    fn test_exec_engine_failures() {
        let dir = tempfile::tempdir().unwrap();
        let request = request(&memif_conf()).unwrap();

        let engine = ExecEngine::new(helper(dir.path(), "echo busy >&2; exit 3"));
        assert!(matches!(
            engine.add_interface(&request),
            Err(EngineError::Failed { action: "create", ref stderr, .. }) if stderr == "busy"
        ));

        let engine = ExecEngine::new(helper(dir.path(), "echo nope"));
        assert!(matches!(
            engine.add_interface(&request),
            Err(EngineError::BadOutput { ref output, .. }) if output == "nope"
        ));

        let engine = ExecEngine::new(dir.path().join("missing"));
        assert!(matches!(
            engine.add_interface(&request),
            Err(EngineError::Spawn { .. })
        ));
    }

    #[test]
    fn test_provisioners() {
        let provisioners = Provisioners::exec(Path::new("/bin/true"), Path::new("/bin/true"));
        assert!(provisioners.get(Engine::Vpp).is_ok());
        assert!(matches!(
            Provisioners::new().get(Engine::OvsDpdk),
            Err(EngineError::NoProvisioner(Engine::OvsDpdk))
        ));
    }
}
