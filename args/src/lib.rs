// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Command line and environment of the plugin and of the container side application.
//!
//! The container runtime invokes the plugin with its parameters in `CNI_*` environment
//! variables. Every one of them can also be given as a long option, which wins over the
//! environment.

#![deny(clippy::all, clippy::pedantic)]

pub use clap::Parser;
use std::path::{Path, PathBuf};
use store::{ContainerId, DEFAULT_CONTAINER_ROOT, DEFAULT_SHARED_DIR, InterfaceName, InvalidName, StoreConfig};
use tracing::debug;

/// Default helper driving the VPP-like dataplane.
pub const DEFAULT_VPP_HELPER: &str = "/usr/libexec/userspace-cni/vpp-helper";
/// Default helper driving the OVS-like dataplane.
pub const DEFAULT_OVS_HELPER: &str = "/usr/libexec/userspace-cni/ovs-helper";
/// Default log filter, when neither `--log-level` nor `USERSPACE_CNI_LOG` is given.
pub const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Copy, Clone, Debug, PartialEq, Eq, clap::ValueEnum, strum::Display)]
pub enum CniCommand {
    #[value(name = "ADD")]
    #[strum(serialize = "ADD")]
    Add,
    #[value(name = "DEL")]
    #[strum(serialize = "DEL")]
    Del,
    #[value(name = "CHECK")]
    #[strum(serialize = "CHECK")]
    Check,
    #[value(name = "VERSION")]
    #[strum(serialize = "VERSION")]
    Version,
    #[value(name = "GC")]
    #[strum(serialize = "GC")]
    Gc,
    #[value(name = "STATUS")]
    #[strum(serialize = "STATUS")]
    Status,
}

/// Location of the store directories.
#[derive(Clone, Debug, clap::Args)]
pub struct StoreArgs {
    #[arg(
        long,
        env = "USERSPACE_CNI_SHARED_DIR",
        value_name = "DIR",
        default_value = DEFAULT_SHARED_DIR,
        help = "Directory holding interface state, and where staged configurations are claimed from"
    )]
    shared_dir: PathBuf,

    #[arg(
        long,
        env = "USERSPACE_CNI_CONTAINER_ROOT",
        value_name = "DIR",
        default_value = DEFAULT_CONTAINER_ROOT,
        help = "Root of the per-container directories configurations are staged into"
    )]
    container_root: PathBuf,
}

impl StoreArgs {
    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            shared_dir: self.shared_dir.clone(),
            container_root: self.container_root.clone(),
        }
    }
}

/// Programs used to drive the dataplanes.
#[derive(Clone, Debug, clap::Args)]
pub struct EngineArgs {
    #[arg(
        long,
        env = "USERSPACE_CNI_VPP_HELPER",
        value_name = "PATH",
        default_value = DEFAULT_VPP_HELPER,
        help = "Program creating and deleting interfaces on the VPP dataplane"
    )]
    vpp_helper: PathBuf,

    #[arg(
        long,
        env = "USERSPACE_CNI_OVS_HELPER",
        value_name = "PATH",
        default_value = DEFAULT_OVS_HELPER,
        help = "Program creating and deleting interfaces on the OVS-DPDK dataplane"
    )]
    ovs_helper: PathBuf,
}

impl EngineArgs {
    #[must_use]
    pub fn vpp_helper(&self) -> &Path {
        &self.vpp_helper
    }

    #[must_use]
    pub fn ovs_helper(&self) -> &Path {
        &self.ovs_helper
    }
}

#[derive(Debug, Parser)]
#[command(name = "userspace")]
#[command(version)]
#[command(about = "Container network plugin for user space dataplane interfaces", long_about = None)]
pub struct CmdArgs {
    #[arg(long, env = "CNI_COMMAND", value_enum, value_name = "COMMAND")]
    command: Option<CniCommand>,

    #[arg(long, env = "CNI_CONTAINERID", value_name = "ID")]
    container_id: Option<String>,

    #[arg(long, env = "CNI_NETNS", value_name = "PATH")]
    netns: Option<PathBuf>,

    #[arg(long, env = "CNI_IFNAME", value_name = "NAME")]
    ifname: Option<String>,

    #[arg(
        long,
        env = "CNI_PATH",
        value_name = "DIRS",
        value_delimiter = ':',
        help = "Directories searched for delegated plugins"
    )]
    cni_path: Vec<PathBuf>,

    #[arg(
        long,
        env = "CNI_ARGS",
        value_name = "KEY=VALUE;...",
        help = "Extra arguments given by the runtime"
    )]
    cni_args: Option<String>,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    engines: EngineArgs,

    #[arg(
        long,
        env = "USERSPACE_CNI_LOG",
        value_name = "FILTER",
        default_value = DEFAULT_LOG_LEVEL,
        help = "Log filter, e.g. info or userspace_cni_store=debug,info"
    )]
    log_level: String,
}

impl CmdArgs {
    #[must_use]
    pub fn command(&self) -> Option<CniCommand> {
        self.command
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    /// Parse the process arguments and environment.
    ///
    /// A request for help or for the version of the program prints it and exits, as
    /// [`Parser::parse`] would. Any other failure is returned: the runtime expects an error
    /// object on standard output, not a usage message.
    ///
    /// # Errors
    ///
    /// [`InvalidCmdArguments::Parse`] if the arguments or environment can't be parsed.
    pub fn from_env() -> Result<CmdArgs, InvalidCmdArguments> {
        match CmdArgs::try_parse() {
            Ok(args) => Ok(args),
            Err(e)
                if matches!(
                    e.kind(),
                    clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion
                ) =>
            {
                e.exit()
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "usrsp-app")]
#[command(version)]
#[command(
    about = "Applies the network configurations staged for this container",
    long_about = None
)]
pub struct AppArgs {
    #[arg(
        long,
        default_value_t = false,
        help = "Keep running, and apply configurations as they are staged"
    )]
    watch: bool,

    #[command(flatten)]
    store: StoreArgs,

    #[command(flatten)]
    engines: EngineArgs,

    #[arg(
        long,
        env = "USERSPACE_CNI_LOG",
        value_name = "FILTER",
        default_value = DEFAULT_LOG_LEVEL
    )]
    log_level: String,
}

impl AppArgs {
    #[must_use]
    pub fn watch(&self) -> bool {
        self.watch
    }

    #[must_use]
    pub fn store_config(&self) -> StoreConfig {
        self.store.store_config()
    }

    #[must_use]
    pub fn engines(&self) -> &EngineArgs {
        &self.engines
    }

    #[must_use]
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Parameters of an add, delete or check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    pub container_id: ContainerId,
    pub ifname: InterfaceName,
    /// Network namespace of the container. May be missing on delete.
    pub netns: Option<PathBuf>,
    pub cni_path: Vec<PathBuf>,
    pub cni_args: Vec<(String, String)>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    Add(Attachment),
    Del(Attachment),
    Check(Attachment),
    Version,
    /// Garbage collection of stale attachments.
    Gc,
    /// Readiness of the plugin.
    Status,
}

impl Invocation {
    #[must_use]
    pub fn command(&self) -> CniCommand {
        match self {
            Invocation::Add(_) => CniCommand::Add,
            Invocation::Del(_) => CniCommand::Del,
            Invocation::Check(_) => CniCommand::Check,
            Invocation::Version => CniCommand::Version,
            Invocation::Gc => CniCommand::Gc,
            Invocation::Status => CniCommand::Status,
        }
    }
}

/// Everything an invocation of the plugin needs to know, validated.
#[derive(Clone, Debug)]
pub struct LaunchConfiguration {
    pub invocation: Invocation,
    pub store: StoreConfig,
    pub engines: EngineArgs,
}

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum InvalidCmdArguments {
    #[error("{0}")]
    Parse(String),
    #[error("CNI_COMMAND is not set")]
    #[diagnostic(help("the plugin is meant to be run by a container runtime"))]
    NoCommand,
    #[error("{variable} is required for {command}")]
    Missing {
        variable: &'static str,
        command: CniCommand,
    },
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
    #[error("malformed CNI_ARGS entry \"{0}\": expected KEY=VALUE")]
    MalformedCniArgs(String),
}

impl From<clap::Error> for InvalidCmdArguments {
    fn from(e: clap::Error) -> Self {
        let rendered = e.to_string();
        let first = rendered.lines().next().unwrap_or_default();
        InvalidCmdArguments::Parse(first.strip_prefix("error: ").unwrap_or(first).to_string())
    }
}

fn parse_cni_args(raw: Option<&str>) -> Result<Vec<(String, String)>, InvalidCmdArguments> {
    raw.unwrap_or_default()
        .split(';')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(InvalidCmdArguments::MalformedCniArgs(entry.to_string())),
        })
        .collect()
}

fn attachment(value: CmdArgs, command: CniCommand) -> Result<Attachment, InvalidCmdArguments> {
    let missing = |variable| InvalidCmdArguments::Missing { variable, command };
    let container_id = value
        .container_id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| missing("CNI_CONTAINERID"))?;
    let ifname = value
        .ifname
        .filter(|name| !name.is_empty())
        .ok_or_else(|| missing("CNI_IFNAME"))?;
    let netns = value.netns.filter(|ns| !ns.as_os_str().is_empty());
    if netns.is_none() && command != CniCommand::Del {
        return Err(missing("CNI_NETNS"));
    }
    Ok(Attachment {
        container_id: ContainerId::new(container_id)?,
        ifname: InterfaceName::new(ifname)?,
        netns,
        cni_path: value.cni_path,
        cni_args: parse_cni_args(value.cni_args.as_deref())?,
    })
}

impl TryFrom<CmdArgs> for LaunchConfiguration {
    type Error = InvalidCmdArguments;

    fn try_from(value: CmdArgs) -> Result<Self, InvalidCmdArguments> {
        let store = value.store.store_config();
        let engines = value.engines.clone();
        let invocation = match value.command {
            None => return Err(InvalidCmdArguments::NoCommand),
            Some(CniCommand::Version) => Invocation::Version,
            Some(CniCommand::Gc) => Invocation::Gc,
            Some(CniCommand::Status) => Invocation::Status,
            Some(command @ CniCommand::Add) => Invocation::Add(attachment(value, command)?),
            Some(command @ CniCommand::Del) => Invocation::Del(attachment(value, command)?),
            Some(command @ CniCommand::Check) => Invocation::Check(attachment(value, command)?),
        };
        debug!("launch: {} with store {store:?}", invocation.command());
        Ok(LaunchConfiguration {
            invocation,
            store,
            engines,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &[&str]) -> Result<LaunchConfiguration, InvalidCmdArguments> {
        let mut argv = vec!["userspace"];
        argv.extend_from_slice(args);
        LaunchConfiguration::try_from(CmdArgs::try_parse_from(argv).unwrap())
    }

    #[test]
    fn test_add() {
        let launch = parse(&[
            "--command",
            "ADD",
            "--container-id",
            "0123456789abcdef",
            "--netns",
            "/var/run/netns/c1",
            "--ifname",
            "eth0",
            "--cni-path",
            "/opt/cni/bin:/usr/libexec/cni",
            "--cni-args",
            "IgnoreUnknown=1;K8S_POD_NAME=pod",
            "--shared-dir",
            "/tmp/data",
        ])
        .unwrap();
        assert_eq!(
            launch.invocation,
            Invocation::Add(Attachment {
                container_id: ContainerId::new("0123456789abcdef").unwrap(),
                ifname: InterfaceName::new("eth0").unwrap(),
                netns: Some(PathBuf::from("/var/run/netns/c1")),
                cni_path: vec![
                    PathBuf::from("/opt/cni/bin"),
                    PathBuf::from("/usr/libexec/cni")
                ],
                cni_args: vec![
                    ("IgnoreUnknown".to_string(), "1".to_string()),
                    ("K8S_POD_NAME".to_string(), "pod".to_string()),
                ],
            })
        );
        assert_eq!(launch.store.shared_dir, PathBuf::from("/tmp/data"));
        assert_eq!(
            launch.store.container_root,
            PathBuf::from(DEFAULT_CONTAINER_ROOT)
        );
        assert_eq!(launch.engines.vpp_helper(), Path::new(DEFAULT_VPP_HELPER));
    }

    #[test]
    fn test_del_without_netns() {
        let launch = parse(&[
            "--command",
            "DEL",
            "--container-id",
            "c1",
            "--ifname",
            "eth0",
        ])
        .unwrap();
        let Invocation::Del(attachment) = launch.invocation else {
            panic!("expected a delete");
        };
        assert_eq!(attachment.netns, None);
        assert!(attachment.cni_args.is_empty());
    }

    #[test]
    fn test_version_needs_nothing_else() {
        let launch = parse(&["--command", "VERSION"]).unwrap();
        assert_eq!(launch.invocation, Invocation::Version);
    }

    #[test]
    fn test_missing_variables() {
        assert!(matches!(
            parse(&["--container-id", "c1"]),
            Err(InvalidCmdArguments::NoCommand)
        ));
        let err = parse(&["--command", "ADD", "--container-id", "c1", "--ifname", "eth0"])
            .unwrap_err();
        assert!(matches!(err, InvalidCmdArguments::Missing { .. }));
        assert_eq!(err.to_string(), "CNI_NETNS is required for ADD");
        let err = parse(&["--command", "DEL", "--ifname", "eth0"]).unwrap_err();
        assert_eq!(err.to_string(), "CNI_CONTAINERID is required for DEL");
    }

    #[test]
    fn test_bad_values() {
        assert!(matches!(
            parse(&[
                "--command",
                "DEL",
                "--container-id",
                "../c1",
                "--ifname",
                "eth0"
            ]),
            Err(InvalidCmdArguments::InvalidName(_))
        ));
        assert!(matches!(
            parse(&[
                "--command",
                "DEL",
                "--container-id",
                "c1",
                "--ifname",
                "eth0",
                "--cni-args",
                "novalue"
            ]),
            Err(InvalidCmdArguments::MalformedCniArgs(arg)) if arg == "novalue"
        ));
    }

    #[test]
    fn test_unknown_command_is_an_error_value() {
        let err: InvalidCmdArguments = CmdArgs::try_parse_from(["userspace", "--command", "REMOVE"])
            .unwrap_err()
            .into();
        let InvalidCmdArguments::Parse(msg) = &err else {
            panic!("expected a parse error, got {err:?}");
        };
        assert!(msg.contains("REMOVE"), "{msg}");
        assert!(!msg.starts_with("error:"), "{msg}");
        assert!(!msg.contains('\n'), "{msg}");
    }

    #[test]
    fn test_gc_and_status_need_nothing_else() {
        let launch = parse(&["--command", "GC"]).unwrap();
        assert_eq!(launch.invocation, Invocation::Gc);
        assert_eq!(launch.invocation.command().to_string(), "GC");
        let launch = parse(&["--command", "STATUS"]).unwrap();
        assert_eq!(launch.invocation, Invocation::Status);
    }

    #[test]
    fn test_app_args() {
        let args = AppArgs::try_parse_from([
            "usrsp-app",
            "--watch",
            "--shared-dir",
            "/var/run/vpp/cni/data",
        ])
        .unwrap();
        assert!(args.watch());
        assert_eq!(args.store_config(), StoreConfig::default());
        assert_eq!(args.log_level(), DEFAULT_LOG_LEVEL);
    }
}
