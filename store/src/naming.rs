// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Mapping of record identities to file names.
//!
//! Every record lives in its own file. The name of that file is derived from the kind of
//! record, the logical interface name and, for interface state, a prefix of the container id:
//!
//! | kind              | file name                                |
//! |-------------------|------------------------------------------|
//! | interface state   | `local-{container12}-{ifname}.json`      |
//! | interface (legacy)| `local-{ifname}.json`                    |
//! | remote config     | `remote-{ifname}.json`                   |
//! | auxiliary data    | `addData-{ifname}.json`                  |
//! | vhost-user socket | `{container12}-{ifname}`                 |
//!
//! Identifiers are validated on construction so that no path built here can escape the
//! directory it is joined to.

use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Extension of every record file.
pub const RECORD_EXTENSION: &str = "json";

/// The kinds of record kept by the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, strum::Display)]
pub enum RecordKind {
    /// Backend handles saved by an "add" so that a later "delete" can find them.
    #[strum(serialize = "interface state")]
    Interface,
    /// Network configuration staged for the container side.
    #[strum(serialize = "remote config")]
    RemoteConfig,
    /// Companion of a [`RecordKind::RemoteConfig`]: container id and ip assignment.
    #[strum(serialize = "auxiliary data")]
    AuxiliaryData,
}

impl RecordKind {
    /// The fixed leading component of the file names of this kind of record.
    #[must_use]
    pub const fn file_prefix(self) -> &'static str {
        match self {
            RecordKind::Interface => "local",
            RecordKind::RemoteConfig => "remote",
            RecordKind::AuxiliaryData => "addData",
        }
    }
}

/// The kinds of record staged for the container side.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum StagedKind {
    RemoteConfig,
    AuxiliaryData,
}

impl From<StagedKind> for RecordKind {
    fn from(kind: StagedKind) -> Self {
        match kind {
            StagedKind::RemoteConfig => RecordKind::RemoteConfig,
            StagedKind::AuxiliaryData => RecordKind::AuxiliaryData,
        }
    }
}

/// The identifier which failed validation.
#[derive(Copy, Clone, Debug, PartialEq, Eq, strum::Display)]
pub enum Identifier {
    #[strum(serialize = "container id")]
    ContainerId,
    #[strum(serialize = "interface name")]
    InterfaceName,
}

/// Errors produced when validating an identifier used to build a record path.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error, miette::Diagnostic)]
pub enum InvalidName {
    #[error("{0} must not be empty")]
    Empty(Identifier),
    #[error("{0} '{1}' contains a path separator")]
    PathSeparator(Identifier, String),
    #[error("{0} contains a NUL byte")]
    Nul(Identifier),
    #[error("{0} '{1}' is a reserved path component")]
    Reserved(Identifier, String),
}

fn validate(kind: Identifier, name: &str) -> Result<(), InvalidName> {
    if name.is_empty() {
        return Err(InvalidName::Empty(kind));
    }
    if name.contains('\0') {
        return Err(InvalidName::Nul(kind));
    }
    if name.contains(std::path::MAIN_SEPARATOR) || name.contains('/') {
        return Err(InvalidName::PathSeparator(kind, name.to_owned()));
    }
    if name == "." || name == ".." {
        return Err(InvalidName::Reserved(kind, name.to_owned()));
    }
    Ok(())
}

/// A validated container identifier.
///
/// The full identifier names the per-container staging directory. File names only ever carry
/// its first [`ContainerId::PREFIX_LEN`] characters (see [`ContainerId::prefix`]).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContainerId(String);

impl ContainerId {
    /// Number of characters of a container id used in file names.
    pub const PREFIX_LEN: usize = 12;

    /// Validate and wrap a container id.
    ///
    /// # Errors
    ///
    /// Fails if the id is empty, contains a path separator or a NUL byte, or is `.` / `..`.
    pub fn new(id: impl Into<String>) -> Result<Self, InvalidName> {
        let id = id.into();
        validate(Identifier::ContainerId, &id)?;
        Ok(ContainerId(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The truncated form of this id. Ids shorter than [`ContainerId::PREFIX_LEN`] are used whole.
    #[must_use]
    pub fn prefix(&self) -> &str {
        match self.0.char_indices().nth(Self::PREFIX_LEN) {
            Some((end, _)) => &self.0[..end],
            None => &self.0,
        }
    }
}

impl TryFrom<String> for ContainerId {
    type Error = InvalidName;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ContainerId::new(value)
    }
}

impl TryFrom<&str> for ContainerId {
    type Error = InvalidName;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        ContainerId::new(value)
    }
}

impl From<ContainerId> for String {
    fn from(value: ContainerId) -> Self {
        value.0
    }
}

impl Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated logical interface name (the `if0name` of a network configuration).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InterfaceName(String);

impl InterfaceName {
    /// Validate and wrap an interface name.
    ///
    /// # Errors
    ///
    /// Fails if the name is empty, contains a path separator or a NUL byte, or is `.` / `..`.
    pub fn new(name: impl Into<String>) -> Result<Self, InvalidName> {
        let name = name.into();
        validate(Identifier::InterfaceName, &name)?;
        Ok(InterfaceName(name))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InterfaceName {
    type Error = InvalidName;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        InterfaceName::new(value)
    }
}

impl TryFrom<&str> for InterfaceName {
    type Error = InvalidName;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        InterfaceName::new(value)
    }
}

impl From<InterfaceName> for String {
    fn from(value: InterfaceName) -> Self {
        value.0
    }
}

impl Display for InterfaceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// File name of the interface state of `ifname` in container `container`.
#[must_use]
pub fn interface_record_file(container: &ContainerId, ifname: &InterfaceName) -> String {
    format!(
        "{}-{}-{ifname}.{RECORD_EXTENSION}",
        RecordKind::Interface.file_prefix(),
        container.prefix()
    )
}

/// File name of the interface state of `ifname` as written before records were scoped by
/// container.
#[must_use]
pub fn legacy_interface_record_file(ifname: &InterfaceName) -> String {
    format!(
        "{}-{ifname}.{RECORD_EXTENSION}",
        RecordKind::Interface.file_prefix()
    )
}

/// File name of a staged record (remote config or auxiliary data) of `ifname`.
#[must_use]
pub fn staged_record_file(kind: StagedKind, ifname: &InterfaceName) -> String {
    format!(
        "{}-{ifname}.{RECORD_EXTENSION}",
        RecordKind::from(kind).file_prefix()
    )
}

/// Inverse of [`staged_record_file`]: tell if `file_name` is a staged record of the given kind
/// and, if so, return the interface name it was staged for.
///
/// This is the equivalent of matching `{prefix}-*.json`. Hidden files (such as the temporaries
/// used while writing a record) never match.
#[must_use]
pub fn parse_staged_record_file(kind: StagedKind, file_name: &str) -> Option<InterfaceName> {
    let ifname = file_name
        .strip_prefix(RecordKind::from(kind).file_prefix())?
        .strip_prefix('-')?
        .strip_suffix(RECORD_EXTENSION)?
        .strip_suffix('.')?;
    InterfaceName::new(ifname).ok()
}

/// File name of the default vhost-user socket of `ifname` in container `container`.
#[must_use]
pub fn vhost_socket_file(container: &ContainerId, ifname: &InterfaceName) -> String {
    format!("{}-{ifname}", container.prefix())
}
