// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::naming::{InvalidName, RecordKind};
use std::path::PathBuf;

/// Errors returned by store operations.
///
/// "Nothing there" is not an error: operations reading records return `Ok(None)` in that case.
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// A record file exists but does not decode. The file is left in place.
    #[error("malformed {kind} record at {}: {reason}", path.display())]
    MalformedRecord {
        path: PathBuf,
        kind: RecordKind,
        reason: String,
    },
    /// A remote config was claimed but its auxiliary data record does not exist.
    /// The claimed remote config is not restored.
    #[error(
        "claimed remote config {} has no auxiliary data record at {}",
        remote.display(),
        companion.display()
    )]
    MissingCompanionRecord { remote: PathBuf, companion: PathBuf },
    #[error(transparent)]
    InvalidName(#[from] InvalidName),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> StoreError {
        let path = path.into();
        move |source| StoreError::Io { path, source }
    }
}
