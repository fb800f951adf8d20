// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Container side of remote interfaces: applies the configurations staged for this container
//! by the plugin running on the host.

#![deny(clippy::all, clippy::pedantic)]

pub mod watch;

use plugin::{Applied, DispatchError, Dispatcher};
use std::ops::ControlFlow;
use store::StoreError;
use tracing::{error, info};
use watch::{StagingWatcher, WatchError};

#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum AppError {
    #[error(transparent)]
    Watch(#[from] WatchError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Tell if a failure to apply a staged configuration left it in place. Retrying right away
/// would fail again.
fn left_in_place(e: &DispatchError) -> bool {
    matches!(
        e,
        DispatchError::Store(StoreError::MalformedRecord { .. } | StoreError::Io { .. })
    )
}

/// Apply every configuration currently staged.
///
/// A configuration which was claimed but could not be applied is logged and skipped.
///
/// # Errors
///
/// Stops at the first configuration which can't be claimed, leaving it (and any after it)
/// staged.
pub fn apply_staged(dispatcher: &Dispatcher) -> Result<Vec<Applied>, DispatchError> {
    let mut applied = vec![];
    loop {
        match dispatcher.apply_pending() {
            Ok(Some(one)) => applied.push(one),
            Ok(None) => break,
            Err(e) if left_in_place(&e) => return Err(e),
            Err(e) => error!("failed to apply staged configuration, dropping it: {e}"),
        }
    }
    if !applied.is_empty() {
        info!("applied {} staged configuration(s)", applied.len());
    }
    Ok(applied)
}

/// Apply staged configurations as they arrive, calling `on_applied` for each one, until it
/// breaks.
///
/// Configurations staged before the call are applied first.
///
/// # Errors
///
/// If the staging directory can't be watched (or disappears), or if a configuration can't be
/// claimed.
pub async fn watch_staged(
    dispatcher: &Dispatcher,
    mut on_applied: impl FnMut(&Applied) -> ControlFlow<()>,
) -> Result<(), AppError> {
    let mut watcher = StagingWatcher::new(dispatcher.store().shared_dir()).await?;
    loop {
        for applied in apply_staged(dispatcher)? {
            if on_applied(&applied).is_break() {
                return Ok(());
            }
        }
        let staged = watcher.staged().await?;
        for ifname in &staged {
            info!(
                "configuration of interface {ifname} staged in {}",
                watcher.dir().display()
            );
        }
    }
}
