// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runs inside a container: provisions the container side of the interfaces staged for it by
//! the plugin on the host.

#![deny(clippy::all, clippy::pedantic)]

use args::{AppArgs, Parser};
use plugin::{Dispatcher, Provisioners, init_logging};
use std::ops::ControlFlow;
use std::process::ExitCode;
use store::Store;
use tracing::{error, info, warn};
use userspace_cni_app::watch::WatchError;
use userspace_cni_app::{AppError, apply_staged, watch_staged};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = AppArgs::parse();
    init_logging(args.log_level());

    let store = Store::new(args.store_config());
    info!(
        "applying configurations staged in {}",
        store.shared_dir().display()
    );
    let provisioners =
        Provisioners::exec(args.engines().vpp_helper(), args.engines().ovs_helper());
    let dispatcher = Dispatcher::new(store, provisioners);

    if !args.watch() {
        return match apply_staged(&dispatcher) {
            Ok(_) => ExitCode::SUCCESS,
            Err(e) => {
                error!("{e}");
                ExitCode::FAILURE
            }
        };
    }

    match watch_staged(&dispatcher, |_| ControlFlow::Continue(())).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(AppError::Watch(WatchError::Gone { dir })) => {
            warn!("{} was removed, stopping", dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
