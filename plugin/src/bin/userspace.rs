// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The plugin. Invoked by the container runtime with the network configuration on standard
//! input; prints a result (or an error object) on standard output.

#![deny(clippy::all, clippy::pedantic)]

use args::{CmdArgs, DEFAULT_LOG_LEVEL, Invocation, LaunchConfiguration};
use std::io::Read;
use std::process::ExitCode;
use tracing::{debug, error};
use userspace_cni_plugin::{
    ErrorReply, ExecIpam, PluginError, Provisioners, init_logging, requested_cni_version,
};

fn read_stdin(invocation: &Invocation) -> Result<Vec<u8>, PluginError> {
    let mut stdin = vec![];
    if *invocation != Invocation::Version {
        std::io::stdin()
            .read_to_end(&mut stdin)
            .map_err(PluginError::Stdin)?;
    }
    Ok(stdin)
}

fn fail(stdin: &[u8], e: &PluginError) -> ExitCode {
    error!("{e}");
    let reply = ErrorReply::new(&requested_cni_version(stdin), e);
    match serde_json::to_string(&reply) {
        Ok(out) => println!("{out}"),
        Err(e) => eprintln!("failure serializing error reply: {e}"),
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    let args = match CmdArgs::from_env() {
        Ok(args) => args,
        Err(e) => {
            init_logging(DEFAULT_LOG_LEVEL);
            return fail(&[], &e.into());
        }
    };
    init_logging(args.log_level());
    debug!("invoked for {:?}", args.command());

    let launch = match LaunchConfiguration::try_from(args) {
        Ok(launch) => launch,
        Err(e) => return fail(&[], &e.into()),
    };
    let stdin = match read_stdin(&launch.invocation) {
        Ok(stdin) => stdin,
        Err(e) => return fail(&[], &e),
    };
    let provisioners =
        Provisioners::exec(launch.engines.vpp_helper(), launch.engines.ovs_helper());
    let ipam = match &launch.invocation {
        Invocation::Add(attachment)
        | Invocation::Del(attachment)
        | Invocation::Check(attachment) => ExecIpam::new(attachment),
        Invocation::Version | Invocation::Gc | Invocation::Status => ExecIpam::default(),
    };

    match userspace_cni_plugin::run(&launch, &stdin, provisioners, &ipam) {
        Ok(reply) => match reply.to_json() {
            Ok(Some(out)) => {
                println!("{out}");
                ExitCode::SUCCESS
            }
            Ok(None) => ExitCode::SUCCESS,
            Err(e) => {
                error!("failed to serialize reply: {e}");
                ExitCode::FAILURE
            }
        },
        Err(e) => fail(&stdin, &e),
    }
}
