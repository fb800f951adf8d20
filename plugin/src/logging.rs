// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use tracing_subscriber::EnvFilter;

/// Install a subscriber logging to stderr with the given filter directives. Standard output is
/// reserved for replies to the runtime.
///
/// An unparsable filter falls back to `info`.
pub fn init_logging(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|e| {
        eprintln!("invalid log filter '{filter}' ({e}), using info");
        EnvFilter::new("info")
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
