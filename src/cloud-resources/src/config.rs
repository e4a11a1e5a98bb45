// Copyright Materialize, Inc. and contributors. All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

/// The default name prefix identifying externally routable networks at the
/// supported provider.
pub const DEFAULT_EXTERNAL_NETWORK_PREFIX: &str = "CLPU0_IPAC";

/// Tunables for the cloud resource layer.
#[derive(Debug, Clone)]
pub struct CloudResourceConfig {
    /// Networks whose name starts with this prefix are considered externally
    /// routable; the first match is used.
    pub external_network_prefix: String,
    /// Interval between polls of VM power state and task state.
    pub poll_interval: Duration,
    /// Upper bound on the wait for the provider to re-confirm the VM off
    /// after the NIC task completes. The provider does not publish the
    /// task's terminal state and the VM's observable power state atomically,
    /// so this wait exists purely as a synchronization point; `None` waits
    /// indefinitely, bounded only by the caller's overall timeout.
    pub confirm_timeout: Option<Duration>,
    /// Whether to run the one-shot security policy relaxation on the VM
    /// before attaching the NIC.
    pub relax_security_policy: bool,
}

impl Default for CloudResourceConfig {
    fn default() -> CloudResourceConfig {
        CloudResourceConfig {
            external_network_prefix: DEFAULT_EXTERNAL_NETWORK_PREFIX.into(),
            poll_interval: Duration::from_secs(5),
            confirm_timeout: Some(Duration::from_secs(600)),
            relax_security_policy: true,
        }
    }
}

/// Command line arguments for the cloud resource layer.
#[derive(Debug, Clone, clap::Parser)]
pub struct CloudResourceCliArgs {
    /// Name prefix identifying the externally routable network to attach.
    #[clap(
        long,
        env = "RG_EXTERNAL_NETWORK_PREFIX",
        value_name = "PREFIX",
        default_value = DEFAULT_EXTERNAL_NETWORK_PREFIX
    )]
    external_network_prefix: String,
    /// Interval between polls of VM power state and task state.
    #[clap(
        long,
        env = "RG_CLOUD_POLL_INTERVAL",
        value_name = "DURATION",
        default_value = "5s",
        value_parser = humantime::parse_duration
    )]
    cloud_poll_interval: Duration,
    /// Upper bound on re-confirming the VM off after the NIC task completes.
    #[clap(
        long,
        env = "RG_CLOUD_CONFIRM_TIMEOUT",
        value_name = "DURATION",
        default_value = "10m",
        value_parser = humantime::parse_duration
    )]
    cloud_confirm_timeout: Duration,
    /// Skip the one-shot security policy relaxation on new VMs.
    #[clap(long, env = "RG_CLOUD_SKIP_SECURITY_RELAXATION")]
    cloud_skip_security_relaxation: bool,
}

impl CloudResourceCliArgs {
    /// Resolves the arguments into a [`CloudResourceConfig`].
    pub fn into_config(self) -> CloudResourceConfig {
        CloudResourceConfig {
            external_network_prefix: self.external_network_prefix,
            poll_interval: self.cloud_poll_interval,
            confirm_timeout: Some(self.cloud_confirm_timeout),
            relax_security_policy: !self.cloud_skip_security_relaxation,
        }
    }
}
