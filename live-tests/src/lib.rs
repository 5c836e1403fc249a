// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Support for scenarios that run against an existing, deployed cluster.
//!
//! These tests make arbitrary, destructive modifications to the cluster
//! they are pointed at.  They only run when `CEPH_HARNESS_CONFIG` names a
//! harness config file; otherwise each test skips with a note.

use anyhow::Context;
use camino::Utf8PathBuf;
use harness_common::config::Config;
use slog::Logger;

pub const CONFIG_ENV: &str = "CEPH_HARNESS_CONFIG";

/// Data and interfaces for one live scenario.
pub struct LiveTestContext {
    pub log: Logger,
    pub config: Config,
}

impl LiveTestContext {
    /// Loads the harness config named by [`CONFIG_ENV`], or returns `None`
    /// (skip) if the variable is unset.
    pub fn new(test_name: &str) -> anyhow::Result<Option<LiveTestContext>> {
        let Ok(path) = std::env::var(CONFIG_ENV) else {
            eprintln!(
                "skipping {test_name}: {CONFIG_ENV} is not set \
                 (live tests need a deployed cluster)"
            );
            return Ok(None);
        };
        let path = Utf8PathBuf::from(path);
        let config = Config::from_file(&path)
            .with_context(|| format!("loading harness config {path}"))?;
        check_execution_environment(&config)?;
        let log = harness_test_utils::harness_log()
            .new(slog::o!("test" => test_name.to_string()));
        Ok(Some(LiveTestContext { log, config }))
    }
}

/// Fails fast in obviously bogus environments: a live run needs at least
/// one admin-capable host and one OSD host to make sense.
fn check_execution_environment(config: &Config) -> anyhow::Result<()> {
    anyhow::ensure!(
        config.admin_host().is_some(),
        "config has no host with the client, installer, or mon role; \
         refusing to guess where to run the ceph CLI"
    );
    anyhow::ensure!(
        config.osd_hosts().next().is_some(),
        "config has no OSD hosts; these scenarios exercise OSD lifecycles"
    );
    Ok(())
}
