// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The OSD remove/zap/add state machine.
//!
//! Mutating steps (`out`, `purge`, `zap`, `add`, managed-flag flips) are
//! single-shot: a failure aborts the scenario.  All eventually-consistent
//! reasoning lives in the waiting steps, which poll through
//! [`WaitUntil`] and absorb transient observation failures.  Within one
//! run, steps execute strictly sequentially; no step begins before the
//! previous step's convergence wait completed.

use camino::Utf8Path;
use ceph_utils::device::{DeviceLocation, DeviceLocator};
use ceph_utils::executor::Executor;
use ceph_utils::health::{HealthOracle, QueryError};
use ceph_utils::{ExecutionError, OsdId};
use harness_common::config::{Config, Timeouts};
use harness_common::wait::{WaitError, WaitUntil};
use slog::{info, o, warn, Logger};
use std::collections::BTreeMap;

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("lifecycle action failed")]
    Action(#[from] ExecutionError),

    #[error("cluster query failed")]
    Query(#[from] QueryError),

    #[error("convergence wait timed out")]
    Timeout(#[from] WaitError),

    #[error("invariant violated: {0}")]
    Invariant(String),
}

/// Ceiling on PGs allowed out of the active state while the orchestrator
/// is not reconciling the service.  A handful of PGs re-peer briefly after
/// an out/purge; more than this means client I/O is actually losing
/// availability and the run must fail rather than wait it out.
pub const MAX_INACTIVE_PGS: u64 = 8;

/// Drives one OSD through removal, zap, and re-addition.
pub struct OsdLifecycle<'a> {
    exec: &'a dyn Executor,
    admin_host: &'a str,
    oracle: HealthOracle<'a>,
    locator: DeviceLocator<'a>,
    timeouts: &'a Timeouts,
    log: Logger,
}

impl<'a> OsdLifecycle<'a> {
    pub fn new(
        log: &Logger,
        exec: &'a dyn Executor,
        config: &'a Config,
    ) -> Result<OsdLifecycle<'a>, LifecycleError> {
        let admin_host = config
            .admin_host()
            .map(|h| h.hostname.as_str())
            .ok_or_else(|| {
                LifecycleError::Invariant(
                    "config has no admin-capable host".to_string(),
                )
            })?;
        let osd_hosts =
            config.osd_hosts().map(|h| h.hostname.clone()).collect();
        Ok(OsdLifecycle {
            exec,
            admin_host,
            oracle: HealthOracle::new(log, exec, admin_host),
            locator: DeviceLocator::new(log, exec, osd_hosts),
            timeouts: &config.timeouts,
            log: log.new(o!("component" => "osd-lifecycle")),
        })
    }

    pub fn oracle(&self) -> &HealthOracle<'a> {
        &self.oracle
    }

    pub fn locator(&self) -> &DeviceLocator<'a> {
        &self.locator
    }

    fn action(&self, command: &str) -> Result<(), LifecycleError> {
        self.exec.exec(self.admin_host, command)?;
        Ok(())
    }

    /// Stops the orchestrator from reconciling `service` mid-test.
    /// Idempotent.
    pub fn set_unmanaged(&self, service: &str) -> Result<(), LifecycleError> {
        info!(self.log, "setting service unmanaged"; "service" => service);
        self.action(&format!("ceph orch set-unmanaged {service}"))
    }

    /// Restores orchestrator auto-management.  Idempotent.
    pub fn set_managed(&self, service: &str) -> Result<(), LifecycleError> {
        info!(self.log, "setting service managed"; "service" => service);
        self.action(&format!("ceph orch set-managed {service}"))
    }

    /// Flips the OSD to "out".  Callers must wait for clean PGs before any
    /// destructive step.
    pub fn mark_out(&self, id: OsdId) -> Result<(), LifecycleError> {
        info!(self.log, "marking osd out"; "osd" => %id);
        self.action(&format!("ceph osd out {}", id.index()))
    }

    /// Unregisters the OSD from the cluster map (crush entry, auth key,
    /// osd id).
    pub fn purge(&self, id: OsdId) -> Result<(), LifecycleError> {
        info!(self.log, "purging osd"; "osd" => %id);
        self.action(&format!(
            "ceph osd purge {} --yes-i-really-mean-it",
            id.index()
        ))
    }

    /// Destructively wipes the device.  Only valid once the OSD has been
    /// purged and the device is no longer in use.
    pub fn zap(
        &self,
        host: &str,
        device: &Utf8Path,
    ) -> Result<(), LifecycleError> {
        info!(self.log, "zapping device"; "host" => host, "device" => %device);
        self.action(&format!("ceph orch device zap {host} {device} --force"))
    }

    /// Registers a new OSD on `device`.
    pub fn add(
        &self,
        host: &str,
        device: &Utf8Path,
    ) -> Result<(), LifecycleError> {
        info!(self.log, "adding osd"; "host" => host, "device" => %device);
        self.action(&format!("ceph orch daemon add osd {host}:{device}"))
    }

    /// Polls until every PG reports `active+clean`.
    pub fn wait_clean_pgs(&self) -> Result<(), LifecycleError> {
        self.wait_clean_pgs_bounded(None)
    }

    /// Like [`Self::wait_clean_pgs`], but additionally fails the run on the
    /// spot if an observation finds more than `max_inactive` PGs not serving
    /// I/O.  Used inside the unmanaged window, where an availability dip
    /// beyond the bound is a finding, not something to wait out.
    fn wait_clean_pgs_bounded(
        &self,
        max_inactive: Option<u64>,
    ) -> Result<(), LifecycleError> {
        let mut wait = WaitUntil::new(
            self.timeouts.clean_pgs_timeout(),
            self.timeouts.poll_interval(),
        );
        let mut last = String::from("no observation yet");
        while let Some(tick) = wait.next() {
            match self.oracle.pg_state_histogram() {
                Ok(histogram) if histogram.all_active_clean() => {
                    info!(
                        self.log, "pgs clean";
                        "pgs" => histogram.total,
                        "elapsed" => ?tick.elapsed,
                    );
                    return Ok(());
                }
                Ok(histogram) => {
                    if let Some(max) = max_inactive {
                        let inactive = histogram.inactive();
                        if inactive > max {
                            return Err(LifecycleError::Invariant(format!(
                                "{inactive} pgs inactive during unmanaged \
                                 window (at most {max} allowed): {histogram}"
                            )));
                        }
                    }
                    last = histogram.to_string();
                }
                Err(err) if err.is_transient() => {
                    last = format!("status query incomplete: {err}");
                }
                Err(err) => return Err(err.into()),
            }
            if tick.expired {
                break;
            }
        }
        Err(wait.timed_out(last).into())
    }

    /// Polls until no host runs a daemon for `id` any more.
    ///
    /// All query failures are absorbed here: hosts flap while an OSD is
    /// being torn down, and a failed observation is indistinguishable from
    /// "not yet".
    pub fn wait_device_absent(&self, id: OsdId) -> Result<(), LifecycleError> {
        let mut wait = WaitUntil::new(
            self.timeouts.device_absent_timeout(),
            self.timeouts.poll_interval(),
        );
        let mut last = String::from("no observation yet");
        while let Some(tick) = wait.next() {
            match self.locator.locate(id) {
                Ok(None) => {
                    info!(self.log, "osd device released"; "osd" => %id);
                    return Ok(());
                }
                Ok(Some(location)) => {
                    last = format!("{id} still backed by {location}");
                }
                Err(err) => {
                    warn!(
                        self.log, "device query failed, retrying";
                        "osd" => %id,
                        "error" => %err,
                    );
                    last = format!("device query failed: {err}");
                }
            }
            if tick.expired {
                break;
            }
        }
        Err(wait.timed_out(last).into())
    }

    /// Polls until some host runs a daemon for `id` with a resolvable
    /// device.
    pub fn wait_device_present(
        &self,
        id: OsdId,
    ) -> Result<DeviceLocation, LifecycleError> {
        let mut wait = WaitUntil::new(
            self.timeouts.device_absent_timeout(),
            self.timeouts.poll_interval(),
        );
        let mut last = String::from("no observation yet");
        while let Some(tick) = wait.next() {
            match self.locator.locate(id) {
                Ok(Some(location)) => {
                    info!(
                        self.log, "osd device present";
                        "osd" => %id,
                        "location" => %location,
                    );
                    return Ok(location);
                }
                Ok(None) => last = format!("{id} has no running daemon"),
                Err(err) => {
                    warn!(
                        self.log, "device query failed, retrying";
                        "osd" => %id,
                        "error" => %err,
                    );
                    last = format!("device query failed: {err}");
                }
            }
            if tick.expired {
                break;
            }
        }
        Err(wait.timed_out(last).into())
    }

    /// Full removal/re-addition cycle for one OSD, reusing its device.
    ///
    /// `pools` are checked for acting-set cardinality: each PG must serve
    /// from as many OSDs after the cycle as before.
    pub fn replace_osd(
        &self,
        id: OsdId,
        service: &str,
        pools: &[&str],
    ) -> Result<(), LifecycleError> {
        let before = self.acting_set_sizes(pools)?;

        let location = self.wait_device_present(id)?;
        self.set_unmanaged(service)?;
        // Every wait until set_managed runs inside the unmanaged window,
        // so each is also bounded on inactive PGs.
        self.mark_out(id)?;
        self.wait_clean_pgs_bounded(Some(MAX_INACTIVE_PGS))?;
        self.purge(id)?;
        self.wait_clean_pgs_bounded(Some(MAX_INACTIVE_PGS))?;
        self.zap(&location.host, &location.path)?;
        self.wait_device_absent(id)?;
        self.add(&location.host, &location.path)?;
        self.wait_device_present(id)?;
        self.wait_clean_pgs_bounded(Some(MAX_INACTIVE_PGS))?;
        self.set_managed(service)?;

        let after = self.acting_set_sizes(pools)?;
        if before != after {
            return Err(LifecycleError::Invariant(format!(
                "acting-set cardinality changed across replacement of {id}: \
                 before {before:?}, after {after:?}"
            )));
        }
        info!(self.log, "osd replacement complete"; "osd" => %id);
        Ok(())
    }

    fn acting_set_sizes(
        &self,
        pools: &[&str],
    ) -> Result<BTreeMap<String, usize>, LifecycleError> {
        let mut sizes = BTreeMap::new();
        for pool in pools {
            for pg in self.oracle.pg_ls_by_pool(pool)? {
                sizes.insert(pg.pgid, pg.acting.len());
            }
        }
        Ok(sizes)
    }
}
