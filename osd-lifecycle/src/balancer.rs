// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stretch-site balancing: partitions the OSD roster into two sites of
//! equal aggregate crush weight and installs the symmetric placement rule.
//!
//! Pairing is best effort: OSDs found down, or up but without an
//! equal-weight peer, are logged and skipped rather than failing the whole
//! assignment.  The caller can inspect [`SitePlan::skipped`] and decide.

use ceph_utils::crush::{CrushAdmin, CrushError, CrushRuleSpec};
use ceph_utils::executor::Executor;
use ceph_utils::health::{HealthOracle, Osd, QueryError};
use ceph_utils::ExecutionError;
use harness_common::config::Timeouts;
use slog::{info, o, warn, Logger};
use std::time::Duration;

/// Two sites of equal weight never differ by more than this; anything
/// larger means the pairing logic is broken.
pub const WEIGHT_EPSILON: f64 = 1e-6;

#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("crush edit failed")]
    Action(#[from] ExecutionError),

    #[error("crush rule installation failed")]
    Crush(#[from] CrushError),

    #[error("cluster query failed")]
    Query(#[from] QueryError),

    #[error(
        "planned sites are imbalanced: {site_a_weight} vs {site_b_weight}"
    )]
    Imbalanced { site_a_weight: f64, site_b_weight: f64 },
}

#[derive(Clone, Debug)]
pub struct Site {
    pub name: String,
    pub osds: Vec<Osd>,
}

impl Site {
    fn new(name: &str) -> Site {
        Site { name: name.to_string(), osds: Vec::new() }
    }

    pub fn weight(&self) -> f64 {
        self.osds.iter().map(|o| o.crush_weight).sum()
    }
}

/// The outcome of pairing the roster across two sites.
#[derive(Clone, Debug)]
pub struct SitePlan {
    pub site_a: Site,
    pub site_b: Site,
    /// OSDs left out of the plan: down at scan time, or no up peer of
    /// exactly equal weight.
    pub skipped: Vec<Osd>,
}

/// Pairs up OSDs of exactly equal weight, assigning one of each pair to
/// each site.
pub fn plan_sites(
    log: &Logger,
    site_a_name: &str,
    site_b_name: &str,
    osds: Vec<Osd>,
) -> Result<SitePlan, BalanceError> {
    let mut remaining = osds;
    let mut plan = SitePlan {
        site_a: Site::new(site_a_name),
        site_b: Site::new(site_b_name),
        skipped: Vec::new(),
    };

    while !remaining.is_empty() {
        let osd = remaining.remove(0);
        if !osd.up {
            warn!(log, "skipping down osd"; "osd" => %osd.id);
            plan.skipped.push(osd);
            continue;
        }
        let peer_index = remaining
            .iter()
            .position(|peer| peer.up && peer.crush_weight == osd.crush_weight);
        match peer_index {
            Some(index) => {
                let peer = remaining.remove(index);
                info!(
                    log, "paired osds across sites";
                    "site_a" => %osd.id,
                    "site_b" => %peer.id,
                    "weight" => osd.crush_weight,
                );
                plan.site_a.osds.push(osd);
                plan.site_b.osds.push(peer);
            }
            None => {
                warn!(
                    log, "no equal-weight peer for osd, skipping";
                    "osd" => %osd.id,
                    "weight" => osd.crush_weight,
                );
                plan.skipped.push(osd);
            }
        }
    }

    let (site_a_weight, site_b_weight) =
        (plan.site_a.weight(), plan.site_b.weight());
    if (site_a_weight - site_b_weight).abs() > WEIGHT_EPSILON {
        return Err(BalanceError::Imbalanced { site_a_weight, site_b_weight });
    }
    Ok(plan)
}

/// Applies a [`SitePlan`] to the live cluster and installs the stretch
/// placement rule.
pub struct SiteBalancer<'a> {
    crush: CrushAdmin<'a>,
    oracle: HealthOracle<'a>,
    settle: Duration,
    log: Logger,
}

impl<'a> SiteBalancer<'a> {
    pub fn new(
        log: &Logger,
        exec: &'a dyn Executor,
        admin_host: &'a str,
        timeouts: &Timeouts,
    ) -> SiteBalancer<'a> {
        SiteBalancer {
            crush: CrushAdmin::new(log, exec, admin_host),
            oracle: HealthOracle::new(log, exec, admin_host),
            settle: timeouts.crush_settle(),
            log: log.new(o!("component" => "site-balancer")),
        }
    }

    /// Reads the current roster and produces a plan.
    pub fn plan(
        &self,
        site_a: &str,
        site_b: &str,
    ) -> Result<SitePlan, BalanceError> {
        let osds = self.oracle.osd_tree()?;
        plan_sites(&self.log, site_a, site_b, osds)
    }

    /// Moves every planned OSD under its site bucket.
    ///
    /// Moves are strictly serial with a settle delay after each one:
    /// concurrent crush-map edits are not safe.
    pub fn apply(&self, plan: &SitePlan) -> Result<(), BalanceError> {
        for site in [&plan.site_a, &plan.site_b] {
            for osd in &site.osds {
                self.crush.move_osd(osd.id, "datacenter", &site.name)?;
                std::thread::sleep(self.settle);
            }
        }
        info!(
            self.log, "site assignment applied";
            "site_a" => plan.site_a.osds.len(),
            "site_b" => plan.site_b.osds.len(),
            "skipped" => plan.skipped.len(),
        );
        Ok(())
    }

    /// Installs the two-site placement rule for `plan`.
    pub fn install_stretch_rule(
        &self,
        plan: &SitePlan,
        rule_name: &str,
        rule_id: u32,
    ) -> Result<(), BalanceError> {
        let rule = CrushRuleSpec {
            name: rule_name.to_string(),
            id: rule_id,
            site_a: plan.site_a.name.clone(),
            site_b: plan.site_b.name.clone(),
        };
        self.crush.install_rule(&rule)?;
        Ok(())
    }

    /// Places monitors: the data-site monitors under their sites and one
    /// tie-breaker monitor alone in the third site, then enables stretch
    /// mode.
    pub fn place_mons_and_enable(
        &self,
        assignments: &[(&str, &str)],
        tiebreaker: (&str, &str),
        rule_name: &str,
    ) -> Result<(), BalanceError> {
        for (mon, site) in assignments {
            self.crush.set_mon_location(mon, "datacenter", site)?;
        }
        let (tiebreaker_mon, tiebreaker_site) = tiebreaker;
        self.crush.set_mon_location(
            tiebreaker_mon,
            "datacenter",
            tiebreaker_site,
        )?;
        self.crush.enable_stretch_mode(tiebreaker_mon, rule_name, "datacenter")?;
        Ok(())
    }
}
