// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Balances the OSD roster across two data sites and installs the stretch
//! placement rule on a deployed cluster.

use anyhow::Context;
use ceph_live_tests::LiveTestContext;
use ceph_utils::executor::{Executor, SshExecutor};
use harness_common::scenario::run_scenario;
use osd_lifecycle::balancer::{SiteBalancer, WEIGHT_EPSILON};

const SITE_A: &str = "site-a";
const SITE_B: &str = "site-b";
const TIEBREAKER_SITE: &str = "site-tiebreaker";
const RULE: &str = "stretch_rule";
const RULE_ID: u32 = 101;

#[test]
fn stretch_sites_balance_and_rule_installs() -> anyhow::Result<()> {
    let Some(ctx) = LiveTestContext::new("stretch_sites_balance_and_rule_installs")?
    else {
        return Ok(());
    };
    let exec = SshExecutor::new(ctx.log.clone(), ctx.config.ssh.clone());
    let admin = ctx
        .config
        .admin_host()
        .expect("checked during context setup")
        .hostname
        .clone();
    let balancer =
        SiteBalancer::new(&ctx.log, &exec, &admin, &ctx.config.timeouts);

    // The site buckets must exist before anything can move under them.
    for site in [SITE_A, SITE_B, TIEBREAKER_SITE] {
        exec.exec(
            &admin,
            &format!("ceph osd crush add-bucket {site} datacenter"),
        )?;
        exec.exec(
            &admin,
            &format!("ceph osd crush move {site} root=default"),
        )?;
    }

    run_scenario(
        &ctx.log,
        "stretch-site-balance",
        || {
            let plan = balancer.plan(SITE_A, SITE_B)?;
            anyhow::ensure!(
                !plan.site_a.osds.is_empty(),
                "pairing produced empty sites; roster: {} skipped",
                plan.skipped.len()
            );
            anyhow::ensure!(
                (plan.site_a.weight() - plan.site_b.weight()).abs()
                    <= WEIGHT_EPSILON,
                "sites imbalanced: {} vs {}",
                plan.site_a.weight(),
                plan.site_b.weight()
            );

            balancer.apply(&plan)?;
            balancer.install_stretch_rule(&plan, RULE, RULE_ID)?;

            // Mon placement: one data-site mon per site, tie-breaker alone.
            let mons: Vec<String> = ctx
                .config
                .mon_hosts()
                .map(|h| format!("mon.{}", h.hostname))
                .collect();
            let [a, b, tiebreaker] = mons.as_slice() else {
                anyhow::bail!(
                    "stretch mode wants exactly 3 mons, found {}",
                    mons.len()
                );
            };
            balancer.place_mons_and_enable(
                &[(a.as_str(), SITE_A), (b.as_str(), SITE_B)],
                (tiebreaker.as_str(), TIEBREAKER_SITE),
                RULE,
            )?;
            Ok(())
        },
        || {
            // Best-effort: a failed balance run leaves the rule in place
            // (harmless), but unset managed-flag changes are not involved
            // here; nothing else to roll back besides reporting state.
            let tree = exec.exec(&admin, "ceph osd tree")?;
            slog::info!(
                ctx.log, "crush tree after stretch scenario";
                "tree" => tree.stdout
            );
            Ok(())
        },
    )
    .context("stretch-site scenario")?;
    Ok(())
}
