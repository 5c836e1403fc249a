// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stretch-site balancing against a scripted cluster.

use ceph_utils::executor::CommandOutput;
use harness_common::config::Timeouts;
use harness_test_utils::{test_setup_log, FakeExecutor};
use osd_lifecycle::balancer::{SiteBalancer, WEIGHT_EPSILON};

const OSD_TREE: &str = r#"{
    "nodes": [
        {"id": -1, "name": "default", "type": "root", "children": [-2, -3]},
        {"id": -2, "name": "osd-node-1", "type": "host", "children": [0, 2]},
        {"id": -3, "name": "osd-node-2", "type": "host", "children": [1, 3]},
        {"id": 0, "name": "osd.0", "type": "osd", "crush_weight": 1.0, "status": "up", "reweight": 1.0},
        {"id": 1, "name": "osd.1", "type": "osd", "crush_weight": 1.0, "status": "up", "reweight": 1.0},
        {"id": 2, "name": "osd.2", "type": "osd", "crush_weight": 0.5, "status": "up", "reweight": 1.0},
        {"id": 3, "name": "osd.3", "type": "osd", "crush_weight": 0.5, "status": "down", "reweight": 0.0}
    ],
    "stray": []
}"#;

const CRUSHMAP_BEFORE: &str = "\
# begin crush map\n\
rule replicated_rule {\n\
\tid 0\n\
\ttype replicated\n\
\tstep take default\n\
\tstep chooseleaf firstn 0 type host\n\
\tstep emit\n\
}\n";

fn zero_settle() -> Timeouts {
    Timeouts {
        poll_interval_secs: 0,
        clean_pgs_timeout_secs: 0,
        device_absent_timeout_secs: 0,
        crush_settle_secs: 0,
    }
}

#[test]
fn plan_apply_moves_each_paired_osd_serially() {
    let log = test_setup_log("plan_apply_moves_each_paired_osd_serially");
    let exec = FakeExecutor::new();
    exec.expect("ceph osd tree", CommandOutput::success(OSD_TREE));

    let timeouts = zero_settle();
    let balancer = SiteBalancer::new(&log, &exec, "mon-1", &timeouts);
    let plan = balancer.plan("site-a", "site-b").unwrap();

    // osd.0/osd.1 pair at weight 1.0; osd.2 has no up peer at 0.5 (osd.3
    // is down) and both end up skipped.
    assert_eq!(plan.site_a.osds.len(), 1);
    assert_eq!(plan.site_b.osds.len(), 1);
    assert_eq!(plan.skipped.len(), 2);
    assert!(
        (plan.site_a.weight() - plan.site_b.weight()).abs() <= WEIGHT_EPSILON
    );

    balancer.apply(&plan).unwrap();
    assert_eq!(
        exec.commands_matching("crush move"),
        [
            "ceph osd crush move osd.0 datacenter=site-a",
            "ceph osd crush move osd.1 datacenter=site-b",
        ]
    );
}

#[test]
fn stretch_rule_is_appended_compiled_and_set() {
    let log = test_setup_log("stretch_rule_is_appended_compiled_and_set");
    let exec = FakeExecutor::new();
    exec.expect("ceph osd tree", CommandOutput::success(OSD_TREE));
    let after_install = format!(
        "{CRUSHMAP_BEFORE}\nrule stretch_rule {{\n\tid 101\n\ttype replicated\n\
         \tstep take site-a\n\tstep chooseleaf firstn 2 type host\n\tstep emit\n\
         \tstep take site-b\n\tstep chooseleaf firstn 2 type host\n\tstep emit\n}}\n"
    );
    exec.expect_sequence(
        "cat /tmp/crushmap.txt",
        vec![
            CommandOutput::success(CRUSHMAP_BEFORE),
            CommandOutput::success(after_install),
        ],
    );

    let timeouts = zero_settle();
    let balancer = SiteBalancer::new(&log, &exec, "mon-1", &timeouts);
    let plan = balancer.plan("site-a", "site-b").unwrap();
    balancer.install_stretch_rule(&plan, "stretch_rule", 101).unwrap();

    // The edited map text was pushed to the admin host with the new rule
    // appended after the existing content.
    let writes = exec.writes();
    assert_eq!(writes.len(), 1);
    let (host, path, content) = &writes[0];
    assert_eq!(host, "mon-1");
    assert_eq!(path, "/tmp/crushmap.txt");
    assert!(content.starts_with(CRUSHMAP_BEFORE));
    assert!(content.contains("rule stretch_rule {"));
    assert!(content.contains("step take site-a"));
    assert!(content.contains("step take site-b"));

    // get → decompile → (edit) → compile → set, in order.
    let compile_and_set: Vec<String> = exec
        .calls()
        .into_iter()
        .map(|c| c.command)
        .filter(|c| c.contains("crushtool -c") || c.contains("setcrushmap"))
        .collect();
    assert_eq!(
        compile_and_set,
        [
            "crushtool -c /tmp/crushmap.txt -o /tmp/crushmap-new.bin",
            "ceph osd setcrushmap -i /tmp/crushmap-new.bin",
        ]
    );
}

#[test]
fn installing_an_already_present_rule_is_a_noop() {
    let log = test_setup_log("installing_an_already_present_rule_is_a_noop");
    let exec = FakeExecutor::new();
    exec.expect("ceph osd tree", CommandOutput::success(OSD_TREE));
    let already = format!(
        "{CRUSHMAP_BEFORE}rule stretch_rule {{\n\tid 101\n}}\n"
    );
    exec.expect("cat /tmp/crushmap.txt", CommandOutput::success(already));

    let timeouts = zero_settle();
    let balancer = SiteBalancer::new(&log, &exec, "mon-1", &timeouts);
    let plan = balancer.plan("site-a", "site-b").unwrap();
    balancer.install_stretch_rule(&plan, "stretch_rule", 101).unwrap();

    assert!(exec.writes().is_empty());
    assert!(exec.commands_matching("setcrushmap").is_empty());
}

#[test]
fn mon_placement_and_stretch_mode_enable() {
    let log = test_setup_log("mon_placement_and_stretch_mode_enable");
    let exec = FakeExecutor::new();
    let timeouts = zero_settle();
    let balancer = SiteBalancer::new(&log, &exec, "mon-1", &timeouts);

    balancer
        .place_mons_and_enable(
            &[("mon.a", "site-a"), ("mon.b", "site-b")],
            ("mon.e", "site-tiebreaker"),
            "stretch_rule",
        )
        .unwrap();

    assert_eq!(
        exec.commands_matching("set_location"),
        [
            "ceph mon set_location mon.a datacenter=site-a",
            "ceph mon set_location mon.b datacenter=site-b",
            "ceph mon set_location mon.e datacenter=site-tiebreaker",
        ]
    );
    assert_eq!(
        exec.commands_matching("enable_stretch_mode"),
        ["ceph mon enable_stretch_mode mon.e stretch_rule datacenter"]
    );
}
