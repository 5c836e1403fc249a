// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only cluster status queries with typed decoding.
//!
//! Every query asks the CLI for `-f json` and decodes into a small struct
//! per query type.  Empty or malformed output becomes
//! [`QueryError::Parse`], which polling loops treat as "not yet" rather
//! than a fatal error: the cluster CLI is known to return partial output
//! under load.

use crate::executor::Executor;
use crate::{ExecutionError, OsdId};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use slog::{o, Logger};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("failed to parse `{command}` output (stdout: {stdout:?})")]
    Parse {
        command: String,
        stdout: String,
        #[source]
        err: serde_json::Error,
    },
}

impl QueryError {
    /// True for failures a polling loop should absorb and retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, QueryError::Parse { .. })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Warn,
    Err,
    /// Anything we don't recognize.  Deliberately not a decode error so a
    /// half-written status string keeps the poll loop running.
    Unknown,
}

impl From<&str> for HealthStatus {
    fn from(s: &str) -> HealthStatus {
        match s {
            "HEALTH_OK" => HealthStatus::Ok,
            "HEALTH_WARN" => HealthStatus::Warn,
            "HEALTH_ERR" => HealthStatus::Err,
            _ => HealthStatus::Unknown,
        }
    }
}

/// The short cluster health plus the names of active health checks.
#[derive(Clone, Debug)]
pub struct HealthSummary {
    pub status: HealthStatus,
    pub checks: BTreeSet<String>,
}

impl HealthSummary {
    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }

    /// True when no health checks are active: `HEALTH_OK`, or a
    /// `HEALTH_WARN` whose check list has already drained.
    pub fn has_no_active_checks(&self) -> bool {
        match self.status {
            HealthStatus::Ok => true,
            HealthStatus::Warn => self.checks.is_empty(),
            HealthStatus::Err | HealthStatus::Unknown => false,
        }
    }
}

/// Counts of PGs grouped by composite state string.
#[derive(Clone, Debug)]
pub struct PgStateHistogram {
    pub by_state: BTreeMap<String, u64>,
    pub total: u64,
}

impl PgStateHistogram {
    /// True when every PG is in the terminal, fully recovered state.
    ///
    /// An empty histogram is not clean: the CLI emits a hollow summary
    /// while the mon is still assembling PG state, and that means
    /// "unknown", not "recovered".
    pub fn all_active_clean(&self) -> bool {
        self.total > 0
            && self.by_state.keys().all(|state| state == "active+clean")
    }

    /// PGs not serving I/O at all (no "active" in the state string).
    pub fn inactive(&self) -> u64 {
        self.by_state
            .iter()
            .filter(|(state, _)| !state.contains("active"))
            .map(|(_, n)| n)
            .sum()
    }
}

impl fmt::Display for PgStateHistogram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} pgs:", self.total)?;
        if self.by_state.is_empty() {
            return write!(f, " none");
        }
        for (state, count) in &self.by_state {
            write!(f, " {count} {state};")?;
        }
        Ok(())
    }
}

/// Snapshot of one PG's mapping, as reported by `ceph pg ls-by-pool`.
#[derive(Clone, Debug, Deserialize)]
pub struct PgInfo {
    pub pgid: String,
    pub state: String,
    pub acting: Vec<i64>,
}

/// Value snapshot of one OSD from `ceph osd tree`.
///
/// Snapshots are re-fetched on every poll, never cached, so concurrent
/// cluster-side changes can't leave the harness reasoning about stale state.
#[derive(Clone, Debug)]
pub struct Osd {
    pub id: OsdId,
    pub host: Option<String>,
    pub crush_weight: f64,
    pub up: bool,
    pub in_cluster: bool,
}

/// Aggregate pool check result: pass/fail plus a human-readable reason.
#[derive(Clone, Debug)]
pub struct PoolHealth {
    pub healthy: bool,
    pub reason: String,
}

#[derive(Debug, Deserialize)]
struct RawHealth {
    status: String,
    #[serde(default)]
    checks: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawPgStat {
    pg_summary: RawPgSummary,
}

#[derive(Debug, Deserialize)]
struct RawPgSummary {
    #[serde(default)]
    num_pg_by_state: Vec<RawPgStateCount>,
    #[serde(default)]
    num_pgs: u64,
}

#[derive(Debug, Deserialize)]
struct RawPgStateCount {
    name: String,
    num: u64,
}

#[derive(Debug, Deserialize)]
struct RawPgLs {
    #[serde(default)]
    pg_stats: Vec<PgInfo>,
}

#[derive(Debug, Deserialize)]
struct RawTree {
    nodes: Vec<RawTreeNode>,
}

#[derive(Debug, Deserialize)]
struct RawTreeNode {
    id: i64,
    name: String,
    #[serde(rename = "type")]
    node_type: String,
    #[serde(default)]
    children: Vec<i64>,
    #[serde(default)]
    crush_weight: Option<f64>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    reweight: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct RawPoolSize {
    size: u64,
}

#[derive(Debug, Deserialize)]
struct RawPoolCrushRule {
    crush_rule: serde_json::Value,
}

/// Issues read-only status queries against the cluster.
pub struct HealthOracle<'a> {
    exec: &'a dyn Executor,
    host: &'a str,
    log: Logger,
}

impl<'a> HealthOracle<'a> {
    pub fn new(
        log: &Logger,
        exec: &'a dyn Executor,
        host: &'a str,
    ) -> HealthOracle<'a> {
        HealthOracle {
            exec,
            host,
            log: log.new(o!("component" => "health-oracle")),
        }
    }

    fn query<T: DeserializeOwned>(
        &self,
        command: &str,
    ) -> Result<T, QueryError> {
        let output = self.exec.exec(self.host, command)?;
        decode(command, &output.stdout)
    }

    pub fn health_summary(&self) -> Result<HealthSummary, QueryError> {
        let raw: RawHealth = self.query("ceph health detail -f json")?;
        slog::debug!(self.log, "health"; "status" => &raw.status);
        Ok(HealthSummary {
            status: HealthStatus::from(raw.status.as_str()),
            checks: raw.checks.into_keys().collect(),
        })
    }

    pub fn pg_state_histogram(&self) -> Result<PgStateHistogram, QueryError> {
        let raw: RawPgStat = self.query("ceph pg stat -f json")?;
        Ok(PgStateHistogram {
            by_state: raw
                .pg_summary
                .num_pg_by_state
                .into_iter()
                .map(|s| (s.name, s.num))
                .collect(),
            total: raw.pg_summary.num_pgs,
        })
    }

    pub fn pg_ls_by_pool(&self, pool: &str) -> Result<Vec<PgInfo>, QueryError> {
        let raw: RawPgLs =
            self.query(&format!("ceph pg ls-by-pool {pool} -f json"))?;
        Ok(raw.pg_stats)
    }

    /// Decodes `ceph osd tree`, attributing each OSD to its host bucket.
    pub fn osd_tree(&self) -> Result<Vec<Osd>, QueryError> {
        let raw: RawTree = self.query("ceph osd tree -f json")?;
        Ok(osds_from_tree(raw))
    }

    pub fn pool_size(&self, pool: &str) -> Result<u64, QueryError> {
        let raw: RawPoolSize =
            self.query(&format!("ceph osd pool get {pool} size -f json"))?;
        Ok(raw.size)
    }

    pub fn pool_crush_rule(&self, pool: &str) -> Result<String, QueryError> {
        let raw: RawPoolCrushRule = self
            .query(&format!("ceph osd pool get {pool} crush_rule -f json"))?;
        // Older releases report the rule id, newer ones the name.
        Ok(match raw.crush_rule {
            serde_json::Value::String(name) => name,
            other => other.to_string(),
        })
    }

    /// Aggregate health check for one pool: cluster health, PG states, and
    /// the pool's replication/placement properties.
    pub fn is_pool_healthy(&self, pool: &str) -> Result<PoolHealth, QueryError> {
        let health = self.health_summary()?;
        if !health.has_no_active_checks() {
            return Ok(PoolHealth {
                healthy: false,
                reason: format!(
                    "cluster health is {:?} (checks: {:?})",
                    health.status, health.checks
                ),
            });
        }

        let histogram = self.pg_state_histogram()?;
        if !histogram.all_active_clean() {
            return Ok(PoolHealth {
                healthy: false,
                reason: format!("pgs not clean: {histogram}"),
            });
        }

        let size = self.pool_size(pool)?;
        let pgs = self.pg_ls_by_pool(pool)?;
        for pg in &pgs {
            if pg.acting.len() as u64 != size {
                return Ok(PoolHealth {
                    healthy: false,
                    reason: format!(
                        "pg {} acting set has {} osds, pool size is {}",
                        pg.pgid,
                        pg.acting.len(),
                        size
                    ),
                });
            }
        }

        let rule = self.pool_crush_rule(pool)?;
        if rule.is_empty() {
            return Ok(PoolHealth {
                healthy: false,
                reason: format!("pool {pool} has no crush rule assigned"),
            });
        }

        Ok(PoolHealth {
            healthy: true,
            reason: format!(
                "pool {pool}: {} pgs clean, size {size}, rule {rule}",
                pgs.len()
            ),
        })
    }
}

pub(crate) fn decode<T: DeserializeOwned>(
    command: &str,
    stdout: &str,
) -> Result<T, QueryError> {
    serde_json::from_str(stdout).map_err(|err| QueryError::Parse {
        command: command.to_string(),
        stdout: stdout.to_string(),
        err,
    })
}

fn osds_from_tree(raw: RawTree) -> Vec<Osd> {
    let mut host_of: BTreeMap<i64, String> = BTreeMap::new();
    for node in &raw.nodes {
        if node.node_type == "host" {
            for child in &node.children {
                host_of.insert(*child, node.name.clone());
            }
        }
    }

    raw.nodes
        .into_iter()
        .filter(|n| n.node_type == "osd" && n.id >= 0)
        .map(|n| Osd {
            id: OsdId(n.id as u32),
            host: host_of.get(&n.id).cloned(),
            crush_weight: n.crush_weight.unwrap_or(0.0),
            up: n.status.as_deref() == Some("up"),
            in_cluster: n.reweight.unwrap_or(0.0) > 0.0,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_ok_decodes() {
        let raw: RawHealth =
            decode("ceph health detail -f json", r#"{"status":"HEALTH_OK","checks":{}}"#)
                .unwrap();
        let summary = HealthSummary {
            status: HealthStatus::from(raw.status.as_str()),
            checks: raw.checks.into_keys().collect(),
        };
        assert!(summary.is_ok());
        assert!(summary.has_no_active_checks());
    }

    #[test]
    fn health_warn_carries_check_names() {
        let json = r#"{
            "status": "HEALTH_WARN",
            "checks": {
                "OSD_DOWN": {"severity": "HEALTH_WARN", "summary": {"message": "1 osds down"}},
                "PG_DEGRADED": {"severity": "HEALTH_WARN", "summary": {"message": "Degraded data redundancy"}}
            }
        }"#;
        let raw: RawHealth = decode("ceph health detail -f json", json).unwrap();
        let summary = HealthSummary {
            status: HealthStatus::from(raw.status.as_str()),
            checks: raw.checks.into_keys().collect(),
        };
        assert_eq!(summary.status, HealthStatus::Warn);
        assert!(summary.checks.contains("OSD_DOWN"));
        assert!(summary.checks.contains("PG_DEGRADED"));
    }

    #[test]
    fn checkless_warn_counts_as_settled() {
        let warn = |checks: &[&str]| HealthSummary {
            status: HealthStatus::Warn,
            checks: checks.iter().map(|c| c.to_string()).collect(),
        };
        assert!(warn(&[]).has_no_active_checks());
        assert!(!warn(&["OSD_DOWN"]).has_no_active_checks());
        let err = HealthSummary {
            status: HealthStatus::Err,
            checks: BTreeSet::new(),
        };
        assert!(!err.has_no_active_checks());
    }

    #[test]
    fn unrecognized_status_is_unknown_not_an_error() {
        assert_eq!(HealthStatus::from("HEALTH_"), HealthStatus::Unknown);
        assert_eq!(HealthStatus::from(""), HealthStatus::Unknown);
    }

    #[test]
    fn empty_stdout_is_a_transient_parse_error() {
        let err = decode::<RawHealth>("ceph health detail -f json", "")
            .expect_err("empty output must not decode");
        assert!(err.is_transient());
    }

    #[test]
    fn truncated_json_is_a_transient_parse_error() {
        let err = decode::<RawPgStat>(
            "ceph pg stat -f json",
            r#"{"pg_summary":{"num_pg_by_state":[{"name":"active+cl"#,
        )
        .expect_err("truncated output must not decode");
        assert!(err.is_transient());
    }

    #[test]
    fn pg_histogram_classification() {
        let json = r#"{
            "pg_summary": {
                "num_pg_by_state": [
                    {"name": "active+clean", "num": 120},
                    {"name": "active+remapped+backfilling", "num": 8},
                    {"name": "unknown", "num": 1}
                ],
                "num_pgs": 129
            }
        }"#;
        let raw: RawPgStat = decode("ceph pg stat -f json", json).unwrap();
        let histogram = PgStateHistogram {
            by_state: raw
                .pg_summary
                .num_pg_by_state
                .into_iter()
                .map(|s| (s.name, s.num))
                .collect(),
            total: raw.pg_summary.num_pgs,
        };
        assert!(!histogram.all_active_clean());
        assert_eq!(histogram.inactive(), 1);
        assert_eq!(histogram.total, 129);

        let clean = PgStateHistogram {
            by_state: [("active+clean".to_string(), 129)].into_iter().collect(),
            total: 129,
        };
        assert!(clean.all_active_clean());
        assert_eq!(clean.inactive(), 0);
    }

    #[test]
    fn hollow_pg_summary_is_not_clean() {
        // The CLI emits this while the mon is still assembling PG state.
        let raw: RawPgStat =
            decode("ceph pg stat -f json", r#"{"pg_summary":{}}"#).unwrap();
        let histogram = PgStateHistogram {
            by_state: raw
                .pg_summary
                .num_pg_by_state
                .into_iter()
                .map(|s| (s.name, s.num))
                .collect(),
            total: raw.pg_summary.num_pgs,
        };
        assert!(!histogram.all_active_clean());
    }

    #[test]
    fn pg_ls_by_pool_decodes_acting_sets() {
        let json = r#"{
            "pg_stats": [
                {"pgid": "1.0", "state": "active+clean", "acting": [0, 1, 2]},
                {"pgid": "1.1", "state": "active+clean", "acting": [2, 0, 1]}
            ]
        }"#;
        let raw: RawPgLs = decode("ceph pg ls-by-pool rbd -f json", json).unwrap();
        assert_eq!(raw.pg_stats.len(), 2);
        assert_eq!(raw.pg_stats[0].acting, vec![0, 1, 2]);
    }

    #[test]
    fn osd_tree_attributes_hosts_and_state() {
        let json = r#"{
            "nodes": [
                {"id": -1, "name": "default", "type": "root", "children": [-2, -3]},
                {"id": -2, "name": "osd-node-1", "type": "host", "children": [0, 1]},
                {"id": -3, "name": "osd-node-2", "type": "host", "children": [2]},
                {"id": 0, "name": "osd.0", "type": "osd", "crush_weight": 1.0, "status": "up", "reweight": 1.0},
                {"id": 1, "name": "osd.1", "type": "osd", "crush_weight": 1.0, "status": "up", "reweight": 1.0},
                {"id": 2, "name": "osd.2", "type": "osd", "crush_weight": 0.5, "status": "down", "reweight": 0.0}
            ],
            "stray": []
        }"#;
        let raw: RawTree = decode("ceph osd tree -f json", json).unwrap();
        let osds = osds_from_tree(raw);
        assert_eq!(osds.len(), 3);
        assert_eq!(osds[0].host.as_deref(), Some("osd-node-1"));
        assert_eq!(osds[2].host.as_deref(), Some("osd-node-2"));
        assert!(osds[0].up && osds[0].in_cluster);
        assert!(!osds[2].up && !osds[2].in_cluster);
        assert_eq!(osds[2].crush_weight, 0.5);
    }

    #[test]
    fn pool_crush_rule_tolerates_id_or_name() {
        let by_name: RawPoolCrushRule =
            decode("x", r#"{"crush_rule": "replicated_rule"}"#).unwrap();
        assert!(matches!(by_name.crush_rule, serde_json::Value::String(_)));
        let by_id: RawPoolCrushRule =
            decode("x", r#"{"crush_rule": 0}"#).unwrap();
        assert_eq!(by_id.crush_rule.to_string(), "0");
    }
}
