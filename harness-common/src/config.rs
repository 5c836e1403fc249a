// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Harness configuration, deserialized once from a YAML file and passed by
//! reference to every component that needs hosts, credentials, or timeouts.

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    Parse {
        path: Utf8PathBuf,
        #[source]
        err: serde_yaml::Error,
    },
}

/// Role a host plays in the cluster under test.
#[derive(
    Clone, Copy, Debug, Deserialize, PartialEq, Eq, PartialOrd, Ord,
)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Mon,
    Mgr,
    Osd,
    Mds,
    Rgw,
    Client,
    Installer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Mon => "mon",
            Role::Mgr => "mgr",
            Role::Osd => "osd",
            Role::Mds => "mds",
            Role::Rgw => "rgw",
            Role::Client => "client",
            Role::Installer => "installer",
        };
        write!(f, "{s}")
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HostConfig {
    pub hostname: String,
    pub address: String,
    #[serde(default)]
    pub roles: BTreeSet<Role>,
}

impl HostConfig {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SshConfig {
    #[serde(default = "SshConfig::default_user")]
    pub user: String,
    #[serde(default)]
    pub identity_file: Option<Utf8PathBuf>,
    #[serde(default)]
    pub sudo: bool,
}

impl SshConfig {
    fn default_user() -> String {
        "root".to_string()
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        SshConfig {
            user: SshConfig::default_user(),
            identity_file: None,
            sudo: false,
        }
    }
}

/// Polling budgets for the harness.  Values are seconds in the config file.
///
/// The device-absence budget is deliberately generous: draining a large OSD
/// can take hours of backfill before the device is released.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    #[serde(default = "Timeouts::default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "Timeouts::default_clean_pgs_timeout_secs")]
    pub clean_pgs_timeout_secs: u64,
    #[serde(default = "Timeouts::default_device_absent_timeout_secs")]
    pub device_absent_timeout_secs: u64,
    #[serde(default = "Timeouts::default_crush_settle_secs")]
    pub crush_settle_secs: u64,
}

impl Timeouts {
    fn default_poll_interval_secs() -> u64 {
        10
    }

    fn default_clean_pgs_timeout_secs() -> u64 {
        1800
    }

    fn default_device_absent_timeout_secs() -> u64 {
        9000
    }

    fn default_crush_settle_secs() -> u64 {
        20
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn clean_pgs_timeout(&self) -> Duration {
        Duration::from_secs(self.clean_pgs_timeout_secs)
    }

    pub fn device_absent_timeout(&self) -> Duration {
        Duration::from_secs(self.device_absent_timeout_secs)
    }

    pub fn crush_settle(&self) -> Duration {
        Duration::from_secs(self.crush_settle_secs)
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            poll_interval_secs: Timeouts::default_poll_interval_secs(),
            clean_pgs_timeout_secs: Timeouts::default_clean_pgs_timeout_secs(),
            device_absent_timeout_secs:
                Timeouts::default_device_absent_timeout_secs(),
            crush_settle_secs: Timeouts::default_crush_settle_secs(),
        }
    }
}

/// Process-wide harness configuration.
///
/// Constructed once at startup (`Config::from_file`) and passed by reference;
/// there is no global cached copy.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub cluster_name: String,
    #[serde(default)]
    pub ssh: SshConfig,
    pub hosts: Vec<HostConfig>,
    #[serde(default)]
    pub timeouts: Timeouts,
}

impl Config {
    pub fn from_file(path: &Utf8Path) -> Result<Config, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|err| {
            ConfigError::Io { path: path.to_owned(), err }
        })?;
        Config::from_yaml(path, &contents)
    }

    fn from_yaml(path: &Utf8Path, contents: &str) -> Result<Config, ConfigError> {
        serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            path: path.to_owned(),
            err,
        })
    }

    /// The host the `ceph` administrative CLI is driven from: the first host
    /// with the client or installer role, falling back to the first monitor.
    pub fn admin_host(&self) -> Option<&HostConfig> {
        self.hosts
            .iter()
            .find(|h| h.has_role(Role::Client) || h.has_role(Role::Installer))
            .or_else(|| self.hosts.iter().find(|h| h.has_role(Role::Mon)))
    }

    pub fn osd_hosts(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.iter().filter(|h| h.has_role(Role::Osd))
    }

    pub fn mon_hosts(&self) -> impl Iterator<Item = &HostConfig> {
        self.hosts.iter().filter(|h| h.has_role(Role::Mon))
    }
}
