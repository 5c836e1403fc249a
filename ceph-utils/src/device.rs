// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Maps a logical OSD id to the physical device backing it.
//!
//! The daemon's runtime container is found with `cephadm ls` on each OSD
//! host; the owning host's volume listing (`cephadm ceph-volume lvm list`)
//! then yields the device path.  An OSD mid-transition simply has no
//! matching container: that is reported as `None`, and callers poll.

use crate::executor::Executor;
use crate::health::{decode, QueryError};
use crate::OsdId;
use camino::Utf8PathBuf;
use serde::Deserialize;
use slog::{debug, o, Logger};
use std::collections::BTreeMap;
use std::fmt;

/// Which of an OSD's logical volumes to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceRole {
    /// The data volume.  This is the default everywhere.
    Block,
    Db,
    Wal,
}

impl DeviceRole {
    fn as_str(&self) -> &'static str {
        match self {
            DeviceRole::Block => "block",
            DeviceRole::Db => "db",
            DeviceRole::Wal => "wal",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceLocation {
    pub host: String,
    pub path: Utf8PathBuf,
}

impl fmt::Display for DeviceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.path)
    }
}

#[derive(Debug, Deserialize)]
struct RawDaemon {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawLv {
    #[serde(rename = "type")]
    lv_type: String,
    #[serde(default)]
    devices: Vec<Utf8PathBuf>,
}

type RawLvmListing = BTreeMap<String, Vec<RawLv>>;

pub struct DeviceLocator<'a> {
    exec: &'a dyn Executor,
    osd_hosts: Vec<String>,
    log: Logger,
}

impl<'a> DeviceLocator<'a> {
    pub fn new(
        log: &Logger,
        exec: &'a dyn Executor,
        osd_hosts: Vec<String>,
    ) -> DeviceLocator<'a> {
        DeviceLocator {
            exec,
            osd_hosts,
            log: log.new(o!("component" => "device-locator")),
        }
    }

    /// Resolves the data device for `id`, or `None` if no host currently
    /// runs a matching daemon.
    pub fn locate(
        &self,
        id: OsdId,
    ) -> Result<Option<DeviceLocation>, QueryError> {
        self.locate_role(id, DeviceRole::Block)
    }

    pub fn locate_role(
        &self,
        id: OsdId,
        role: DeviceRole,
    ) -> Result<Option<DeviceLocation>, QueryError> {
        for host in &self.osd_hosts {
            let command = "cephadm ls --no-detail";
            let output = self.exec.exec(host, command)?;
            let daemons: Vec<RawDaemon> = decode(command, &output.stdout)?;
            let daemon_name = id.to_string();
            if !daemons.iter().any(|d| d.name == daemon_name) {
                continue;
            }

            let command = "cephadm ceph-volume lvm list --format json";
            let output = self.exec.exec(host, command)?;
            let listing: RawLvmListing = decode(command, &output.stdout)?;
            let path = select_device(&listing, id, role);
            debug!(
                self.log, "resolved osd device";
                "osd" => %id,
                "host" => host.as_str(),
                "path" => ?path,
            );
            // The daemon exists here; if the volume listing has no matching
            // entry the OSD is mid-transition and the caller should retry.
            return Ok(path
                .map(|path| DeviceLocation { host: host.clone(), path }));
        }
        Ok(None)
    }
}

fn select_device(
    listing: &RawLvmListing,
    id: OsdId,
    role: DeviceRole,
) -> Option<Utf8PathBuf> {
    listing
        .get(&id.index().to_string())?
        .iter()
        .find(|lv| lv.lv_type == role.as_str())
        .and_then(|lv| lv.devices.first().cloned())
}
