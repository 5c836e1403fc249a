// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wrappers around the Ceph administrative CLI, driven over a remote
//! command executor.

use std::fmt;
use std::str::FromStr;

pub mod crush;
pub mod device;
pub mod executor;
pub mod health;

pub use executor::{CommandOutput, Executor};

/// Identifier of one OSD in the cluster under test.
///
/// Renders as the daemon name (`osd.3`); [`OsdId::index`] gives the bare
/// numeric form most `ceph osd` subcommands take.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OsdId(pub u32);

impl OsdId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for OsdId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "osd.{}", self.0)
    }
}

impl FromStr for OsdId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("osd.").unwrap_or(s);
        digits
            .parse::<u32>()
            .map(OsdId)
            .map_err(|_| format!("not an OSD id: {s:?}"))
    }
}

#[derive(Debug)]
pub struct CommandFailureInfo {
    pub host: String,
    pub command: String,
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl fmt::Display for CommandFailureInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "command [{}] on host {} failed with status {}",
            self.command, self.host, self.status
        )?;
        write!(f, "  stdout: {}", self.stdout)?;
        write!(f, "  stderr: {}", self.stderr)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    #[error("failed to start execution of [{command}] on host {host}")]
    ExecutionStart {
        host: String,
        command: String,
        #[source]
        err: std::io::Error,
    },

    #[error("{0}")]
    CommandFailure(Box<CommandFailureInfo>),

    #[error("failed to write {path} on host {host}")]
    RemoteWrite {
        host: String,
        path: String,
        #[source]
        err: std::io::Error,
    },
}

/// Converts a completed-but-failed command into an [`ExecutionError`].
pub fn output_to_exec_error(
    host: &str,
    command: &str,
    output: &CommandOutput,
) -> ExecutionError {
    ExecutionError::CommandFailure(Box::new(CommandFailureInfo {
        host: host.to_string(),
        command: command.to_string(),
        status: output.status,
        stdout: output.stdout.clone(),
        stderr: output.stderr.clone(),
    }))
}
