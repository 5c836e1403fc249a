// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Remote command execution.
//!
//! Everything the harness does to the cluster goes through [`Executor`]:
//! production code uses [`SshExecutor`], tests inject a scripted fake.

use crate::{output_to_exec_error, ExecutionError};
use camino::Utf8Path;
use harness_common::config::SshConfig;
use slog::{debug, info, Logger};
use std::io::Write;
use std::process::{Command, Stdio};
use std::time::Duration;

/// The result of a completed remote command.
#[derive(Clone, Debug)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub status: i32,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> CommandOutput {
        CommandOutput { stdout: stdout.into(), stderr: String::new(), status: 0 }
    }

    pub fn failure(status: i32, stderr: impl Into<String>) -> CommandOutput {
        CommandOutput { stdout: String::new(), stderr: stderr.into(), status }
    }
}

/// Executes commands on named cluster hosts.
///
/// A non-zero exit status is surfaced as
/// [`ExecutionError::CommandFailure`]; callers that can tolerate a failing
/// observation handle that at their own layer.
pub trait Executor: Send + Sync {
    fn exec(
        &self,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutionError>;

    /// Like [`Executor::exec`] but bounds the remote command's runtime.
    fn exec_with_timeout(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, ExecutionError> {
        let bounded = format!("timeout {} {command}", timeout.as_secs());
        self.exec(host, &bounded)
    }

    /// Writes `content` to `path` on `host`, flushing before returning.
    ///
    /// No atomic rename is attempted; a partial write on an interrupted
    /// connection is an accepted risk of the harness.
    fn write_file(
        &self,
        host: &str,
        path: &Utf8Path,
        content: &str,
    ) -> Result<(), ExecutionError>;
}

/// Production executor: shells out to `ssh`.
pub struct SshExecutor {
    config: SshConfig,
    log: Logger,
}

impl SshExecutor {
    pub fn new(log: Logger, config: SshConfig) -> SshExecutor {
        SshExecutor { config, log }
    }

    fn remote_command(&self, command: &str) -> String {
        if self.config.sudo {
            format!("sudo {command}")
        } else {
            command.to_string()
        }
    }

    fn ssh_command(&self, host: &str, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-o").arg("BatchMode=yes");
        cmd.arg("-o").arg("StrictHostKeyChecking=no");
        if let Some(identity) = &self.config.identity_file {
            cmd.arg("-i").arg(identity.as_str());
        }
        cmd.arg(format!("{}@{}", self.config.user, host));
        cmd.arg("--");
        cmd.arg(remote);
        cmd
    }

    fn run(
        &self,
        host: &str,
        command: &str,
        mut cmd: Command,
    ) -> Result<CommandOutput, ExecutionError> {
        debug!(
            self.log, "running remote command";
            "host" => host,
            "command" => command,
        );
        let output = cmd.output().map_err(|err| {
            ExecutionError::ExecutionStart {
                host: host.to_string(),
                command: command.to_string(),
                err,
            }
        })?;
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(-1),
        };
        info!(
            self.log, "remote command finished";
            "host" => host,
            "command" => command,
            "status" => output.status,
        );
        if output.status != 0 {
            return Err(output_to_exec_error(host, command, &output));
        }
        Ok(output)
    }
}

impl Executor for SshExecutor {
    fn exec(
        &self,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutionError> {
        let remote = self.remote_command(command);
        let cmd = self.ssh_command(host, &remote);
        self.run(host, command, cmd)
    }

    fn write_file(
        &self,
        host: &str,
        path: &Utf8Path,
        content: &str,
    ) -> Result<(), ExecutionError> {
        // `tee` rather than a shell redirect so sudo applies to the write
        // itself; `sync` is the explicit flush.
        let remote = self
            .remote_command(&format!("sh -c 'tee -- {path} > /dev/null && sync'"));
        let command = format!("write {path}");
        debug!(
            self.log, "writing remote file";
            "host" => host,
            "path" => path.as_str(),
            "bytes" => content.len(),
        );

        let mut cmd = self.ssh_command(host, &remote);
        cmd.stdin(Stdio::piped());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        let mut child = cmd.spawn().map_err(|err| {
            ExecutionError::ExecutionStart {
                host: host.to_string(),
                command: command.clone(),
                err,
            }
        })?;

        let write_result = {
            let stdin = child.stdin.as_mut().expect("stdin was piped");
            stdin.write_all(content.as_bytes()).and_then(|()| stdin.flush())
        };
        // Close stdin so the remote `tee` sees EOF before we wait.
        drop(child.stdin.take());
        if let Err(err) = write_result {
            let _ = child.wait();
            return Err(ExecutionError::RemoteWrite {
                host: host.to_string(),
                path: path.to_string(),
                err,
            });
        }

        let output = child.wait_with_output().map_err(|err| {
            ExecutionError::RemoteWrite {
                host: host.to_string(),
                path: path.to_string(),
                err,
            }
        })?;
        let output = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status: output.status.code().unwrap_or(-1),
        };
        if output.status != 0 {
            return Err(output_to_exec_error(host, &command, &output));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::o;

    fn executor(sudo: bool) -> SshExecutor {
        let config = SshConfig {
            user: "cephuser".to_string(),
            identity_file: Some("/home/cephuser/.ssh/id_ed25519".into()),
            sudo,
        };
        SshExecutor::new(Logger::root(slog::Discard, o!()), config)
    }

    fn rendered_args(cmd: &Command) -> Vec<String> {
        cmd.get_args().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn ssh_invocation_shape() {
        let exec = executor(false);
        let remote = exec.remote_command("ceph -s -f json");
        let cmd = exec.ssh_command("osd-node-1", &remote);
        assert_eq!(cmd.get_program(), "ssh");
        let args = rendered_args(&cmd);
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"cephuser@osd-node-1".to_string()));
        assert_eq!(args.last().unwrap(), "ceph -s -f json");
    }

    #[test]
    fn sudo_prefixes_the_remote_command() {
        let exec = executor(true);
        assert_eq!(exec.remote_command("ceph osd out 3"), "sudo ceph osd out 3");
        let exec = executor(false);
        assert_eq!(exec.remote_command("ceph osd out 3"), "ceph osd out 3");
    }

    #[test]
    fn timeout_wrapper_bounds_the_command() {
        // The default impl rewrites through coreutils `timeout`.
        struct Recorder(std::sync::Mutex<Vec<String>>);
        impl Executor for Recorder {
            fn exec(
                &self,
                _host: &str,
                command: &str,
            ) -> Result<CommandOutput, ExecutionError> {
                self.0.lock().unwrap().push(command.to_string());
                Ok(CommandOutput::success(""))
            }
            fn write_file(
                &self,
                _host: &str,
                _path: &Utf8Path,
                _content: &str,
            ) -> Result<(), ExecutionError> {
                Ok(())
            }
        }

        let recorder = Recorder(std::sync::Mutex::new(Vec::new()));
        recorder
            .exec_with_timeout("mon-1", "ceph -s", Duration::from_secs(300))
            .unwrap();
        assert_eq!(
            recorder.0.lock().unwrap().as_slice(),
            ["timeout 300 ceph -s"]
        );
    }
}
