// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities for the harness's own test suite: test loggers and a
//! scripted executor standing in for the cluster.

use camino::Utf8Path;
use ceph_utils::executor::{CommandOutput, Executor};
use ceph_utils::{output_to_exec_error, ExecutionError};
use slog::{o, Drain, Logger};
use std::collections::VecDeque;
use std::sync::Mutex;

/// Builds a logger that writes through the test harness's captured stdout.
pub fn test_setup_log(test_name: &str) -> Logger {
    let decorator = slog_term::PlainSyncDecorator::new(slog_term::TestStdoutWriter);
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    Logger::root(drain, o!("test" => test_name.to_string()))
}

/// Builds the terminal logger used when driving a real cluster.
pub fn harness_log() -> Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!())
}

/// One remote command as observed by the [`FakeExecutor`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedCall {
    pub host: String,
    pub command: String,
}

struct Rule {
    needle: String,
    responses: VecDeque<CommandOutput>,
}

impl Rule {
    // Successive matches pop responses; the final response repeats.
    fn next_response(&mut self) -> CommandOutput {
        if self.responses.len() > 1 {
            self.responses.pop_front().expect("checked non-empty")
        } else {
            self.responses.front().expect("rules hold >= 1 response").clone()
        }
    }
}

/// A scripted [`Executor`].
///
/// Commands are matched by substring against scripted rules, most recently
/// added rule first; an unmatched command succeeds with empty output, so
/// tests only script the observations they care about.  A scripted non-zero
/// status is surfaced exactly the way the production executor surfaces it,
/// as [`ExecutionError::CommandFailure`].
pub struct FakeExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<RecordedCall>>,
    writes: Mutex<Vec<(String, String, String)>>,
}

impl FakeExecutor {
    pub fn new() -> FakeExecutor {
        FakeExecutor {
            rules: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
        }
    }

    /// Scripts a fixed response for every command containing `needle`.
    pub fn expect(&self, needle: impl Into<String>, response: CommandOutput) {
        self.expect_sequence(needle, vec![response]);
    }

    /// Scripts successive responses for commands containing `needle`; once
    /// the sequence is down to its last response, that response repeats.
    pub fn expect_sequence(
        &self,
        needle: impl Into<String>,
        responses: Vec<CommandOutput>,
    ) {
        assert!(!responses.is_empty(), "scripted rules need a response");
        self.rules.lock().unwrap().push(Rule {
            needle: needle.into(),
            responses: responses.into(),
        });
    }

    /// Every command executed so far, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn commands_matching(&self, needle: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.command.contains(needle))
            .map(|c| c.command)
            .collect()
    }

    /// Every remote file write so far as (host, path, content).
    pub fn writes(&self) -> Vec<(String, String, String)> {
        self.writes.lock().unwrap().clone()
    }
}

impl Default for FakeExecutor {
    fn default() -> Self {
        FakeExecutor::new()
    }
}

impl Executor for FakeExecutor {
    fn exec(
        &self,
        host: &str,
        command: &str,
    ) -> Result<CommandOutput, ExecutionError> {
        self.calls.lock().unwrap().push(RecordedCall {
            host: host.to_string(),
            command: command.to_string(),
        });

        let mut rules = self.rules.lock().unwrap();
        let response = rules
            .iter_mut()
            .rev()
            .find(|rule| command.contains(&rule.needle))
            .map(|rule| rule.next_response())
            .unwrap_or_else(|| CommandOutput::success(""));

        if response.status != 0 {
            return Err(output_to_exec_error(host, command, &response));
        }
        Ok(response)
    }

    fn write_file(
        &self,
        host: &str,
        path: &Utf8Path,
        content: &str,
    ) -> Result<(), ExecutionError> {
        self.writes.lock().unwrap().push((
            host.to_string(),
            path.to_string(),
            content.to_string(),
        ));
        Ok(())
    }
}
