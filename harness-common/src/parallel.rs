// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Runs independent scenario steps concurrently, one OS thread per task.
//!
//! The group always joins every task before returning: a failure in one task
//! never cancels its siblings, so the effect of a disruptive operation on
//! concurrently running traffic is observed in full.  All failures (errors
//! and panics) are aggregated into a single [`TaskGroupError`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Mutex;

#[derive(Debug)]
pub struct TaskFailure {
    pub name: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{}", summarize(.failures))]
pub struct TaskGroupError {
    pub failures: Vec<TaskFailure>,
}

fn summarize(failures: &[TaskFailure]) -> String {
    let details = failures
        .iter()
        .map(|f| format!("{}: {}", f.name, f.message))
        .collect::<Vec<_>>()
        .join("; ");
    format!("{} task(s) failed: {}", failures.len(), details)
}

type Task<'a> = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'a>;

/// A set of named, independent operations to run concurrently.
#[derive(Default)]
pub struct TaskGroup<'a> {
    tasks: Vec<(String, Task<'a>)>,
}

impl<'a> TaskGroup<'a> {
    pub fn new() -> TaskGroup<'a> {
        TaskGroup { tasks: Vec::new() }
    }

    pub fn spawn(
        &mut self,
        name: impl Into<String>,
        task: impl FnOnce() -> anyhow::Result<()> + Send + 'a,
    ) {
        self.tasks.push((name.into(), Box::new(task)));
    }

    /// Runs every task on its own thread and blocks until all complete.
    ///
    /// Task ordering is unspecified; callers must only assert properties
    /// that hold under arbitrary interleaving.
    pub fn join_all(self) -> Result<(), TaskGroupError> {
        let outcomes = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for (name, task) in self.tasks {
                let outcomes = &outcomes;
                scope.spawn(move || {
                    let outcome = catch_unwind(AssertUnwindSafe(task));
                    outcomes.lock().unwrap().push((name, outcome));
                });
            }
        });

        let mut failures = Vec::new();
        for (name, outcome) in outcomes.into_inner().unwrap() {
            match outcome {
                Ok(Ok(())) => (),
                Ok(Err(err)) => failures
                    .push(TaskFailure { name, message: format!("{err:#}") }),
                Err(panic) => {
                    let message = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "task panicked".to_string());
                    failures.push(TaskFailure { name, message });
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            // Joining is order-nondeterministic; sort so callers (and error
            // messages) are stable.
            failures.sort_by(|a, b| a.name.cmp(&b.name));
            Err(TaskGroupError { failures })
        }
    }
}
