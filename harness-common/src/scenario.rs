// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scenario runner with best-effort cleanup.
//!
//! Cleanup always runs — after success, failure, or a panic in the primary
//! body — and a cleanup failure is logged but never masks the primary
//! result.

use slog::{error, info, warn, Logger};
use slog_error_chain::InlineErrorChain;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};

/// Runs `primary`, then `cleanup`, returning the primary result.
///
/// If `primary` panics, cleanup still runs and the panic is then resumed.
pub fn run_scenario<T>(
    log: &Logger,
    name: &str,
    primary: impl FnOnce() -> anyhow::Result<T>,
    cleanup: impl FnOnce() -> anyhow::Result<()>,
) -> anyhow::Result<T> {
    info!(log, "scenario starting"; "scenario" => name);
    let outcome = catch_unwind(AssertUnwindSafe(primary));

    if let Err(err) = cleanup() {
        warn!(
            log, "scenario cleanup failed";
            "scenario" => name,
            "error" => %InlineErrorChain::new(err.as_ref()),
        );
    }

    match outcome {
        Ok(Ok(value)) => {
            info!(log, "scenario passed"; "scenario" => name);
            Ok(value)
        }
        Ok(Err(err)) => {
            error!(
                log, "scenario failed";
                "scenario" => name,
                "error" => %InlineErrorChain::new(err.as_ref()),
            );
            Err(err)
        }
        Err(panic) => resume_unwind(panic),
    }
}
