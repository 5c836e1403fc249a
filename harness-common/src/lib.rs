// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared plumbing for the cluster test harness: configuration, the
//! condition poller, the concurrent task group, and the scenario runner.

pub mod config;
pub mod parallel;
pub mod scenario;
pub mod wait;
