// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! OSD lifecycle orchestration: the remove/zap/add state machine and the
//! stretch-site balancer.

pub mod balancer;
pub mod manager;

pub use balancer::{BalanceError, SiteBalancer, SitePlan};
pub use manager::{LifecycleError, OsdLifecycle, MAX_INACTIVE_PGS};
