// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod dispatcher;
pub mod stats;

pub use dispatcher::{CommandPolicy, Dispatcher, Downstream, ResultSink};
pub use stats::StatsSnapshot;
