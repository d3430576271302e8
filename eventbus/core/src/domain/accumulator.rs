// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Merge Accumulator
//!
//! Owns the cumulative merged properties for one in-flight request.
//!
//! Every mutation and every snapshot goes through a single mutex, so
//! concurrent producers for the same request serialize on the accumulator
//! rather than on anything the caller holds. The raw map is never handed
//! out; callers only ever see owned snapshots.

use crate::domain::command::Properties;
use crate::domain::result::ResultValue;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// How an incoming property set is folded into the accumulated state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Last writer wins per top-level key.
    #[default]
    Replace,
    /// Nested objects are merged recursively; every other value is replaced.
    Deep,
}

impl MergeStrategy {
    pub fn merge(&self, state: &mut Properties, incoming: Properties) {
        match self {
            MergeStrategy::Replace => {
                for (key, value) in incoming {
                    state.insert(key, value);
                }
            }
            MergeStrategy::Deep => deep_merge(state, incoming),
        }
    }
}

fn deep_merge(state: &mut Properties, incoming: Properties) {
    for (key, value) in incoming {
        match (state.get_mut(&key), value) {
            (Some(serde_json::Value::Object(current)), serde_json::Value::Object(nested)) => {
                deep_merge(current, nested);
            }
            (_, value) => {
                state.insert(key, value);
            }
        }
    }
}

#[derive(Debug, Default)]
struct MergeState {
    properties: Properties,
    applied: u64,
}

#[derive(Debug, Default)]
pub struct MergeAccumulator {
    strategy: MergeStrategy,
    state: Mutex<MergeState>,
}

impl MergeAccumulator {
    pub fn new(strategy: MergeStrategy) -> Self {
        Self {
            strategy,
            state: Mutex::new(MergeState::default()),
        }
    }

    /// Apply one result value and return the state as of this application.
    ///
    /// The snapshot is taken inside the same critical section as the merge,
    /// so it reflects exactly the results applied up to and including this
    /// one.
    pub fn apply(&self, result: ResultValue) -> Properties {
        let mut state = self.state.lock();
        self.strategy.merge(&mut state.properties, result.properties);
        state.applied += 1;
        state.properties.clone()
    }

    /// Apply one result value without taking a snapshot.
    pub fn merge(&self, result: ResultValue) {
        let mut state = self.state.lock();
        self.strategy.merge(&mut state.properties, result.properties);
        state.applied += 1;
    }

    pub fn snapshot(&self) -> Properties {
        self.state.lock().properties.clone()
    }

    /// Number of result values applied so far.
    pub fn applied(&self) -> u64 {
        self.state.lock().applied
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.strategy
    }
}
