// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Completion Guard - single-flight gate for the upstream reply.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct CompletionGuard {
    replied: AtomicBool,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for exactly one caller: the one that flips the guard.
    ///
    /// The read and the write are one compare-and-swap, so two racing
    /// callers can never both observe `replied == false`.
    pub fn try_complete(&self) -> bool {
        self.replied
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_completed(&self) -> bool {
        self.replied.load(Ordering::Acquire)
    }
}
