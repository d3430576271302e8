// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Dispatcher accounting.
//!
//! Counters are kept locally (atomics, for [`DispatcherStats::snapshot`]) and
//! mirrored to the `metrics` facade so an installed recorder can export them.

use crate::domain::request::ReplyReason;
use crate::domain::result::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct DispatcherStats {
    received: AtomicU64,
    rejected: AtomicU64,
    forwarded: AtomicU64,
    deliveries: AtomicU64,
    merged: AtomicU64,
    replies_ok: AtomicU64,
    replies_error: AtomicU64,
    discarded: AtomicU64,
    expired: AtomicU64,
}

/// Point-in-time copy of the dispatcher counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub received: u64,
    pub rejected: u64,
    pub forwarded: u64,
    pub deliveries: u64,
    pub merged: u64,
    pub replies_ok: u64,
    pub replies_error: u64,
    pub discarded: u64,
    pub expired: u64,
}

impl StatsSnapshot {
    pub fn replies(&self) -> u64 {
        self.replies_ok + self.replies_error
    }
}

impl DispatcherStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_commands_received_total").increment(1);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_commands_rejected_total").increment(1);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_commands_forwarded_total").increment(1);
    }

    pub fn record_delivery(&self) {
        self.deliveries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_deliveries_total").increment(1);
    }

    pub fn record_merged(&self) {
        self.merged.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_partials_merged_total").increment(1);
    }

    pub fn record_reply(&self, status: StatusCode, reason: Option<ReplyReason>) {
        match status {
            StatusCode::Ok => self.replies_ok.fetch_add(1, Ordering::Relaxed),
            StatusCode::Error => self.replies_error.fetch_add(1, Ordering::Relaxed),
        };
        if reason == Some(ReplyReason::Expired) {
            self.expired.fetch_add(1, Ordering::Relaxed);
        }

        let reason = reason.map(|r| r.to_string()).unwrap_or_else(|| "rejected".to_string());
        metrics::counter!(
            "eventbus_replies_total",
            "status" => status.as_str(),
            "reason" => reason
        )
        .increment(1);
    }

    pub fn record_discarded(&self) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("eventbus_deliveries_discarded_total").increment(1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            deliveries: self.deliveries.load(Ordering::Relaxed),
            merged: self.merged.load(Ordering::Relaxed),
            replies_ok: self.replies_ok.load(Ordering::Relaxed),
            replies_error: self.replies_error.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
        }
    }
}
