// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::command::RequestHandle;
use crate::domain::request::ReplyReason;
use crate::domain::result::StatusCode;

/// Lifecycle events for requests passing through the aggregator.
///
/// Published on the [`EventBus`](crate::infrastructure::event_bus::EventBus)
/// for observers; nothing in the aggregation path depends on them being
/// received.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AggregatorEvent {
    CommandReceived {
        request_id: RequestHandle,
        command: String,
        received_at: DateTime<Utc>,
    },
    CommandRejected {
        request_id: RequestHandle,
        command: String,
        rejected_at: DateTime<Utc>,
    },
    CommandForwarded {
        request_id: RequestHandle,
        command: String,
        forwarded_at: DateTime<Utc>,
    },
    PartialMerged {
        request_id: RequestHandle,
        deliveries: u64,
        merged_at: DateTime<Utc>,
    },
    ReplySent {
        request_id: RequestHandle,
        status: StatusCode,
        reason: ReplyReason,
        deliveries: u64,
        replied_at: DateTime<Utc>,
    },
    LateDeliveryDiscarded {
        request_id: RequestHandle,
        discarded: u64,
        discarded_at: DateTime<Utc>,
    },
}

impl AggregatorEvent {
    pub fn request_id(&self) -> RequestHandle {
        match self {
            AggregatorEvent::CommandReceived { request_id, .. }
            | AggregatorEvent::CommandRejected { request_id, .. }
            | AggregatorEvent::CommandForwarded { request_id, .. }
            | AggregatorEvent::PartialMerged { request_id, .. }
            | AggregatorEvent::ReplySent { request_id, .. }
            | AggregatorEvent::LateDeliveryDiscarded { request_id, .. } => *request_id,
        }
    }
}
