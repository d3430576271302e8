// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Request Context
//!
//! Binds one inbound [`Command`] to its [`MergeAccumulator`] and
//! [`CompletionGuard`], and runs the completion state machine for every
//! [`Delivery`] pushed into it.
//!
//! ```text
//! Pending ──Ok, non-final──▶ Merging ──Ok, non-final──▶ Merging
//!    │                          │
//!    └──────── final / error / failure (guard winner) ──▶ Completed
//! ```
//!
//! Rules, first match wins:
//!
//! 1. `Failure(NotConnected)` → guard-gated `Ok` reply echoing the original
//!    command's properties.
//! 2. `Failure(Other)` or `Malformed` → guard-gated `Error` reply.
//! 3. `Error` result → guard-gated `Error` reply; nothing is merged and no
//!    partial data is included.
//! 4. `Ok`, non-final → merged; never replies.
//! 5. `Ok`, final → merged and snapshotted in one critical section, then a
//!    guard-gated `Ok` reply carrying that snapshot.
//!
//! Once completed, further deliveries are counted and dropped without
//! touching the accumulator.
//!
//! The context is shared (`Arc`) between the Dispatcher and every result
//! sink handed downstream, so late deliveries always find it alive.

use crate::domain::accumulator::{MergeAccumulator, MergeStrategy};
use crate::domain::command::{Command, Properties, RequestHandle};
use crate::domain::guard::CompletionGuard;
use crate::domain::result::CommandReply;
use crate::domain::transport::{Delivery, TransportError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// No result applied yet.
    Pending,
    /// At least one `Ok` result merged, guard still open.
    Merging,
    /// The guard has fired; the reply is out.
    Completed,
}

/// Why a request produced its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyReason {
    NotConnected,
    TransportFailure,
    Malformed,
    ErrorResult,
    Final,
    Expired,
}

impl fmt::Display for ReplyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplyReason::NotConnected => "not_connected",
            ReplyReason::TransportFailure => "transport_failure",
            ReplyReason::Malformed => "malformed",
            ReplyReason::ErrorResult => "error_result",
            ReplyReason::Final => "final",
            ReplyReason::Expired => "expired",
        };
        f.write_str(name)
    }
}

/// Outcome of applying one delivery to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    /// A non-final `Ok` result was merged.
    Merged,
    /// This delivery won the guard; the caller must send `reply` upstream.
    Reply {
        reply: CommandReply,
        reason: ReplyReason,
    },
    /// The guard was already taken; nothing to send.
    Discarded,
}

#[derive(Debug)]
pub struct RequestContext {
    handle: RequestHandle,
    command: Command,
    accumulator: MergeAccumulator,
    guard: CompletionGuard,
    deliveries: AtomicU64,
    discarded: AtomicU64,
    created_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(handle: RequestHandle, command: Command, strategy: MergeStrategy) -> Self {
        Self {
            handle,
            command,
            accumulator: MergeAccumulator::new(strategy),
            guard: CompletionGuard::new(),
            deliveries: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            created_at: Utc::now(),
        }
    }

    pub fn handle(&self) -> RequestHandle {
        self.handle
    }

    /// The original command as received.
    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn state(&self) -> RequestState {
        if self.guard.is_completed() {
            RequestState::Completed
        } else if self.accumulator.applied() > 0 {
            RequestState::Merging
        } else {
            RequestState::Pending
        }
    }

    pub fn is_completed(&self) -> bool {
        self.guard.is_completed()
    }

    /// Deliveries observed so far, including discarded ones.
    pub fn deliveries(&self) -> u64 {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Deliveries that arrived after the guard had fired or lost the race.
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    /// Merged properties as of now.
    pub fn snapshot(&self) -> Properties {
        self.accumulator.snapshot()
    }

    pub fn on_delivery(&self, delivery: Delivery) -> Transition {
        self.deliveries.fetch_add(1, Ordering::Relaxed);

        match delivery {
            Delivery::Failure(TransportError::NotConnected) => {
                self.complete_with(ReplyReason::NotConnected, || CommandReply::echo(&self.command))
            }
            Delivery::Failure(TransportError::Other(_)) => {
                self.complete_with(ReplyReason::TransportFailure, CommandReply::error)
            }
            Delivery::Malformed(_) => self.complete_with(ReplyReason::Malformed, CommandReply::error),
            Delivery::Result(value) if !value.is_ok() => {
                self.complete_with(ReplyReason::ErrorResult, CommandReply::error)
            }
            Delivery::Result(value) if !value.is_final => {
                if self.guard.is_completed() {
                    return self.discard();
                }
                self.accumulator.merge(value);
                Transition::Merged
            }
            Delivery::Result(value) => {
                if self.guard.is_completed() {
                    return self.discard();
                }
                let snapshot = self.accumulator.apply(value);
                if self.guard.try_complete() {
                    Transition::Reply {
                        reply: CommandReply::ok(snapshot),
                        reason: ReplyReason::Final,
                    }
                } else {
                    self.discard()
                }
            }
        }
    }

    /// Close the request with whatever has been merged so far.
    ///
    /// Returns `None` if a reply has already gone out.
    pub fn expire(&self) -> Option<CommandReply> {
        if self.guard.try_complete() {
            Some(CommandReply::ok(self.accumulator.snapshot()))
        } else {
            None
        }
    }

    fn complete_with(&self, reason: ReplyReason, reply: impl FnOnce() -> CommandReply) -> Transition {
        if self.guard.try_complete() {
            Transition::Reply {
                reply: reply(),
                reason,
            }
        } else {
            self.discard()
        }
    }

    fn discard(&self) -> Transition {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        Transition::Discarded
    }
}
