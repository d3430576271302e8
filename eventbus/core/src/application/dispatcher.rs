// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Dispatcher
//!
//! Routes inbound commands to a handling policy and drives each forwarded
//! request through its [`RequestContext`] until exactly one reply is sent.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Forward-and-merge orchestration, in-flight registry, accounting
//!
//! ```text
//! deliver_command ──▶ policy lookup ──Reject──▶ Error reply
//!                          │
//!                   ForwardAndMerge
//!                          ▼
//!              RequestContext (registered) ──forward──▶ Downstream
//!                          ▲                               │
//!                          └──────── ResultSink::deliver ◀─┘  (any thread, any count)
//! ```

use crate::application::stats::{DispatcherStats, StatsSnapshot};
use crate::domain::command::{Command, RequestHandle};
use crate::domain::config::EventBusConfig;
use crate::domain::events::AggregatorEvent;
use crate::domain::request::{ReplyReason, RequestContext, RequestState, Transition};
use crate::domain::result::{CommandReply, ResultValue, StatusCode};
use crate::domain::transport::{Delivery, ReplySink, TransportError};
use crate::infrastructure::event_bus::EventBus;
use chrono::Utc;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, warn};

/// Downstream target that may answer a command with any number of results.
pub trait Downstream: Send + Sync {
    /// Forward a command. Results arrive later through `results`, which may
    /// be cloned and moved to other threads or tasks.
    ///
    /// An error means the command never left; it is fed into the request
    /// exactly like a failure delivered through the stream.
    fn forward(&self, command: Command, results: ResultSink) -> Result<(), TransportError>;
}

/// How a command name is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandPolicy {
    /// Forward downstream and merge the result stream into one reply.
    ForwardAndMerge,
    /// Reply `Error` immediately without forwarding.
    Reject,
}

struct Shared {
    replies: Arc<dyn ReplySink>,
    event_bus: EventBus,
    stats: DispatcherStats,
    in_flight: DashMap<RequestHandle, Arc<RequestContext>>,
    timers: DashMap<RequestHandle, AbortHandle>,
}

impl Shared {
    fn process(&self, context: &RequestContext, delivery: Delivery) {
        self.stats.record_delivery();
        let detail = match &delivery {
            Delivery::Failure(e) => Some(e.to_string()),
            Delivery::Malformed(e) => Some(e.clone()),
            Delivery::Result(_) => None,
        };

        match context.on_delivery(delivery) {
            Transition::Merged => {
                debug!(request_id = %context.handle(), "Merged partial result");
                self.stats.record_merged();
                self.event_bus.publish(AggregatorEvent::PartialMerged {
                    request_id: context.handle(),
                    deliveries: context.deliveries(),
                    merged_at: Utc::now(),
                });
            }
            Transition::Reply { reply, reason } => {
                let command = context.command().name();
                match reason {
                    ReplyReason::NotConnected => {
                        info!(request_id = %context.handle(), command = %command, "Command not connected")
                    }
                    ReplyReason::TransportFailure => error!(
                        request_id = %context.handle(),
                        command = %command,
                        error = detail.as_deref().unwrap_or_default(),
                        "Send command failed"
                    ),
                    ReplyReason::Malformed => error!(
                        request_id = %context.handle(),
                        command = %command,
                        error = detail.as_deref().unwrap_or_default(),
                        "Failed to read result payload"
                    ),
                    ReplyReason::ErrorResult => {
                        debug!(request_id = %context.handle(), command = %command, "Downstream returned error")
                    }
                    ReplyReason::Final | ReplyReason::Expired => {
                        debug!(request_id = %context.handle(), command = %command, "Command completed")
                    }
                }
                self.finish(context, reply, reason);
            }
            Transition::Discarded => {
                debug!(
                    request_id = %context.handle(),
                    "Result already returned, discarding delivery"
                );
                self.stats.record_discarded();
                self.event_bus.publish(AggregatorEvent::LateDeliveryDiscarded {
                    request_id: context.handle(),
                    discarded: context.discarded(),
                    discarded_at: Utc::now(),
                });
            }
        }
    }

    fn expire(&self, context: &RequestContext, timeout: Option<Duration>) -> bool {
        match context.expire() {
            Some(reply) => {
                warn!(
                    request_id = %context.handle(),
                    timeout = ?timeout,
                    deliveries = context.deliveries(),
                    "No final result, replying with merged-so-far"
                );
                self.finish(context, reply, ReplyReason::Expired);
                true
            }
            None => false,
        }
    }

    fn finish(&self, context: &RequestContext, reply: CommandReply, reason: ReplyReason) {
        self.in_flight.remove(&context.handle());
        if let Some((_, timer)) = self.timers.remove(&context.handle()) {
            timer.abort();
        }
        self.stats.record_reply(reply.status, Some(reason));
        self.event_bus.publish(AggregatorEvent::ReplySent {
            request_id: context.handle(),
            status: reply.status,
            reason,
            deliveries: context.deliveries(),
            replied_at: Utc::now(),
        });
        self.replies.reply(context.handle(), reply);
    }
}

/// Handle given downstream for pushing results of one request.
///
/// Cheap to clone; every clone keeps the request context alive, so producers
/// may keep delivering after the reply has gone out.
#[derive(Clone)]
pub struct ResultSink {
    context: Arc<RequestContext>,
    shared: Arc<Shared>,
}

impl ResultSink {
    pub fn handle(&self) -> RequestHandle {
        self.context.handle()
    }

    /// The request-scoped command this sink answers.
    pub fn command(&self) -> &Command {
        self.context.command()
    }

    /// Whether the reply for this request has already been sent.
    pub fn is_completed(&self) -> bool {
        self.context.is_completed()
    }

    pub fn deliver(&self, delivery: impl Into<Delivery>) {
        self.shared.process(&self.context, delivery.into());
    }

    /// Deliver a raw JSON result payload. A payload that cannot be read as a
    /// property object is delivered as a serialization failure.
    pub fn deliver_json(&self, status: StatusCode, is_final: bool, payload: &[u8]) {
        let delivery = match ResultValue::from_json_slice(status, is_final, payload) {
            Ok(value) => Delivery::Result(value),
            Err(e) => Delivery::Malformed(e.to_string()),
        };
        self.deliver(delivery);
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("request_id", &self.context.handle())
            .field("state", &self.context.state())
            .finish()
    }
}

pub struct Dispatcher {
    config: EventBusConfig,
    policies: HashMap<String, CommandPolicy>,
    downstream: Arc<dyn Downstream>,
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        config: EventBusConfig,
        downstream: Arc<dyn Downstream>,
        replies: Arc<dyn ReplySink>,
    ) -> Self {
        let event_bus = EventBus::new(config.event_bus_capacity.max(1));
        Self::with_event_bus(config, downstream, replies, event_bus)
    }

    pub fn with_event_bus(
        config: EventBusConfig,
        downstream: Arc<dyn Downstream>,
        replies: Arc<dyn ReplySink>,
        event_bus: EventBus,
    ) -> Self {
        let policies = HashMap::from([(
            config.event_command_name.clone(),
            CommandPolicy::ForwardAndMerge,
        )]);
        Self {
            config,
            policies,
            downstream,
            shared: Arc::new(Shared {
                replies,
                event_bus,
                stats: DispatcherStats::default(),
                in_flight: DashMap::new(),
                timers: DashMap::new(),
            }),
        }
    }

    /// Route an additional command name.
    pub fn with_policy(mut self, command: impl Into<String>, policy: CommandPolicy) -> Self {
        self.policies.insert(command.into(), policy);
        self
    }

    /// Unknown and blank names resolve to [`CommandPolicy::Reject`].
    pub fn policy_for(&self, command: &str) -> CommandPolicy {
        if command.trim().is_empty() {
            return CommandPolicy::Reject;
        }
        self.policies
            .get(command)
            .copied()
            .unwrap_or(CommandPolicy::Reject)
    }

    /// Accept one inbound command. Exactly one reply for the returned handle
    /// reaches the [`ReplySink`], unless the request never receives a final
    /// result and no pending timeout is configured.
    pub fn deliver_command(&self, command: Command) -> RequestHandle {
        let handle = RequestHandle::new();
        self.shared.stats.record_received();
        self.shared.event_bus.publish(AggregatorEvent::CommandReceived {
            request_id: handle,
            command: command.name().to_string(),
            received_at: Utc::now(),
        });

        match self.policy_for(command.name()) {
            CommandPolicy::ForwardAndMerge => self.forward_and_merge(handle, command),
            CommandPolicy::Reject => self.reject(handle, command),
        }
        handle
    }

    fn reject(&self, handle: RequestHandle, command: Command) {
        warn!(request_id = %handle, command = %command.name(), "Unsupported command");
        self.shared.stats.record_rejected();
        self.shared.stats.record_reply(StatusCode::Error, None);
        self.shared.event_bus.publish(AggregatorEvent::CommandRejected {
            request_id: handle,
            command: command.name().to_string(),
            rejected_at: Utc::now(),
        });
        self.shared.replies.reply(handle, CommandReply::error());
    }

    fn forward_and_merge(&self, handle: RequestHandle, command: Command) {
        debug!(request_id = %handle, command = %command.name(), "Forward command");

        let outbound = command.clone();
        let context = Arc::new(RequestContext::new(handle, command, self.config.merge_strategy));
        self.shared.in_flight.insert(handle, context.clone());

        let sink = ResultSink {
            context: context.clone(),
            shared: self.shared.clone(),
        };

        self.shared.stats.record_forwarded();
        self.shared.event_bus.publish(AggregatorEvent::CommandForwarded {
            request_id: handle,
            command: outbound.name().to_string(),
            forwarded_at: Utc::now(),
        });

        if let Err(e) = self.downstream.forward(outbound, sink.clone()) {
            sink.deliver(Delivery::Failure(e));
        }

        if let Some(timeout) = self.config.pending_timeout {
            if !context.is_completed() {
                self.arm_timeout(&context, timeout);
            }
        }
    }

    /// Spawn the expiry timer for `context`. The timer is aborted when the
    /// request replies; it holds only a weak reference until then.
    fn arm_timeout(&self, context: &Arc<RequestContext>, timeout: Duration) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("pending_timeout is set but no tokio runtime is available; request will wait for a final result");
                return;
            }
        };

        let handle = context.handle();
        let weak: Weak<RequestContext> = Arc::downgrade(context);
        let shared = self.shared.clone();
        let timer = runtime.spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(context) = weak.upgrade() {
                shared.expire(&context, Some(timeout));
            }
        });
        self.shared.timers.insert(handle, timer.abort_handle());

        // A reply that raced the insert above found no timer to cancel
        if context.is_completed() {
            if let Some((_, timer)) = self.shared.timers.remove(&handle) {
                timer.abort();
            }
        }
    }

    /// Number of expiry timers still armed.
    pub fn armed_timers(&self) -> usize {
        self.shared.timers.len()
    }

    /// Close a pending request with its merged-so-far data.
    ///
    /// Returns `false` if the request is unknown or has already replied.
    pub fn expire(&self, handle: RequestHandle) -> bool {
        let context = match self.shared.in_flight.get(&handle) {
            Some(entry) => entry.value().clone(),
            None => return false,
        };
        self.shared.expire(&context, None)
    }

    /// Close every pending request with its merged-so-far data.
    pub fn expire_all(&self) -> usize {
        let pending: Vec<Arc<RequestContext>> = self
            .shared
            .in_flight
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        pending
            .iter()
            .filter(|context| self.shared.expire(context, None))
            .count()
    }

    /// Number of requests still waiting for their reply.
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight.len()
    }

    /// State of a pending request; `None` once it has replied.
    pub fn request_state(&self, handle: RequestHandle) -> Option<RequestState> {
        self.shared
            .in_flight
            .get(&handle)
            .map(|entry| entry.value().state())
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.shared.event_bus
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.config
    }
}
