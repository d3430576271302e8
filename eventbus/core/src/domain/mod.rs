// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure aggregation types and per-request state. No I/O.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`command`] | `Command`, `RequestHandle`, `Properties` |
//! | [`result`] | `ResultValue`, `StatusCode`, `CommandReply` |
//! | [`accumulator`] | `MergeAccumulator`, `MergeStrategy` |
//! | [`guard`] | `CompletionGuard` |
//! | [`request`] | `RequestContext`, `RequestState`, `Transition` |
//! | [`transport`] | `Delivery`, `TransportError`, `ReplySink` |
//! | [`events`] | `AggregatorEvent` |
//! | [`config`] | `EventBusConfig` |

pub mod command;
pub mod result;
pub mod accumulator;
pub mod guard;
pub mod request;
pub mod transport;
pub mod events;
pub mod config;
