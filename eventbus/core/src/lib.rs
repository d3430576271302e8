// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `eventbus-core` - Fan-in Result Aggregation
//!
//! Takes one inbound command, forwards it to a downstream target that may
//! answer with any number of partial results, merges them, and sends exactly
//! one reply upstream.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | Commands, results, accumulator, guard, request state machine, config |
//! | [`application`] | Application | `Dispatcher`, `ResultSink`, accounting |
//! | [`infrastructure`] | Infrastructure | Event bus, channel-backed transport adapters |
//!
//! ## Reply Guarantee
//!
//! Every forwarded command gets one reply: the first error or transport
//! failure, or the merged snapshot once a final `Ok` result wins the
//! completion guard. Deliveries after that are counted and dropped.

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
