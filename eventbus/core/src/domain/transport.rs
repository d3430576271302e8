// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Boundary with the host runtime.
//!
//! The host owns transport and scheduling. Results flow back into a request
//! as [`Delivery`] messages, from any thread and in any order; the single
//! answer leaves through a [`ReplySink`]. The forwarding seam lives with the
//! Dispatcher as [`Downstream`](crate::application::dispatcher::Downstream).

use crate::domain::command::RequestHandle;
use crate::domain::result::{CommandReply, ResultValue};
use thiserror::Error;

/// Forwarding failure reported by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No downstream destination is wired for this command.
    #[error("Command not connected to any downstream target")]
    NotConnected,

    #[error("Transport failure: {0}")]
    Other(String),
}

/// One message delivered to a request's result stream.
#[derive(Debug, Clone)]
pub enum Delivery {
    Result(ResultValue),
    Failure(TransportError),
    /// The result payload could not be read; carries the parse error.
    Malformed(String),
}

impl From<ResultValue> for Delivery {
    fn from(value: ResultValue) -> Self {
        Delivery::Result(value)
    }
}

impl From<TransportError> for Delivery {
    fn from(error: TransportError) -> Self {
        Delivery::Failure(error)
    }
}

/// Upstream collaborator that receives exactly one reply per command.
pub trait ReplySink: Send + Sync {
    fn reply(&self, handle: RequestHandle, reply: CommandReply);
}
