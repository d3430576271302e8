// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! In-process transport adapters built on tokio channels.
//!
//! - [`ChannelDownstream`] hands each forwarded command and its result sink to
//!   a receiver that plays the downstream target.
//! - [`UnconnectedDownstream`] models a command with no destination wired.
//! - [`ChannelReplySink`] pushes upstream replies into a receiver.

use crate::application::dispatcher::{Downstream, ResultSink};
use crate::domain::command::{Command, RequestHandle};
use crate::domain::result::CommandReply;
use crate::domain::transport::{ReplySink, TransportError};
use tokio::sync::mpsc;
use tracing::debug;

/// A command waiting to be answered by the downstream side.
#[derive(Debug)]
pub struct ForwardedCommand {
    pub command: Command,
    pub results: ResultSink,
}

pub struct ChannelDownstream {
    sender: mpsc::UnboundedSender<ForwardedCommand>,
}

impl ChannelDownstream {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ForwardedCommand>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl Downstream for ChannelDownstream {
    fn forward(&self, command: Command, results: ResultSink) -> Result<(), TransportError> {
        self.sender
            .send(ForwardedCommand { command, results })
            .map_err(|_| TransportError::Other("downstream channel closed".to_string()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct UnconnectedDownstream;

impl Downstream for UnconnectedDownstream {
    fn forward(&self, command: Command, _results: ResultSink) -> Result<(), TransportError> {
        debug!(command = %command.name(), "No downstream wired");
        Err(TransportError::NotConnected)
    }
}

pub struct ChannelReplySink {
    sender: mpsc::UnboundedSender<(RequestHandle, CommandReply)>,
}

impl ChannelReplySink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(RequestHandle, CommandReply)>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ReplySink for ChannelReplySink {
    fn reply(&self, handle: RequestHandle, reply: CommandReply) {
        if self.sender.send((handle, reply)).is_err() {
            debug!(request_id = %handle, "Reply receiver dropped");
        }
    }
}
