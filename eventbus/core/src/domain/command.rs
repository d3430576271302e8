// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Inbound commands and their correlation handles.
//!
//! A [`Command`] is immutable once received. The Dispatcher forwards a
//! request-scoped clone downstream and keeps the original for replies that
//! must echo it back (the not-connected policy).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Flat or nested JSON properties keyed by name.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// Correlation handle for one inbound command.
///
/// Issued by the Dispatcher when a command is delivered; the upstream
/// [`ReplySink`](crate::domain::transport::ReplySink) receives it back with
/// the single reply for that command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestHandle(pub Uuid);

impl RequestHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RequestHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    name: String,
    #[serde(default)]
    properties: Properties,
}

impl Command {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: Properties::new(),
        }
    }

    pub fn with_properties(name: impl Into<String>, properties: Properties) -> Self {
        Self {
            name: name.into(),
            properties,
        }
    }

    /// Builder-style property setter, mostly used by producers and tests.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn into_properties(self) -> Properties {
        self.properties
    }
}
