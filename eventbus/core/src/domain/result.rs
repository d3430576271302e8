// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Result values produced downstream and the reply sent upstream.

use crate::domain::command::{Command, Properties};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCode {
    Ok,
    Error,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusCode::Ok => "ok",
            StatusCode::Error => "error",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One partial or final answer to a forwarded command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultValue {
    pub status: StatusCode,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(default)]
    pub properties: Properties,
}

/// Raised when a raw result payload cannot be read as a property set.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("Invalid result payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Result payload must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

impl ResultValue {
    pub fn ok(properties: Properties) -> Self {
        Self {
            status: StatusCode::Ok,
            is_final: false,
            properties,
        }
    }

    pub fn error(properties: Properties) -> Self {
        Self {
            status: StatusCode::Error,
            is_final: true,
            properties,
        }
    }

    pub fn with_final(mut self, is_final: bool) -> Self {
        self.is_final = is_final;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Parse a raw JSON payload into a result value.
    ///
    /// The payload must be a JSON object; anything else is a serialization
    /// failure for that delivery.
    pub fn from_json_slice(
        status: StatusCode,
        is_final: bool,
        payload: &[u8],
    ) -> Result<Self, PayloadError> {
        let value: serde_json::Value = serde_json::from_slice(payload)?;
        let properties = match value {
            serde_json::Value::Object(map) => map,
            serde_json::Value::Null => return Err(PayloadError::NotAnObject("null")),
            serde_json::Value::Bool(_) => return Err(PayloadError::NotAnObject("boolean")),
            serde_json::Value::Number(_) => return Err(PayloadError::NotAnObject("number")),
            serde_json::Value::String(_) => return Err(PayloadError::NotAnObject("string")),
            serde_json::Value::Array(_) => return Err(PayloadError::NotAnObject("array")),
        };
        Ok(Self {
            status,
            is_final,
            properties,
        })
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}

/// The single reply delivered upstream for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandReply {
    pub status: StatusCode,
    pub properties: Properties,
}

impl CommandReply {
    pub fn ok(properties: Properties) -> Self {
        Self {
            status: StatusCode::Ok,
            properties,
        }
    }

    /// Fresh error result for a command; carries no merged data.
    pub fn error() -> Self {
        Self {
            status: StatusCode::Error,
            properties: Properties::new(),
        }
    }

    /// Success reply echoing the original command's properties unchanged.
    pub fn echo(command: &Command) -> Self {
        Self::ok(command.properties().clone())
    }

    pub fn is_ok(&self) -> bool {
        self.status == StatusCode::Ok
    }
}
