// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the event bus CLI

pub mod config;
pub mod stress;

pub use self::config::ConfigCommand;
pub use self::stress::StressArgs;
