// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! CLI parsing and the frozen configuration record (§6).
//!
//! The CLI drives external collaborators (tap setup, PID file, namespace
//! join); the core consumes only the [`Config`] record built here once at
//! startup and never mutated afterward.

pub mod cli;
pub mod portspec;
pub mod record;

pub use cli::CmdArgs;
pub use portspec::{PortForward, PortSpecError, PortSpecItem};
pub use record::{Config, ConfigError, EngineSet};
