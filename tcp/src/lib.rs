// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The TCP translation engine (§4.3): a host-kernel TCP socket on one side,
//! a client's raw TCP segments on the other, bridged through a
//! [`flow::entry::TcpRecord`] per connection.

pub mod constants;
pub mod engine;
pub mod isn;
pub mod timer;
pub mod window;

pub use constants::*;
pub use engine::{ClientSegmentPlan, OutSegment, TcpEngine, TcpError};
pub use timer::{next_deadline, on_fire, TimerAction};
pub use window::LowRttLru;
