// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The tap packet demultiplexer (§4.5): framed-stream and raw-TUN
//! transports feeding a single receive buffer, Ethernet/ethertype
//! dispatch, and the second-pass 4-tuple grouping loop.

pub mod constants;
pub mod demux;
pub mod transport;

pub use constants::*;
pub use demux::{Classification, Demux, FamilyPool, FlowBatch, FlowKey, FragmentDropCounter, FrameSlot};
pub use transport::{RawTap, StreamTap, Transport};
