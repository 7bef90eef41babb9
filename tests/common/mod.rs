//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod codecs;
pub mod observers;

use codec_node::node::{NodeMessage, PortIndex};
use codec_node::types::{BufferBacking, BufferRange};
use std::time::Duration;

pub const INPUT: PortIndex = PortIndex(0);
pub const OUTPUT: PortIndex = PortIndex(1);

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_secs(5)
}

/// A codec-managed buffer of `capacity` bytes
pub fn preset(capacity: usize) -> BufferBacking {
    BufferBacking::Preset { capacity }
}

pub fn whole(capacity: u32) -> BufferRange {
    BufferRange::new(0, capacity)
}

/// Only the buffer completions, in delivery order
pub fn completions(messages: &[NodeMessage]) -> Vec<NodeMessage> {
    messages
        .iter()
        .filter(|m| m.buffer_id().is_some())
        .cloned()
        .collect()
}
