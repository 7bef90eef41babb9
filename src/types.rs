//! Core data types for codec-node
//!
//! This module contains the fundamental value types passed across the node
//! boundary: lifecycle states, command codes, buffer flags and ranges, and the
//! backing descriptions of registered buffers.
//!
//! # Main Types
//!
//! - [`NodeState`] - OMX-style lifecycle state (Loaded/Idle/Executing/Pause/Invalid)
//! - [`CommandType`] - Command codes accepted by `send_command`
//! - [`BufferBacking`] - What memory a registered buffer refers to
//! - [`SharedMemory`] - Client-visible byte buffer shared with the node
//! - [`BufferRange`] / [`BufferFlags`] - Per-transfer payload description

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Lifecycle state of a node. Raw values follow the OMX numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Unrecoverable error; only `free_node` is still accepted
    Invalid,
    /// Created, no resources committed
    Loaded,
    /// Resources allocated, not processing
    Idle,
    /// Processing buffers
    Executing,
    /// Processing suspended, buffers stay where they are
    Pause,
}

impl NodeState {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(NodeState::Invalid),
            1 => Some(NodeState::Loaded),
            2 => Some(NodeState::Idle),
            3 => Some(NodeState::Executing),
            4 => Some(NodeState::Pause),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            NodeState::Invalid => 0,
            NodeState::Loaded => 1,
            NodeState::Idle => 2,
            NodeState::Executing => 3,
            NodeState::Pause => 4,
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Invalid => "Invalid",
            NodeState::Loaded => "Loaded",
            NodeState::Idle => "Idle",
            NodeState::Executing => "Executing",
            NodeState::Pause => "Pause",
        };
        f.write_str(name)
    }
}

/// Command codes accepted by `Node::send_command`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// Param: target [`NodeState`] raw value
    StateSet,
    /// Param: port index or `PortIndex::ALL`
    Flush,
    /// Param: port index or `PortIndex::ALL`
    PortDisable,
    /// Param: port index or `PortIndex::ALL`
    PortEnable,
    /// Recognised but not implemented by this node
    MarkBuffer,
}

impl CommandType {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(CommandType::StateSet),
            1 => Some(CommandType::Flush),
            2 => Some(CommandType::PortDisable),
            3 => Some(CommandType::PortEnable),
            4 => Some(CommandType::MarkBuffer),
            _ => None,
        }
    }

    pub fn raw(self) -> u32 {
        match self {
            CommandType::StateSet => 0,
            CommandType::Flush => 1,
            CommandType::PortDisable => 2,
            CommandType::PortEnable => 3,
            CommandType::MarkBuffer => 4,
        }
    }
}

/// Whether a port is an input or output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    /// Even port indices are inputs, odd ones outputs.
    pub fn from_index(index: u32) -> Self {
        if index % 2 == 0 {
            PortDirection::Input
        } else {
            PortDirection::Output
        }
    }
}

/// Per-transfer buffer flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BufferFlags(pub u32);

impl BufferFlags {
    pub const NONE: BufferFlags = BufferFlags(0);
    pub const END_OF_STREAM: BufferFlags = BufferFlags(0x0000_0001);
    pub const SYNC_FRAME: BufferFlags = BufferFlags(0x0000_0020);
    pub const DATA_CORRUPT: BufferFlags = BufferFlags(0x0000_0040);
    pub const CODEC_CONFIG: BufferFlags = BufferFlags(0x0000_0080);

    #[inline]
    pub fn contains(self, other: BufferFlags) -> bool {
        self.0 & other.0 == other.0
    }

    #[inline]
    pub fn union(self, other: BufferFlags) -> BufferFlags {
        BufferFlags(self.0 | other.0)
    }
}

/// Valid payload region of a buffer for one fill/empty transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BufferRange {
    pub offset: u32,
    pub length: u32,
}

impl BufferRange {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    /// Exclusive end of the range, `None` on overflow.
    pub fn end(&self) -> Option<usize> {
        (self.offset as usize).checked_add(self.length as usize)
    }
}

/// Opaque native handle (file descriptor bundle, secure memory token, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NativeHandle(pub u64);

/// Graphics buffer supplied by the client's allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphicBuffer {
    pub handle: NativeHandle,
    pub width: u32,
    pub height: u32,
    pub usage: u32,
}

/// Byte buffer shared between the client and the node.
///
/// Cloning shares the same memory.
#[derive(Debug, Clone, Default)]
pub struct SharedMemory {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl SharedMemory {
    /// Allocate a zero-filled buffer of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; capacity])),
        }
    }

    /// Wrap existing bytes; the capacity is their length
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(bytes.into())),
        }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Copy out the bytes in `range`; an out-of-bounds range is clipped.
    pub fn read(&self, range: BufferRange) -> Vec<u8> {
        let bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        let start = (range.offset as usize).min(bytes.len());
        let end = range.end().unwrap_or(usize::MAX).min(bytes.len());
        bytes[start..end].to_vec()
    }

    /// Write `data` at `offset`, truncated to the capacity. Returns bytes written.
    pub fn write(&self, offset: usize, data: &[u8]) -> usize {
        let mut bytes = self.bytes.lock().unwrap_or_else(PoisonError::into_inner);
        if offset >= bytes.len() {
            return 0;
        }
        let n = data.len().min(bytes.len() - offset);
        bytes[offset..offset + n].copy_from_slice(&data[..n]);
        n
    }

    /// Whether two handles refer to the same memory.
    pub fn same_memory(&self, other: &SharedMemory) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// What memory a registered buffer refers to.
#[derive(Debug, Clone)]
pub enum BufferBacking {
    /// Byte buffer whose storage the codec manages internally
    Preset { capacity: usize },
    /// Client memory shared with the node
    Shared(SharedMemory),
    /// Graphics buffer from the client's allocator
    Graphic(GraphicBuffer),
    /// Client-supplied native handle
    Native(NativeHandle),
    /// Node-allocated secure buffer (see `allocate_secure_buffer`)
    Secure { handle: NativeHandle, size: usize },
}

impl BufferBacking {
    /// Addressable size in bytes, `None` when ranges are not meaningful.
    pub fn capacity(&self) -> Option<usize> {
        match self {
            BufferBacking::Preset { capacity } => Some(*capacity),
            BufferBacking::Shared(mem) => Some(mem.capacity()),
            BufferBacking::Secure { size, .. } => Some(*size),
            BufferBacking::Graphic(_) | BufferBacking::Native(_) => None,
        }
    }

    /// Whether the node allocated this backing (and must release it).
    pub fn is_node_allocated(&self) -> bool {
        matches!(self, BufferBacking::Secure { .. })
    }

    /// Check that `range` fits in the buffer.
    pub fn contains(&self, range: BufferRange) -> bool {
        match (self.capacity(), range.end()) {
            (Some(cap), Some(end)) => end <= cap,
            (None, Some(_)) => true,
            (_, None) => false,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            BufferBacking::Preset { .. } => "preset",
            BufferBacking::Shared(_) => "shared",
            BufferBacking::Graphic(_) => "graphic",
            BufferBacking::Native(_) => "native",
            BufferBacking::Secure { .. } => "secure",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_state_raw_values() {
        for state in [
            NodeState::Invalid,
            NodeState::Loaded,
            NodeState::Idle,
            NodeState::Executing,
            NodeState::Pause,
        ] {
            assert_eq!(NodeState::from_raw(state.raw()), Some(state));
        }
        assert_eq!(NodeState::from_raw(99), None);
        assert_eq!(NodeState::Executing.to_string(), "Executing");
    }

    #[test]
    fn test_command_type_raw_values() {
        assert_eq!(CommandType::from_raw(1), Some(CommandType::Flush));
        assert_eq!(CommandType::Flush.raw(), 1);
        assert_eq!(CommandType::from_raw(7), None);
    }

    #[test]
    fn test_port_direction_convention() {
        assert_eq!(PortDirection::from_index(0), PortDirection::Input);
        assert_eq!(PortDirection::from_index(1), PortDirection::Output);
        assert_eq!(PortDirection::from_index(2), PortDirection::Input);
    }

    #[test]
    fn test_buffer_flags() {
        let flags = BufferFlags::END_OF_STREAM.union(BufferFlags::SYNC_FRAME);
        assert!(flags.contains(BufferFlags::END_OF_STREAM));
        assert!(flags.contains(BufferFlags::SYNC_FRAME));
        assert!(!flags.contains(BufferFlags::CODEC_CONFIG));
    }

    #[test]
    fn test_shared_memory_read_write() {
        let mem = SharedMemory::new(8);
        assert_eq!(mem.write(2, &[1, 2, 3]), 3);
        assert_eq!(mem.read(BufferRange::new(2, 3)), vec![1, 2, 3]);
        // Truncated at capacity
        assert_eq!(mem.write(6, &[9, 9, 9]), 2);
        assert_eq!(mem.write(8, &[1]), 0);
        // Clipped read
        assert_eq!(mem.read(BufferRange::new(6, 10)), vec![9, 9]);

        let alias = mem.clone();
        assert!(alias.same_memory(&mem));
        assert!(!SharedMemory::new(8).same_memory(&mem));
    }

    #[test]
    fn test_backing_range_check() {
        let backing = BufferBacking::Preset { capacity: 16 };
        assert!(backing.contains(BufferRange::new(0, 16)));
        assert!(!backing.contains(BufferRange::new(8, 9)));
        assert!(!backing.contains(BufferRange::new(u32::MAX, u32::MAX)));

        let graphic = BufferBacking::Graphic(GraphicBuffer {
            handle: NativeHandle(1),
            width: 64,
            height: 64,
            usage: 0,
        });
        assert_eq!(graphic.capacity(), None);
        assert!(graphic.contains(BufferRange::new(0, 1 << 20)));

        let secure = BufferBacking::Secure {
            handle: NativeHandle(7),
            size: 4096,
        };
        assert!(secure.is_node_allocated());
        assert_eq!(secure.kind(), "secure");
    }
}
