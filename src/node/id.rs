//! Identity types for the node.
//!
//! All IDs are newtypes over integers. `BufferId`s come from a per-node
//! monotonic counter owned by the buffer registry and are never reused while
//! the node is alive.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Per-node-unique handle of a registered buffer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BufferId(pub u32);

impl BufferId {
    /// Never issued by a registry; ids start at 1.
    pub const INVALID: BufferId = BufferId(0);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Debug for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "BufferId(INVALID)")
        } else {
            write!(f, "BufferId({})", self.0)
        }
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Index of a port on a node. Even indices are inputs, odd indices outputs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct PortIndex(pub u32);

impl PortIndex {
    /// Wildcard used by flush / port enable / port disable commands.
    pub const ALL: PortIndex = PortIndex(u32::MAX);

    #[inline]
    pub fn is_all(self) -> bool {
        self == Self::ALL
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_all() {
            write!(f, "PortIndex(ALL)")
        } else {
            write!(f, "PortIndex({})", self.0)
        }
    }
}

impl fmt::Display for PortIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Opaque parameter / config index, defined by the codec's extension vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParamIndex(pub u32);

impl ParamIndex {
    /// First index of the vendor extension range.
    pub const VENDOR_START: ParamIndex = ParamIndex(0x7F00_0000);

    #[inline]
    pub fn is_vendor_extension(self) -> bool {
        self.0 >= Self::VENDOR_START.0
    }
}

impl fmt::Display for ParamIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

/// Node-allocated sideband window handle for tunneled playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SidebandHandle(pub u64);

/// Acceptance ticket of an in-flight buffer operation.
///
/// Tickets are strictly increasing per node, so ordering tickets orders
/// operations by the time they were accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GateTicket(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_id() {
        let id = BufferId(42);
        assert!(id.is_valid());
        assert_eq!(id.raw(), 42);
        assert!(!BufferId::INVALID.is_valid());
        assert_eq!(format!("{:?}", BufferId::INVALID), "BufferId(INVALID)");
    }

    #[test]
    fn test_port_index_all() {
        assert!(PortIndex::ALL.is_all());
        assert!(!PortIndex(1).is_all());
        assert_eq!(PortIndex(3).index(), 3);
    }

    #[test]
    fn test_param_index_vendor_range() {
        assert!(ParamIndex(0x7F00_0010).is_vendor_extension());
        assert!(!ParamIndex(0x0200_0001).is_vendor_extension());
        assert_eq!(ParamIndex(0x10).to_string(), "0x00000010");
    }

    #[test]
    fn test_ticket_ordering() {
        assert!(GateTicket(1) < GateTicket(2));
    }
}
