//! Error handling for codec-node
//!
//! This module defines the node error type, the wire-level [`Status`] code
//! every boundary call reports, and a Result alias for use throughout the
//! crate.

use crate::node::id::{BufferId, ParamIndex, PortIndex};
use crate::types::NodeState;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for node operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Call is illegal from the current lifecycle or port state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Buffer id was never issued or has been freed
    #[error("Unknown buffer {0}")]
    BufferNotFound(BufferId),

    /// Parameter / config index unknown to the codec
    #[error("Unknown index {0}")]
    UnknownIndex(ParamIndex),

    /// Extension name unknown to the codec
    #[error("Unknown extension '{0}'")]
    UnknownExtension(String),

    /// Port index out of range for this node
    #[error("No such port {0}")]
    BadPort(PortIndex),

    /// Buffer used against a port other than the one it was registered on
    #[error("Buffer {buffer} belongs to {actual}, not {expected}")]
    PortMismatch {
        buffer: BufferId,
        expected: PortIndex,
        actual: PortIndex,
    },

    /// Release of a buffer the node still owns without force
    #[error("Buffer {0} is still owned by the node")]
    StillOwnedByNode(BufferId),

    /// Mode change with buffers in flight on the port
    #[error("Port {0} has buffers in flight")]
    PortBusy(PortIndex),

    /// Port mode transition not reachable from the current mode
    #[error("Port {port}: cannot move from {from} to {to}")]
    InvalidTransition {
        port: PortIndex,
        from: String,
        to: String,
    },

    /// Feature not implemented by the underlying codec
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Lifecycle transition not legal
    #[error("Cannot transition from {from} to {to}")]
    IncompatibleState { from: NodeState, to: NodeState },

    /// Malformed argument
    #[error("Bad value: {0}")]
    BadValue(String),

    /// Recoverable, call-scoped codec error
    #[error("Codec error: {0}")]
    Codec(String),

    /// Unrecoverable codec error; the node has moved to Invalid
    #[error("Fatal codec error: {0}")]
    Fatal(String),

    /// Node is in the Invalid state
    #[error("Node is invalid")]
    Invalid,

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<NodeError>,
    },
}

impl NodeError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        NodeError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Wire-level status code for this error
    pub fn status(&self) -> Status {
        match self {
            NodeError::InvalidState(_)
            | NodeError::StillOwnedByNode(_)
            | NodeError::InvalidTransition { .. } => Status::InvalidState,
            NodeError::BufferNotFound(_)
            | NodeError::UnknownIndex(_)
            | NodeError::UnknownExtension(_)
            | NodeError::BadPort(_) => Status::NotFound,
            NodeError::PortMismatch { .. } => Status::PortMismatch,
            NodeError::PortBusy(_) => Status::PortBusy,
            NodeError::Unsupported(_) => Status::Unsupported,
            NodeError::IncompatibleState { .. } => Status::IncompatibleState,
            NodeError::BadValue(_) | NodeError::Config(_) => Status::BadValue,
            NodeError::Invalid => Status::Invalid,
            NodeError::Fatal(_) => Status::Fatal,
            NodeError::Codec(_) | NodeError::Io(_) => Status::Unknown,
            NodeError::WithContext { source, .. } => source.status(),
        }
    }

    /// Whether this error moved (or found) the node in the Invalid state
    pub fn is_fatal(&self) -> bool {
        matches!(self.status(), Status::Fatal | Status::Invalid)
    }
}

/// Result code returned by every boundary call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Ok,
    InvalidState,
    NotFound,
    PortMismatch,
    PortBusy,
    Unsupported,
    IncompatibleState,
    BadValue,
    Invalid,
    Fatal,
    Unknown,
}

impl Status {
    /// Status of any call result
    pub fn of<T>(result: &Result<T>) -> Status {
        match result {
            Ok(_) => Status::Ok,
            Err(e) => e.status(),
        }
    }

    /// Stable raw code carried across the transport
    pub fn raw(self) -> i32 {
        match self {
            Status::Ok => 0,
            Status::Unknown => -1,
            Status::NotFound => -2,
            Status::InvalidState => -38,
            Status::BadValue => -22,
            Status::Unsupported => -1010,
            Status::PortMismatch => -1011,
            Status::PortBusy => -1012,
            Status::IncompatibleState => -1013,
            Status::Invalid => -1014,
            Status::Fatal => -1015,
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, NodeError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NodeError::BufferNotFound(BufferId(3));
        assert_eq!(err.to_string(), "Unknown buffer BufferId(3)");
    }

    #[test]
    fn test_error_with_context_keeps_status() {
        let err = NodeError::PortBusy(PortIndex(1)).with_context("setPortMode");
        assert!(err.to_string().contains("setPortMode"));
        assert_eq!(err.status(), Status::PortBusy);
    }

    #[test]
    fn test_result_context() {
        let result: Result<()> = Err(NodeError::BufferNotFound(BufferId(7)));
        let err = result.context("freeBuffer").unwrap_err();
        assert!(err.to_string().starts_with("freeBuffer"));
        assert_eq!(err.status(), Status::NotFound);

        let ok: Result<u32> = Ok(1);
        assert_eq!(ok.with_context(|| unreachable!()).unwrap(), 1);
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            NodeError::UnknownExtension("x".into()).status(),
            Status::NotFound
        );
        assert_eq!(
            NodeError::StillOwnedByNode(BufferId(1)).status(),
            Status::InvalidState
        );
        assert_eq!(
            NodeError::IncompatibleState {
                from: NodeState::Executing,
                to: NodeState::Loaded
            }
            .status(),
            Status::IncompatibleState
        );
        assert!(NodeError::Fatal("boom".into()).is_fatal());
        assert!(!NodeError::Codec("retry".into()).is_fatal());
    }

    #[test]
    fn test_status_of_result() {
        let ok: Result<u32> = Ok(1);
        assert_eq!(Status::of(&ok), Status::Ok);
        assert_eq!(Status::Ok.raw(), 0);
        let err: Result<u32> = Err(NodeError::Invalid);
        assert_eq!(Status::of(&err), Status::Invalid);
    }
}
