//! Codec abstraction
//!
//! The node never implements an encoding or decoding algorithm itself. It
//! drives a [`Codec`]: a black box that accepts configuration blobs and
//! processes buffers. Backends are chosen when the node is created, and what
//! a backend can do is described by its [`CodecCapabilities`].
//!
//! # Components
//!
//! - [`Codec`] - Trait every backend implements
//! - [`SoftwareCodec`] - In-memory pass-through backend
//! - [`BufferWork`] / [`WorkDone`] / [`Completion`] - Work items and their results
//! - [`CodecError`] - Backend errors, split into call-scoped and fatal

pub mod software;

pub use software::SoftwareCodec;

use crate::error::NodeError;
use crate::node::id::{BufferId, ParamIndex, PortIndex};
use crate::types::{BufferBacking, BufferFlags, BufferRange, NativeHandle, NodeState};
use thiserror::Error;

/// What a codec backend supports beyond plain buffer processing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CodecCapabilities {
    /// Output can be routed through a sideband window
    pub tunneled_playback: bool,
    /// In-place resolution changes up to a declared maximum
    pub adaptive_playback: bool,
    /// Node-allocated secure buffers
    pub secure_buffers: bool,
    /// Input can come from a buffer source instead of client buffers
    pub input_surface: bool,
    /// Fences can be waited on asynchronously
    pub native_fences: bool,
}

impl CodecCapabilities {
    /// Everything supported
    pub fn full() -> Self {
        Self {
            tunneled_playback: true,
            adaptive_playback: true,
            secure_buffers: true,
            input_surface: true,
            native_fences: true,
        }
    }
}

/// Errors reported by a codec backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Index not part of the codec's vocabulary
    #[error("unknown index {0}")]
    UnknownIndex(ParamIndex),

    /// Feature not available in this backend
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Call-scoped failure; codec state is intact
    #[error("rejected: {0}")]
    Rejected(String),

    /// Codec state is corrupt; the node must go Invalid
    #[error("fatal: {0}")]
    Fatal(String),
}

impl CodecError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, CodecError::Fatal(_))
    }
}

impl From<CodecError> for NodeError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::UnknownIndex(index) => NodeError::UnknownIndex(index),
            CodecError::Unsupported(what) => NodeError::Unsupported(what),
            CodecError::Rejected(msg) => NodeError::Codec(msg),
            CodecError::Fatal(msg) => NodeError::Fatal(msg),
        }
    }
}

/// Result type for codec calls
pub type CodecResult<T> = std::result::Result<T, CodecError>;

/// One buffer handed to the codec
#[derive(Debug, Clone)]
pub enum BufferWork {
    /// Consume the input payload in `range`
    Empty {
        buffer: BufferId,
        port: PortIndex,
        backing: BufferBacking,
        range: BufferRange,
        flags: BufferFlags,
        timestamp_us: i64,
    },
    /// Produce output into the buffer
    Fill {
        buffer: BufferId,
        port: PortIndex,
        backing: BufferBacking,
        range: BufferRange,
    },
}

impl BufferWork {
    pub fn buffer(&self) -> BufferId {
        match self {
            BufferWork::Empty { buffer, .. } | BufferWork::Fill { buffer, .. } => *buffer,
        }
    }

    pub fn port(&self) -> PortIndex {
        match self {
            BufferWork::Empty { port, .. } | BufferWork::Fill { port, .. } => *port,
        }
    }

    pub fn is_fill(&self) -> bool {
        matches!(self, BufferWork::Fill { .. })
    }
}

/// Result description of a finished buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferDone {
    pub range: BufferRange,
    pub flags: BufferFlags,
    pub timestamp_us: i64,
}

/// Immediate outcome of [`Codec::process`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkDone {
    /// The buffer is finished and goes back to the client
    Completed(BufferDone),
    /// The codec keeps the buffer; it finishes later via [`Codec::take_completions`]
    Retained,
}

/// A retained buffer the codec has since finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub buffer: BufferId,
    pub port: PortIndex,
    pub done: BufferDone,
}

/// Black-box codec driven by a node.
///
/// Calls are serialised by the node; implementations need not be `Sync`.
#[cfg_attr(test, mockall::automock)]
pub trait Codec: Send {
    /// Feature set of this backend
    fn capabilities(&self) -> CodecCapabilities;

    /// Lifecycle transition; an error keeps the node in `from`
    fn on_state_change(&mut self, from: NodeState, to: NodeState) -> CodecResult<()>;

    fn get_parameter(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>>;

    fn set_parameter(&mut self, index: ParamIndex, blob: &[u8]) -> CodecResult<()>;

    fn get_config(&mut self, index: ParamIndex) -> CodecResult<Vec<u8>>;

    fn set_config(&mut self, index: ParamIndex, blob: &[u8]) -> CodecResult<()>;

    /// Resolve a vendor extension name to an index
    fn extension_index(&self, name: &str) -> Option<ParamIndex>;

    /// Graphics usage bits required for buffers on `port`
    fn graphic_buffer_usage(&self, port: PortIndex) -> Option<u32>;

    /// Allocate secure memory for `port`
    fn allocate_secure(&mut self, port: PortIndex, size: usize) -> CodecResult<NativeHandle>;

    /// Enable (`Some(audio_hw_sync)`) or disable (`None`) tunneled output on `port`
    fn configure_tunnel(&mut self, port: PortIndex, audio_hw_sync: Option<u32>) -> CodecResult<()>;

    /// Process one buffer
    fn process(&mut self, work: BufferWork) -> CodecResult<WorkDone>;

    /// Retained buffers finished since the last call
    fn take_completions(&mut self) -> Vec<Completion>;

    /// Drop everything queued or retained on `port`
    fn flush(&mut self, port: PortIndex);

    /// Forget a buffer that is being freed
    fn release_buffer(&mut self, port: PortIndex, buffer: BufferId);
}
