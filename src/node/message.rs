//! Outbound messages delivered to the node's observer.

use crate::error::Status;
use crate::node::id::{BufferId, PortIndex};
use crate::types::{BufferFlags, BufferRange, CommandType};
use serde::Serialize;

/// How a buffer operation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CompletionOutcome {
    /// Processed by the codec
    Completed,
    /// Returned unprocessed by a flush, port disable or state change
    Canceled,
    /// The codec rejected the buffer or its fence errored
    Failed,
}

/// Node-level events
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeEvent {
    /// A `send_command` finished; `data` is the target state or port
    CommandComplete { command: CommandType, data: u32 },
    /// A deferred port mode change took effect
    PortSettingsChanged { port: PortIndex },
    /// Asynchronous failure
    Error { status: Status, detail: String },
}

/// One message for the observer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum NodeMessage {
    /// An input buffer is back with the client
    EmptyBufferDone {
        buffer: BufferId,
        port: PortIndex,
        outcome: CompletionOutcome,
    },
    /// An output buffer is back with the client
    FillBufferDone {
        buffer: BufferId,
        port: PortIndex,
        range: BufferRange,
        flags: BufferFlags,
        timestamp_us: i64,
        outcome: CompletionOutcome,
    },
    Event(NodeEvent),
}

impl NodeMessage {
    /// Buffer this message refers to, if any
    pub fn buffer_id(&self) -> Option<BufferId> {
        match self {
            NodeMessage::EmptyBufferDone { buffer, .. }
            | NodeMessage::FillBufferDone { buffer, .. } => Some(*buffer),
            NodeMessage::Event(_) => None,
        }
    }

    pub fn outcome(&self) -> Option<CompletionOutcome> {
        match self {
            NodeMessage::EmptyBufferDone { outcome, .. }
            | NodeMessage::FillBufferDone { outcome, .. } => Some(*outcome),
            NodeMessage::Event(_) => None,
        }
    }

    /// Completion returning a buffer without processing it
    pub fn returned(buffer: BufferId, port: PortIndex, input: bool, outcome: CompletionOutcome) -> Self {
        if input {
            NodeMessage::EmptyBufferDone {
                buffer,
                port,
                outcome,
            }
        } else {
            NodeMessage::FillBufferDone {
                buffer,
                port,
                range: BufferRange::default(),
                flags: BufferFlags::NONE,
                timestamp_us: 0,
                outcome,
            }
        }
    }

    pub fn command_complete(command: CommandType, data: u32) -> Self {
        NodeMessage::Event(NodeEvent::CommandComplete { command, data })
    }

    pub fn error(status: Status, detail: impl Into<String>) -> Self {
        NodeMessage::Event(NodeEvent::Error {
            status,
            detail: detail.into(),
        })
    }
}
