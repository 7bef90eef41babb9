//! Codec node: the state machine between a remote client and a codec
//!
//! A [`Node`] owns a set of ports, a registry of buffers shared with the
//! client, and a [`Codec`](crate::codec::Codec) backend. Buffers are handed to
//! the node with `fill_buffer`/`empty_buffer`, optionally guarded by a
//! [`Fence`]; they come back through the observer as completion messages.
//!
//! # Architecture
//!
//! - Boundary calls run on the caller's thread and return a status
//! - Fence waits run on named gate threads ([`FenceGate`])
//! - Observer callbacks run on one dispatcher thread per node ([`Dispatcher`])
//!
//! # Components
//!
//! - [`BufferRegistry`] - Buffer ids, backings and ownership
//! - [`Port`] / [`PortMode`] - Per-port enable state and mode machine
//! - [`Fence`] / [`FenceGate`] - Acquire fences and the deferred hand-off
//! - [`NodeMessage`] / [`NodeObserver`] - What the client hears back
//!
//! # Example
//!
//! ```ignore
//! use codec_node::codec::SoftwareCodec;
//! use codec_node::config::NodeConfig;
//! use codec_node::node::{ChannelObserver, Node, PortIndex};
//! use codec_node::types::{BufferBacking, BufferRange, CommandType, NodeState};
//!
//! let (observer, messages) = ChannelObserver::new();
//! let node = Node::new("decoder", NodeConfig::default(), Box::new(SoftwareCodec::new("sw")), observer)?;
//! node.send_command(CommandType::StateSet, NodeState::Idle.raw())?;
//! node.send_command(CommandType::StateSet, NodeState::Executing.raw())?;
//!
//! let out = node.use_buffer(PortIndex(1), BufferBacking::Preset { capacity: 4096 })?;
//! node.fill_buffer(out, BufferRange::new(0, 4096), None)?;
//! for msg in messages.drain() {
//!     println!("{:?}", msg);
//! }
//! node.free_node()?;
//! ```

pub mod buffers;
pub mod command;
pub mod dispatcher;
pub mod fence;
pub mod gate;
pub mod id;
pub mod instance;
pub mod message;
pub mod modes;
pub mod params;
pub mod port;
pub mod registry;

pub use command::is_legal_transition;
pub use dispatcher::{ChannelObserver, Dispatcher, DispatcherStats, NodeObserver, ObserverReceiver};
pub use fence::{Fence, FenceDisposition, FenceSignal, FenceStatus, FenceWatch};
pub use gate::{FenceGate, FenceOutcome};
pub use id::{BufferId, GateTicket, ParamIndex, PortIndex, SidebandHandle};
pub use instance::{BufferInfo, BufferSourceListener, Node};
pub use message::{CompletionOutcome, NodeEvent, NodeMessage};
pub use port::{ModeChange, Port, PortMode};
pub use registry::{BufferEntry, BufferOwner, BufferRegistry};
