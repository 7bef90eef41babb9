//! # codec-node: remote-controllable media codec node
//!
//! A codec node sits between a client that owns media buffers and a codec
//! backend that encodes or decodes them. The client registers buffers, drives
//! the node through an OMX-style lifecycle, and hands buffers over for
//! filling or emptying; the node answers through an observer callback.
//!
//! ## Architecture
//!
//! - **Node**: Buffer registry, port state machine and command processor
//! - **Fence gate**: Defers buffer hand-off until the client's acquire fence signals
//! - **Dispatcher**: Batches completion messages onto one observer thread
//! - **Codec**: Black-box backend behind the [`Codec`](codec::Codec) trait
//! - **Communication**: Crossbeam channels between the caller, gate and dispatcher threads
//!
//! ## Configuration
//!
//! Node settings (port count, fence wait mode, dispatcher batching) are read
//! from `node.toml` in the platform config directory under `codec-node`:
//!
//! - **Linux**: `~/.config/codec-node/node.toml`
//! - **macOS**: `~/Library/Application Support/codec-node/node.toml`
//! - **Windows**: `%APPDATA%\codec-node\node.toml`
//!
//! ## Example
//!
//! ```ignore
//! use codec_node::{ChannelObserver, Node, NodeConfig, SoftwareCodec};
//! use codec_node::types::{CommandType, NodeState};
//!
//! fn main() -> codec_node::Result<()> {
//!     let (observer, messages) = ChannelObserver::new();
//!     let node = Node::new(
//!         "OMX.sw.passthrough",
//!         NodeConfig::load_or_default(),
//!         Box::new(SoftwareCodec::new("sw")),
//!         observer,
//!     )?;
//!     node.send_command(CommandType::StateSet, NodeState::Idle.raw())?;
//!     // ... register buffers, go Executing, exchange buffers ...
//!     node.free_node()
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod node;
pub mod types;

// Re-export commonly used types
pub use codec::{Codec, CodecCapabilities, CodecError, SoftwareCodec};
pub use config::NodeConfig;
pub use error::{NodeError, Result, Status};
pub use node::{
    BufferId, ChannelObserver, Fence, FenceSignal, Node, NodeEvent, NodeMessage, NodeObserver,
    PortIndex, PortMode,
};
pub use types::{BufferBacking, BufferFlags, BufferRange, CommandType, NodeState};
