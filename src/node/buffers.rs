//! Buffer traffic: registration, release, and fill/empty hand-off.
//!
//! `fill_buffer` and `empty_buffer` take ownership of the fence they are
//! given. Every path out of these calls, including validation errors,
//! either hands the fence to the gate or drops it, and dropping releases it
//! as canceled. Accepted buffers flip to node ownership before the fence is
//! awaited; the gated action then re-checks that the buffer is still owned
//! under the same acceptance ticket before touching the codec.

use crate::error::{NodeError, Result};
use crate::node::fence::Fence;
use crate::node::id::{BufferId, PortIndex};
use crate::node::instance::{Accepted, Node};
use crate::types::{BufferBacking, BufferFlags, BufferRange, NativeHandle, NodeState};
use std::sync::Arc;

impl Node {
    /// Register a client-supplied buffer on `port`
    pub fn use_buffer(&self, port: PortIndex, backing: BufferBacking) -> Result<BufferId> {
        if backing.is_node_allocated() {
            return Err(NodeError::BadValue(
                "secure buffers are allocated by the node".into(),
            ));
        }
        let (id, input) = {
            let inner = &self.inner;
            let lifecycle = inner.lifecycle();
            lifecycle.ensure_alive()?;
            let guard = inner.port(port)?;
            let kind = backing.kind();
            let id = inner.registry().register(port, backing)?;
            tracing::debug!("{}: {} registered on {} ({})", inner.name, id, port, kind);
            (id, guard.is_input())
        };
        if input {
            if let Some(source) = self.inner.buffer_source() {
                source.on_input_buffer_added(id);
            }
        }
        Ok(id)
    }

    /// Allocate a secure buffer of `size` bytes on `port`
    pub fn allocate_secure_buffer(
        &self,
        port: PortIndex,
        size: usize,
    ) -> Result<(BufferId, NativeHandle)> {
        let inner = &self.inner;
        let result = {
            let lifecycle = inner.lifecycle();
            lifecycle.ensure_alive()?;
            if !inner.capabilities.secure_buffers {
                return Err(NodeError::Unsupported("secure buffers".into()));
            }
            if size == 0 {
                return Err(NodeError::BadValue("secure buffer size must be non-zero".into()));
            }
            let _guard = inner.port(port)?;
            let mut registry = inner.registry();
            let allocated = inner.codec().allocate_secure(port, size);
            allocated.map_err(NodeError::from).and_then(|handle| {
                let id = registry.register(port, BufferBacking::Secure { handle, size })?;
                tracing::debug!("{}: secure {} ({} bytes) on {}", inner.name, id, size, port);
                Ok((id, handle))
            })
        };
        inner.check_fatal(result)
    }

    /// Release a buffer.
    ///
    /// A buffer the node still owns is reclaimed when `buffers.reclaim_on_free`
    /// is set: its pending fence wait is revoked and the codec drops it, with
    /// no completion message. Otherwise the call fails with `StillOwnedByNode`.
    pub fn free_buffer(&self, port: PortIndex, id: BufferId) -> Result<()> {
        let inner = &self.inner;
        let lifecycle = inner.lifecycle();
        lifecycle.ensure_alive()?;
        let mut guard = inner.port(port)?;
        let mut registry = inner.registry();

        let force = inner.config.buffers.reclaim_on_free;
        let released = registry.release(id, port, force)?;
        inner.codec().release_buffer(port, id);
        if let Some(ticket) = released.revoked {
            inner.gate.revoke(ticket);
            tracing::debug!("{}: reclaimed in-flight {} on {}", inner.name, id, port);
        } else {
            tracing::debug!("{}: freed {} on {}", inner.name, id, port);
        }
        inner.settle_port(&mut guard, &registry);
        Ok(())
    }

    /// Queue an output buffer to be filled once `fence` signals
    pub fn fill_buffer(&self, id: BufferId, range: BufferRange, fence: Option<Fence>) -> Result<()> {
        self.submit(id, true, range, BufferFlags::NONE, 0, fence)
    }

    /// Queue an input buffer to be consumed once `fence` signals
    pub fn empty_buffer(
        &self,
        id: BufferId,
        range: BufferRange,
        flags: BufferFlags,
        timestamp_us: i64,
        fence: Option<Fence>,
    ) -> Result<()> {
        self.submit(id, false, range, flags, timestamp_us, fence)
    }

    fn submit(
        &self,
        id: BufferId,
        fill: bool,
        range: BufferRange,
        flags: BufferFlags,
        timestamp_us: i64,
        fence: Option<Fence>,
    ) -> Result<()> {
        let inner = &self.inner;
        let req = {
            let lifecycle = inner.lifecycle();
            lifecycle.ensure_alive()?;
            if lifecycle.state != NodeState::Executing {
                return Err(NodeError::InvalidState(format!(
                    "buffer traffic needs Executing, node is {}",
                    lifecycle.state
                )));
            }

            let port = inner.registry().get(id)?.port;
            let guard = inner.port(port)?;
            guard.check_traffic(fill)?;
            let mut registry = inner.registry();
            let entry = registry.lookup(id, port)?;
            if !entry.backing.contains(range) {
                return Err(NodeError::BadValue(format!(
                    "range {}+{} exceeds {}",
                    range.offset, range.length, id
                )));
            }
            let ticket = registry.transfer_to_node(id, port)?;
            inner.gate.reserve(ticket);
            tracing::debug!(
                "{}: {} {} on {} accepted ({:?})",
                inner.name,
                if fill { "fill" } else { "empty" },
                id,
                port,
                ticket
            );
            Accepted {
                buffer: id,
                port,
                ticket,
                fill,
                range,
                flags,
                timestamp_us,
            }
        };

        let node = Arc::downgrade(inner);
        inner.gate.await_then_proceed(req.ticket, fence, move |outcome| {
            if let Some(inner) = node.upgrade() {
                inner.run_accepted(req, outcome);
            }
        });
        Ok(())
    }
}
