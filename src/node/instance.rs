//! The node: shared state, locking discipline, and teardown.
//!
//! A [`Node`] is a handle over `Arc<NodeInner>`. Boundary calls are spread
//! over the sibling modules (`command`, `params`, `modes`, `buffers`); this
//! module holds the state they share, the gated buffer path that runs after a
//! fence signals, and `free_node`.
//!
//! # Locking
//!
//! Locks are always taken in this order, and only as far down as needed:
//!
//! 1. `lifecycle` (read for ordinary calls, write for state changes and free)
//! 2. one port
//! 3. `registry`
//! 4. `codec`
//!
//! No lock is held while waiting on a fence, draining the gate, or shutting
//! down the dispatcher. Gated actions hold only a weak reference and the
//! acceptance ticket of their buffer; they re-validate the ticket under the
//! port lock, so flush and free never wait for them while holding locks.

use crate::codec::{BufferDone, BufferWork, Codec, CodecCapabilities, Completion, WorkDone};
use crate::config::NodeConfig;
use crate::error::{NodeError, Result, ResultExt, Status};
use crate::node::dispatcher::{Dispatcher, DispatcherStats, NodeObserver};
use crate::node::gate::{FenceGate, FenceOutcome};
use crate::node::id::{BufferId, GateTicket, PortIndex, SidebandHandle};
use crate::node::message::{CompletionOutcome, NodeEvent, NodeMessage};
use crate::node::port::Port;
use crate::node::registry::{BufferOwner, BufferRegistry};
use crate::types::{BufferBacking, BufferFlags, BufferRange, NodeState, PortDirection};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Receives input-surface events when the node is fed by a buffer source
pub trait BufferSourceListener: Send + Sync {
    fn on_executing(&self) {}
    fn on_idle(&self) {}
    fn on_loaded(&self) {}
    /// A buffer was registered on an input port
    fn on_input_buffer_added(&self, _buffer: BufferId) {}
    /// An input buffer was consumed and is back with the client
    fn on_input_buffer_emptied(&self, _buffer: BufferId) {}
}

/// Registry view of one buffer
#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub id: BufferId,
    pub port: PortIndex,
    pub owner: BufferOwner,
    pub backing: BufferBacking,
}

#[derive(Debug)]
pub(crate) struct Lifecycle {
    pub(crate) state: NodeState,
    pub(crate) freed: bool,
}

impl Lifecycle {
    /// Fail unless the node still accepts calls
    pub(crate) fn ensure_alive(&self) -> Result<()> {
        if self.freed {
            return Err(NodeError::InvalidState("node has been freed".into()));
        }
        if self.state == NodeState::Invalid {
            return Err(NodeError::Invalid);
        }
        Ok(())
    }
}

/// A fill or empty request accepted by the node, waiting on its fence
#[derive(Debug, Clone, Copy)]
pub(crate) struct Accepted {
    pub(crate) buffer: BufferId,
    pub(crate) port: PortIndex,
    pub(crate) ticket: GateTicket,
    pub(crate) fill: bool,
    pub(crate) range: BufferRange,
    pub(crate) flags: BufferFlags,
    pub(crate) timestamp_us: i64,
}

/// A buffer the codec is done with, bound to the ticket it was accepted under
struct Finished {
    buffer: BufferId,
    port: PortIndex,
    ticket: GateTicket,
    done: Option<BufferDone>,
    outcome: CompletionOutcome,
}

pub(crate) struct NodeInner {
    pub(crate) name: String,
    pub(crate) config: NodeConfig,
    pub(crate) capabilities: CodecCapabilities,
    lifecycle: RwLock<Lifecycle>,
    ports: Vec<Mutex<Port>>,
    registry: Mutex<BufferRegistry>,
    codec: Mutex<Box<dyn Codec>>,
    pub(crate) gate: FenceGate,
    pub(crate) dispatcher: Dispatcher,
    buffer_source: Mutex<Option<Arc<dyn BufferSourceListener>>>,
    last_sideband: AtomicU64,
}

/// A codec node
pub struct Node {
    pub(crate) inner: Arc<NodeInner>,
}

impl Node {
    /// Create a node in the `Loaded` state around `codec`
    pub fn new(
        name: impl Into<String>,
        config: NodeConfig,
        codec: Box<dyn Codec>,
        observer: Arc<dyn NodeObserver>,
    ) -> Result<Node> {
        config.validate()?;
        let name = name.into();
        let capabilities = codec.capabilities();
        let dispatcher = Dispatcher::spawn(&name, observer, &config.dispatcher)
            .with_context(|| format!("starting dispatcher for '{}'", name))?;
        let gate = FenceGate::new(name.clone(), &config.fences, capabilities.native_fences);
        let ports = (0..config.ports.count)
            .map(|i| Mutex::new(Port::new(PortIndex(i))))
            .collect();

        tracing::info!(
            "Node '{}' created: {} port(s), fences {}",
            name,
            config.ports.count,
            if gate.is_deferred() { "deferred" } else { "synchronous" }
        );

        Ok(Node {
            inner: Arc::new(NodeInner {
                name,
                config,
                capabilities,
                lifecycle: RwLock::new(Lifecycle {
                    state: NodeState::Loaded,
                    freed: false,
                }),
                ports,
                registry: Mutex::new(BufferRegistry::new()),
                codec: Mutex::new(codec),
                gate,
                dispatcher,
                buffer_source: Mutex::new(None),
                last_sideband: AtomicU64::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current lifecycle state
    pub fn state(&self) -> NodeState {
        self.inner.lifecycle().state
    }

    pub fn is_freed(&self) -> bool {
        self.inner.lifecycle().freed
    }

    pub fn capabilities(&self) -> CodecCapabilities {
        self.inner.capabilities
    }

    /// Snapshot of one port
    pub fn port_state(&self, port: PortIndex) -> Result<Port> {
        Ok(self.inner.port(port)?.clone())
    }

    /// Look up a buffer by id
    pub fn buffer_info(&self, id: BufferId) -> Result<BufferInfo> {
        let registry = self.inner.registry();
        registry.get(id).map(BufferInfo::from_entry)
    }

    /// Look up a buffer that must belong to `port`
    pub fn lookup_buffer(&self, id: BufferId, port: PortIndex) -> Result<BufferInfo> {
        let registry = self.inner.registry();
        registry.lookup(id, port).map(BufferInfo::from_entry)
    }

    /// Number of registered buffers
    pub fn buffer_count(&self) -> usize {
        self.inner.registry().len()
    }

    pub fn dispatcher_stats(&self) -> DispatcherStats {
        self.inner.dispatcher.stats()
    }

    /// Block until every message produced so far reached the observer.
    ///
    /// Returns `false` after `free_node` or when called from the observer.
    pub fn sync_observer(&self) -> bool {
        self.inner.dispatcher.flush()
    }

    /// Register the buffer source feeding the input ports. Loaded state only.
    pub fn set_input_surface(&self, listener: Arc<dyn BufferSourceListener>) -> Result<()> {
        let lifecycle = self.inner.lifecycle();
        lifecycle.ensure_alive()?;
        if !self.inner.capabilities.input_surface {
            return Err(NodeError::Unsupported("input surface".into()));
        }
        if lifecycle.state != NodeState::Loaded {
            return Err(NodeError::InvalidState(format!(
                "input surface can only be set in Loaded, node is {}",
                lifecycle.state
            )));
        }
        let mut source = self
            .inner
            .buffer_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if source.is_some() {
            return Err(NodeError::InvalidState("input surface already set".into()));
        }
        *source = Some(listener);
        tracing::info!("{}: input surface attached", self.inner.name);
        Ok(())
    }

    /// Post a message through the node's observer queue.
    ///
    /// A message referencing a buffer is only accepted while that buffer is
    /// registered.
    pub fn dispatch_message(&self, message: NodeMessage) -> Result<()> {
        let lifecycle = self.inner.lifecycle();
        lifecycle.ensure_alive()?;
        if let Some(id) = message.buffer_id() {
            self.inner.registry().get(id)?;
        }
        if !self.inner.dispatcher.post(message) {
            return Err(NodeError::InvalidState("dispatcher is shut down".into()));
        }
        Ok(())
    }

    /// Tear the node down.
    ///
    /// Pending fence waits are canceled and their fences released, every
    /// port is force-flushed, all buffers are released and the dispatcher
    /// delivers what is queued before it stops. No observer callback runs
    /// after this returns. Succeeds in the Invalid state.
    pub fn free_node(&self) -> Result<()> {
        let inner = &self.inner;
        let from = {
            let mut lifecycle = inner.lifecycle_mut();
            if lifecycle.freed {
                return Err(NodeError::InvalidState("node has been freed".into()));
            }
            lifecycle.freed = true;
            lifecycle.state
        };
        tracing::info!("{}: freeing node (was {})", inner.name, from);

        inner.gate.close();
        for index in 0..inner.ports.len() {
            let port = PortIndex(index as u32);
            if let Ok(mut guard) = inner.port(port) {
                inner.return_in_flight(&mut guard, CompletionOutcome::Canceled);
            }
        }
        inner.gate.drain();

        {
            let mut registry = inner.registry();
            let mut codec = inner.codec();
            for id in registry.ids() {
                let Ok(entry) = registry.get(id) else { continue };
                let port = entry.port;
                codec.release_buffer(port, id);
                if let Err(e) = registry.release(id, port, true) {
                    tracing::warn!("{}: releasing {} failed: {}", inner.name, id, e);
                }
            }
        }

        inner
            .buffer_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        inner.dispatcher.shutdown();
        tracing::info!("{}: freed", inner.name);
        Ok(())
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if !self.is_freed() {
            if let Err(e) = self.free_node() {
                tracing::warn!("{}: free on drop failed: {}", self.inner.name, e);
            }
        }
    }
}

impl BufferInfo {
    fn from_entry(entry: &crate::node::registry::BufferEntry) -> Self {
        Self {
            id: entry.id,
            port: entry.port,
            owner: entry.owner,
            backing: entry.backing.clone(),
        }
    }
}

impl NodeInner {
    pub(crate) fn lifecycle(&self) -> RwLockReadGuard<'_, Lifecycle> {
        self.lifecycle.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn lifecycle_mut(&self) -> RwLockWriteGuard<'_, Lifecycle> {
        self.lifecycle.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn port(&self, index: PortIndex) -> Result<MutexGuard<'_, Port>> {
        let slot = self
            .ports
            .get(index.index())
            .filter(|_| !index.is_all())
            .ok_or(NodeError::BadPort(index))?;
        Ok(slot.lock().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn port_count(&self) -> u32 {
        self.ports.len() as u32
    }

    pub(crate) fn registry(&self) -> MutexGuard<'_, BufferRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn codec(&self) -> MutexGuard<'_, Box<dyn Codec>> {
        self.codec.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn buffer_source(&self) -> Option<Arc<dyn BufferSourceListener>> {
        self.buffer_source
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn next_sideband(&self) -> SidebandHandle {
        SidebandHandle(self.last_sideband.fetch_add(1, Ordering::Relaxed) + 1)
    }

    pub(crate) fn post(&self, message: NodeMessage) {
        if !self.dispatcher.post(message) {
            tracing::debug!("{}: message discarded, dispatcher closed", self.name);
        }
    }

    /// Move the node to Invalid after an unrecoverable codec error.
    ///
    /// Must be called without holding any node lock.
    pub(crate) fn enter_invalid(&self, detail: &str) {
        let mut lifecycle = self.lifecycle_mut();
        if lifecycle.freed || lifecycle.state == NodeState::Invalid {
            return;
        }
        tracing::error!("{}: fatal codec error, node is now Invalid: {}", self.name, detail);
        lifecycle.state = NodeState::Invalid;
        self.post(NodeMessage::error(Status::Fatal, detail));
    }

    /// Escalate a fatal error result. Call after all locks are released.
    pub(crate) fn check_fatal<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(NodeError::Fatal(detail)) = &result {
            self.enter_invalid(detail);
        }
        result
    }

    /// Apply a queued mode change if `port` has drained
    pub(crate) fn settle_port(&self, port: &mut Port, registry: &BufferRegistry) {
        if registry.in_flight_count(port.index) > 0 {
            return;
        }
        if let Some(mode) = port.on_drained() {
            tracing::info!("{}: {} drained, mode is now {}", self.name, port.index, mode);
            self.post(NodeMessage::Event(NodeEvent::PortSettingsChanged { port: port.index }));
        }
    }

    /// Hand every node-owned buffer on `port` back to the client, in the
    /// order they were accepted, with one completion message each. Pending
    /// fence waits for them are revoked.
    pub(crate) fn return_in_flight(&self, port: &mut Port, outcome: CompletionOutcome) -> usize {
        let index = port.index;
        let input = port.is_input();
        self.codec().flush(index);

        let mut registry = self.registry();
        let in_flight = registry.in_flight_on(index);
        for (id, ticket) in &in_flight {
            if let Err(e) = registry.transfer_to_client(*id, index) {
                tracing::warn!("{}: returning {} failed: {}", self.name, id, e);
                continue;
            }
            self.gate.revoke(*ticket);
            self.post(NodeMessage::returned(*id, index, input, outcome));
        }
        if !in_flight.is_empty() {
            tracing::debug!(
                "{}: returned {} buffer(s) on {} as {:?}",
                self.name,
                in_flight.len(),
                index,
                outcome
            );
        }
        self.settle_port(port, &registry);
        in_flight.len()
    }

    /// Gated half of `fill_buffer`/`empty_buffer`; runs once the fence is resolved
    pub(crate) fn run_accepted(&self, req: Accepted, fence: FenceOutcome) {
        let mut emptied = None;
        let mut fatal = None;
        let mut completions = Vec::new();
        {
            let lifecycle = self.lifecycle();
            if lifecycle.freed || lifecycle.state == NodeState::Invalid {
                return;
            }
            let Ok(mut port) = self.port(req.port) else { return };
            let mut registry = self.registry();
            if !registry.is_current(req.buffer, req.ticket) {
                tracing::debug!("{}: {} was returned before its fence, skipping", self.name, req.buffer);
                return;
            }

            let outcome = if fence == FenceOutcome::Errored {
                tracing::warn!("{}: fence for {} errored", self.name, req.buffer);
                Some((None, CompletionOutcome::Failed))
            } else {
                let backing = match registry.get(req.buffer) {
                    Ok(entry) => entry.backing.clone(),
                    Err(_) => return,
                };
                let work = if req.fill {
                    BufferWork::Fill {
                        buffer: req.buffer,
                        port: req.port,
                        backing,
                        range: req.range,
                    }
                } else {
                    BufferWork::Empty {
                        buffer: req.buffer,
                        port: req.port,
                        backing,
                        range: req.range,
                        flags: req.flags,
                        timestamp_us: req.timestamp_us,
                    }
                };

                let (result, done) = {
                    let mut codec = self.codec();
                    let result = codec.process(work);
                    (result, codec.take_completions())
                };
                completions = bind_tickets(&registry, done);

                match result {
                    Ok(WorkDone::Completed(done)) => Some((Some(done), CompletionOutcome::Completed)),
                    Ok(WorkDone::Retained) => None,
                    Err(e) => {
                        if e.is_fatal() {
                            fatal = Some(e.to_string());
                        } else {
                            tracing::warn!("{}: codec rejected {}: {}", self.name, req.buffer, e);
                        }
                        Some((None, CompletionOutcome::Failed))
                    }
                }
            };

            if let Some((done, outcome)) = outcome {
                let finished = Finished {
                    buffer: req.buffer,
                    port: req.port,
                    ticket: req.ticket,
                    done,
                    outcome,
                };
                if self.complete_locked(&mut port, &mut registry, finished) && !req.fill {
                    emptied = Some(req.buffer);
                }
            }
        }

        for finished in completions {
            self.complete(finished);
        }
        if let Some(detail) = fatal {
            self.enter_invalid(&detail);
        }
        if let (Some(buffer), Some(source)) = (emptied, self.buffer_source()) {
            source.on_input_buffer_emptied(buffer);
        }
    }

    /// Return a finished buffer to the client; the caller holds its port lock
    fn complete_locked(&self, port: &mut Port, registry: &mut BufferRegistry, finished: Finished) -> bool {
        if !registry.is_current(finished.buffer, finished.ticket) {
            tracing::warn!("{}: stale completion for {}", self.name, finished.buffer);
            return false;
        }
        if let Err(e) = registry.transfer_to_client(finished.buffer, finished.port) {
            tracing::warn!("{}: completing {} failed: {}", self.name, finished.buffer, e);
            return false;
        }
        tracing::debug!(
            "{}: {} done on {} ({:?})",
            self.name,
            finished.buffer,
            finished.port,
            finished.outcome
        );
        let completed = finished.outcome == CompletionOutcome::Completed;
        self.post(finished.into_message());
        self.settle_port(port, registry);
        completed
    }

    /// Apply a completion of a retained buffer
    fn complete(&self, finished: Finished) {
        let buffer = finished.buffer;
        let emptied = {
            let lifecycle = self.lifecycle();
            if lifecycle.freed || lifecycle.state == NodeState::Invalid {
                return;
            }
            let Ok(mut port) = self.port(finished.port) else { return };
            let mut registry = self.registry();
            let input = port.is_input();
            self.complete_locked(&mut port, &mut registry, finished) && input
        };
        if emptied {
            if let Some(source) = self.buffer_source() {
                source.on_input_buffer_emptied(buffer);
            }
        }
    }
}

impl Finished {
    fn into_message(self) -> NodeMessage {
        let input = PortDirection::from_index(self.port.0) == PortDirection::Input;
        match (input, self.done) {
            (false, Some(done)) => NodeMessage::FillBufferDone {
                buffer: self.buffer,
                port: self.port,
                range: done.range,
                flags: done.flags,
                timestamp_us: done.timestamp_us,
                outcome: self.outcome,
            },
            _ => NodeMessage::returned(self.buffer, self.port, input, self.outcome),
        }
    }
}

/// Pair codec completions with the tickets their buffers currently carry
fn bind_tickets(registry: &BufferRegistry, completions: Vec<Completion>) -> Vec<Finished> {
    completions
        .into_iter()
        .filter_map(|c| {
            let entry = registry.get(c.buffer).ok()?;
            if entry.port != c.port {
                return None;
            }
            Some(Finished {
                buffer: c.buffer,
                port: c.port,
                ticket: entry.ticket()?,
                done: Some(c.done),
                outcome: CompletionOutcome::Completed,
            })
        })
        .collect()
}
