//! Observer dispatcher.
//!
//! Every message a node produces goes through one FIFO queue into a single
//! dispatcher thread, which hands them to the registered [`NodeObserver`] in
//! batches. A batch closes when it reaches `max_batch` messages or when the
//! batch window expires, whichever comes first. With one queue and one
//! consumer, messages for the same buffer are delivered in the order they
//! were posted.
//!
//! [`ChannelObserver`] turns the push callback into a channel for clients that
//! prefer to poll, the same way the UI side of a worker bridge drains its
//! message channel.

use crate::config::DispatcherSettings;
use crate::error::Result;
use crate::node::message::NodeMessage;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Receives batches of node messages. Called from the dispatcher thread.
pub trait NodeObserver: Send + Sync {
    fn on_messages(&self, messages: &[NodeMessage]);
}

impl<F> NodeObserver for F
where
    F: Fn(&[NodeMessage]) + Send + Sync,
{
    fn on_messages(&self, messages: &[NodeMessage]) {
        self(messages)
    }
}

/// Dispatcher counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Messages accepted into the queue
    pub posted: u64,
    /// Messages handed to the observer
    pub delivered: u64,
    /// Observer callbacks
    pub batches: u64,
    /// Messages refused after shutdown
    pub discarded: u64,
}

#[derive(Default)]
struct Counters {
    posted: AtomicU64,
    delivered: AtomicU64,
    batches: AtomicU64,
    discarded: AtomicU64,
}

enum DispatchItem {
    Message(NodeMessage),
    /// Acknowledged once everything queued before it was delivered
    Barrier(Sender<()>),
    Shutdown,
}

/// Outbound message queue of a node
pub struct Dispatcher {
    tx: Sender<DispatchItem>,
    /// `false` once shut down; held for reading while posting
    open: RwLock<bool>,
    counters: Arc<Counters>,
    worker: Mutex<Option<JoinHandle<()>>>,
    worker_id: ThreadId,
}

impl Dispatcher {
    /// Start the dispatcher thread
    pub fn spawn(
        name: &str,
        observer: Arc<dyn NodeObserver>,
        settings: &DispatcherSettings,
    ) -> Result<Self> {
        let (tx, rx) = unbounded();
        let counters = Arc::new(Counters::default());
        let worker_counters = Arc::clone(&counters);
        let max_batch = settings.max_batch.max(1);
        let window = settings.batch_window();

        let handle = thread::Builder::new()
            .name(format!("{}-dispatch", name))
            .spawn(move || run(rx, observer, max_batch, window, worker_counters))?;

        Ok(Self {
            tx,
            open: RwLock::new(true),
            counters,
            worker_id: handle.thread().id(),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Queue a message. Returns `false` if the dispatcher is shut down.
    pub fn post(&self, message: NodeMessage) -> bool {
        let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
        if !*open || self.tx.send(DispatchItem::Message(message)).is_err() {
            self.counters.discarded.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        self.counters.posted.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Block until every message posted so far has been delivered.
    ///
    /// Returns `false` when shut down, or when called from an observer
    /// callback (the dispatcher thread cannot wait on itself).
    pub fn flush(&self) -> bool {
        if thread::current().id() == self.worker_id {
            return false;
        }
        let (ack_tx, ack_rx) = bounded(1);
        {
            let open = self.open.read().unwrap_or_else(PoisonError::into_inner);
            if !*open || self.tx.send(DispatchItem::Barrier(ack_tx)).is_err() {
                return false;
            }
        }
        ack_rx.recv().is_ok()
    }

    /// Deliver what is queued, then stop the thread. Later posts are discarded.
    pub fn shutdown(&self) {
        {
            let mut open = self.open.write().unwrap_or_else(PoisonError::into_inner);
            if !*open {
                return;
            }
            *open = false;
            let _ = self.tx.send(DispatchItem::Shutdown);
        }
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if thread::current().id() == self.worker_id {
                // Shut down from an observer callback; the loop exits after this batch
                return;
            }
            if handle.join().is_err() {
                tracing::error!("dispatcher thread panicked");
            }
        }
    }

    pub fn is_open(&self) -> bool {
        *self.open.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            posted: self.counters.posted.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            batches: self.counters.batches.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }
}

fn run(
    rx: Receiver<DispatchItem>,
    observer: Arc<dyn NodeObserver>,
    max_batch: usize,
    window: Duration,
    counters: Arc<Counters>,
) {
    let mut batch: Vec<NodeMessage> = Vec::with_capacity(max_batch);
    let mut barriers: Vec<Sender<()>> = Vec::new();

    loop {
        let mut stop = false;
        match rx.recv() {
            Ok(DispatchItem::Message(msg)) => batch.push(msg),
            Ok(DispatchItem::Barrier(ack)) => barriers.push(ack),
            Ok(DispatchItem::Shutdown) | Err(_) => stop = true,
        }

        if !batch.is_empty() {
            let deadline = Instant::now() + window;
            while batch.len() < max_batch {
                match rx.recv_deadline(deadline) {
                    Ok(DispatchItem::Message(msg)) => batch.push(msg),
                    Ok(DispatchItem::Barrier(ack)) => {
                        barriers.push(ack);
                        break;
                    }
                    Ok(DispatchItem::Shutdown) => {
                        stop = true;
                        break;
                    }
                    Err(_) => break,
                }
            }
        }

        if !batch.is_empty() {
            tracing::trace!("delivering batch of {}", batch.len());
            observer.on_messages(&batch);
            counters.batches.fetch_add(1, Ordering::Relaxed);
            counters
                .delivered
                .fetch_add(batch.len() as u64, Ordering::Relaxed);
            batch.clear();
        }
        for ack in barriers.drain(..) {
            let _ = ack.send(());
        }
        if stop {
            break;
        }
    }
    tracing::debug!("dispatcher thread exited");
}

/// Observer that forwards each batch into a channel
pub struct ChannelObserver {
    tx: Sender<Vec<NodeMessage>>,
}

/// Client side of a [`ChannelObserver`]
pub struct ObserverReceiver {
    rx: Receiver<Vec<NodeMessage>>,
}

impl ChannelObserver {
    pub fn new() -> (Arc<ChannelObserver>, ObserverReceiver) {
        let (tx, rx) = unbounded();
        (Arc::new(ChannelObserver { tx }), ObserverReceiver { rx })
    }
}

impl NodeObserver for ChannelObserver {
    fn on_messages(&self, messages: &[NodeMessage]) {
        let _ = self.tx.send(messages.to_vec());
    }
}

impl ObserverReceiver {
    /// Try to receive one batch without blocking
    pub fn try_recv(&self) -> Option<Vec<NodeMessage>> {
        self.rx.try_recv().ok()
    }

    /// Receive one batch, waiting at most `timeout`
    pub fn recv_timeout(&self, timeout: Duration) -> Option<Vec<NodeMessage>> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// All messages delivered so far, flattened
    pub fn drain(&self) -> Vec<NodeMessage> {
        let mut msgs = Vec::new();
        while let Ok(batch) = self.rx.try_recv() {
            msgs.extend(batch);
        }
        msgs
    }

    /// Collect messages until at least `count` arrived or `timeout` passed
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<NodeMessage> {
        let deadline = Instant::now() + timeout;
        let mut msgs = Vec::new();
        while msgs.len() < count {
            match self.rx.recv_deadline(deadline) {
                Ok(batch) => msgs.extend(batch),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        msgs
    }
}
