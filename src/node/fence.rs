//! One-shot synchronization fences.
//!
//! A [`Fence`] is the waiting half handed to the node with a fill/empty call;
//! the producer keeps the [`FenceSignal`]. The node owns the fence from the
//! moment the call is accepted and must release it exactly once. Release is
//! recorded in shared state so the producer can observe it through a
//! [`FenceWatch`].
//!
//! Dropping an unreleased fence releases it as [`FenceDisposition::Canceled`],
//! so every early return of an accepting call disposes of it.

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// How a fence was finally released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceDisposition {
    /// Waited for and signaled
    Signaled,
    /// The producer went away without signaling
    Errored,
    /// Synchronous wait gave up
    TimedOut,
    /// Released without waiting (call failed, flush, free)
    Canceled,
}

/// Current state of a fence that has not been released
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    Pending,
    Signaled,
    Errored,
}

#[derive(Default)]
struct ReleaseRecord {
    count: AtomicUsize,
    disposition: Mutex<Option<FenceDisposition>>,
}

impl ReleaseRecord {
    fn record(&self, disposition: FenceDisposition) {
        self.count.fetch_add(1, Ordering::SeqCst);
        let mut slot = self
            .disposition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slot.get_or_insert(disposition);
    }
}

/// Waiting half of a fence
pub struct Fence {
    rx: Receiver<()>,
    record: Arc<ReleaseRecord>,
    status: FenceStatus,
    released: bool,
}

/// Producer half of a fence
#[derive(Debug)]
pub struct FenceSignal {
    tx: Sender<()>,
}

/// Observer of a fence's release
#[derive(Clone)]
pub struct FenceWatch {
    record: Arc<ReleaseRecord>,
}

impl Fence {
    /// Create a pending fence and its signal
    pub fn new() -> (Fence, FenceSignal) {
        let (tx, rx) = bounded(1);
        let fence = Fence {
            rx,
            record: Arc::new(ReleaseRecord::default()),
            status: FenceStatus::Pending,
            released: false,
        };
        (fence, FenceSignal { tx })
    }

    /// A fence that is already signaled
    pub fn signaled() -> Fence {
        let (fence, signal) = Fence::new();
        signal.signal();
        fence
    }

    /// Handle for observing this fence's release
    pub fn watch(&self) -> FenceWatch {
        FenceWatch {
            record: Arc::clone(&self.record),
        }
    }

    /// Check the fence without blocking
    pub fn poll(&mut self) -> FenceStatus {
        if self.status == FenceStatus::Pending {
            self.status = match self.rx.try_recv() {
                Ok(()) => FenceStatus::Signaled,
                Err(TryRecvError::Empty) => FenceStatus::Pending,
                Err(TryRecvError::Disconnected) => FenceStatus::Errored,
            };
        }
        self.status
    }

    /// Block for at most `timeout`
    pub fn wait_timeout(&mut self, timeout: Duration) -> FenceStatus {
        if self.status == FenceStatus::Pending {
            self.status = match self.rx.recv_timeout(timeout) {
                Ok(()) => FenceStatus::Signaled,
                Err(RecvTimeoutError::Timeout) => FenceStatus::Pending,
                Err(RecvTimeoutError::Disconnected) => FenceStatus::Errored,
            };
        }
        self.status
    }

    /// Channel that becomes ready when the fence signals or errors
    pub(crate) fn receiver(&self) -> &Receiver<()> {
        &self.rx
    }

    /// Release the fence, recording how
    pub fn release(mut self, disposition: FenceDisposition) {
        self.released = true;
        self.record.record(disposition);
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        if !self.released {
            self.record.record(FenceDisposition::Canceled);
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fence")
            .field("status", &self.status)
            .field("released", &self.released)
            .finish()
    }
}

impl FenceSignal {
    /// Signal the fence
    pub fn signal(self) {
        // The waiting half may already be gone
        let _ = self.tx.send(());
    }
}

impl FenceWatch {
    /// How many times the fence has been released
    pub fn release_count(&self) -> usize {
        self.record.count.load(Ordering::SeqCst)
    }

    pub fn is_released(&self) -> bool {
        self.release_count() > 0
    }

    /// First recorded disposition
    pub fn disposition(&self) -> Option<FenceDisposition> {
        *self
            .record
            .disposition
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FenceWatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FenceWatch")
            .field("release_count", &self.release_count())
            .field("disposition", &self.disposition())
            .finish()
    }
}
