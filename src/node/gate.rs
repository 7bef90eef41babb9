//! Fence gate.
//!
//! Runs a buffer hand-off once its fence signals. The gate owns every fence
//! it is given and releases it exactly once: before the action runs, or as
//! canceled when the wait is revoked, the gate is closed, or the node is
//! freed.
//!
//! # Wait modes
//!
//! - **Deferred**: each pending fence gets a dedicated worker thread that
//!   selects between the fence and a cancel channel, so the calling thread
//!   returns immediately and unrelated calls are never blocked behind a fence.
//! - **Synchronous**: the caller waits (bounded by a timeout) before the
//!   action runs. Used when the codec has no native fence support or when
//!   configured.
//!
//! Either way a pending wait is registered under its [`GateTicket`] so that
//! flush and free can cancel it without blocking on the action. The ticket is
//! reserved while the caller still holds the locks it was issued under, so a
//! revoke that lands before the wait is registered is not lost.

use crate::config::{FenceSettings, FenceWaitMode};
use crate::node::fence::{Fence, FenceDisposition, FenceStatus};
use crate::node::id::GateTicket;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// What a gated action learns about its fence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceOutcome {
    /// No fence, or the fence signaled
    Signaled,
    /// The fence errored or the wait timed out
    Errored,
}

impl FenceOutcome {
    fn disposition(self) -> FenceDisposition {
        match self {
            FenceOutcome::Signaled => FenceDisposition::Signaled,
            FenceOutcome::Errored => FenceDisposition::Errored,
        }
    }
}

type GatedAction = Box<dyn FnOnce(FenceOutcome) + Send + 'static>;

/// Registration of a wait that has not finished
struct PendingWait {
    /// Dropping this wakes the waiter as canceled
    cancel: Sender<()>,
    /// Disconnects once the waiter has released the fence and run (or dropped) the action
    done: Receiver<()>,
}

enum PendingEntry {
    /// Ticket issued, wait not registered yet
    Reserved { revoked: bool },
    Waiting(PendingWait),
}

type PendingMap = Arc<Mutex<HashMap<GateTicket, PendingEntry>>>;

struct WaitJob {
    ticket: GateTicket,
    fence: Fence,
    action: GatedAction,
    cancel: Receiver<()>,
    done: Sender<()>,
}

enum WaitEnd {
    Ready(FenceOutcome),
    TimedOut,
    Canceled,
}

/// Defers actions until their fence signals
pub struct FenceGate {
    name: String,
    deferred: bool,
    sync_timeout: Duration,
    pending: PendingMap,
    /// Revoked waits whose waiter may still be releasing its fence
    retired: Mutex<Vec<Receiver<()>>>,
    closed: AtomicBool,
}

impl FenceGate {
    /// Deferred waiting needs both the setting and native fence support
    pub fn new(name: impl Into<String>, settings: &FenceSettings, native_fences: bool) -> Self {
        let deferred = settings.wait_mode == FenceWaitMode::Deferred && native_fences;
        Self {
            name: name.into(),
            deferred,
            sync_timeout: settings.sync_timeout(),
            pending: Arc::new(Mutex::new(HashMap::new())),
            retired: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    /// Number of waits that have not finished
    pub fn pending_count(&self) -> usize {
        self.lock_pending().len()
    }

    /// Claim `ticket` before its wait is handed in.
    ///
    /// Called under the locks the ticket was issued under. A revoke that
    /// arrives between this and [`await_then_proceed`](Self::await_then_proceed)
    /// is remembered, and the fence is then released without waiting.
    pub fn reserve(&self, ticket: GateTicket) {
        self.lock_pending()
            .insert(ticket, PendingEntry::Reserved { revoked: false });
    }

    /// Run `action` once `fence` signals.
    ///
    /// Without a fence, or with one that already signaled or errored, the
    /// action runs on the calling thread before this returns. Callers must not
    /// hold node locks.
    pub fn await_then_proceed<F>(&self, ticket: GateTicket, fence: Option<Fence>, action: F)
    where
        F: FnOnce(FenceOutcome) + Send + 'static,
    {
        let Some(mut fence) = fence else {
            if self.take_reservation(ticket) {
                action(FenceOutcome::Signaled);
            }
            return;
        };
        let outcome = match fence.poll() {
            FenceStatus::Signaled => Some(FenceOutcome::Signaled),
            FenceStatus::Errored => Some(FenceOutcome::Errored),
            FenceStatus::Pending => None,
        };
        if let Some(outcome) = outcome {
            if !self.take_reservation(ticket) {
                fence.release(FenceDisposition::Canceled);
                return;
            }
            fence.release(outcome.disposition());
            action(outcome);
            return;
        }

        let (cancel_tx, cancel_rx) = bounded(1);
        let (done_tx, done_rx) = bounded(0);
        {
            let mut pending = self.lock_pending();
            if self.closed.load(Ordering::SeqCst) {
                pending.remove(&ticket);
                tracing::debug!("{}: gate closed, dropping wait {:?}", self.name, ticket);
                return;
            }
            let revoked = matches!(
                pending.get(&ticket),
                Some(PendingEntry::Reserved { revoked: true })
            );
            if revoked {
                pending.remove(&ticket);
                tracing::debug!("{}: wait {:?} revoked before it started", self.name, ticket);
                fence.release(FenceDisposition::Canceled);
                return;
            }
            pending.insert(
                ticket,
                PendingEntry::Waiting(PendingWait {
                    cancel: cancel_tx,
                    done: done_rx,
                }),
            );
        }

        let job = WaitJob {
            ticket,
            fence,
            action: Box::new(action),
            cancel: cancel_rx,
            done: done_tx,
        };
        if !self.deferred {
            run_wait(job, Some(self.sync_timeout), &self.pending);
            return;
        }

        let slot = Arc::new(Mutex::new(Some(job)));
        let worker_slot = Arc::clone(&slot);
        let pending = Arc::clone(&self.pending);
        let spawned = thread::Builder::new()
            .name(format!("{}-fence-{}", self.name, ticket.0))
            .spawn(move || {
                let job = worker_slot
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                if let Some(job) = job {
                    run_wait(job, None, &pending);
                }
            });

        if let Err(e) = spawned {
            tracing::warn!(
                "{}: failed to spawn fence worker ({}), waiting synchronously",
                self.name,
                e
            );
            let job = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(job) = job {
                run_wait(job, Some(self.sync_timeout), &self.pending);
            }
        }
    }

    /// Cancel the wait registered under `ticket` without blocking.
    ///
    /// The fence is released as canceled by its waiter; the action never runs.
    pub fn revoke(&self, ticket: GateTicket) -> bool {
        let mut pending = self.lock_pending();
        match pending.get_mut(&ticket) {
            Some(PendingEntry::Reserved { revoked }) => {
                *revoked = true;
                tracing::debug!("{}: revoked reserved wait {:?}", self.name, ticket);
                return true;
            }
            Some(PendingEntry::Waiting(_)) => {}
            None => return false,
        }
        let Some(PendingEntry::Waiting(PendingWait { cancel, done })) = pending.remove(&ticket)
        else {
            return false;
        };
        drop(cancel);
        let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
        retired.retain(|rx| !matches!(rx.try_recv(), Err(TryRecvError::Disconnected)));
        retired.push(done);
        tracing::debug!("{}: revoked fence wait {:?}", self.name, ticket);
        true
    }

    /// Refuse new waits. Fences handed in afterwards are released immediately.
    pub fn close(&self) {
        let _pending = self.lock_pending();
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Cancel every pending wait and block until each fence is released,
    /// including waits revoked earlier whose waiter has not finished yet
    pub fn drain(&self) {
        let done: Vec<Receiver<()>> = {
            let mut pending = self.lock_pending();
            let mut retired = self.retired.lock().unwrap_or_else(PoisonError::into_inner);
            // Dropping each cancel sender wakes its waiter
            pending
                .drain()
                .filter_map(|(_, entry)| match entry {
                    PendingEntry::Waiting(wait) => Some(wait.done),
                    PendingEntry::Reserved { .. } => None,
                })
                .chain(retired.drain(..))
                .collect()
        };
        if done.is_empty() {
            return;
        }
        tracing::debug!("{}: draining {} fence wait(s)", self.name, done.len());
        for rx in done {
            // Err once the waiter drops its end
            let _ = rx.recv();
        }
    }

    /// Drop the reservation of `ticket`; `false` if it was revoked meanwhile
    fn take_reservation(&self, ticket: GateTicket) -> bool {
        !matches!(
            self.lock_pending().remove(&ticket),
            Some(PendingEntry::Reserved { revoked: true })
        )
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<GateTicket, PendingEntry>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn run_wait(job: WaitJob, timeout: Option<Duration>, pending: &PendingMap) {
    let WaitJob {
        ticket,
        fence,
        action,
        cancel,
        done,
    } = job;

    let end = match timeout {
        None => select! {
            recv(fence.receiver()) -> msg => WaitEnd::Ready(ready_outcome(msg.is_ok())),
            recv(cancel) -> _ => WaitEnd::Canceled,
        },
        Some(timeout) => select! {
            recv(fence.receiver()) -> msg => WaitEnd::Ready(ready_outcome(msg.is_ok())),
            recv(cancel) -> _ => WaitEnd::Canceled,
            default(timeout) => WaitEnd::TimedOut,
        },
    };

    match end {
        WaitEnd::Ready(outcome) => {
            fence.release(outcome.disposition());
            action(outcome);
        }
        WaitEnd::TimedOut => {
            tracing::warn!("fence wait {:?} timed out after {:?}", ticket, timeout);
            fence.release(FenceDisposition::TimedOut);
            action(FenceOutcome::Errored);
        }
        WaitEnd::Canceled => {
            fence.release(FenceDisposition::Canceled);
            drop(action);
        }
    }
    drop(done);

    pending
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&ticket);
}

fn ready_outcome(signaled: bool) -> FenceOutcome {
    if signaled {
        FenceOutcome::Signaled
    } else {
        FenceOutcome::Errored
    }
}
