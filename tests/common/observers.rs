//! Observers that record what the node reports

use codec_node::node::{NodeMessage, NodeObserver};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// Records every message and the thread it arrived on
#[derive(Default)]
pub struct RecordingObserver {
    messages: Mutex<Vec<NodeMessage>>,
    threads: Mutex<Vec<ThreadId>>,
    /// Set by a test once the node is freed; later callbacks are counted
    sealed: AtomicBool,
    late_calls: AtomicUsize,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Everything received so far, without consuming it
    pub fn messages(&self) -> Vec<NodeMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Everything received so far, consuming it
    pub fn take(&self) -> Vec<NodeMessage> {
        std::mem::take(&mut *self.messages.lock().unwrap())
    }

    pub fn threads(&self) -> Vec<ThreadId> {
        self.threads.lock().unwrap().clone()
    }

    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Callbacks that arrived after `seal`
    pub fn late_calls(&self) -> usize {
        self.late_calls.load(Ordering::SeqCst)
    }
}

impl NodeObserver for RecordingObserver {
    fn on_messages(&self, messages: &[NodeMessage]) {
        if self.sealed.load(Ordering::SeqCst) {
            self.late_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.threads.lock().unwrap().push(std::thread::current().id());
        self.messages.lock().unwrap().extend_from_slice(messages);
    }
}
