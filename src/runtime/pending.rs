//! Pending call queue
//!
//! Callbacks registered from any thread, run by whichever context holds the
//! execution lock at its next instruction boundary. The queue is a bounded
//! crossbeam channel; `PENDING_CALLS` in the attention flag mirrors whether
//! it is non-empty.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use super::attention::Attention;
use super::error::PendingCallError;
use super::stats::Counters;
use crate::bytecode::vm::VmResult;

/// A queued callback
pub type PendingCall = Box<dyn FnOnce() -> VmResult<()> + Send>;

/// Bounded queue of pending calls
pub struct PendingCalls {
    tx: Sender<PendingCall>,
    rx: Receiver<PendingCall>,
    capacity: usize,
    busy: AtomicBool,
    attention: Arc<Attention>,
    counters: Arc<Counters>,
}

impl PendingCalls {
    pub(crate) fn new(capacity: usize, attention: Arc<Attention>, counters: Arc<Counters>) -> Self {
        let (tx, rx) = bounded(capacity);
        Self {
            tx,
            rx,
            capacity,
            busy: AtomicBool::new(false),
            attention,
            counters,
        }
    }

    /// Queue a callback and raise the attention flag
    pub fn add(&self, call: PendingCall) -> Result<(), PendingCallError> {
        match self.tx.try_send(call) {
            Ok(()) => {
                self.attention.set(Attention::PENDING_CALLS);
                Ok(())
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                Err(PendingCallError::Full {
                    capacity: self.capacity,
                })
            }
        }
    }

    /// Run queued callbacks until the queue is empty or one fails
    ///
    /// A failing callback's error is returned immediately; the calls behind
    /// it stay queued and the attention flag stays raised. A drain that
    /// starts while another is in progress returns at once.
    pub fn drain(&self) -> VmResult<()> {
        if self.busy.swap(true, Ordering::Acquire) {
            return Ok(());
        }
        let _busy = BusyGuard(&self.busy);

        let result = self.run_queued();
        self.sync_attention();
        result
    }

    fn run_queued(&self) -> VmResult<()> {
        while let Ok(call) = self.rx.try_recv() {
            Counters::bump(&self.counters.pending_calls_run);
            if let Err(e) = call() {
                debug!(target: "evalcore::pending", error = %e, remaining = self.rx.len(), "pending call failed");
                return Err(e);
            }
        }
        Ok(())
    }

    fn sync_attention(&self) {
        self.attention.clear(Attention::PENDING_CALLS);
        // Calls added during the drain must stay visible
        if !self.rx.is_empty() {
            self.attention.set(Attention::PENDING_CALLS);
        }
    }

    /// Number of queued callbacks
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::value::Exception;
    use crate::bytecode::vm::VmError;
    use std::sync::atomic::AtomicUsize;

    fn queue(capacity: usize) -> (PendingCalls, Arc<Attention>) {
        let attention = Arc::new(Attention::new());
        let calls = PendingCalls::new(
            capacity,
            Arc::clone(&attention),
            Arc::new(Counters::default()),
        );
        (calls, attention)
    }

    #[test]
    fn test_drain_runs_in_order() {
        let (calls, attention) = queue(4);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        for i in 0..3 {
            let seen = Arc::clone(&seen);
            calls
                .add(Box::new(move || {
                    seen.lock().push(i);
                    Ok(())
                }))
                .expect("capacity");
        }
        assert!(attention.contains(Attention::PENDING_CALLS));

        calls.drain().expect("all succeed");
        assert_eq!(*seen.lock(), vec![0, 1, 2]);
        assert!(calls.is_empty());
        assert!(!attention.is_raised());
    }

    #[test]
    fn test_full_queue_rejects() {
        let (calls, _) = queue(1);
        calls.add(Box::new(|| Ok(()))).expect("capacity");
        assert_eq!(
            calls.add(Box::new(|| Ok(()))).expect_err("full"),
            PendingCallError::Full { capacity: 1 }
        );
    }

    #[test]
    fn test_failure_keeps_remaining_queued() {
        let (calls, attention) = queue(4);
        let ran = Arc::new(AtomicUsize::new(0));
        calls
            .add(Box::new(|| {
                Err(VmError::Raised(Exception::shared("KeyboardInterrupt", "")))
            }))
            .expect("capacity");
        {
            let ran = Arc::clone(&ran);
            calls
                .add(Box::new(move || {
                    ran.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }))
                .expect("capacity");
        }

        let err = calls.drain().expect_err("first call fails");
        assert_eq!(err.exception().map(|e| e.kind()), Some("KeyboardInterrupt"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(calls.len(), 1);
        assert!(attention.contains(Attention::PENDING_CALLS));

        calls.drain().expect("remaining succeeds");
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(!attention.contains(Attention::PENDING_CALLS));
    }
}
