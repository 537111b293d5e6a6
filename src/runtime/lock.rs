//! Global execution lock
//!
//! At most one context runs managed code at a time. A context that wants the
//! lock waits on `released` for at most the switch interval; if nobody has
//! switched in the meantime it sets the drop request, which the holder sees
//! through the needs-attention flag at its next instruction boundary and
//! answers with a pulse.
//!
//! With forced switching enabled, a holder that releases in answer to a drop
//! request while others are waiting blocks on `switched` until one of them has
//! actually taken the lock, so the holder cannot immediately win it back.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::attention::Attention;
use super::context::ContextId;
use super::error::ConsistencyViolation;
use super::stats::Counters;

#[derive(Debug, Default)]
struct LockState {
    holder: Option<ContextId>,
    last_holder: Option<ContextId>,
    /// Incremented on every take
    switch_number: u64,
    /// Contexts blocked in `take`
    waiters: usize,
}

/// The global execution lock
pub struct ExecutionLock {
    state: Mutex<LockState>,
    /// Signalled when the lock becomes free
    released: Condvar,
    /// Signalled when a context takes the lock
    switched: Condvar,
    drop_requested: AtomicBool,
    interval: Duration,
    force_switching: bool,
    attention: Arc<Attention>,
    counters: Arc<Counters>,
}

impl ExecutionLock {
    pub(crate) fn new(
        interval: Duration,
        force_switching: bool,
        attention: Arc<Attention>,
        counters: Arc<Counters>,
    ) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            released: Condvar::new(),
            switched: Condvar::new(),
            drop_requested: AtomicBool::new(false),
            interval,
            force_switching,
            attention,
            counters,
        }
    }

    /// Block until `id` holds the lock
    pub fn take(&self, id: ContextId) -> Result<(), ConsistencyViolation> {
        let mut state = self.state.lock();
        if state.holder == Some(id) {
            return Err(ConsistencyViolation::Reentrant(id));
        }

        while state.holder.is_some() {
            let switch_number = state.switch_number;
            state.waiters += 1;
            let timed_out = self.released.wait_for(&mut state, self.interval).timed_out();
            state.waiters -= 1;

            if timed_out && state.holder.is_some() && state.switch_number == switch_number {
                Counters::bump(&self.counters.timed_drop_requests);
                trace!(target: "evalcore::lock", waiter = %id, holder = ?state.holder, "switch interval elapsed, requesting drop");
                self.request_drop();
            }
        }

        state.holder = Some(id);
        if state.last_holder != Some(id) {
            debug!(target: "evalcore::lock", from = ?state.last_holder, to = %id, "switch");
        }
        state.last_holder = Some(id);
        state.switch_number = state.switch_number.wrapping_add(1);
        self.switched.notify_all();

        // Whatever was asked of the previous holder has been satisfied
        if self.drop_requested.load(Ordering::Acquire) {
            self.reset_drop_request();
        }
        Ok(())
    }

    /// Release the lock held by `id`
    pub fn release(&self, id: ContextId) -> Result<(), ConsistencyViolation> {
        let mut state = self.state.lock();
        if state.holder != Some(id) {
            return Err(ConsistencyViolation::NotHolder {
                context: id,
                holder: state.holder,
            });
        }
        state.holder = None;
        self.released.notify_one();

        if self.force_switching
            && self.drop_requested.load(Ordering::Acquire)
            && state.waiters > 0
        {
            self.reset_drop_request();
            while state.last_holder == Some(id) {
                self.switched.wait(&mut state);
            }
        }
        Ok(())
    }

    /// Ask the current holder to release at its next boundary
    pub fn request_drop(&self) {
        self.drop_requested.store(true, Ordering::Release);
        self.attention.set(Attention::DROP_REQUEST);
    }

    /// Whether a drop request is outstanding
    #[inline]
    pub fn drop_requested(&self) -> bool {
        self.drop_requested.load(Ordering::Acquire)
    }

    fn reset_drop_request(&self) {
        self.drop_requested.store(false, Ordering::Release);
        self.sync_attention();
    }

    /// Bring the attention bit back in line with the drop request flag
    pub(crate) fn sync_attention(&self) {
        self.attention.clear(Attention::DROP_REQUEST);
        // A request that raced with the clear must stay visible
        if self.drop_requested.load(Ordering::Acquire) {
            self.attention.set(Attention::DROP_REQUEST);
        }
    }

    /// The context currently holding the lock
    pub fn holder(&self) -> Option<ContextId> {
        self.state.lock().holder
    }

    /// Number of contexts blocked waiting for the lock
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters
    }

    /// Switch interval used by waiters
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for ExecutionLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ExecutionLock")
            .field("holder", &state.holder)
            .field("waiters", &state.waiters)
            .field("drop_requested", &self.drop_requested())
            .field("interval", &self.interval)
            .finish()
    }
}
