//! The per-thread active-context slot
//!
//! Each OS thread has one slot naming the context currently running managed
//! code on it. Access goes through [`ActiveToken`]: attaching produces the
//! token, and only the token's owner can detach it again. The token is
//! neither `Clone` nor `Send`, so a context cannot be detached twice or from
//! another thread.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use super::context::ExecutionContext;
use super::error::ConsistencyViolation;

thread_local! {
    static ACTIVE: RefCell<Option<Arc<ExecutionContext>>> = const { RefCell::new(None) };
}

/// The context active on the calling thread, if any
pub fn current() -> Option<Arc<ExecutionContext>> {
    ACTIVE.try_with(|slot| slot.borrow().clone()).ok().flatten()
}

/// Proof that a context is attached to the current thread
#[derive(Debug)]
pub struct ActiveToken {
    ctx: Arc<ExecutionContext>,
    detached: bool,
    _not_send: PhantomData<*const ()>,
}

impl ActiveToken {
    /// Attach `ctx` to the current thread
    ///
    /// Fails if another context is already active here.
    pub fn attach(ctx: Arc<ExecutionContext>) -> Result<Self, ConsistencyViolation> {
        ACTIVE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if let Some(found) = slot.as_ref() {
                return Err(ConsistencyViolation::OrphanContext {
                    attaching: ctx.id(),
                    found: found.id(),
                });
            }
            *slot = Some(Arc::clone(&ctx));
            ctx.set_attached(true);
            Ok(Self {
                ctx,
                detached: false,
                _not_send: PhantomData,
            })
        })
    }

    /// The attached context
    #[inline]
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Detach from the current thread, returning the context
    ///
    /// Fails if the thread's slot holds something else; the slot is left
    /// untouched in that case.
    pub fn detach(mut self) -> Result<Arc<ExecutionContext>, ConsistencyViolation> {
        self.detached = true;
        let ctx = Arc::clone(&self.ctx);
        ACTIVE.with(|slot| {
            let mut slot = slot.borrow_mut();
            match slot.as_ref() {
                Some(active) if Arc::ptr_eq(active, &ctx) => {
                    *slot = None;
                    ctx.set_attached(false);
                    Ok(ctx)
                }
                other => Err(ConsistencyViolation::ContextMismatch {
                    expected: ctx.id(),
                    found: other.map(|c| c.id()),
                }),
            }
        })
    }
}

impl Drop for ActiveToken {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let _ = ACTIVE.try_with(|slot| {
            if let Ok(mut slot) = slot.try_borrow_mut() {
                if slot.as_ref().is_some_and(|active| Arc::ptr_eq(active, &self.ctx)) {
                    *slot = None;
                }
            }
        });
        self.ctx.set_attached(false);
    }
}
