//! Needs-attention flag
//!
//! A single atomic bitset summarizing every reason the interpreter loop must
//! leave its hot path. The loop only ever asks "is anything set?", which is
//! one relaxed load; the individual bits are consulted by periodic work.
//!
//! Bits are set by whoever creates the condition (a drop request, a pending
//! call, an injected exception) and cleared by whoever consumes it. A stale
//! read costs at most one extra loop iteration before the event is noticed.

use std::sync::atomic::{AtomicU32, Ordering};

/// Needs-attention bitset
#[derive(Debug, Default)]
pub struct Attention {
    bits: AtomicU32,
}

impl Attention {
    /// A pending call is queued
    pub const PENDING_CALLS: u32 = 1 << 0;
    /// Another context asked the holder to drop the execution lock
    pub const DROP_REQUEST: u32 = 1 << 1;
    /// At least one context has an asynchronous exception pending
    pub const ASYNC_EXC: u32 = 1 << 2;

    /// Create a cleared flag
    pub const fn new() -> Self {
        Self {
            bits: AtomicU32::new(0),
        }
    }

    /// Hot-path check: any reason at all to run periodic work
    #[inline(always)]
    pub fn is_raised(&self) -> bool {
        self.bits.load(Ordering::Relaxed) != 0
    }

    /// Set `bit`
    #[inline]
    pub fn set(&self, bit: u32) {
        self.bits.fetch_or(bit, Ordering::Release);
    }

    /// Clear `bit`
    #[inline]
    pub fn clear(&self, bit: u32) {
        self.bits.fetch_and(!bit, Ordering::Release);
    }

    /// Set or clear `bit` according to `on`
    #[inline]
    pub fn assign(&self, bit: u32, on: bool) {
        if on {
            self.set(bit);
        } else {
            self.clear(bit);
        }
    }

    /// Whether `bit` is currently set
    #[inline]
    pub fn contains(&self, bit: u32) -> bool {
        self.bits.load(Ordering::Acquire) & bit != 0
    }

    /// Raw bits, for diagnostics
    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits.load(Ordering::Relaxed)
    }
}
