use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe monotonic sequence.
///
/// Hands out strictly increasing numbers. Used as logical access time by the
/// LRU strategy and as identity for pages and observer subscriptions.
#[derive(Debug, Default)]
pub struct Sequence {
    val: AtomicU64,
}

impl Sequence {
    /// Creates a sequence starting at zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            val: AtomicU64::new(0),
        }
    }

    /// Returns the next number, or `None` once `u64::MAX` is reached.
    pub fn next(&self) -> Option<u64> {
        let val = self.val.fetch_add(1, Ordering::Relaxed);
        if val == u64::MAX { None } else { Some(val) }
    }

    /// Rewinds to zero.
    pub fn reset(&self) {
        self.val.store(0, Ordering::Relaxed);
    }
}
