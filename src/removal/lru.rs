use {
    crate::{
        PageAccess,
        PageKey,
        PageRemovalStrategy,
        PagingError,
        PagingResult,
        RemovalResult,
        util::Sequence,
    },
    priority_queue::PriorityQueue,
    std::cmp::Reverse,
};

/// Least Recently Used (LRU) page removal.
///
/// Every access, including read-ahead, stamps the page key with the next
/// logical tick. Keys live in a priority queue ordered by their last tick, so
/// the least recently touched key is always at the front. Once more than
/// `page_limit` distinct keys are tracked, the `removal_count` oldest ones are
/// emitted as one batch and forgotten.
#[derive(Debug)]
pub struct LeastRecentlyUsed {
    /// Maximum number of resident pages before eviction kicks in.
    page_limit: usize,

    /// Number of pages evicted at once.
    removal_count: usize,

    /// Resident page keys, prioritized by the tick of their last access.
    pages: PriorityQueue<PageKey, Reverse<u64>>,

    /// Logical clock.
    seq: Sequence,
}

impl LeastRecentlyUsed {
    /// Creates an LRU strategy.
    ///
    /// `page_limit` must hold at least one page and `removal_count` must leave
    /// at least one page resident after an eviction. Read-ahead requires
    /// stricter bounds, which are checked by [`PagingConfig::validate`].
    ///
    /// [`PagingConfig::validate`]: crate::PagingConfig::validate
    pub fn new(page_limit: usize, removal_count: usize) -> PagingResult<Self> {
        if page_limit == 0 {
            return Err(PagingError::Config("page limit must be positive".into()));
        }
        if removal_count == 0 || removal_count > page_limit {
            return Err(PagingError::Config(format!(
                "removal count must be within 1..={page_limit}, got {removal_count}"
            )));
        }
        Ok(Self {
            page_limit,
            removal_count,
            pages: PriorityQueue::with_capacity(page_limit + 1),
            seq: Sequence::new(),
        })
    }

    /// Maximum number of resident pages.
    pub fn page_limit(&self) -> usize {
        self.page_limit
    }

    /// Number of pages evicted at once.
    pub fn removal_count(&self) -> usize {
        self.removal_count
    }

    /// Number of tracked page keys.
    pub fn resident(&self) -> usize {
        self.pages.len()
    }

    /// Next eviction candidate.
    pub fn peek(&self) -> Option<PageKey> {
        self.pages.peek().map(|(key, _)| *key)
    }
}

impl PageRemovalStrategy for LeastRecentlyUsed {
    fn on_access(&mut self, access: PageAccess) -> RemovalResult {
        // Inserts new keys and bumps the priority of known ones.
        let tick = self.seq.next().ok_or(PagingError::SequenceExhausted)?;
        self.pages.push(access.key, Reverse(tick));

        if self.pages.len() <= self.page_limit {
            return Ok(None);
        }

        let batch = (0..self.removal_count)
            .map_while(|_| self.pages.pop().map(|(key, _)| key))
            .collect();
        Ok(Some(batch))
    }

    fn on_reset(&mut self) {
        self.pages.clear();
        self.seq.reset();
    }
}
