use {
    super::{CollectionEvent, Core, Parts, Phase, SubscriptionId, facade_common},
    crate::{Item, PagingError, PagingResult, signal::Completion},
    std::{fmt, sync::Arc},
};

/// Collection whose reads block until the value is available.
///
/// Pages are fetched on the thread reading them; with read-ahead, neighbour
/// pages are fetched on the background context and a read of such a page
/// waits for its fetch to settle. A slow backing store therefore blocks the
/// reading thread.
///
/// Dropping the collection disposes it.
pub struct SyncCollection<T: Item> {
    core: Arc<Core<T>>,
}

impl<T: Item> SyncCollection<T> {
    pub(crate) fn new(parts: Parts<T>) -> Self {
        let core = Core::new(parts, None);
        core.reset();
        Self { core }
    }

    /// Number of items. Waits for initialization.
    pub fn count(&self) -> PagingResult<usize> {
        self.core.ready_store().map(|(_, count)| count)
    }

    /// Item at `index`, fetching its page if needed.
    ///
    /// Waits for initialization, then for the page fetch. Fetch failures are
    /// propagated to the caller.
    pub fn get(&self, index: usize) -> PagingResult<T> {
        loop {
            let (store, count) = self.core.ready_store()?;
            if index >= count {
                return Err(PagingError::OutOfRange { index, len: count });
            }
            match store.index(index) {
                // The store was replaced by a concurrent reset.
                Err(PagingError::Disposed) if !self.core.is_disposed() => continue,
                res => return res,
            }
        }
    }

    facade_common!();
}

impl<T: Item> fmt::Debug for SyncCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, count, phase) = self.core.snapshot();
        f.debug_struct("SyncCollection")
            .field("phase", &phase)
            .field("count", &count)
            .finish_non_exhaustive()
    }
}

impl<T: Item> Drop for SyncCollection<T> {
    fn drop(&mut self) {
        self.core.dispose();
    }
}
