use {
    super::{CollectionEvent, Core, Parts, Phase, Provisional, SubscriptionId, facade_common},
    crate::{Item, PagingError, PagingResult, fetch::Placeholders, signal::Completion},
    std::{fmt, sync::Arc},
};

/// Collection whose reads never block.
///
/// A read of an item whose page is still being fetched returns a placeholder.
/// Once the fetch lands, observers receive one [`CollectionEvent::Replace`]
/// per slot whose value actually changed. Until the first initialization
/// completes the count is zero.
///
/// Dropping the collection disposes it.
pub struct AsyncCollection<T: Item + PartialEq> {
    core: Arc<Core<T>>,
}

impl<T: Item + PartialEq> AsyncCollection<T> {
    pub(crate) fn new(parts: Parts<T>, placeholders: Placeholders<T>) -> Self {
        let core = Core::new(
            parts,
            Some(Provisional {
                placeholders,
                same: <T as PartialEq>::eq,
            }),
        );
        core.reset();
        Self { core }
    }

    /// Number of items as of the last completed initialization.
    pub fn count(&self) -> usize {
        self.core.snapshot().1
    }

    /// Item at `index`, or its placeholder while the page is being fetched.
    ///
    /// While a reset is in flight, indices within the previous count are
    /// served with placeholders.
    pub fn get(&self, index: usize) -> PagingResult<T> {
        let (store, count, phase) = self.core.snapshot();
        if phase == Phase::Disposed {
            return Err(PagingError::Disposed);
        }
        if index >= count {
            return Err(PagingError::OutOfRange { index, len: count });
        }

        let provisional = || self.core.placeholder(index).ok_or(PagingError::Disposed);
        match store {
            Some(store) => match store.index(index) {
                // The store was replaced by a concurrent reset.
                Err(PagingError::Disposed) if !self.core.is_disposed() => provisional(),
                res => res,
            },
            None => provisional(),
        }
    }

    facade_common!();
}

impl<T: Item + PartialEq> fmt::Debug for AsyncCollection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (_, count, phase) = self.core.snapshot();
        f.debug_struct("AsyncCollection")
            .field("phase", &phase)
            .field("count", &count)
            .finish_non_exhaustive()
    }
}

impl<T: Item + PartialEq> Drop for AsyncCollection<T> {
    fn drop(&mut self) {
        self.core.dispose();
    }
}
