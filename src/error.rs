use std::{error::Error, sync::Arc};

/// Shared, cloneable failure reported by a collaborator (fetcher or removal
/// strategy).
///
/// Page fetch failures are observed by every reader waiting on the same page,
/// hence the reference counting.
pub type FetchError = Arc<dyn Error + Send + Sync + 'static>;

/// Builds a [`FetchError`] from anything convertible into a boxed error,
/// including plain strings.
pub fn fetch_error<E>(err: E) -> FetchError
where
    E: Into<Box<dyn Error + Send + Sync + 'static>>,
{
    Arc::from(err.into())
}

/// Paged collection error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PagingError {
    /// Index outside of `[0, len)`.
    #[error("Index {index} is out of range (len {len})")]
    OutOfRange {
        /// Requested index.
        index: usize,
        /// Number of addressable items.
        len: usize,
    },

    /// Invalid or incomplete configuration, reported at build time.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Backing store failed to produce a page or the item count.
    #[error("Fetch failed: {0}")]
    Fetch(FetchError),

    /// Fetch settled without producing a value for the slot.
    #[error("No item was fetched for slot {index}")]
    MissingItem {
        /// Slot index within the page.
        index: usize,
    },

    /// Removal strategy failed while computing an eviction batch.
    #[error("Page removal strategy failed: {0}")]
    RemovalStrategy(FetchError),

    /// Store stopped serving requests after its removal strategy failed.
    #[error("Page store is faulted")]
    StoreFaulted,

    /// The page, store or collection has been disposed.
    #[error("Already disposed")]
    Disposed,

    /// Sequence generator arrived at maximum value.
    #[error("Sequence generator exhausted")]
    SequenceExhausted,
}

impl PagingError {
    /// Wraps an arbitrary backing store error.
    pub fn fetch<E>(err: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::Fetch(Arc::new(err))
    }
}

/// Paged collection result type.
pub type PagingResult<T> = Result<T, PagingError>;
