#![doc = include_str!("../README.md")]
#![deny(missing_docs)]
#![deny(elided_lifetimes_in_paths)]

mod collection;
mod config;
mod error;
mod fetch;
mod page;
mod removal;
mod sched;
mod signal;
mod store;
mod util;

use std::error::Error;

pub use {
    collection::{
        AsyncCollection,
        CollectionBuilder,
        CollectionEvent,
        Phase,
        SubscriptionId,
        SyncCollection,
    },
    config::{DEFAULT_PAGE_SIZE, PageHolding, PagingConfig, ReadAhead},
    error::{FetchError, PagingError, PagingResult, fetch_error},
    fetch::{CountFetcher, FetchResult, FetcherKind, PageFetcher, Placeholders},
    page::{FetchPlan, Page, PageArrival, PageEvent, PageNotifier, PageRequest, ReleaseToken},
    removal::{Hoarding, LeastRecentlyUsed},
    sched::{InlineScheduler, Job, Scheduler, SerialScheduler, ThreadScheduler},
    signal::{CancelSignal, Completion, Outcome},
    store::{PageFactory, PageStore, locate},
};

/// Page key: `global index / page size`.
pub type PageKey = usize;

/// Slot index reported for read-ahead accesses.
pub const PRELOAD_SLOT: isize = -1;

/// Item type held by a collection.
///
/// Items are cloned out of their page on every read. An item owning a
/// resource is released when the page holding it is disposed, so resources
/// are typically shared through [`Arc`](std::sync::Arc).
pub trait Item: Clone + Send + Sync + 'static {}

impl<T> Item for T where T: Clone + Send + Sync + 'static {}

/// Page access type.
///
/// Removal strategies may want to tell genuine reads from read-ahead, for
/// example to weigh them differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// A read of the given slot.
    Read(usize),
    /// The page was fetched ahead of need, as a neighbour of a read page.
    Preload,
}

/// "Slot N of page K was accessed" event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageAccess {
    /// Accessed page.
    pub key: PageKey,
    /// Nature of the access.
    pub kind: AccessKind,
}

impl PageAccess {
    /// Read of `slot` in page `key`.
    pub fn read(key: PageKey, slot: usize) -> Self {
        Self {
            key,
            kind: AccessKind::Read(slot),
        }
    }

    /// Read-ahead of page `key`.
    pub fn preload(key: PageKey) -> Self {
        Self {
            key,
            kind: AccessKind::Preload,
        }
    }

    /// Accessed slot, or [`PRELOAD_SLOT`] for read-ahead.
    pub fn slot(&self) -> isize {
        match self.kind {
            AccessKind::Read(slot) => slot as isize,
            AccessKind::Preload => PRELOAD_SLOT,
        }
    }
}

/// Keys of pages to evict at once.
pub type RemovalBatch = Vec<PageKey>;

/// Outcome of feeding one access to a removal strategy.
pub type RemovalResult = Result<Option<RemovalBatch>, Box<dyn Error + Send + Sync + 'static>>;

/// Page removal strategy.
///
/// Turns the sequence of page accesses observed by a store into a sequence of
/// eviction batches. The store feeds accesses one at a time, in order, from a
/// single consumer, and evicts every key of a returned batch that is still
/// resident.
///
/// Failing is fatal: the store stops serving and reports the wrapped cause,
/// since a misbehaving policy would otherwise leak pages silently.
///
/// Closures `FnMut(PageAccess) -> RemovalResult` are strategies too.
pub trait PageRemovalStrategy: Send {
    /// Notifies the strategy that a page has been accessed, returning the
    /// pages to evict, if any.
    fn on_access(&mut self, access: PageAccess) -> RemovalResult;

    /// Notifies the strategy that every page has been dropped by a store
    /// reset.
    fn on_reset(&mut self) {}
}

impl<F> PageRemovalStrategy for F
where
    F: FnMut(PageAccess) -> RemovalResult + Send,
{
    fn on_access(&mut self, access: PageAccess) -> RemovalResult {
        self(access)
    }
}
