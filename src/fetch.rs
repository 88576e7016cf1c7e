use {
    crate::{FetchError, Outcome, PageKey, PagingError, PagingResult, signal::CancelSignal},
    futures::{
        Future,
        FutureExt,
        Stream,
        StreamExt,
        executor::block_on,
        future::BoxFuture,
        stream::{AbortRegistration, Abortable, BoxStream},
    },
    std::{fmt, sync::Arc},
    tracing::warn,
};

/// Result of a backing store call.
pub type FetchResult<T> = Result<T, FetchError>;

type SyncPageFn<T> = dyn Fn(usize, usize) -> FetchResult<Vec<T>> + Send + Sync;
type TaskPageFn<T> =
    dyn Fn(usize, usize, CancelSignal) -> BoxFuture<'static, FetchResult<Vec<T>>> + Send + Sync;
type StreamPageFn<T> =
    dyn Fn(usize, usize, CancelSignal) -> BoxStream<'static, FetchResult<T>> + Send + Sync;

/// Kind of a page fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetcherKind {
    /// Plain blocking call returning the whole page.
    Sync,
    /// Future resolving to the whole page.
    TaskBased,
    /// Stream yielding the page items one by one.
    Streaming,
}

/// Fetches `size` items starting at `offset`.
pub enum PageFetcher<T> {
    /// `(offset, size) -> [T; size]`.
    Sync(Arc<SyncPageFn<T>>),
    /// `(offset, size, cancel) -> eventual [T; size]`.
    Task(Arc<TaskPageFn<T>>),
    /// `(offset, size, cancel) -> stream of at most size items`.
    Streaming(Arc<StreamPageFn<T>>),
}

/// One piece of fetched data, as handed to a page.
pub(crate) enum Delivery<T> {
    /// The whole page.
    Page(Vec<T>),
    /// A single slot.
    Item(usize, T),
}

impl<T: Send + 'static> PageFetcher<T> {
    /// Wraps a blocking page fetcher.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(usize, usize) -> FetchResult<Vec<T>> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps a task-based page fetcher.
    pub fn from_task<F, Fut>(f: F) -> Self
    where
        F: Fn(usize, usize, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<Vec<T>>> + Send + 'static,
    {
        Self::Task(Arc::new(move |offset: usize, size: usize, cancel: CancelSignal| {
            f(offset, size, cancel).boxed()
        }))
    }

    /// Wraps a streaming page fetcher.
    pub fn from_stream<F, S>(f: F) -> Self
    where
        F: Fn(usize, usize, CancelSignal) -> S + Send + Sync + 'static,
        S: Stream<Item = FetchResult<T>> + Send + 'static,
    {
        Self::Streaming(Arc::new(move |offset: usize, size: usize, cancel: CancelSignal| {
            f(offset, size, cancel).boxed()
        }))
    }

    /// Kind of this fetcher.
    pub fn kind(&self) -> FetcherKind {
        match self {
            Self::Sync(_) => FetcherKind::Sync,
            Self::Task(_) => FetcherKind::TaskBased,
            Self::Streaming(_) => FetcherKind::Streaming,
        }
    }

    /// Runs the fetch to completion on the current thread, handing data to
    /// `deliver` as it becomes available.
    ///
    /// Failures observed after cancellation are reported as
    /// [`Outcome::Cancelled`]: they are the expected result of disposal.
    pub(crate) fn execute(
        &self,
        offset: usize,
        size: usize,
        cancel: &CancelSignal,
        registration: AbortRegistration,
        mut deliver: impl FnMut(Delivery<T>),
    ) -> Outcome {
        if cancel.is_cancelled() {
            return Outcome::Cancelled;
        }

        let failed = |err: FetchError| {
            if cancel.is_cancelled() {
                Outcome::Cancelled
            } else {
                Outcome::Failed(PagingError::Fetch(err))
            }
        };

        match self {
            Self::Sync(fetch) => match fetch(offset, size) {
                Ok(_) if cancel.is_cancelled() => Outcome::Cancelled,
                Ok(items) => {
                    check_len(offset, size, items.len());
                    deliver(Delivery::Page(items));
                    Outcome::Fetched
                }
                Err(err) => failed(err),
            },
            Self::Task(fetch) => {
                let task = Abortable::new(fetch(offset, size, cancel.clone()), registration);
                match block_on(task) {
                    Err(_aborted) => Outcome::Cancelled,
                    Ok(Ok(items)) => {
                        check_len(offset, size, items.len());
                        deliver(Delivery::Page(items));
                        Outcome::Fetched
                    }
                    Ok(Err(err)) => failed(err),
                }
            }
            Self::Streaming(fetch) => {
                let mut items = Abortable::new(fetch(offset, size, cancel.clone()), registration);
                block_on(async {
                    let mut slot = 0;
                    while let Some(item) = items.next().await {
                        match item {
                            Ok(_) if slot >= size => {
                                warn!(offset, size, "stream yielded more items than the page holds");
                                break;
                            }
                            Ok(item) => {
                                deliver(Delivery::Item(slot, item));
                                slot += 1;
                            }
                            Err(err) => return failed(err),
                        }
                    }
                    if cancel.is_cancelled() {
                        return Outcome::Cancelled;
                    }
                    if slot < size {
                        check_len(offset, size, slot);
                    }
                    Outcome::Fetched
                })
            }
        }
    }
}

fn check_len(offset: usize, size: usize, fetched: usize) {
    if fetched != size {
        warn!(offset, size, fetched, "fetched item count does not match page size");
    }
}

impl<T> Clone for PageFetcher<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Sync(f) => Self::Sync(Arc::clone(f)),
            Self::Task(f) => Self::Task(Arc::clone(f)),
            Self::Streaming(f) => Self::Streaming(Arc::clone(f)),
        }
    }
}

impl<T> fmt::Debug for PageFetcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Sync(_) => "Sync",
            Self::Task(_) => "Task",
            Self::Streaming(_) => "Streaming",
        };
        f.debug_tuple("PageFetcher").field(&kind).finish()
    }
}

/// Fetches the total number of items in the backing store.
#[derive(Clone)]
pub enum CountFetcher {
    /// Blocking call.
    Sync(Arc<dyn Fn() -> FetchResult<usize> + Send + Sync>),
    /// Future resolving to the count.
    Task(Arc<dyn Fn() -> BoxFuture<'static, FetchResult<usize>> + Send + Sync>),
}

impl CountFetcher {
    /// Wraps a blocking count fetcher.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn() -> FetchResult<usize> + Send + Sync + 'static,
    {
        Self::Sync(Arc::new(f))
    }

    /// Wraps a task-based count fetcher.
    pub fn from_task<F, Fut>(f: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FetchResult<usize>> + Send + 'static,
    {
        Self::Task(Arc::new(move || f().boxed()))
    }

    /// Fetches the count on the current thread.
    pub fn fetch(&self) -> PagingResult<usize> {
        let count = match self {
            Self::Sync(fetch) => fetch(),
            Self::Task(fetch) => block_on(fetch()),
        };
        count.map_err(PagingError::Fetch)
    }
}

impl fmt::Debug for CountFetcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Sync(_) => "Sync",
            Self::Task(_) => "Task",
        };
        f.debug_tuple("CountFetcher").field(&kind).finish()
    }
}

/// Produces the provisional value of a slot whose page is still being fetched.
///
/// Receives the page key and the slot index, so different pages may hand out
/// distinguishable placeholders.
pub struct Placeholders<T> {
    make: Arc<dyn Fn(PageKey, usize) -> T + Send + Sync>,
}

impl<T> Placeholders<T> {
    /// Placeholder factory backed by a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(PageKey, usize) -> T + Send + Sync + 'static,
    {
        Self { make: Arc::new(f) }
    }

    /// Same placeholder for every slot of every page.
    pub fn constant(value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::new(move |_, _| value.clone())
    }

    /// Placeholder for slot `slot` of page `key`.
    pub fn make(&self, key: PageKey, slot: usize) -> T {
        (self.make)(key, slot)
    }
}

impl<T> Clone for Placeholders<T> {
    fn clone(&self) -> Self {
        Self {
            make: Arc::clone(&self.make),
        }
    }
}

impl<T> fmt::Debug for Placeholders<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Placeholders").finish_non_exhaustive()
    }
}
