use {
    crate::{
        PageKey,
        PagingError,
        PagingResult,
        fetch::{Delivery, PageFetcher, Placeholders},
        sched::Scheduler,
        signal::{CancelSignal, Completion, Outcome},
    },
    futures::stream::AbortRegistration,
    parking_lot::{Mutex, RwLock},
    std::{
        fmt,
        mem,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    },
    tracing::{debug, warn},
};

/// Invoked exactly once when a page has been disposed.
///
/// The owning store uses it to drop the page from its map.
pub type ReleaseToken = Box<dyn FnOnce() + Send + 'static>;

/// Everything a page factory needs to know about the page to create.
pub struct PageRequest {
    /// Unique identity of the page within its store.
    pub id: u64,
    /// Page key.
    pub key: PageKey,
    /// First global index covered by the page.
    pub offset: usize,
    /// Number of slots, truncated at the tail of the data set.
    pub size: usize,
    /// Released once the page is disposed.
    pub release: ReleaseToken,
}

impl fmt::Debug for PageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRequest")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Values of a contiguous range of slots replaced by a fetch.
#[derive(Debug, Clone)]
pub struct PageArrival<T> {
    /// Key of the page the slots belong to.
    pub key: PageKey,
    /// Global index of the first replaced slot.
    pub offset: usize,
    /// Slot values before the fetch landed (`None` for empty slots).
    pub previous: Vec<Option<T>>,
    /// Slot values after the fetch landed.
    pub current: Vec<T>,
}

/// Event raised by a page while its fetch progresses.
#[derive(Debug, Clone)]
pub enum PageEvent<T> {
    /// Fetched values replaced the slot contents.
    Arrived(PageArrival<T>),
    /// Backing store failed to produce the page.
    Failed {
        /// Page key.
        key: PageKey,
        /// First global index covered by the page.
        offset: usize,
        /// Number of slots.
        size: usize,
        /// Reported failure.
        error: PagingError,
    },
}

/// Delivers page events on the notification context.
pub struct PageNotifier<T> {
    scheduler: Arc<dyn Scheduler>,
    sink: Arc<dyn Fn(PageEvent<T>) + Send + Sync>,
}

impl<T: Send + 'static> PageNotifier<T> {
    /// Creates a notifier running `sink` on `scheduler`.
    pub fn new<F>(scheduler: Arc<dyn Scheduler>, sink: F) -> Self
    where
        F: Fn(PageEvent<T>) + Send + Sync + 'static,
    {
        Self {
            scheduler,
            sink: Arc::new(sink),
        }
    }

    fn notify(&self, event: PageEvent<T>) {
        let sink = Arc::clone(&self.sink);
        self.scheduler.schedule(Box::new(move || sink(event)));
    }
}

impl<T> Clone for PageNotifier<T> {
    fn clone(&self) -> Self {
        Self {
            scheduler: Arc::clone(&self.scheduler),
            sink: Arc::clone(&self.sink),
        }
    }
}

/// How a page executes its fetch.
pub enum FetchPlan<T> {
    /// Fetch runs to completion on the thread starting the page; reads never
    /// wait afterwards.
    Eager(PageFetcher<T>),
    /// Fetch runs on the background context; reads block until it settles.
    Deferred {
        /// Backing store.
        fetcher: PageFetcher<T>,
        /// Context the fetch runs on.
        background: Arc<dyn Scheduler>,
    },
    /// Slots start as placeholders, fetch runs on the background context and
    /// reads never block. Arrivals are reported through `notifier`.
    Placeholder {
        /// Backing store.
        fetcher: PageFetcher<T>,
        /// Context the fetch runs on.
        background: Arc<dyn Scheduler>,
        /// Provisional slot values.
        placeholders: Placeholders<T>,
        /// Receives arrivals and failures.
        notifier: Option<PageNotifier<T>>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadMode {
    Settled,
    Blocking,
    Provisional,
}

struct PendingFetch<T> {
    fetcher: PageFetcher<T>,
    registration: AbortRegistration,
}

struct Slots<T> {
    values: Vec<Option<T>>,
    disposed: bool,
}

/// Fixed-offset, fixed-size slice of the virtual sequence.
///
/// All pages share one lifecycle: created, fetching, settled (fetched, failed
/// or cancelled), disposed. They differ only in how the fetch is executed and
/// whether reads wait for it, which is captured by [`FetchPlan`].
pub struct Page<T> {
    id: u64,
    key: PageKey,
    offset: usize,
    size: usize,
    mode: ReadMode,
    background: Option<Arc<dyn Scheduler>>,
    notifier: Option<PageNotifier<T>>,
    slots: RwLock<Slots<T>>,
    pending: Mutex<Option<PendingFetch<T>>>,
    started: AtomicBool,
    cancel: CancelSignal,
    completion: Completion,
    release: Mutex<Option<ReleaseToken>>,
}

impl<T> Page<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Creates a page. The fetch does not begin before [`Page::start`].
    pub fn new(request: PageRequest, plan: FetchPlan<T>) -> Self {
        let PageRequest {
            id,
            key,
            offset,
            size,
            release,
        } = request;

        let (fetcher, mode, background, notifier, values) = match plan {
            FetchPlan::Eager(fetcher) => (fetcher, ReadMode::Settled, None, None, empty(size)),
            FetchPlan::Deferred {
                fetcher,
                background,
            } => (fetcher, ReadMode::Blocking, Some(background), None, empty(size)),
            FetchPlan::Placeholder {
                fetcher,
                background,
                placeholders,
                notifier,
            } => {
                let values = (0..size).map(|slot| Some(placeholders.make(key, slot))).collect();
                (fetcher, ReadMode::Provisional, Some(background), notifier, values)
            }
        };

        let (cancel, registration) = CancelSignal::new();
        debug!(page = key, id, offset, size, "page created");
        Self {
            id,
            key,
            offset,
            size,
            mode,
            background,
            notifier,
            slots: RwLock::new(Slots {
                values,
                disposed: false,
            }),
            pending: Mutex::new(Some(PendingFetch {
                fetcher,
                registration,
            })),
            started: AtomicBool::new(false),
            cancel,
            completion: Completion::new(),
            release: Mutex::new(Some(release)),
        }
    }

    /// Kicks off the fetch. Only the first call has an effect.
    ///
    /// Eager pages fetch on the calling thread, every other plan hands the
    /// fetch to the background context.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }
        match &self.background {
            None => self.run(),
            Some(background) => {
                let page = Arc::clone(self);
                background.schedule(Box::new(move || page.run()));
            }
        }
    }

    fn run(&self) {
        // Disposal may have claimed the fetch before it got a chance to run.
        let Some(PendingFetch {
            fetcher,
            registration,
        }) = self.pending.lock().take()
        else {
            return;
        };

        let outcome = fetcher.execute(self.offset, self.size, &self.cancel, registration, |data| {
            self.apply(data)
        });

        match &outcome {
            Outcome::Fetched => debug!(page = self.key, id = self.id, "page fetched"),
            Outcome::Cancelled => debug!(page = self.key, id = self.id, "page fetch cancelled"),
            Outcome::Failed(error) => {
                warn!(page = self.key, id = self.id, %error, "page fetch failed");
                if let Some(notifier) = &self.notifier {
                    notifier.notify(PageEvent::Failed {
                        key: self.key,
                        offset: self.offset,
                        size: self.size,
                        error: error.clone(),
                    });
                }
            }
        }
        self.completion.settle(outcome);
    }

    fn apply(&self, data: Delivery<T>) {
        let mut slots = self.slots.write();
        if slots.disposed || self.cancel.is_cancelled() {
            // Dropping the fetched values releases them right away.
            return;
        }

        let (first, items) = match data {
            Delivery::Page(items) => (0, items),
            Delivery::Item(slot, item) => (slot, vec![item]),
        };

        let notify = self.notifier.is_some();
        let mut previous = Vec::new();
        let mut current = Vec::new();
        for (slot, item) in slots.values.iter_mut().skip(first).zip(items) {
            if notify {
                current.push(item.clone());
                previous.push(slot.replace(item));
            } else {
                *slot = Some(item);
            }
        }
        drop(slots);

        match &self.notifier {
            Some(notifier) if !current.is_empty() => {
                notifier.notify(PageEvent::Arrived(PageArrival {
                    key: self.key,
                    offset: self.offset + first,
                    previous,
                    current,
                }));
            }
            _ => {}
        }
    }

    /// Current value of slot `index`.
    ///
    /// Pages that are not placeholder-backed wait for the fetch to settle and
    /// report its failure, if any. Placeholder-backed pages never wait.
    pub fn index(&self, index: usize) -> PagingResult<T> {
        if index >= self.size {
            return Err(PagingError::OutOfRange {
                index,
                len: self.size,
            });
        }

        if self.mode != ReadMode::Provisional {
            match self.completion.wait() {
                Outcome::Fetched => {}
                Outcome::Failed(err) => return Err(err),
                Outcome::Cancelled => return Err(PagingError::Disposed),
            }
        }

        let slots = self.slots.read();
        if slots.disposed {
            return Err(PagingError::Disposed);
        }
        match slots.values.get(index) {
            Some(Some(value)) => Ok(value.clone()),
            _ => Err(PagingError::MissingItem { index }),
        }
    }

    /// Cancels the fetch, waits for it to settle, releases every slot value
    /// and finally the release token. Safe to call more than once.
    pub fn dispose(&self) {
        self.retire();
        self.completion.wait();

        let values = {
            let mut slots = self.slots.write();
            slots.disposed = true;
            mem::take(&mut slots.values)
        };
        drop(values);

        if let Some(release) = self.release.lock().take() {
            debug!(page = self.key, id = self.id, "page disposed");
            release();
        }
    }

    /// Cancels the fetch without waiting for it to settle.
    ///
    /// A retired page must not be handed out anymore; [`Page::dispose`]
    /// finishes the job.
    pub(crate) fn retire(&self) {
        self.cancel.cancel();

        // A fetch that never ran is settled here, nobody else will.
        if self.pending.lock().take().is_some() {
            self.completion.settle(Outcome::Cancelled);
        }
    }

    /// Whether the page has been retired or disposed.
    pub fn is_retiring(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Unique identity of the page within its store.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Page key.
    pub fn key(&self) -> PageKey {
        self.key
    }

    /// First global index covered by the page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of slots.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Settles once the fetch succeeded, failed or was cancelled.
    pub fn completion(&self) -> &Completion {
        &self.completion
    }

    /// Whether the page has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.slots.read().disposed
    }
}

fn empty<T>(size: usize) -> Vec<Option<T>> {
    (0..size).map(|_| None).collect()
}

impl<T> fmt::Debug for Page<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("offset", &self.offset)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .field("settled", &self.completion.is_settled())
            .finish_non_exhaustive()
    }
}
