mod builder;
mod notify;
mod sync;

pub use {builder::CollectionBuilder, notify::AsyncCollection, sync::SyncCollection};

use {
    crate::{
        Item,
        PageKey,
        PagingConfig,
        PagingError,
        PagingResult,
        ReadAhead,
        fetch::{CountFetcher, PageFetcher, Placeholders},
        page::{FetchPlan, Page, PageEvent, PageNotifier, PageRequest},
        sched::Scheduler,
        signal::{Completion, Outcome},
        store::{PageStore, locate},
        util::Sequence,
    },
    parking_lot::{Mutex, RwLock},
    std::{
        mem,
        sync::{
            Arc,
            Weak,
            atomic::{AtomicU64, Ordering},
        },
    },
    tracing::{debug, warn},
};

/// Lifecycle phase of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Not initialized yet.
    Uninitialized,
    /// Count fetch and store construction in flight.
    Initializing,
    /// Serving reads.
    Ready,
    /// The count fetch failed; a reset retries.
    Failed,
    /// Disposed for good.
    Disposed,
}

/// Change notification raised by a collection.
#[derive(Debug, Clone)]
pub enum CollectionEvent<T> {
    /// The value at `index` changed, typically from a placeholder to the
    /// fetched value.
    Replace {
        /// Global index.
        index: usize,
        /// Previous value (`None` if the slot held none).
        old: Option<T>,
        /// Current value.
        new: T,
    },
    /// Everything may have changed.
    Reset,
    /// The item count changed.
    CountChanged {
        /// Count before the reset.
        old: usize,
        /// Count after the reset.
        new: usize,
    },
    /// A page could not be fetched; its slots keep their placeholders.
    FetchFailed {
        /// First global index of the page.
        offset: usize,
        /// Number of slots of the page.
        size: usize,
        /// Reported failure.
        error: PagingError,
    },
}

/// Identifies an observer registration.
pub type SubscriptionId = u64;

type Observer<T> = Arc<dyn Fn(&CollectionEvent<T>) + Send + Sync>;

struct Observers<T> {
    ids: Sequence,
    list: RwLock<Vec<(SubscriptionId, Observer<T>)>>,
}

impl<T> Observers<T> {
    fn new() -> Self {
        Self {
            ids: Sequence::new(),
            list: RwLock::new(Vec::new()),
        }
    }

    fn subscribe(&self, observer: Observer<T>) -> PagingResult<SubscriptionId> {
        let id = self.ids.next().ok_or(PagingError::SequenceExhausted)?;
        self.list.write().push((id, observer));
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut list = self.list.write();
        let len = list.len();
        list.retain(|(registered, _)| *registered != id);
        list.len() != len
    }

    fn notify(&self, event: &CollectionEvent<T>) {
        // Observers may (un)subscribe from within the callback.
        let observers = self
            .list
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect::<Vec<_>>();
        for observer in observers {
            observer(event);
        }
    }
}

type PageFactoryFn<T> = Box<dyn Fn(PageRequest) -> Page<T> + Send + Sync>;

/// What the asynchronous facade needs on top of the synchronous one.
struct Provisional<T> {
    placeholders: Placeholders<T>,
    same: fn(&T, &T) -> bool,
}

/// Collaborators of a collection, as assembled by the builder.
pub(crate) struct Parts<T> {
    pub(crate) config: PagingConfig,
    pub(crate) fetcher: PageFetcher<T>,
    pub(crate) counter: CountFetcher,
    pub(crate) background: Arc<dyn Scheduler>,
    pub(crate) notifications: Arc<dyn Scheduler>,
}

struct State<T> {
    phase: Phase,
    count: usize,
    store: Option<Arc<PageStore<T>>>,
    init: Completion,
    error: Option<PagingError>,
}

/// Shared core of both facades: a state machine (`Uninitialized ->
/// Initializing -> Ready`, back to `Initializing` on reset) driving count
/// fetches and page store construction on the background context.
pub(crate) struct Core<T> {
    parts: Parts<T>,
    provisional: Option<Provisional<T>>,
    state: Mutex<State<T>>,
    observers: Observers<T>,
    selected: Mutex<Option<usize>>,
    generation: AtomicU64,
}

impl<T: Item> Core<T> {
    fn new(parts: Parts<T>, provisional: Option<Provisional<T>>) -> Arc<Self> {
        Arc::new(Self {
            parts,
            provisional,
            state: Mutex::new(State {
                phase: Phase::Uninitialized,
                count: 0,
                store: None,
                init: Completion::new(),
                error: None,
            }),
            observers: Observers::new(),
            selected: Mutex::new(None),
            generation: AtomicU64::new(0),
        })
    }

    /// Drops the current store and schedules a count fetch plus the
    /// construction of a fresh store. Returns the completion of the new
    /// initialization.
    fn reset(self: &Arc<Self>) -> Completion {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let init = Completion::new();

        let stale = {
            let mut state = self.state.lock();
            if state.phase == Phase::Disposed {
                return Completion::settled(Outcome::Cancelled);
            }
            state.phase = Phase::Initializing;
            // A superseded initialization reports cancellation to its waiters.
            mem::replace(&mut state.init, init.clone()).settle(Outcome::Cancelled);
            state.store.take()
        };

        debug!(generation, "collection initializing");
        let core = Arc::clone(self);
        let signal = init.clone();
        self.parts
            .background
            .schedule(Box::new(move || core.initialize(generation, stale, signal)));
        init
    }

    fn initialize(
        self: &Arc<Self>,
        generation: u64,
        stale: Option<Arc<PageStore<T>>>,
        init: Completion,
    ) {
        if let Some(store) = stale {
            store.dispose();
        }

        let built = self
            .parts
            .counter
            .fetch()
            .and_then(|count| Ok((count, self.build_store(count, generation)?)));

        let mut state = self.state.lock();
        let current = self.generation.load(Ordering::Acquire) == generation;
        if !current || state.phase == Phase::Disposed {
            drop(state);
            if let Ok((_, store)) = built {
                store.dispose();
            }
            init.settle(Outcome::Cancelled);
            return;
        }

        let (previous, outcome) = match built {
            Ok((count, store)) => {
                state.phase = Phase::Ready;
                state.store = Some(Arc::new(store));
                state.error = None;
                debug!(generation, count, "collection ready");
                (mem::replace(&mut state.count, count), Outcome::Fetched)
            }
            Err(error) => {
                warn!(generation, %error, "collection initialization failed");
                state.phase = Phase::Failed;
                state.error = Some(error.clone());
                (mem::replace(&mut state.count, 0), Outcome::Failed(error))
            }
        };
        let count = state.count;
        drop(state);

        self.emit(CollectionEvent::Reset);
        if previous != count {
            self.emit(CollectionEvent::CountChanged {
                old: previous,
                new: count,
            });
        }
        init.settle(outcome);
    }

    fn build_store(self: &Arc<Self>, count: usize, generation: u64) -> PagingResult<PageStore<T>> {
        let Parts {
            config,
            fetcher,
            background,
            ..
        } = &self.parts;
        let strategy = config.holding.strategy()?;

        let (factory, preload): (PageFactoryFn<T>, PageFactoryFn<T>) = match &self.provisional {
            None => {
                let eager = fetcher.clone();
                let deferred = fetcher.clone();
                let background = Arc::clone(background);
                (
                    Box::new(move |request: PageRequest| {
                        Page::new(request, FetchPlan::Eager(eager.clone()))
                    }),
                    Box::new(move |request: PageRequest| {
                        Page::new(request, FetchPlan::Deferred {
                            fetcher: deferred.clone(),
                            background: Arc::clone(&background),
                        })
                    }),
                )
            }
            Some(provisional) => {
                let plan = Arc::new({
                    let fetcher = fetcher.clone();
                    let background = Arc::clone(background);
                    let placeholders = provisional.placeholders.clone();
                    let notifier = self.page_notifier(generation);
                    move || FetchPlan::Placeholder {
                        fetcher: fetcher.clone(),
                        background: Arc::clone(&background),
                        placeholders: placeholders.clone(),
                        notifier: Some(notifier.clone()),
                    }
                });
                let preload_plan = Arc::clone(&plan);
                (
                    Box::new(move |request: PageRequest| Page::new(request, plan())),
                    Box::new(move |request: PageRequest| Page::new(request, preload_plan())),
                )
            }
        };

        match config.read_ahead {
            ReadAhead::Disabled => PageStore::new(
                config.page_size,
                count,
                factory,
                strategy,
                Arc::clone(background),
            ),
            ReadAhead::Preloading => PageStore::preloading(
                config.page_size,
                count,
                factory,
                preload,
                strategy,
                Arc::clone(background),
            ),
        }
    }

    /// Routes page events of the given store generation to the observers.
    ///
    /// Holds the core weakly: pages are owned by the store, which is owned by
    /// the core.
    fn page_notifier(self: &Arc<Self>, generation: u64) -> PageNotifier<T> {
        let core: Weak<Self> = Arc::downgrade(self);
        PageNotifier::new(Arc::clone(&self.parts.notifications), move |event| {
            if let Some(core) = core.upgrade() {
                core.on_page_event(generation, event);
            }
        })
    }

    fn on_page_event(&self, generation: u64, event: PageEvent<T>) {
        if self.generation.load(Ordering::Acquire) != generation {
            return;
        }
        match event {
            PageEvent::Arrived(arrival) => {
                let same = self.provisional.as_ref().map(|provisional| provisional.same);
                for (slot, (old, new)) in arrival.previous.into_iter().zip(arrival.current).enumerate() {
                    let unchanged = match (&old, same) {
                        (Some(old), Some(same)) => same(old, &new),
                        _ => false,
                    };
                    if !unchanged {
                        self.observers.notify(&CollectionEvent::Replace {
                            index: arrival.offset + slot,
                            old,
                            new,
                        });
                    }
                }
            }
            PageEvent::Failed {
                offset,
                size,
                error,
                ..
            } => self.observers.notify(&CollectionEvent::FetchFailed {
                offset,
                size,
                error,
            }),
        }
    }

    fn emit(self: &Arc<Self>, event: CollectionEvent<T>) {
        let core = Arc::clone(self);
        self.parts
            .notifications
            .schedule(Box::new(move || core.observers.notify(&event)));
    }

    /// Store and count of a ready collection, waiting for initialization.
    fn ready_store(&self) -> PagingResult<(Arc<PageStore<T>>, usize)> {
        loop {
            let init = {
                let state = self.state.lock();
                match (state.phase, &state.store) {
                    (Phase::Ready, Some(store)) => return Ok((Arc::clone(store), state.count)),
                    (Phase::Failed, _) => {
                        return Err(state.error.clone().unwrap_or(PagingError::Disposed));
                    }
                    (Phase::Disposed, _) => return Err(PagingError::Disposed),
                    _ => state.init.clone(),
                }
            };
            init.wait();
        }
    }

    /// Current store (if any), count and phase, without waiting.
    fn snapshot(&self) -> (Option<Arc<PageStore<T>>>, usize, Phase) {
        let state = self.state.lock();
        (state.store.clone(), state.count, state.phase)
    }

    fn placeholder(&self, index: usize) -> Option<T> {
        let provisional = self.provisional.as_ref()?;
        let (key, slot): (PageKey, usize) = locate(index, self.parts.config.page_size);
        Some(provisional.placeholders.make(key, slot))
    }

    fn ready(&self) -> Completion {
        self.state.lock().init.clone()
    }

    fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    fn is_disposed(&self) -> bool {
        self.phase() == Phase::Disposed
    }

    fn resident_pages(&self) -> usize {
        self.snapshot().0.map_or(0, |store| store.resident_pages())
    }

    /// Waits for an in-flight initialization to settle, then disposes the
    /// store. Safe to call more than once.
    fn dispose(&self) {
        let init = {
            let mut state = self.state.lock();
            if state.phase == Phase::Disposed {
                return;
            }
            state.phase = Phase::Disposed;
            state.init.clone()
        };
        init.wait();

        let store = self.state.lock().store.take();
        if let Some(store) = store {
            store.dispose();
        }
        debug!("collection disposed");
    }
}

/// Operations shared by both facades.
macro_rules! facade_common {
    () => {
        /// Re-fetches the count and replaces the page store. Returns a signal
        /// settling once the collection is ready again.
        ///
        /// Observers receive [`CollectionEvent::Reset`], followed by
        /// [`CollectionEvent::CountChanged`] if the count differs.
        pub fn reset(&self) -> Completion {
            self.core.reset()
        }

        /// Completion of the current initialization.
        pub fn ready(&self) -> Completion {
            self.core.ready()
        }

        /// Lifecycle phase.
        pub fn phase(&self) -> Phase {
            self.core.phase()
        }

        /// Registers an observer, invoked on the notification context.
        pub fn subscribe<F>(&self, observer: F) -> PagingResult<SubscriptionId>
        where
            F: Fn(&CollectionEvent<T>) + Send + Sync + 'static,
        {
            self.core.observers.subscribe(Arc::new(observer))
        }

        /// Removes an observer. Returns whether it was registered.
        pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
            self.core.observers.unsubscribe(id)
        }

        /// Notionally selected index. Bookkeeping only.
        pub fn selected_index(&self) -> Option<usize> {
            *self.core.selected.lock()
        }

        /// Updates the notionally selected index.
        pub fn set_selected_index(&self, index: Option<usize>) {
            *self.core.selected.lock() = index;
        }

        /// Number of items per page.
        pub fn page_size(&self) -> usize {
            self.core.parts.config.page_size
        }

        /// Number of pages currently resident.
        pub fn resident_pages(&self) -> usize {
            self.core.resident_pages()
        }

        /// Waits for any in-flight initialization, then disposes the page
        /// store and every resident page. Safe to call more than once.
        pub fn dispose(&self) {
            self.core.dispose()
        }
    };
}

pub(crate) use facade_common;
