use {
    crate::{
        Item,
        PageAccess,
        PageKey,
        PageRemovalStrategy,
        PagingError,
        PagingResult,
        page::{Page, PageRequest, ReleaseToken},
        sched::Scheduler,
        util::Sequence,
    },
    parking_lot::{Mutex, RwLock},
    std::{
        collections::{HashMap, hash_map::Entry},
        fmt,
        sync::{
            Arc,
            atomic::{AtomicBool, Ordering},
        },
    },
    tracing::{debug, error, trace},
};

/// How many times a read is retried when its page gets disposed underneath
/// it (evicted or reset) before the disposal is reported.
const MAX_RESOLVE_ATTEMPTS: usize = 16;

/// Creates pages on a store miss.
pub trait PageFactory<T>: Send + Sync {
    /// Builds the page described by `request`. The page must not start
    /// fetching yet.
    fn create(&self, request: PageRequest) -> Page<T>;
}

impl<T, F> PageFactory<T> for F
where
    F: Fn(PageRequest) -> Page<T> + Send + Sync,
{
    fn create(&self, request: PageRequest) -> Page<T> {
        self(request)
    }
}

/// Page key and slot of a global index.
///
/// `key * page_size + slot == index` for every index.
pub fn locate(index: usize, page_size: usize) -> (PageKey, usize) {
    (index / page_size, index % page_size)
}

/// Item count together with the derived page count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Shape {
    count: usize,
    page_count: usize,
}

impl Shape {
    fn new(count: usize, page_size: usize) -> Self {
        Self {
            count,
            page_count: count.div_ceil(page_size),
        }
    }
}

type PageMap<T> = HashMap<PageKey, Arc<Page<T>>>;

enum Lookup<T> {
    /// Page to hand out.
    Live(Arc<Page<T>>),
    /// Evicted page whose fetch has not settled yet.
    Retiring(Arc<Page<T>>),
}

/// Owns the resident pages of one collection.
///
/// Pages are created on first access through the injected factory, at most one
/// per key at a time: concurrent readers of a page being fetched share that
/// fetch. Every access is reported to the removal strategy, whose eviction
/// batches are disposed on the background context.
///
/// A preloading store additionally creates the neighbours of every accessed
/// page through a separate factory, reporting them as
/// [`AccessKind::Preload`](crate::AccessKind::Preload).
pub struct PageStore<T> {
    page_size: usize,
    shape: RwLock<Shape>,
    pages: Arc<Mutex<PageMap<T>>>,
    factory: Box<dyn PageFactory<T>>,
    preload: Option<Box<dyn PageFactory<T>>>,
    strategy: Mutex<Option<Box<dyn PageRemovalStrategy>>>,
    background: Arc<dyn Scheduler>,
    ids: Sequence,
    disposing: AtomicBool,
    faulted: AtomicBool,
}

impl<T: Item> PageStore<T> {
    /// Creates a store without read-ahead.
    pub fn new(
        page_size: usize,
        count: usize,
        factory: impl PageFactory<T> + 'static,
        strategy: Box<dyn PageRemovalStrategy>,
        background: Arc<dyn Scheduler>,
    ) -> PagingResult<Self> {
        Self::build(page_size, count, Box::new(factory), None, strategy, background)
    }

    /// Creates a store reading the neighbours of every accessed page ahead,
    /// using `preload` to create them.
    pub fn preloading(
        page_size: usize,
        count: usize,
        factory: impl PageFactory<T> + 'static,
        preload: impl PageFactory<T> + 'static,
        strategy: Box<dyn PageRemovalStrategy>,
        background: Arc<dyn Scheduler>,
    ) -> PagingResult<Self> {
        Self::build(
            page_size,
            count,
            Box::new(factory),
            Some(Box::new(preload)),
            strategy,
            background,
        )
    }

    fn build(
        page_size: usize,
        count: usize,
        factory: Box<dyn PageFactory<T>>,
        preload: Option<Box<dyn PageFactory<T>>>,
        strategy: Box<dyn PageRemovalStrategy>,
        background: Arc<dyn Scheduler>,
    ) -> PagingResult<Self> {
        if page_size == 0 {
            return Err(PagingError::Config("page size must be positive".into()));
        }
        let shape = Shape::new(count, page_size);
        debug!(page_size, count, page_count = shape.page_count, "page store created");
        Ok(Self {
            page_size,
            shape: RwLock::new(shape),
            pages: Arc::new(Mutex::new(HashMap::new())),
            factory,
            preload,
            strategy: Mutex::new(Some(strategy)),
            background,
            ids: Sequence::new(),
            disposing: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        })
    }

    /// Item at global `index`.
    ///
    /// If the page is disposed while the read waits on it, the read starts
    /// over with a freshly created page: disposal is only reported when it is
    /// the store itself going away.
    pub fn index(&self, index: usize) -> PagingResult<T> {
        for _ in 0..MAX_RESOLVE_ATTEMPTS {
            let (page, slot) = self.page(index)?;
            match page.index(slot) {
                Err(PagingError::Disposed) if !self.is_disposing() => {
                    trace!(index, page = page.key(), "page disposed under reader, retrying");
                }
                res => return res,
            }
        }
        Err(PagingError::Disposed)
    }

    /// Resolves the page holding global `index`, creating and starting it on
    /// a miss, and returns it together with the slot of `index` within it.
    pub fn page(&self, index: usize) -> PagingResult<(Arc<Page<T>>, usize)> {
        if self.is_disposing() {
            return Err(PagingError::Disposed);
        }
        if self.faulted.load(Ordering::Acquire) {
            return Err(PagingError::StoreFaulted);
        }

        // Held across resolution so that a concurrent reset cannot slip
        // between sizing a page and publishing it.
        let shape = self.shape.read();
        if index >= shape.count {
            return Err(PagingError::OutOfRange {
                index,
                len: shape.count,
            });
        }

        let (key, slot) = locate(index, self.page_size);
        self.record(PageAccess::read(key, slot))?;
        let page = self.resolve(key, &*self.factory, *shape)?;

        if let Some(preload) = &self.preload {
            if key > 0 {
                self.resolve(key - 1, &**preload, *shape)?;
                self.record(PageAccess::preload(key - 1))?;
            }
            if key + 1 < shape.page_count {
                self.resolve(key + 1, &**preload, *shape)?;
                self.record(PageAccess::preload(key + 1))?;
            }
        }

        Ok((page, slot))
    }

    fn record(&self, access: PageAccess) -> PagingResult<()> {
        trace!(page = access.key, slot = access.slot(), "page access");
        let removal = {
            let mut strategy = self.strategy.lock();
            match strategy.as_mut() {
                Some(strategy) => strategy.on_access(access),
                None => return Err(PagingError::Disposed),
            }
        };

        match removal {
            Ok(None) => Ok(()),
            Ok(Some(keys)) => {
                self.evict(&keys);
                Ok(())
            }
            Err(cause) => {
                self.faulted.store(true, Ordering::Release);
                error!(%cause, "page removal strategy failed");
                Err(PagingError::RemovalStrategy(Arc::from(cause)))
            }
        }
    }

    fn resolve(
        &self,
        key: PageKey,
        factory: &dyn PageFactory<T>,
        shape: Shape,
    ) -> PagingResult<Arc<Page<T>>> {
        loop {
            match self.lookup(key, factory, shape)? {
                Lookup::Live(page) => {
                    // Idempotent: only the first caller actually starts the fetch.
                    page.start();
                    return Ok(page);
                }
                Lookup::Retiring(page) => {
                    // Its fetch is still in flight, a replacement would fetch
                    // the same key twice.
                    trace!(page = key, id = page.id(), "waiting for retiring page");
                    page.completion().wait();
                }
            }
        }
    }

    fn lookup(&self, key: PageKey, factory: &dyn PageFactory<T>, shape: Shape) -> PagingResult<Lookup<T>> {
        let mut pages = self.pages.lock();
        let page = match pages.entry(key) {
            Entry::Occupied(mut entry) => {
                let current = entry.get();
                if !current.is_retiring() {
                    return Ok(Lookup::Live(Arc::clone(current)));
                }
                if !current.completion().is_settled() {
                    return Ok(Lookup::Retiring(Arc::clone(current)));
                }
                // The retired page releases its entry only if it still owns it.
                let page = self.create(key, factory, shape)?;
                entry.insert(Arc::clone(&page));
                page
            }
            Entry::Vacant(entry) => {
                let page = self.create(key, factory, shape)?;
                entry.insert(Arc::clone(&page));
                page
            }
        };
        Ok(Lookup::Live(page))
    }

    fn create(&self, key: PageKey, factory: &dyn PageFactory<T>, shape: Shape) -> PagingResult<Arc<Page<T>>> {
        let id = self.ids.next().ok_or(PagingError::SequenceExhausted)?;
        let offset = key * self.page_size;
        let size = self.page_size.min(shape.count - offset);
        Ok(Arc::new(factory.create(PageRequest {
            id,
            key,
            offset,
            size,
            release: self.release_token(key, id),
        })))
    }

    /// Removes the map entry of page `id` once it is disposed, unless the key
    /// has meanwhile been taken over by a newer page.
    fn release_token(&self, key: PageKey, id: u64) -> ReleaseToken {
        let pages = Arc::downgrade(&self.pages);
        Box::new(move || {
            let Some(pages) = pages.upgrade() else {
                return;
            };
            let mut pages = pages.lock();
            if pages.get(&key).is_some_and(|page| page.id() == id) {
                pages.remove(&key);
            }
        })
    }

    /// Retires the resident pages among `keys` and disposes them on the
    /// background context. Their entries stay until disposal releases them.
    fn evict(&self, keys: &[PageKey]) {
        let evicted = {
            let pages = self.pages.lock();
            keys.iter()
                .filter_map(|key| pages.get(key))
                .filter(|page| !page.is_retiring())
                .map(|page| {
                    page.retire();
                    Arc::clone(page)
                })
                .collect::<Vec<_>>()
        };

        for page in evicted {
            debug!(page = page.key(), id = page.id(), "evicting page");
            self.background.schedule(Box::new(move || page.dispose()));
        }
    }

    fn drain(&self) -> Vec<Arc<Page<T>>> {
        self.pages.lock().drain().map(|(_, page)| page).collect()
    }

    /// Changes the item count and disposes every resident page.
    ///
    /// Nothing is fetched again until the next access.
    pub fn reset(&self, count: usize) {
        let drained = {
            let mut shape = self.shape.write();
            *shape = Shape::new(count, self.page_size);
            // Readers record accesses under the shape lock too, so none can
            // slip in between draining and forgetting.
            if let Some(strategy) = self.strategy.lock().as_mut() {
                strategy.on_reset();
            }
            self.drain()
        };

        debug!(count, pages = drained.len(), "page store reset");
        for page in drained {
            page.dispose();
        }
    }

    /// Disposes every resident page and stops reporting accesses.
    ///
    /// Blocks until every page has been disposed. Safe to call more than once.
    pub fn dispose(&self) {
        if self.disposing.swap(true, Ordering::AcqRel) {
            return;
        }

        let drained = self.drain();
        debug!(pages = drained.len(), "disposing page store");
        for page in drained {
            page.dispose();
        }
        self.strategy.lock().take();
    }

    /// Number of slots per page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Number of addressable items.
    pub fn count(&self) -> usize {
        self.shape.read().count
    }

    /// Number of pages covering all items.
    pub fn page_count(&self) -> usize {
        self.shape.read().page_count
    }

    /// Number of resident pages, counting evicted ones not yet disposed.
    pub fn resident_pages(&self) -> usize {
        self.pages.lock().len()
    }

    /// Keys of resident pages, in ascending order.
    pub fn resident_keys(&self) -> Vec<PageKey> {
        let mut keys = self.pages.lock().keys().copied().collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    /// Whether neighbouring pages are read ahead.
    pub fn is_preloading(&self) -> bool {
        self.preload.is_some()
    }

    /// Whether the removal strategy failed, rendering the store unusable.
    pub fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    fn is_disposing(&self) -> bool {
        self.disposing.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for PageStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageStore")
            .field("page_size", &self.page_size)
            .field("shape", &*self.shape.read())
            .field("resident", &self.pages.lock().len())
            .field("preloading", &self.preload.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use {super::*, proptest::prelude::*};

    #[test]
    fn shape_rounds_up() {
        assert_eq!(Shape::new(0, 10).page_count, 0);
        assert_eq!(Shape::new(1, 10).page_count, 1);
        assert_eq!(Shape::new(10, 10).page_count, 1);
        assert_eq!(Shape::new(6969, 10).page_count, 697);
    }

    #[test]
    fn locate_scenario() {
        assert_eq!(locate(69, 10), (6, 9));
        assert_eq!(locate(0, 100), (0, 0));
    }

    proptest! {
        #[test]
        fn locate_recomposes(index in 0usize..1_000_000, page_size in 1usize..1_000) {
            let (key, slot) = locate(index, page_size);
            prop_assert!(slot < page_size);
            prop_assert_eq!(key * page_size + slot, index);
        }
    }
}
