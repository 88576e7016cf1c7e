use {
    super::{AsyncCollection, Parts, SyncCollection},
    crate::{
        Item,
        PagingConfig,
        PagingError,
        PagingResult,
        fetch::{CountFetcher, PageFetcher, Placeholders},
        sched::Scheduler,
    },
    std::{fmt, sync::Arc},
};

/// Assembles a collection from its configuration and collaborators.
///
/// Every collaborator is required; a missing one is reported by `build_*`
/// rather than on first use. Execution contexts have no default.
pub struct CollectionBuilder<T> {
    config: PagingConfig,
    fetcher: Option<PageFetcher<T>>,
    counter: Option<CountFetcher>,
    placeholders: Option<Placeholders<T>>,
    background: Option<Arc<dyn Scheduler>>,
    notifications: Option<Arc<dyn Scheduler>>,
}

impl<T: Item> CollectionBuilder<T> {
    /// Starts a builder with the given configuration.
    pub fn new(config: PagingConfig) -> Self {
        Self {
            config,
            fetcher: None,
            counter: None,
            placeholders: None,
            background: None,
            notifications: None,
        }
    }

    /// Backing store page fetcher.
    pub fn page_fetcher(mut self, fetcher: PageFetcher<T>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Backing store count fetcher.
    pub fn count_fetcher(mut self, counter: CountFetcher) -> Self {
        self.counter = Some(counter);
        self
    }

    /// Placeholder factory. Required by [`build_async`](Self::build_async).
    pub fn placeholders(mut self, placeholders: Placeholders<T>) -> Self {
        self.placeholders = Some(placeholders);
        self
    }

    /// Context running page and count fetches.
    pub fn background(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.background = Some(scheduler);
        self
    }

    /// Context delivering change notifications.
    pub fn notifications(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.notifications = Some(scheduler);
        self
    }

    fn parts(self) -> PagingResult<(Parts<T>, Option<Placeholders<T>>)> {
        self.config.validate()?;
        let parts = Parts {
            config: self.config,
            fetcher: self.fetcher.ok_or_else(|| missing("page fetcher"))?,
            counter: self.counter.ok_or_else(|| missing("count fetcher"))?,
            background: self.background.ok_or_else(|| missing("background scheduler"))?,
            notifications: self
                .notifications
                .ok_or_else(|| missing("notification scheduler"))?,
        };
        Ok((parts, self.placeholders))
    }

    /// Builds a collection with blocking reads and starts initializing it.
    pub fn build_sync(self) -> PagingResult<SyncCollection<T>> {
        let (parts, _) = self.parts()?;
        Ok(SyncCollection::new(parts))
    }

    /// Builds a collection handing out placeholders and starts initializing
    /// it.
    pub fn build_async(self) -> PagingResult<AsyncCollection<T>>
    where
        T: PartialEq,
    {
        let (parts, placeholders) = self.parts()?;
        let placeholders = placeholders.ok_or_else(|| missing("placeholder factory"))?;
        Ok(AsyncCollection::new(parts, placeholders))
    }
}

fn missing(what: &str) -> PagingError {
    PagingError::Config(format!("{what} is required"))
}

impl<T> fmt::Debug for CollectionBuilder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionBuilder")
            .field("config", &self.config)
            .field("fetcher", &self.fetcher)
            .field("counter", &self.counter)
            .field("placeholders", &self.placeholders.is_some())
            .field("background", &self.background.is_some())
            .field("notifications", &self.notifications.is_some())
            .finish()
    }
}
