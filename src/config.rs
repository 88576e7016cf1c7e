use {
    crate::{Hoarding, LeastRecentlyUsed, PageRemovalStrategy, PagingError, PagingResult},
    std::{fmt, sync::Arc},
};

/// Default number of items per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

type StrategyFactory = dyn Fn() -> Box<dyn PageRemovalStrategy> + Send + Sync;

/// Page-holding policy.
#[derive(Clone)]
pub enum PageHolding {
    /// Never evict.
    Hoarding,

    /// Keep at most `page_limit` pages, evicting the `removal_count` least
    /// recently used ones whenever the limit is exceeded.
    LeastRecentlyUsed {
        /// Maximum number of resident pages.
        page_limit: usize,
        /// Number of pages evicted at once.
        removal_count: usize,
    },

    /// Caller-provided strategy. Invoked once per page store, i.e. on
    /// construction and on every reset.
    Custom(Arc<StrategyFactory>),
}

impl PageHolding {
    /// Custom policy built by `factory`.
    pub fn custom<F, S>(factory: F) -> Self
    where
        F: Fn() -> S + Send + Sync + 'static,
        S: PageRemovalStrategy + 'static,
    {
        Self::Custom(Arc::new(move || -> Box<dyn PageRemovalStrategy> {
            Box::new(factory())
        }))
    }

    /// Instantiates a fresh strategy.
    pub fn strategy(&self) -> PagingResult<Box<dyn PageRemovalStrategy>> {
        Ok(match self {
            Self::Hoarding => Box::new(Hoarding),
            Self::LeastRecentlyUsed {
                page_limit,
                removal_count,
            } => Box::new(LeastRecentlyUsed::new(*page_limit, *removal_count)?),
            Self::Custom(factory) => factory(),
        })
    }
}

impl fmt::Debug for PageHolding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hoarding => f.write_str("Hoarding"),
            Self::LeastRecentlyUsed {
                page_limit,
                removal_count,
            } => f
                .debug_struct("LeastRecentlyUsed")
                .field("page_limit", page_limit)
                .field("removal_count", removal_count)
                .finish(),
            Self::Custom(_) => f.write_str("Custom"),
        }
    }
}

/// Read-ahead policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadAhead {
    /// Fetch only the pages that are read.
    #[default]
    Disabled,
    /// Also fetch both neighbours of every page that is read.
    Preloading,
}

/// Configuration of a paged collection.
#[derive(Debug, Clone)]
pub struct PagingConfig {
    /// Number of items per page.
    pub page_size: usize,

    /// Which pages stay resident.
    pub holding: PageHolding,

    /// Whether neighbouring pages are fetched ahead of need.
    pub read_ahead: ReadAhead,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            holding: PageHolding::Hoarding,
            read_ahead: ReadAhead::Disabled,
        }
    }
}

impl PagingConfig {
    /// Checks the configuration for consistency.
    ///
    /// With read-ahead, an LRU limit must leave room for the page being read
    /// and both its neighbours, otherwise pages would be evicted out from
    /// under an in-progress read-ahead.
    pub fn validate(&self) -> PagingResult<()> {
        if self.page_size == 0 {
            return Err(PagingError::Config("page size must be positive".into()));
        }

        if let PageHolding::LeastRecentlyUsed {
            page_limit,
            removal_count,
        } = self.holding
        {
            LeastRecentlyUsed::new(page_limit, removal_count)?;

            if self.read_ahead == ReadAhead::Preloading {
                if page_limit < 3 {
                    return Err(PagingError::Config(format!(
                        "page limit must be at least 3 with preloading, got {page_limit}"
                    )));
                }
                if removal_count > page_limit - 2 {
                    return Err(PagingError::Config(format!(
                        "removal count must be at most {} with preloading, got {removal_count}",
                        page_limit - 2
                    )));
                }
            }
        }
        Ok(())
    }
}
