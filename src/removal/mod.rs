mod hoarding;
mod lru;

pub use {hoarding::Hoarding, lru::LeastRecentlyUsed};
