//! Local persistence for offline support.
//!
//! - `RecordCache` keeps up to a fixed number of movie records in SQLite,
//!   evicting the least popular ones
//! - `ImageStore` keeps poster and backdrop files on disk
//! - `CacheResult` tells callers whether data is fresh or a cache fallback

mod images;
mod result;
mod storage;

pub use images::ImageStore;
pub use result::{CacheResult, DataSource};
pub use storage::{CacheStats, RecordCache, DEFAULT_MAX_RECORDS};

#[cfg(test)]
pub(crate) use images::sample_png;
