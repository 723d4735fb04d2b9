//! Caching layer for fetched collections and entities.
//!
//! This module provides:
//! - Canonical query keys hashed into fixed-length cache keys
//! - A TTL-based memory cache with separate collection, personalized and
//!   entity buckets
//! - Request coalescing so identical concurrent fetches share one call

pub mod clock;
pub mod inflight;
pub mod key;
pub mod memory;
pub mod traits;

pub use clock::{Clock, ManualClock, SystemClock};
pub use inflight::InFlight;
pub use key::{Bucket, CacheKey, QueryKey, QueryParams, Resource};
pub use memory::{CacheEntry, MemoryCache, DEFAULT_TTL};
pub use traits::{CacheResult, CacheSource, Cacheable};
