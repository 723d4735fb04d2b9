//! Session-scoped, TTL-based in-memory cache.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::key::{Bucket, CacheKey, QueryParams};

/// Default validity window for cached data.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// A cached value with the time it was stored and the parameters that
/// produced it. `data` and `timestamp` are either both set or both empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheEntry {
  data: Option<Value>,
  timestamp: Option<i64>,
  params: Option<QueryParams>,
}

impl CacheEntry {
  fn stamped(data: Value, timestamp: i64, params: Option<QueryParams>) -> Self {
    Self {
      data: Some(data),
      timestamp: Some(timestamp),
      params,
    }
  }

  pub fn data(&self) -> Option<&Value> {
    self.data.as_ref()
  }

  pub fn into_data(self) -> Option<Value> {
    self.data
  }

  /// Epoch milliseconds at which the entry was written.
  pub fn timestamp(&self) -> Option<i64> {
    self.timestamp
  }

  pub fn params(&self) -> Option<&QueryParams> {
    self.params.as_ref()
  }

  /// Valid iff it holds data written less than `ttl` ago.
  pub fn is_valid(&self, now_millis: i64, ttl: Duration) -> bool {
    match (&self.data, self.timestamp) {
      (Some(_), Some(ts)) => now_millis - ts < ttl.as_millis() as i64,
      _ => false,
    }
  }
}

#[derive(Debug, Default)]
struct Buckets {
  collections: HashMap<String, CacheEntry>,
  personalized: HashMap<String, CacheEntry>,
  entities: HashMap<String, CacheEntry>,
  /// Entity keys from least to most recently used; only maintained when
  /// the entity bucket is bounded.
  entity_order: VecDeque<String>,
}

impl Buckets {
  fn bucket(&self, bucket: Bucket) -> &HashMap<String, CacheEntry> {
    match bucket {
      Bucket::Collection => &self.collections,
      Bucket::Personalized => &self.personalized,
      Bucket::Entity => &self.entities,
    }
  }

  fn bucket_mut(&mut self, bucket: Bucket) -> &mut HashMap<String, CacheEntry> {
    match bucket {
      Bucket::Collection => &mut self.collections,
      Bucket::Personalized => &mut self.personalized,
      Bucket::Entity => &mut self.entities,
    }
  }

  fn touch_entity(&mut self, hash: &str) {
    self.entity_order.retain(|k| k != hash);
    self.entity_order.push_back(hash.to_string());
  }
}

/// In-memory cache for fetched collections and single entities.
///
/// Expired entries are reported as misses but stay in place until they are
/// overwritten or the whole cache is cleared. The entity bucket can be
/// bounded with [`MemoryCache::with_max_entities`], in which case the least
/// recently used entity is evicted first.
pub struct MemoryCache {
  ttl: Duration,
  clock: Arc<dyn Clock>,
  max_entities: Option<usize>,
  buckets: Mutex<Buckets>,
}

impl Default for MemoryCache {
  fn default() -> Self {
    Self::new()
  }
}

impl MemoryCache {
  pub fn new() -> Self {
    Self {
      ttl: DEFAULT_TTL,
      clock: Arc::new(SystemClock),
      max_entities: None,
      buckets: Mutex::new(Buckets::default()),
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = ttl;
    self
  }

  pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
    self.clock = clock;
    self
  }

  pub fn with_max_entities(mut self, max_entities: Option<usize>) -> Self {
    self.max_entities = max_entities;
    self
  }

  pub fn ttl(&self) -> Duration {
    self.ttl
  }

  fn lock(&self) -> MutexGuard<'_, Buckets> {
    // Writes are single map operations, so a poisoned lock still holds
    // consistent data.
    self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Look up a still-valid entry.
  pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
    let now = self.clock.now_millis();
    let mut buckets = self.lock();

    let entry = buckets.bucket(key.bucket).get(&key.hash)?;
    if !entry.is_valid(now, self.ttl) {
      debug!(hash = %key.hash, "cache entry expired");
      return None;
    }
    let entry = entry.clone();

    if key.bucket == Bucket::Entity && self.max_entities.is_some() {
      buckets.touch_entity(&key.hash);
    }
    Some(entry)
  }

  /// Look up an entry regardless of its age.
  pub fn peek(&self, key: &CacheKey) -> Option<CacheEntry> {
    self.lock().bucket(key.bucket).get(&key.hash).cloned()
  }

  /// Store `data` under `key`, replacing whatever was there.
  pub fn put(&self, key: &CacheKey, data: Value, params: Option<QueryParams>) {
    let entry = CacheEntry::stamped(data, self.clock.now_millis(), params);
    let mut buckets = self.lock();
    buckets
      .bucket_mut(key.bucket)
      .insert(key.hash.clone(), entry);

    if key.bucket != Bucket::Entity {
      return;
    }
    if let Some(max) = self.max_entities {
      buckets.touch_entity(&key.hash);
      while buckets.entities.len() > max {
        match buckets.entity_order.pop_front() {
          Some(oldest) => {
            debug!(hash = %oldest, "evicting cached entity");
            buckets.entities.remove(&oldest);
          }
          None => break,
        }
      }
    }
  }

  /// Reset every bucket to its empty initial state.
  pub fn invalidate_all(&self) {
    let mut buckets = self.lock();
    *buckets = Buckets::default();
    debug!("cache cleared");
  }

  /// Number of stored entries (valid or not) in a bucket.
  pub fn len(&self, bucket: Bucket) -> usize {
    self.lock().bucket(bucket).len()
  }

  pub fn is_empty(&self) -> bool {
    let buckets = self.lock();
    buckets.collections.is_empty() && buckets.personalized.is_empty() && buckets.entities.is_empty()
  }
}
