//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Serialize};

use crate::api::types::{City, EntityId, Job};

use super::key::{QueryKey, Resource};

/// Trait for entities that can be cached.
///
/// Every entity is addressable by id and, when it has one, by slug.
pub trait Cacheable: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
  /// Stable identity used for de-duplication and the entity sub-cache
  fn id(&self) -> &EntityId;

  /// Alternate stable key
  fn slug(&self) -> Option<&str> {
    None
  }

  /// Resource family this entity belongs to
  fn resource() -> Resource;

  /// Name of the list field in response envelopes (e.g. "cities")
  fn collection_field() -> &'static str;

  /// Name of the single-record field in response envelopes (e.g. "city")
  fn entity_field() -> &'static str;

  /// Label used in user-facing messages (e.g. "City")
  fn label() -> &'static str;

  /// Every entity-bucket key this record can be looked up by.
  fn entity_keys(&self) -> Vec<QueryKey> {
    let mut keys = vec![QueryKey::Entity {
      resource: Self::resource(),
      field: "id",
      value: self.id().to_string(),
    }];
    if let Some(slug) = self.slug() {
      keys.push(QueryKey::Entity {
        resource: Self::resource(),
        field: "slug",
        value: slug.to_string(),
      });
    }
    keys
  }
}

impl Cacheable for City {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn slug(&self) -> Option<&str> {
    self.slug.as_deref()
  }

  fn resource() -> Resource {
    Resource::Cities
  }

  fn collection_field() -> &'static str {
    "cities"
  }

  fn entity_field() -> &'static str {
    "city"
  }

  fn label() -> &'static str {
    "City"
  }
}

impl Cacheable for Job {
  fn id(&self) -> &EntityId {
    &self.id
  }

  fn slug(&self) -> Option<&str> {
    self.slug.as_deref()
  }

  fn resource() -> Resource {
    Resource::Jobs
  }

  fn collection_field() -> &'static str {
    "jobs"
  }

  fn entity_field() -> &'static str {
    "job"
  }

  fn label() -> &'static str {
    "Job"
  }
}

/// Result from a cache operation, including data and where it came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the data was cached (epoch ms), if it came from the cache
  pub cached_at: Option<i64>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      cached_at: None,
    }
  }

  pub fn from_cache(data: T, cached_at: Option<i64>) -> Self {
    Self {
      data,
      source: CacheSource::Cache,
      cached_at,
    }
  }

  pub fn is_cached(&self) -> bool {
    self.source == CacheSource::Cache
  }
}

/// Indicates where data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from the network
  Network,
  /// Still-valid data from the memory cache
  Cache,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_city_entity_keys() {
    let city: City = serde_json::from_value(json!({"id": 4, "slug": "tallinn"})).unwrap();
    let keys = city.entity_keys();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0].description(), "cities id=4");
    assert_eq!(keys[1].description(), "cities slug=tallinn");
  }

  #[test]
  fn test_job_without_slug() {
    let job: Job = serde_json::from_value(json!({"id": 9})).unwrap();
    assert_eq!(job.entity_keys().len(), 1);
  }
}
