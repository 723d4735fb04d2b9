//! Cache keys: canonical query parameters and per-resource query descriptors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Filter and pagination parameters sent with a request.
///
/// Keys are kept sorted so that two parameter sets with the same entries
/// always serialize to the same bytes, whatever order they were built in.
/// Null values are dropped, mirroring how the HTTP layer omits them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParams(BTreeMap<String, Value>);

impl QueryParams {
  pub fn new() -> Self {
    Self::default()
  }

  /// Builder-style insert.
  pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
    self.insert(key, value);
    self
  }

  pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
    let key = key.into();
    match value.into() {
      Value::Null => {
        self.0.remove(&key);
      }
      value => {
        self.0.insert(key, value);
      }
    }
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  pub fn get_u64(&self, key: &str) -> Option<u64> {
    match self.0.get(key)? {
      Value::Number(n) => n.as_u64(),
      Value::String(s) => s.parse().ok(),
      _ => None,
    }
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// A copy of `self` with every entry of `other` applied on top.
  pub fn merged(&self, other: &QueryParams) -> QueryParams {
    let mut merged = self.clone();
    for (k, v) in &other.0 {
      merged.0.insert(k.clone(), v.clone());
    }
    merged
  }

  /// Stable serialization used for cache-equivalence.
  pub fn canonical(&self) -> String {
    // A string-keyed map of JSON values always serializes.
    serde_json::to_string(&self.0).unwrap_or_default()
  }

  /// Pairs for the URL query string. Lists are comma-joined.
  pub fn to_query_pairs(&self) -> Vec<(String, String)> {
    self
      .0
      .iter()
      .map(|(k, v)| (k.clone(), query_value(v)))
      .collect()
  }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for QueryParams {
  fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
    let mut params = QueryParams::new();
    for (k, v) in iter {
      params.insert(k, v);
    }
    params
  }
}

fn query_value(value: &Value) -> String {
  match value {
    Value::String(s) => s.clone(),
    Value::Array(items) => items.iter().map(query_value).collect::<Vec<_>>().join(","),
    other => other.to_string(),
  }
}

/// Resource families served by the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
  Cities,
  Jobs,
  User,
}

impl Resource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Resource::Cities => "cities",
      Resource::Jobs => "jobs",
      Resource::User => "user",
    }
  }
}

impl fmt::Display for Resource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Storage partitions inside the memory cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
  Collection,
  Personalized,
  Entity,
}

/// Fully-resolved cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
  pub bucket: Bucket,
  pub hash: String,
}

/// Query descriptors for cacheable API calls.
#[derive(Clone, Debug)]
pub enum QueryKey {
  /// A list endpoint such as `/cities` or `/jobs/category/design`
  Collection {
    resource: Resource,
    endpoint: String,
    params: QueryParams,
  },
  /// Free-text search, keyed by `{query, ...params}`
  Search {
    resource: Resource,
    query: String,
    params: QueryParams,
  },
  /// Ranked results for the signed-in user
  Personalized {
    resource: Resource,
    params: QueryParams,
  },
  /// A single entity by id, slug or another stable field
  Entity {
    resource: Resource,
    field: &'static str,
    value: String,
  },
}

impl QueryKey {
  pub fn bucket(&self) -> Bucket {
    match self {
      Self::Collection { .. } | Self::Search { .. } => Bucket::Collection,
      Self::Personalized { .. } => Bucket::Personalized,
      Self::Entity { .. } => Bucket::Entity,
    }
  }

  fn hash_input(&self) -> String {
    match self {
      Self::Collection {
        resource,
        endpoint,
        params,
      } => format!("{}:collection:{}:{}", resource, endpoint, params.canonical()),
      Self::Search {
        resource,
        query,
        params,
      } => format!("{}:search:{:?}:{}", resource, query, params.canonical()),
      Self::Personalized { resource, params } => {
        format!("{}:personalized:{}", resource, params.canonical())
      }
      Self::Entity {
        resource,
        field,
        value,
      } => format!("{}:{}:{}", resource, field, value),
    }
  }

  /// SHA-256 of the canonical key text for stable, fixed-length keys.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.hash_input().as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn cache_key(&self) -> CacheKey {
    CacheKey {
      bucket: self.bucket(),
      hash: self.cache_hash(),
    }
  }

  pub fn description(&self) -> String {
    match self {
      Self::Collection {
        resource,
        endpoint,
        params,
      } => {
        if params.is_empty() {
          format!("{} {}", resource, endpoint)
        } else {
          format!("{} {} {}", resource, endpoint, params.canonical())
        }
      }
      Self::Search {
        resource, query, ..
      } => format!("{} search '{}'", resource, query),
      Self::Personalized { resource, .. } => format!("personalized {}", resource),
      Self::Entity {
        resource,
        field,
        value,
      } => format!("{} {}={}", resource, field, value),
    }
  }
}
