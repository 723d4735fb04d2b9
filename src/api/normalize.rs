//! Extraction of uniform item lists from heterogeneous response envelopes.
//!
//! The backend wraps lists in several ways:
//!
//! ```text
//! { "cities": [...], "pagination": {...} }
//! { "data": { "cities": [...], "pagination": {...} } }
//! { "success": true, "data": [...] }
//! [ ... ]
//! { "data": { "recommendations": [...], "userPreferences": {...},
//!             "meta": { "pagination": {...} } } }
//! ```
//!
//! Each shape is a [`ShapeMatcher`]; the normalizer tries them in order and
//! the first one that finds a list wins. New shapes are added by appending a
//! matcher rather than editing existing ones.

use serde_json::Value;
use tracing::debug;

use super::types::{Pagination, UserPreferences};

/// One step of a path into a response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment {
  /// A literal object field
  Field(&'static str),
  /// The resource's list field, e.g. "cities" or "jobs"
  Collection,
}

/// Recognizes one response envelope shape.
pub trait ShapeMatcher: Send + Sync {
  fn name(&self) -> &'static str;

  /// The item list, if `body` has this shape.
  fn extract<'a>(&self, body: &'a Value, collection: &str) -> Option<&'a Vec<Value>>;
}

/// Matches a list found at a fixed path.
#[derive(Debug, Clone)]
pub struct KeyPath {
  name: &'static str,
  path: &'static [Segment],
}

impl KeyPath {
  pub const fn new(name: &'static str, path: &'static [Segment]) -> Self {
    Self { name, path }
  }
}

fn walk<'a>(body: &'a Value, path: &[Segment], collection: &str) -> Option<&'a Value> {
  path.iter().try_fold(body, |node, segment| match segment {
    Segment::Field(field) => node.get(*field),
    Segment::Collection => node.get(collection),
  })
}

impl ShapeMatcher for KeyPath {
  fn name(&self) -> &'static str {
    self.name
  }

  fn extract<'a>(&self, body: &'a Value, collection: &str) -> Option<&'a Vec<Value>> {
    walk(body, self.path, collection)?.as_array()
  }
}

pub const TOP_LEVEL: KeyPath = KeyPath::new("top-level", &[Segment::Collection]);
pub const NESTED_DATA: KeyPath =
  KeyPath::new("nested-data", &[Segment::Field("data"), Segment::Collection]);
pub const BARE_LIST: KeyPath = KeyPath::new("bare-list", &[]);
pub const DATA_LIST: KeyPath = KeyPath::new("data-list", &[Segment::Field("data")]);
pub const RECOMMENDATIONS: KeyPath = KeyPath::new(
  "recommendations",
  &[Segment::Field("data"), Segment::Field("recommendations")],
);

const STANDARD_PAGINATION: &[&[&str]] = &[&["data", "pagination"], &["pagination"]];
const PERSONALIZED_PAGINATION: &[&[&str]] = &[
  &["data", "meta", "pagination"],
  &["meta", "pagination"],
  &["data", "pagination"],
  &["pagination"],
];

/// A normalized page of raw items.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
  pub items: Vec<Value>,
  pub pagination: Option<Pagination>,
  pub user_preferences: Option<UserPreferences>,
}

/// Ordered list of shape matchers plus the paths pagination may live at.
pub struct ResponseNormalizer {
  matchers: Vec<Box<dyn ShapeMatcher>>,
  pagination_paths: &'static [&'static [&'static str]],
}

impl ResponseNormalizer {
  /// Shapes used by the plain list endpoints.
  pub fn standard() -> Self {
    Self {
      matchers: vec![
        Box::new(TOP_LEVEL),
        Box::new(NESTED_DATA),
        Box::new(BARE_LIST),
        Box::new(DATA_LIST),
      ],
      pagination_paths: STANDARD_PAGINATION,
    }
  }

  /// Shapes used by personalized endpoints, falling back to the standard ones.
  pub fn personalized() -> Self {
    let mut normalizer = Self::standard();
    normalizer.matchers.insert(0, Box::new(RECOMMENDATIONS));
    normalizer.pagination_paths = PERSONALIZED_PAGINATION;
    normalizer
  }

  pub fn with_matcher(mut self, matcher: impl ShapeMatcher + 'static) -> Self {
    self.matchers.push(Box::new(matcher));
    self
  }

  /// Extract the item list. Unknown shapes yield an empty list.
  pub fn items(&self, body: &Value, collection: &str) -> Vec<Value> {
    for matcher in &self.matchers {
      if let Some(items) = matcher.extract(body, collection) {
        debug!(
          matcher = matcher.name(),
          count = items.len(),
          collection,
          "extracted items from response"
        );
        return items.clone();
      }
    }
    debug!(collection, "no items found in response, returning empty list");
    Vec::new()
  }

  /// Pagination block, from the first configured path that deserializes.
  pub fn pagination(&self, body: &Value) -> Option<Pagination> {
    self.pagination_paths.iter().find_map(|path| {
      let node = path.iter().try_fold(body, |node, field| node.get(*field))?;
      serde_json::from_value(node.clone()).ok()
    })
  }

  /// The `userPreferences` object sent next to personalized results.
  pub fn user_preferences(&self, body: &Value) -> Option<UserPreferences> {
    const PATHS: &[&[&str]] = &[
      &["data", "userPreferences"],
      &["data", "user_preferences"],
      &["userPreferences"],
      &["user_preferences"],
    ];
    PATHS.iter().find_map(|path| {
      let node = path.iter().try_fold(body, |node, field| node.get(*field))?;
      serde_json::from_value(node.clone()).ok()
    })
  }

  pub fn page(&self, body: &Value, collection: &str) -> RawPage {
    RawPage {
      items: self.items(body, collection),
      pagination: self.pagination(body),
      user_preferences: self.user_preferences(body),
    }
  }

  /// Extract a single record: `data.<entity>`, then `data`, then the body
  /// itself. Empty objects and bodies without an `id` count as no record.
  pub fn entity(&self, body: &Value, entity_field: &str) -> Option<Value> {
    let candidates = [
      body.get("data").and_then(|d| d.get(entity_field)),
      body.get("data"),
      Some(body).filter(|b| b.get("id").is_some()),
    ];
    candidates
      .into_iter()
      .flatten()
      .find(|v| v.as_object().is_some_and(|o| !o.is_empty()))
      .cloned()
  }
}

impl Default for ResponseNormalizer {
  fn default() -> Self {
    Self::standard()
  }
}
