//! Serde types matching the city/job API payloads.
//!
//! Backend records are loosely shaped, so every struct keeps the fields the
//! client works with and collects the rest in a flattened `extra` map.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Re-serialize a value through JSON to convert between compatible types.
pub fn reserialize<T: DeserializeOwned>(value: impl Serialize) -> serde_json::Result<T> {
  serde_json::from_value(serde_json::to_value(value)?)
}

/// Stable entity identity; the backend uses integers for most records but
/// strings for some.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
  Int(i64),
  Str(String),
}

impl fmt::Display for EntityId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      EntityId::Int(id) => write!(f, "{}", id),
      EntityId::Str(id) => f.write_str(id),
    }
  }
}

impl From<i64> for EntityId {
  fn from(id: i64) -> Self {
    EntityId::Int(id)
  }
}

impl From<&str> for EntityId {
  fn from(id: &str) -> Self {
    match id.parse::<i64>() {
      Ok(n) => EntityId::Int(n),
      Err(_) => EntityId::Str(id.to_string()),
    }
  }
}

/// Server-sourced pagination metadata.
///
/// Field aliases cover the differently-named blocks the backend emits for
/// cities (`page`, `limit`, `total`) and jobs (`per_page`, `total_jobs`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Pagination {
  #[serde(default, alias = "page")]
  pub current_page: u64,
  #[serde(default)]
  pub total_pages: u64,
  #[serde(default, alias = "total", alias = "total_jobs", alias = "total_cities")]
  pub total_items: u64,
  #[serde(default, alias = "per_page", alias = "limit")]
  pub items_per_page: u64,
  #[serde(default, alias = "has_next")]
  pub has_next_page: bool,
  #[serde(default, alias = "has_prev")]
  pub has_prev_page: bool,
}

impl Pagination {
  /// Build pagination from a bare item total, as the jobs endpoints only
  /// report `total_jobs`.
  pub fn from_total(total_items: u64, items_per_page: u64, current_page: u64) -> Self {
    let per_page = items_per_page.max(1);
    let total_pages = total_items.div_ceil(per_page);
    let current_page = current_page.max(1);
    Self {
      current_page,
      total_pages,
      total_items,
      items_per_page: per_page,
      has_next_page: current_page < total_pages,
      has_prev_page: current_page > 1,
    }
  }
}

/// City record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct City {
  pub id: EntityId,
  #[serde(default)]
  pub slug: Option<String>,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub country: String,
  #[serde(default, alias = "climate_summary")]
  pub climate: Option<String>,
  /// Monthly cost of living in USD
  #[serde(default, alias = "monthly_cost_usd")]
  pub cost: Option<f64>,
  /// Average internet speed in Mbps
  #[serde(default, alias = "internet_speed", alias = "internet_speed_mbps")]
  pub internet: Option<f64>,
  #[serde(default, alias = "safety_score")]
  pub safety: Option<f64>,
  #[serde(default)]
  pub score: Option<f64>,
  #[serde(default)]
  pub lifestyle_tags: Option<Value>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl City {
  /// The server score, or a weighted blend of cost, internet and safety
  /// when the backend did not provide one.
  pub fn effective_score(&self) -> Option<f64> {
    if self.score.is_some() {
      return self.score;
    }

    // (weight, normalized 0..=100 value)
    let parts: Vec<(f64, f64)> = [
      self
        .cost
        .map(|c| (0.4, ((3000.0 - c) / 3000.0).clamp(0.0, 1.0) * 100.0)),
      self.internet.map(|i| (0.3, (i / 200.0).clamp(0.0, 1.0) * 100.0)),
      self.safety.map(|s| (0.3, s.clamp(0.0, 100.0))),
    ]
    .into_iter()
    .flatten()
    .collect();

    let total_weight: f64 = parts.iter().map(|(w, _)| w).sum();
    if total_weight == 0.0 {
      return None;
    }
    let weighted: f64 = parts.iter().map(|(w, v)| w * v).sum();
    Some((weighted / total_weight).round())
  }

  /// Lifestyle tags, which arrive either as a list or as a JSON-encoded string.
  pub fn tags(&self) -> Vec<String> {
    match &self.lifestyle_tags {
      Some(Value::Array(items)) => items
        .iter()
        .filter_map(|v| v.as_str().map(String::from))
        .collect(),
      Some(Value::String(raw)) => serde_json::from_str::<Vec<String>>(raw).unwrap_or_default(),
      _ => Vec::new(),
    }
  }
}

/// Job posting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
  pub id: EntityId,
  #[serde(default)]
  pub slug: Option<String>,
  #[serde(default)]
  pub title: String,
  #[serde(default, alias = "company")]
  pub company_name: String,
  #[serde(default)]
  pub category: Option<String>,
  #[serde(default)]
  pub job_type: Option<String>,
  #[serde(default, alias = "location")]
  pub candidate_required_location: Option<String>,
  /// Free-form salary text such as "$40,000 - $60,000"
  #[serde(default)]
  pub salary: Option<String>,
  #[serde(default)]
  pub publication_date: Option<String>,
  #[serde(default, alias = "apply_url")]
  pub url: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Job {
  pub fn salary_min(&self) -> Option<u64> {
    self.salary.as_deref().and_then(|s| salary_numbers(s).first().copied())
  }

  pub fn salary_max(&self) -> Option<u64> {
    self.salary.as_deref().and_then(|s| salary_numbers(s).get(1).copied())
  }

  /// Published within the last seven days.
  pub fn is_recent(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
    self
      .publication_date
      .as_deref()
      .and_then(|d| chrono::DateTime::parse_from_rfc3339(d).ok())
      .map(|published| now.signed_duration_since(published) <= chrono::Duration::days(7))
      .unwrap_or(false)
  }
}

static SALARY_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\d,]+").expect("valid regex"));

/// Digit groups in a salary string, with thousands separators removed.
fn salary_numbers(text: &str) -> Vec<u64> {
  SALARY_NUMBER
    .find_iter(text)
    .filter_map(|m| m.as_str().replace(',', "").parse().ok())
    .collect()
}

/// Job category with the number of open jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobCategory {
  #[serde(default)]
  pub id: Option<EntityId>,
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub slug: Option<String>,
  #[serde(default)]
  pub job_count: u64,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl JobCategory {
  /// Path segment used by `/jobs/category/:slug`
  pub fn path_slug(&self) -> &str {
    self.slug.as_deref().unwrap_or(&self.name)
  }
}

/// Preferences returned alongside personalized results and stored on the
/// user profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserPreferences {
  #[serde(default)]
  pub preferred_climate: Option<String>,
  #[serde(default)]
  pub monthly_budget_min_usd: Option<f64>,
  #[serde(default)]
  pub monthly_budget_max_usd: Option<f64>,
  #[serde(default)]
  pub internet_speed_requirement: Option<String>,
  #[serde(default)]
  pub lifestyle_priorities: Vec<String>,
  #[serde(default)]
  pub preferred_regions: Option<Value>,
  #[serde(default)]
  pub work_style: Option<String>,
}

/// Saved job with its application status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedJob {
  #[serde(alias = "jobId")]
  pub job_id: EntityId,
  #[serde(default = "default_saved_status")]
  pub status: String,
}

pub const DEFAULT_SAVED_STATUS: &str = "Interested";

fn default_saved_status() -> String {
  DEFAULT_SAVED_STATUS.to_string()
}

/// Authenticated user's profile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
  #[serde(default)]
  pub id: Option<EntityId>,
  #[serde(default)]
  pub email: Option<String>,
  #[serde(default)]
  pub display_name: Option<String>,
  #[serde(default)]
  pub created_at: Option<String>,
  #[serde(default)]
  pub job_title: Option<String>,
  #[serde(default)]
  pub target_salary_usd: Option<f64>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl UserProfile {
  /// Preference fields live directly on the profile record.
  pub fn preferences(&self) -> UserPreferences {
    reserialize(&self.extra).unwrap_or_default()
  }
}

/// A ranked collection scoped to the authenticated user's preferences.
#[derive(Debug, Clone, PartialEq)]
pub struct Personalized<T> {
  pub items: Vec<T>,
  pub user_preferences: Option<UserPreferences>,
}
