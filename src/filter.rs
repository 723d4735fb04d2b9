//! Local filtering, sorting and paging of already-loaded collections.
//!
//! These are pure views over store snapshots; nothing here writes back to
//! the store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::api::types::{City, Job};

/// Comparator keys for city lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SortKey {
  #[default]
  ScoreDesc,
  CostAsc,
  InternetDesc,
  SafetyDesc,
}

impl SortKey {
  pub const ALL: [SortKey; 4] = [
    SortKey::ScoreDesc,
    SortKey::CostAsc,
    SortKey::InternetDesc,
    SortKey::SafetyDesc,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      SortKey::ScoreDesc => "score-desc",
      SortKey::CostAsc => "cost-asc",
      SortKey::InternetDesc => "internet-desc",
      SortKey::SafetyDesc => "safety-desc",
    }
  }

  fn value(&self, city: &City) -> Option<f64> {
    match self {
      SortKey::ScoreDesc => city.effective_score(),
      SortKey::CostAsc => city.cost,
      SortKey::InternetDesc => city.internet,
      SortKey::SafetyDesc => city.safety,
    }
  }

  fn descending(&self) -> bool {
    !matches!(self, SortKey::CostAsc)
  }

  /// Order two cities; cities without a value sort last either way.
  pub fn compare(&self, a: &City, b: &City) -> Ordering {
    match (self.value(a), self.value(b)) {
      (Some(x), Some(y)) => {
        let ord = x.partial_cmp(&y).unwrap_or(Ordering::Equal);
        if self.descending() {
          ord.reverse()
        } else {
          ord
        }
      }
      (Some(_), None) => Ordering::Less,
      (None, Some(_)) => Ordering::Greater,
      (None, None) => Ordering::Equal,
    }
  }
}

impl fmt::Display for SortKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for SortKey {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    SortKey::ALL
      .into_iter()
      .find(|key| key.as_str().eq_ignore_ascii_case(s.trim()))
      .ok_or_else(|| {
        let valid: Vec<_> = SortKey::ALL.iter().map(SortKey::as_str).collect();
        format!("unknown sort key '{}', expected one of: {}", s, valid.join(", "))
      })
  }
}

/// What to show when filters match nothing but the source list is not empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmptyResultPolicy {
  /// Show the unfiltered source list instead
  #[default]
  FallbackToSource,
  /// Show the empty result
  ShowEmpty,
}

/// Local city filter state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityFilter {
  /// Case-insensitive substring of name or country
  pub search: String,
  /// Exact climate, case-insensitive; `None` or "any" disables it
  pub climate: Option<String>,
  /// Cost ceiling; cities without a cost always pass
  pub max_cost: Option<f64>,
  pub sort: SortKey,
  pub empty_result_policy: EmptyResultPolicy,
}

impl CityFilter {
  pub fn matches(&self, city: &City) -> bool {
    let search = self.search.trim().to_lowercase();
    if !search.is_empty()
      && !city.name.to_lowercase().contains(&search)
      && !city.country.to_lowercase().contains(&search)
    {
      return false;
    }

    if let Some(climate) = self.climate.as_deref() {
      if !climate.eq_ignore_ascii_case("any") {
        let matched = city
          .climate
          .as_deref()
          .is_some_and(|c| c.eq_ignore_ascii_case(climate));
        if !matched {
          return false;
        }
      }
    }

    match (self.max_cost, city.cost) {
      (Some(ceiling), Some(cost)) => cost <= ceiling,
      _ => true,
    }
  }

  /// Filter then stable-sort `cities`, applying the empty-result policy.
  pub fn apply<'a>(&self, cities: &'a [City]) -> Vec<&'a City> {
    let mut view: Vec<&City> = cities.iter().filter(|c| self.matches(c)).collect();

    if view.is_empty()
      && !cities.is_empty()
      && self.empty_result_policy == EmptyResultPolicy::FallbackToSource
    {
      view = cities.iter().collect();
    }

    view.sort_by(|a, b| self.sort.compare(a, b));
    view
  }
}

/// Local job filter state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobFilter {
  /// Case-insensitive substring of title, company or category
  pub search: String,
  pub category: Option<String>,
  pub job_type: Option<String>,
}

impl JobFilter {
  pub fn matches(&self, job: &Job) -> bool {
    let search = self.search.trim().to_lowercase();
    if !search.is_empty() {
      let haystacks = [
        Some(job.title.as_str()),
        Some(job.company_name.as_str()),
        job.category.as_deref(),
      ];
      let found = haystacks
        .into_iter()
        .flatten()
        .any(|h| h.to_lowercase().contains(&search));
      if !found {
        return false;
      }
    }

    let same = |wanted: &Option<String>, actual: &Option<String>| match wanted {
      Some(w) => actual.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(w)),
      None => true,
    };
    same(&self.category, &job.category) && same(&self.job_type, &job.job_type)
  }

  pub fn apply<'a>(&self, jobs: &'a [Job]) -> Vec<&'a Job> {
    jobs.iter().filter(|j| self.matches(j)).collect()
  }
}

/// Jobs whose minimum salary lies within `[min, max]`. Jobs without a
/// parseable salary are excluded.
pub fn filter_jobs_by_salary<'a>(jobs: &'a [Job], min: Option<u64>, max: Option<u64>) -> Vec<&'a Job> {
  jobs
    .iter()
    .filter(|job| match job.salary_min() {
      Some(salary) => min.map_or(true, |m| salary >= m) && max.map_or(true, |m| salary <= m),
      None => false,
    })
    .collect()
}

/// One page of a local list.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalPage<'a, T> {
  pub items: &'a [T],
  /// 1-based, clamped into range
  pub page: usize,
  pub total_pages: usize,
}

/// Slice out page `page` (1-based) of `items`. Out-of-range pages clamp to
/// the nearest valid one.
pub fn paginate<T>(items: &[T], page: usize, page_size: usize) -> LocalPage<'_, T> {
  let page_size = page_size.max(1);
  let total_pages = items.len().div_ceil(page_size).max(1);
  let page = page.clamp(1, total_pages);
  let start = (page - 1) * page_size;
  let end = (start + page_size).min(items.len());
  LocalPage {
    items: &items[start.min(end)..end],
    page,
    total_pages,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn seed() -> Vec<City> {
    serde_json::from_value(json!([
      {"id": 1, "name": "Lisbon", "country": "Portugal", "cost": 1800, "internet": 120, "safety": 78, "climate": "mild", "score": 88},
      {"id": 2, "name": "Chiang Mai", "country": "Thailand", "cost": 1000, "internet": 90, "safety": 70, "climate": "warm", "score": 86},
      {"id": 3, "name": "Mexico City", "country": "Mexico", "cost": 1500, "internet": 80, "safety": 60, "climate": "mild", "score": 79},
      {"id": 4, "name": "Tallinn", "country": "Estonia", "cost": 1900, "internet": 160, "safety": 82, "climate": "cool", "score": 84},
      {"id": 5, "name": "Bali (Canggu)", "country": "Indonesia", "internet": 70, "climate": "warm", "score": 80}
    ]))
    .unwrap()
  }

  fn names(view: &[&City]) -> Vec<String> {
    view.iter().map(|c| c.name.clone()).collect()
  }

  #[test]
  fn test_default_sort_by_score() {
    let cities = seed();
    let view = CityFilter::default().apply(&cities);
    assert_eq!(
      names(&view),
      vec!["Lisbon", "Chiang Mai", "Tallinn", "Bali (Canggu)", "Mexico City"]
    );
  }

  #[test]
  fn test_search_name_or_country() {
    let cities = seed();
    let filter = CityFilter {
      search: "THAI".to_string(),
      ..Default::default()
    };
    assert_eq!(names(&filter.apply(&cities)), vec!["Chiang Mai"]);
  }

  #[test]
  fn test_climate_any_and_exact() {
    let cities = seed();
    let any = CityFilter {
      climate: Some("Any".to_string()),
      ..Default::default()
    };
    assert_eq!(any.apply(&cities).len(), 5);

    let warm = CityFilter {
      climate: Some("WARM".to_string()),
      ..Default::default()
    };
    assert_eq!(names(&warm.apply(&cities)), vec!["Chiang Mai", "Bali (Canggu)"]);
  }

  #[test]
  fn test_missing_cost_passes_ceiling() {
    let cities = seed();
    let filter = CityFilter {
      max_cost: Some(1200.0),
      ..Default::default()
    };
    assert_eq!(names(&filter.apply(&cities)), vec!["Chiang Mai", "Bali (Canggu)"]);
  }

  #[test]
  fn test_cost_sort_puts_missing_last() {
    let cities = seed();
    let filter = CityFilter {
      sort: SortKey::CostAsc,
      ..Default::default()
    };
    let view = filter.apply(&cities);
    assert_eq!(view.first().unwrap().name, "Chiang Mai");
    assert_eq!(view.last().unwrap().name, "Bali (Canggu)");
  }

  #[test]
  fn test_apply_is_idempotent() {
    let cities = seed();
    for sort in SortKey::ALL {
      let filter = CityFilter {
        climate: Some("mild".to_string()),
        sort,
        ..Default::default()
      };
      let once: Vec<City> = filter.apply(&cities).into_iter().cloned().collect();
      let twice: Vec<City> = filter.apply(&once).into_iter().cloned().collect();
      assert_eq!(once, twice);
    }
  }

  #[test]
  fn test_empty_result_falls_back_to_source() {
    let cities = seed();
    let filter = CityFilter {
      search: "atlantis".to_string(),
      ..Default::default()
    };
    assert_eq!(filter.apply(&cities).len(), cities.len());

    let strict = CityFilter {
      empty_result_policy: EmptyResultPolicy::ShowEmpty,
      ..filter
    };
    assert!(strict.apply(&cities).is_empty());
    assert!(CityFilter::default().apply(&[]).is_empty());
  }

  #[test]
  fn test_sort_key_parse() {
    assert_eq!("internet-desc".parse::<SortKey>(), Ok(SortKey::InternetDesc));
    assert!("price".parse::<SortKey>().unwrap_err().contains("score-desc"));
  }

  #[test]
  fn test_salary_filter() {
    let jobs: Vec<Job> = serde_json::from_value(json!([
      {"id": 1, "salary": "$40,000 - $60,000"},
      {"id": 2, "salary": "$90,000"},
      {"id": 3, "salary": "Competitive"},
      {"id": 4}
    ]))
    .unwrap();

    let ids: Vec<_> = filter_jobs_by_salary(&jobs, Some(50_000), None)
      .iter()
      .map(|j| j.id.to_string())
      .collect();
    assert_eq!(ids, vec!["2"]);
    assert_eq!(filter_jobs_by_salary(&jobs, None, None).len(), 2);
  }

  #[test]
  fn test_job_filter() {
    let jobs: Vec<Job> = serde_json::from_value(json!([
      {"id": 1, "title": "Rust Engineer", "company_name": "Acme", "category": "Software Development", "job_type": "full_time"},
      {"id": 2, "title": "Designer", "company_name": "Rustic", "category": "Design", "job_type": "contract"},
      {"id": 3, "title": "Marketer", "company_name": "Growth", "category": "Marketing"}
    ]))
    .unwrap();

    let search = JobFilter {
      search: "rust".to_string(),
      ..Default::default()
    };
    assert_eq!(search.apply(&jobs).len(), 2);

    let typed = JobFilter {
      search: "rust".to_string(),
      job_type: Some("CONTRACT".to_string()),
      ..Default::default()
    };
    assert_eq!(typed.apply(&jobs)[0].id.to_string(), "2");
  }

  #[test]
  fn test_paginate_clamps() {
    let items: Vec<u32> = (1..=7).collect();
    let second = paginate(&items, 2, 3);
    assert_eq!(second.items, &[4, 5, 6]);
    assert_eq!(second.total_pages, 3);

    let past_end = paginate(&items, 9, 3);
    assert_eq!(past_end.page, 3);
    assert_eq!(past_end.items, &[7]);

    let empty: Vec<u32> = Vec::new();
    let page = paginate(&empty, 0, 3);
    assert_eq!(page.page, 1);
    assert!(page.items.is_empty());
  }
}
