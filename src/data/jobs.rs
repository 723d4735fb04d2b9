//! Jobs data access.
//!
//! Jobs envelopes look like `{success, data: {jobs, total_jobs}}` and
//! usually carry no pagination block, so pagination is derived from
//! `total_jobs` and the requested `limit` when the server sends none.

use futures::future::join_all;
use serde_json::Value;
use tracing::{debug, warn};

use crate::api::path_segment;
use crate::api::types::{EntityId, Job, JobCategory, Pagination, Personalized};
use crate::cache::{QueryKey, QueryParams, Resource};
use crate::error::{ApiError, Result};
use crate::store::Slot;

use super::layer::{DataContext, DataLayer, EntityRequest, ListRequest};

pub const DEFAULT_JOBS_LIMIT: u64 = 20;
pub const POPULAR_CATEGORY_COUNT: usize = 10;

pub const SOFTWARE_DEV: &str = "software-dev";
pub const DESIGN: &str = "design";
pub const MARKETING: &str = "marketing";

/// Pagination built from `total_jobs` when the envelope has no block.
fn pagination_from_total(body: &Value, params: &QueryParams) -> Option<Pagination> {
  let data = body.get("data").unwrap_or(body);
  let total = data
    .get("total_jobs")
    .or_else(|| data.get("total"))
    .and_then(Value::as_u64)?;
  let limit = params.get_u64("limit").unwrap_or(DEFAULT_JOBS_LIMIT);
  let page = params.get_u64("page").unwrap_or(1);
  Some(Pagination::from_total(total, limit, page))
}

fn collection(endpoint: &str, params: &QueryParams) -> ListRequest {
  ListRequest {
    key: QueryKey::Collection {
      resource: Resource::Jobs,
      endpoint: endpoint.to_string(),
      params: params.clone(),
    },
    path: endpoint.to_string(),
    params: params.clone(),
  }
}

fn search(keywords: &str, params: &QueryParams) -> ListRequest {
  ListRequest {
    key: QueryKey::Search {
      resource: Resource::Jobs,
      query: keywords.to_string(),
      params: params.clone(),
    },
    path: format!("/jobs/search/{}", path_segment(keywords)),
    params: params.clone(),
  }
}

/// Criteria for [`JobsData::search_jobs_advanced`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobSearch {
  pub keywords: Option<String>,
  pub category: Option<String>,
  pub company_name: Option<String>,
  pub limit: Option<u64>,
}

#[derive(Clone)]
pub struct JobsData {
  layer: DataLayer<Job>,
}

impl JobsData {
  pub fn new(ctx: DataContext) -> Self {
    Self {
      layer: DataLayer::new(ctx).with_pagination_fallback(pagination_from_total),
    }
  }

  pub fn layer(&self) -> &DataLayer<Job> {
    &self.layer
  }

  /// `GET /jobs`
  pub async fn load_jobs(&self, params: &QueryParams, force_refresh: bool) -> Result<Vec<Job>> {
    self
      .layer
      .load_collection(
        &collection("/jobs", params),
        force_refresh,
        "Failed to load jobs",
      )
      .await
  }

  /// `GET /jobs/latest`. Also fills the main list while it is still empty.
  pub async fn load_latest_jobs(
    &self,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<Job>> {
    let page = self
      .layer
      .load_into(
        Slot::LatestJobs,
        &collection("/jobs/latest", params),
        force_refresh,
        "Failed to load latest jobs",
        |s, page| {
          if s.jobs.items.is_empty() {
            s.jobs.set_items(page.items.clone(), page.pagination);
          }
          s.latest_jobs = page.items;
        },
      )
      .await?;
    Ok(page.items)
  }

  /// `GET /jobs/category/:slug`
  pub async fn load_jobs_by_category(
    &self,
    category: &str,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<Job>> {
    let endpoint = format!("/jobs/category/{}", path_segment(category));
    self
      .layer
      .load_collection(
        &collection(&endpoint, params),
        force_refresh,
        "Failed to load jobs by category",
      )
      .await
  }

  pub async fn load_software_dev_jobs(&self, params: &QueryParams) -> Result<Vec<Job>> {
    self.load_jobs_by_category(SOFTWARE_DEV, params, false).await
  }

  pub async fn load_design_jobs(&self, params: &QueryParams) -> Result<Vec<Job>> {
    self.load_jobs_by_category(DESIGN, params, false).await
  }

  pub async fn load_marketing_jobs(&self, params: &QueryParams) -> Result<Vec<Job>> {
    self.load_jobs_by_category(MARKETING, params, false).await
  }

  /// `GET /jobs/company/:name`
  pub async fn load_jobs_by_company(
    &self,
    company: &str,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<Job>> {
    let endpoint = format!("/jobs/company/{}", path_segment(company));
    self
      .layer
      .load_collection(
        &collection(&endpoint, params),
        force_refresh,
        "Failed to load company jobs",
      )
      .await
  }

  /// `GET /jobs/search/:keywords`
  pub async fn search_jobs(
    &self,
    keywords: &str,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<Job>> {
    let keywords = keywords.trim();
    if keywords.is_empty() {
      return Err(ApiError::Validation("Search keywords cannot be empty".to_string()));
    }
    self
      .layer
      .load_collection(
        &search(keywords, params),
        force_refresh,
        "Failed to search jobs",
      )
      .await
  }

  /// Keyword search when keywords are given, otherwise the filtered list.
  pub async fn search_jobs_advanced(&self, criteria: &JobSearch) -> Result<Vec<Job>> {
    let mut params = QueryParams::new()
      .with("category", criteria.category.clone())
      .with("limit", criteria.limit);

    match criteria.keywords.as_deref().map(str::trim) {
      Some(keywords) if !keywords.is_empty() => self.search_jobs(keywords, &params, false).await,
      _ => {
        params.insert("company_name", criteria.company_name.clone());
        self.load_jobs(&params, false).await
      }
    }
  }

  /// Append page `next_page` of `GET /jobs` to the loaded jobs.
  pub async fn load_more_jobs(&self, next_page: u64, params: &QueryParams) -> Result<bool> {
    let params = params.clone().with("page", next_page);
    self
      .layer
      .load_more(
        &collection("/jobs", &params),
        next_page,
        "Failed to load more jobs",
      )
      .await
  }

  /// `GET /jobs/:id`
  pub async fn load_job_by_id(&self, id: &EntityId, force_refresh: bool) -> Result<Job> {
    let id = id.to_string();
    let request = EntityRequest {
      key: QueryKey::Entity {
        resource: Resource::Jobs,
        field: "id",
        value: id.clone(),
      },
      path: format!("/jobs/{}", path_segment(&id)),
      lookup: id,
    };
    self
      .layer
      .load_entity(&request, force_refresh, "Failed to load job details")
      .await
  }

  /// `GET /jobs/personalized`
  pub async fn load_personalized_jobs(
    &self,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Personalized<Job>> {
    let request = ListRequest {
      key: QueryKey::Personalized {
        resource: Resource::Jobs,
        params: params.clone(),
      },
      path: "/jobs/personalized".to_string(),
      params: params.clone(),
    };
    self
      .layer
      .load_personalized(&request, force_refresh, "Failed to load personalized jobs")
      .await
  }

  /// `GET /jobs/categories`
  pub async fn load_categories(&self, force_refresh: bool) -> Result<Vec<JobCategory>> {
    let ctx = self.layer.context();
    let key = QueryKey::Collection {
      resource: Resource::Jobs,
      endpoint: "/jobs/categories".to_string(),
      params: QueryParams::new(),
    };
    let cache_key = key.cache_key();
    let generation = ctx.store.begin(Slot::JobCategories);

    if !force_refresh {
      let cached = ctx
        .cache
        .get(&cache_key)
        .and_then(|entry| entry.into_data())
        .and_then(|data| serde_json::from_value::<Vec<JobCategory>>(data).ok());
      if let Some(categories) = cached {
        debug!(key = %key.description(), "cache hit");
        ctx.store.update_if_current(Slot::JobCategories, generation, |s| {
          s.job_categories = categories.clone()
        });
        return Ok(categories);
      }
    }

    let body = match self
      .layer
      .get(&key, "/jobs/categories", &QueryParams::new())
      .await
    {
      Ok(body) => body,
      Err(e) => {
        return Err(self.layer.fail(
          Slot::JobCategories,
          generation,
          e,
          "Failed to load job categories",
        ))
      }
    };

    let categories: Vec<JobCategory> = self
      .layer
      .normalizer()
      .items(&body, "categories")
      .into_iter()
      .filter_map(|value| match serde_json::from_value(value) {
        Ok(category) => Some(category),
        Err(e) => {
          warn!(error = %e, "skipping malformed category");
          None
        }
      })
      .collect();

    if let Ok(value) = serde_json::to_value(&categories) {
      ctx.cache.put(&cache_key, value, None);
    }
    ctx.store.update_if_current(Slot::JobCategories, generation, |s| {
      s.job_categories = categories.clone()
    });
    Ok(categories)
  }

  /// The first ten categories with `job_count` set from a one-item category
  /// query, most jobs first. A category whose count fails counts as 0.
  pub async fn load_popular_categories(&self) -> Result<Vec<JobCategory>> {
    let categories = self.load_categories(false).await?;

    let counts = categories
      .iter()
      .take(POPULAR_CATEGORY_COUNT)
      .map(|category| async move {
        let endpoint = format!("/jobs/category/{}", path_segment(category.path_slug()));
        let request = collection(&endpoint, &QueryParams::new().with("limit", 1));
        let count = match self.layer.fetch_page(&request, false).await {
          Ok(result) => result.data.pagination.map(|p| p.total_items).unwrap_or(0),
          Err(e) => {
            warn!(category = %category.name, error = %e, "failed to count category jobs");
            0
          }
        };
        JobCategory {
          job_count: count,
          ..category.clone()
        }
      });

    let mut popular = join_all(counts).await;
    popular.sort_by(|a, b| b.job_count.cmp(&a.job_count));
    Ok(popular)
  }

  pub fn clear_all_cache(&self) {
    self.layer.clear_all_cache();
  }

  pub fn clear_errors(&self) {
    self.layer.clear_errors();
  }

  pub fn clear_jobs(&self) {
    self.layer.clear_collection();
  }

  pub fn set_filters(&self, filters: &QueryParams) {
    self.layer.set_filters(filters);
  }

  pub fn clear_filters(&self) {
    self.layer.clear_filters();
  }

  pub fn set_page(&self, page: u64) {
    self.layer.set_page(page);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::test_support::harness;
  use serde_json::json;

  fn jobs_body(ids: &[i64], total: u64) -> Value {
    let jobs: Vec<Value> = ids
      .iter()
      .map(|id| json!({"id": id, "title": format!("Job {}", id)}))
      .collect();
    json!({"success": true, "data": {"jobs": jobs, "total_jobs": total}})
  }

  #[test]
  fn test_pagination_from_total_jobs() {
    let body = jobs_body(&[1], 45);
    let p = pagination_from_total(&body, &QueryParams::new().with("page", 2)).unwrap();
    assert_eq!(p.total_pages, 3);
    assert_eq!(p.current_page, 2);
    assert_eq!(p.items_per_page, DEFAULT_JOBS_LIMIT);
    assert!(p.has_prev_page);

    assert!(pagination_from_total(&json!([]), &QueryParams::new()).is_none());
  }

  #[tokio::test]
  async fn test_server_pagination_wins() {
    let h = harness();
    h.transport.on(
      "GET /jobs",
      200,
      json!({"data": {"jobs": [{"id": 1}], "total_jobs": 100, "pagination": {"total_pages": 7}}}),
    );
    h.data.jobs.load_jobs(&QueryParams::new(), false).await.unwrap();
    assert_eq!(h.data.store().jobs().pagination.unwrap().total_pages, 7);
  }

  #[tokio::test]
  async fn test_derived_pagination_published() {
    let h = harness();
    h.transport.on("GET /jobs", 200, jobs_body(&[1, 2], 45));
    h.data
      .jobs
      .load_jobs(&QueryParams::new().with("limit", 20), false)
      .await
      .unwrap();
    let pagination = h.data.store().jobs().pagination.unwrap();
    assert_eq!(pagination.total_items, 45);
    assert_eq!(pagination.total_pages, 3);
  }

  #[tokio::test]
  async fn test_latest_fills_empty_main_list() {
    let h = harness();
    h.transport.on("GET /jobs/latest", 200, jobs_body(&[7, 8], 2));

    h.data
      .jobs
      .load_latest_jobs(&QueryParams::new(), false)
      .await
      .unwrap();
    let state = h.data.store().snapshot();
    assert_eq!(state.latest_jobs.len(), 2);
    assert_eq!(state.jobs.items.len(), 2);
  }

  #[tokio::test]
  async fn test_latest_keeps_existing_main_list() {
    let h = harness();
    h.transport
      .on("GET /jobs", 200, jobs_body(&[1], 1))
      .on("GET /jobs/latest", 200, jobs_body(&[7, 8], 2));

    h.data.jobs.load_jobs(&QueryParams::new(), false).await.unwrap();
    h.data
      .jobs
      .load_latest_jobs(&QueryParams::new(), false)
      .await
      .unwrap();
    let state = h.data.store().snapshot();
    assert_eq!(state.jobs.items.len(), 1);
    assert_eq!(state.latest_jobs.len(), 2);
  }

  #[tokio::test]
  async fn test_category_shortcuts() {
    let h = harness();
    h.transport
      .on("GET /jobs/category/software-dev", 200, jobs_body(&[1], 1))
      .on("GET /jobs/category/design", 200, jobs_body(&[2], 1))
      .on("GET /jobs/category/marketing", 200, jobs_body(&[3], 1));

    let params = QueryParams::new();
    assert_eq!(h.data.jobs.load_software_dev_jobs(&params).await.unwrap()[0].id, EntityId::Int(1));
    assert_eq!(h.data.jobs.load_design_jobs(&params).await.unwrap()[0].id, EntityId::Int(2));
    assert_eq!(h.data.jobs.load_marketing_jobs(&params).await.unwrap()[0].id, EntityId::Int(3));
  }

  #[tokio::test]
  async fn test_advanced_search_routes() {
    let h = harness();
    h.transport
      .on("GET /jobs/search/rust", 200, jobs_body(&[1], 1))
      .on("GET /jobs", 200, jobs_body(&[2], 1));

    let by_keywords = JobSearch {
      keywords: Some("rust".to_string()),
      company_name: Some("Acme".to_string()),
      limit: Some(5),
      ..Default::default()
    };
    h.data.jobs.search_jobs_advanced(&by_keywords).await.unwrap();
    let search = &h.transport.requests()[0];
    assert_eq!(search.path, "/jobs/search/rust");
    assert_eq!(search.query, vec![("limit".to_string(), "5".to_string())]);

    let by_company = JobSearch {
      company_name: Some("Acme".to_string()),
      ..Default::default()
    };
    h.data.jobs.search_jobs_advanced(&by_company).await.unwrap();
    let list = &h.transport.requests()[1];
    assert_eq!(list.path, "/jobs");
    assert_eq!(
      list.query,
      vec![("company_name".to_string(), "Acme".to_string())]
    );
  }

  #[tokio::test]
  async fn test_categories_cached() {
    let h = harness();
    h.transport.on(
      "GET /jobs/categories",
      200,
      json!({"success": true, "data": [{"id": 1, "name": "Design", "slug": "design"}]}),
    );

    let first = h.data.jobs.load_categories(false).await.unwrap();
    let second = h.data.jobs.load_categories(false).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(h.transport.calls("/jobs/categories"), 1);
    assert_eq!(h.data.store().snapshot().job_categories.len(), 1);
  }

  #[tokio::test]
  async fn test_popular_categories_ranked() {
    let h = harness();
    h.transport
      .on(
        "GET /jobs/categories",
        200,
        json!({"data": [
          {"name": "Design", "slug": "design"},
          {"name": "Writing", "slug": "writing"},
          {"name": "Software", "slug": "software-dev"}
        ]}),
      )
      .on("GET /jobs/category/design?limit=1", 200, jobs_body(&[1], 12))
      .on("GET /jobs/category/software-dev?limit=1", 200, jobs_body(&[2], 40))
      .on("GET /jobs/category/writing?limit=1", 500, Value::Null);

    let popular = h.data.jobs.load_popular_categories().await.unwrap();
    let ranked: Vec<(&str, u64)> = popular
      .iter()
      .map(|c| (c.name.as_str(), c.job_count))
      .collect();
    assert_eq!(
      ranked,
      vec![("Software", 40), ("Design", 12), ("Writing", 0)]
    );
  }
}
