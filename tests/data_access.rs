use nomad::api::types::EntityId;
use nomad::api::MockTransport;
use nomad::cache::{ManualClock, MemoryCache, QueryKey, QueryParams, Resource};
use nomad::data::DataAccess;
use nomad::error::ApiError;
use nomad::storage::MemoryStorage;
use nomad::store::Notification;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
  data: DataAccess,
  transport: Arc<MockTransport>,
  clock: Arc<ManualClock>,
}

fn fixture() -> Fixture {
  let transport = Arc::new(MockTransport::new());
  let clock = Arc::new(ManualClock::new(1_700_000_000_000));
  let cache = Arc::new(MemoryCache::new().with_clock(clock.clone()));
  let data = DataAccess::new(transport.clone(), Arc::new(MemoryStorage::new()), cache);
  Fixture {
    data,
    transport,
    clock,
  }
}

fn cities(ids: &[i64]) -> Value {
  let list: Vec<Value> = ids
    .iter()
    .map(|id| json!({"id": id, "name": format!("City {}", id), "country": "PT"}))
    .collect();
  Value::Array(list)
}

fn names(f: &Fixture) -> Vec<String> {
  f.data
    .store()
    .cities()
    .items
    .into_iter()
    .map(|c| c.name)
    .collect()
}

#[tokio::test]
async fn test_second_load_served_from_cache() {
  let f = fixture();
  f.transport.on(
    "GET /cities?limit=25",
    200,
    json!({
      "cities": cities(&[1, 2, 3]),
      "pagination": {"current_page": 1, "total_pages": 4, "total_items": 75, "items_per_page": 25}
    }),
  );
  let params = QueryParams::new().with("limit", 25);

  let first = f.data.cities.load_cities(&params, false).await.unwrap();
  let second = f.data.cities.load_cities(&params, false).await.unwrap();

  assert_eq!(first, second);
  assert_eq!(f.transport.calls("/cities"), 1);
  let state = f.data.store().cities();
  assert_eq!(state.items.len(), 3);
  assert!(!state.is_loading);
  assert_eq!(state.pagination.map(|p| p.total_pages), Some(4));
}

#[tokio::test]
async fn test_force_refresh_always_fetches() {
  let f = fixture();
  f.transport.on("GET /cities", 200, json!({"cities": cities(&[1])}));

  for _ in 0..3 {
    f.data
      .cities
      .load_cities(&QueryParams::new(), true)
      .await
      .unwrap();
  }
  assert_eq!(f.transport.calls("/cities"), 3);
}

#[tokio::test]
async fn test_expired_entry_refetched_but_still_present() {
  let f = fixture();
  f.transport.on("GET /cities", 200, json!({"cities": cities(&[1])}));
  let params = QueryParams::new();
  let key = QueryKey::Collection {
    resource: Resource::Cities,
    endpoint: "/cities".to_string(),
    params: params.clone(),
  }
  .cache_key();

  f.data.cities.load_cities(&params, false).await.unwrap();
  f.clock.advance(Duration::from_secs(5 * 60 + 1));

  assert!(f.data.cache().get(&key).is_none());
  assert!(f.data.cache().peek(&key).is_some());

  f.data.cities.load_cities(&params, false).await.unwrap();
  assert_eq!(f.transport.calls("/cities"), 2);
  assert!(f.data.cache().get(&key).is_some());
}

#[tokio::test]
async fn test_empty_search_is_success() {
  let f = fixture();
  f.transport
    .on("GET /cities/search/atlantis", 200, json!({"cities": []}));

  let found = f
    .data
    .cities
    .search_cities("atlantis", &QueryParams::new(), false)
    .await
    .unwrap();

  assert!(found.is_empty());
  let state = f.data.store().cities();
  assert!(state.items.is_empty());
  assert!(state.status.is_success());
  assert_eq!(state.error, None);
}

#[tokio::test]
async fn test_load_more_appends_only_new_cities() {
  let f = fixture();
  f.transport
    .on("GET /cities", 200, json!({"cities": cities(&[1, 2])}))
    .on("GET /cities?page=2", 200, json!({"cities": cities(&[2, 3])}))
    .on("GET /cities?page=3", 200, json!({"cities": cities(&[3])}));

  let params = QueryParams::new();
  f.data.cities.load_cities(&params, false).await.unwrap();

  assert!(f.data.cities.load_more_cities(2, &params).await.unwrap());
  assert_eq!(names(&f), vec!["City 1", "City 2", "City 3"]);

  // Nothing new on page 3
  assert!(!f.data.cities.load_more_cities(3, &params).await.unwrap());
  assert_eq!(names(&f).len(), 3);
}

#[tokio::test]
async fn test_missing_city_keeps_current_item() {
  let f = fixture();
  let mut notifications = f.data.store().subscribe();
  f.transport.on(
    "GET /cities/slug/lisbon",
    200,
    json!({"data": {"id": 7, "slug": "lisbon", "name": "Lisbon", "country": "PT"}}),
  );

  f.data
    .cities
    .load_city_by_slug("lisbon", false)
    .await
    .unwrap();
  let err = f
    .data
    .cities
    .load_city_by_slug("atlantis", false)
    .await
    .unwrap_err();

  assert!(matches!(err, ApiError::NotFound(_)));
  assert_eq!(err.to_string(), "City 'atlantis' not found");
  let state = f.data.store().cities();
  assert_eq!(state.current_item.map(|c| c.id), Some(EntityId::Int(7)));
  assert_eq!(state.error.as_deref(), Some("City 'atlantis' not found"));
  assert_eq!(
    notifications.try_recv().ok(),
    Some(Notification::Error("City 'atlantis' not found".to_string()))
  );
}

#[tokio::test]
async fn test_personalized_cached_apart_from_plain_list() {
  let f = fixture();
  f.data.api().set_token("secret").unwrap();
  f.transport
    .on("GET /cities", 200, json!({"cities": cities(&[1, 2])}))
    .on(
      "GET /cities/personalized",
      200,
      json!({
        "success": true,
        "data": {
          "recommendations": cities(&[9]),
          "userPreferences": {"preferred_climate": "warm"},
          "meta": {"pagination": {"current_page": 1, "total_pages": 1}}
        }
      }),
    );

  let params = QueryParams::new();
  f.data.cities.load_cities(&params, false).await.unwrap();
  let personalized = f
    .data
    .cities
    .load_personalized_cities(&params, false)
    .await
    .unwrap();
  assert_eq!(personalized.items.len(), 1);
  assert_eq!(
    personalized
      .user_preferences
      .and_then(|p| p.preferred_climate)
      .as_deref(),
    Some("warm")
  );

  // The plain list is still cached
  f.data.cities.load_cities(&params, false).await.unwrap();
  assert_eq!(f.transport.calls("/cities"), 1);
  assert_eq!(names(&f), vec!["City 1", "City 2"]);
}

#[tokio::test(start_paused = true)]
async fn test_newer_search_wins_over_slower_older_one() {
  let f = fixture();
  f.transport
    .on_delayed(
      "GET /cities/search/lis",
      Duration::from_millis(800),
      200,
      json!({"cities": [{"id": 1, "name": "Lisbon", "country": "PT"}]}),
    )
    .on_delayed(
      "GET /cities/search/ber",
      Duration::from_millis(100),
      200,
      json!({"cities": [{"id": 2, "name": "Berlin", "country": "DE"}]}),
    );

  let params = QueryParams::new();
  let (older, newer) = tokio::join!(
    f.data.cities.search_cities("lis", &params, false),
    f.data.cities.search_cities("ber", &params, false),
  );

  // Both calls return their own data, only the newer one is published
  assert_eq!(older.unwrap()[0].name, "Lisbon");
  assert_eq!(newer.unwrap()[0].name, "Berlin");
  assert_eq!(names(&f), vec!["Berlin"]);
  let state = f.data.store().cities();
  assert!(!state.is_loading);
  assert!(state.status.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_load_more_during_slow_load_settles_loading() {
  let f = fixture();
  f.transport
    .on_delayed(
      "GET /cities",
      Duration::from_secs(2),
      200,
      json!({"cities": cities(&[1, 2])}),
    )
    .on("GET /cities?page=2", 200, json!({"cities": cities(&[3])}));

  let params = QueryParams::new();
  let (loaded, more) = tokio::join!(
    f.data.cities.load_cities(&params, false),
    f.data.cities.load_more_cities(2, &params),
  );

  loaded.unwrap();
  assert!(more.unwrap());
  // The slow first page was superseded by the appended one
  assert_eq!(names(&f), vec!["City 3"]);
  let state = f.data.store().cities();
  assert!(!state.is_loading);
  assert!(state.status.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_cached_latest_jobs_during_forced_refresh_settles_loading() {
  let f = fixture();
  f.transport.on_delayed(
    "GET /jobs/latest",
    Duration::from_millis(500),
    200,
    json!({"jobs": [{"id": 1, "title": "Rust Engineer"}]}),
  );

  let params = QueryParams::new();
  f.data.jobs.load_latest_jobs(&params, false).await.unwrap();

  let (forced, cached) = tokio::join!(
    f.data.jobs.load_latest_jobs(&params, true),
    f.data.jobs.load_latest_jobs(&params, false),
  );

  assert_eq!(forced.unwrap(), cached.unwrap());
  assert_eq!(f.transport.calls("/jobs/latest"), 2);
  let state = f.data.store().jobs();
  assert!(!state.is_loading);
  assert!(state.status.is_success());
}

#[tokio::test(start_paused = true)]
async fn test_identical_concurrent_loads_share_one_request() {
  let f = fixture();
  f.transport.on_delayed(
    "GET /jobs",
    Duration::from_millis(200),
    200,
    json!({"jobs": [{"id": 1, "title": "Rust Engineer", "company_name": "Ferris"}]}),
  );

  let params = QueryParams::new();
  let (a, b) = tokio::join!(
    f.data.jobs.load_jobs(&params, false),
    f.data.jobs.load_jobs(&params, false),
  );

  assert_eq!(a.unwrap(), b.unwrap());
  assert_eq!(f.transport.calls("/jobs"), 1);
  assert_eq!(f.data.store().jobs().items.len(), 1);
}

#[tokio::test]
async fn test_expired_session_clears_token() {
  let f = fixture();
  let mut notifications = f.data.store().subscribe();
  f.data.api().set_token("stale").unwrap();
  f.transport.on("GET /jobs", 401, json!({"message": "expired"}));

  let err = f
    .data
    .jobs
    .load_jobs(&QueryParams::new(), false)
    .await
    .unwrap_err();

  assert_eq!(err, ApiError::Unauthorized);
  assert!(!f.data.api().has_token());
  assert_eq!(notifications.try_recv().ok(), Some(Notification::LoginRequired));
  assert!(notifications.try_recv().is_err());
}
