use nomad::api::types::EntityId;
use nomad::api::MockTransport;
use nomad::cache::{MemoryCache, QueryParams};
use nomad::data::DataAccess;
use nomad::storage::{LocalStorage, SavedJobIds, SqliteStorage, SAVED_JOBS_KEY, TOKEN_KEY};
use serde_json::json;
use std::sync::Arc;

#[test]
fn test_saved_jobs_survive_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("nested").join("storage.db");

  {
    let storage: Arc<dyn LocalStorage> = Arc::new(SqliteStorage::open(&path).unwrap());
    let saved = SavedJobIds::new(storage);
    assert!(saved.toggle(&EntityId::Int(42)).unwrap());
    assert!(saved.toggle(&EntityId::from("remote-7")).unwrap());
    assert!(!saved.toggle(&EntityId::Int(42)).unwrap());
  }

  let storage: Arc<dyn LocalStorage> = Arc::new(SqliteStorage::open(&path).unwrap());
  let saved = SavedJobIds::new(Arc::clone(&storage));
  assert_eq!(saved.list(), vec![EntityId::Str("remote-7".to_string())]);
  assert_eq!(
    storage.get_item(SAVED_JOBS_KEY).unwrap().as_deref(),
    Some(r#"["remote-7"]"#)
  );
}

#[test]
fn test_corrupt_saved_jobs_read_as_empty() {
  let storage: Arc<dyn LocalStorage> = Arc::new(SqliteStorage::open_in_memory().unwrap());
  storage.set_item(SAVED_JOBS_KEY, "{not json").unwrap();

  let saved = SavedJobIds::new(storage);
  assert!(saved.list().is_empty());
  assert!(saved.toggle(&EntityId::Int(1)).unwrap());
  assert_eq!(saved.list(), vec![EntityId::Int(1)]);
}

#[tokio::test]
async fn test_token_persisted_and_sent() {
  let dir = tempfile::tempdir().unwrap();
  let path = dir.path().join("storage.db");
  let transport = Arc::new(MockTransport::new());
  transport.on("GET /cities", 200, json!({"cities": []}));

  let storage = Arc::new(SqliteStorage::open(&path).unwrap());
  let data = DataAccess::new(transport.clone(), storage, Arc::new(MemoryCache::new()));
  data.api().set_token("abc123").unwrap();
  data
    .cities
    .load_cities(&QueryParams::new(), false)
    .await
    .unwrap();

  let sent = transport.requests();
  assert_eq!(sent[0].bearer_token.as_deref(), Some("abc123"));

  let reopened = SqliteStorage::open(&path).unwrap();
  assert_eq!(reopened.get_item(TOKEN_KEY).unwrap().as_deref(), Some("abc123"));
}
