//! Client state store: the single source of truth for fetched data.
//!
//! Only the data-access layer mutates the store. Readers take cloned
//! snapshots and derive their own filtered views from them.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::api::types::{
  City, EntityId, Job, JobCategory, Pagination, SavedJob, UserPreferences, UserProfile,
};
use crate::cache::{Cacheable, QueryParams, Resource};

/// Lifecycle of the most recent fetch for a resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FetchStatus {
  /// Nothing fetched yet
  #[default]
  Idle,
  /// A fetch is in progress
  Loading,
  /// The last fetch succeeded
  Success,
  /// The last fetch failed with this message
  Failure(String),
}

impl FetchStatus {
  pub fn is_loading(&self) -> bool {
    matches!(self, FetchStatus::Loading)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, FetchStatus::Success)
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      FetchStatus::Failure(e) => Some(e),
      _ => None,
    }
  }
}

/// State held for one resource kind (cities or jobs).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceState<T> {
  pub items: Vec<T>,
  pub current_item: Option<T>,
  pub pagination: Option<Pagination>,
  pub filters: QueryParams,
  pub is_loading: bool,
  pub error: Option<String>,
  pub status: FetchStatus,
  /// Preferences echoed by the last personalized fetch
  pub user_preferences: Option<UserPreferences>,
  /// Fetches started and not yet finished, superseded ones included
  pending: usize,
}

impl<T> Default for ResourceState<T> {
  fn default() -> Self {
    Self {
      items: Vec::new(),
      current_item: None,
      pagination: None,
      filters: QueryParams::new(),
      is_loading: false,
      error: None,
      status: FetchStatus::Idle,
      user_preferences: None,
      pending: 0,
    }
  }
}

impl<T: Cacheable> ResourceState<T> {
  pub(crate) fn start_loading(&mut self) {
    self.pending += 1;
    self.is_loading = true;
    self.error = None;
    self.status = FetchStatus::Loading;
  }

  /// A fetch started with [`start_loading`](Self::start_loading) ended,
  /// whether or not its result was published.
  pub(crate) fn end_loading(&mut self) {
    self.pending = self.pending.saturating_sub(1);
    self.is_loading = self.pending > 0;
  }

  pub(crate) fn mark_success(&mut self) {
    self.error = None;
    self.status = FetchStatus::Success;
  }

  /// Replace the collection wholesale.
  pub(crate) fn set_items(&mut self, items: Vec<T>, pagination: Option<Pagination>) {
    self.items = items;
    if pagination.is_some() {
      self.pagination = pagination;
    }
    self.mark_success();
  }

  /// Append entities whose id is not already present. Returns how many were
  /// added.
  pub(crate) fn append_unique(&mut self, items: Vec<T>) -> usize {
    let before = self.items.len();
    for item in items {
      if !self.items.iter().any(|existing| existing.id() == item.id()) {
        self.items.push(item);
      }
    }
    self.items.len() - before
  }

  pub(crate) fn set_current(&mut self, item: T) {
    self.current_item = Some(item);
    self.mark_success();
  }

  pub(crate) fn set_failure(&mut self, message: String) {
    self.error = Some(message.clone());
    self.status = FetchStatus::Failure(message);
  }

  /// Advance `current_page` ahead of server confirmation.
  pub(crate) fn set_page(&mut self, page: u64) {
    if let Some(pagination) = self.pagination.as_mut() {
      pagination.current_page = page;
    }
  }

  pub(crate) fn set_filters(&mut self, filters: &QueryParams) {
    self.filters = self.filters.merged(filters);
    self.set_page(1);
  }

  pub(crate) fn clear_filters(&mut self) {
    self.filters = QueryParams::new();
    self.set_page(1);
  }

  pub(crate) fn clear_error(&mut self) {
    self.error = None;
    if matches!(self.status, FetchStatus::Failure(_)) {
      self.status = FetchStatus::Idle;
    }
  }

  pub(crate) fn clear(&mut self) {
    self.items.clear();
    self.current_item = None;
    self.pagination = None;
  }

  pub fn contains(&self, id: &EntityId) -> bool {
    self.items.iter().any(|item| item.id() == id)
  }
}

/// State of the signed-in user.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserState {
  pub profile: Option<UserProfile>,
  pub saved_cities: Vec<City>,
  pub saved_jobs: Vec<SavedJob>,
  pub is_loading: bool,
  pub error: Option<String>,
  pending: usize,
}

impl UserState {
  pub(crate) fn start_loading(&mut self) {
    self.pending += 1;
    self.is_loading = true;
    self.error = None;
  }

  pub(crate) fn end_loading(&mut self) {
    self.pending = self.pending.saturating_sub(1);
    self.is_loading = self.pending > 0;
  }
}

/// Everything the store holds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreState {
  pub cities: ResourceState<City>,
  pub jobs: ResourceState<Job>,
  pub latest_jobs: Vec<Job>,
  pub job_categories: Vec<JobCategory>,
  pub user: UserState,
}

/// Entities with a [`ResourceState`] in the store.
pub trait Stored: Cacheable {
  fn state(store: &StoreState) -> &ResourceState<Self>;
  fn state_mut(store: &mut StoreState) -> &mut ResourceState<Self>;
}

impl Stored for City {
  fn state(store: &StoreState) -> &ResourceState<Self> {
    &store.cities
  }

  fn state_mut(store: &mut StoreState) -> &mut ResourceState<Self> {
    &mut store.cities
  }
}

impl Stored for Job {
  fn state(store: &StoreState) -> &ResourceState<Self> {
    &store.jobs
  }

  fn state_mut(store: &mut StoreState) -> &mut ResourceState<Self> {
    &mut store.jobs
  }
}

/// Independently-written parts of the store. Each has its own generation
/// counter so that only the most recently issued fetch may write to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
  Items(Resource),
  Current(Resource),
  LatestJobs,
  JobCategories,
  Profile,
  SavedCities,
  SavedJobs,
}

/// Transient user-facing messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
  Success(String),
  Error(String),
  /// The session ended; the user has to log in again
  LoginRequired,
}

/// Keeps a loading flag raised until dropped.
pub(crate) struct LoadingGuard<'a> {
  store: &'a ClientStateStore,
  end: fn(&mut StoreState),
}

impl Drop for LoadingGuard<'_> {
  fn drop(&mut self) {
    self.store.update(self.end);
  }
}

#[derive(Default)]
pub struct ClientStateStore {
  state: RwLock<StoreState>,
  generations: Mutex<HashMap<Slot, u64>>,
  notifier: Mutex<Option<mpsc::UnboundedSender<Notification>>>,
}

impl ClientStateStore {
  pub fn new() -> Self {
    Self::default()
  }

  /// Receive notifications from now on. Replaces any previous subscriber.
  pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Notification> {
    let (tx, rx) = mpsc::unbounded_channel();
    *self.notifier.lock().unwrap_or_else(PoisonError::into_inner) = Some(tx);
    rx
  }

  pub fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> R {
    let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
    f(&state)
  }

  pub fn snapshot(&self) -> StoreState {
    self.read(|s| s.clone())
  }

  pub fn resource<T: Stored>(&self) -> ResourceState<T> {
    self.read(|s| T::state(s).clone())
  }

  pub fn cities(&self) -> ResourceState<City> {
    self.resource()
  }

  pub fn jobs(&self) -> ResourceState<Job> {
    self.resource()
  }

  pub fn user(&self) -> UserState {
    self.read(|s| s.user.clone())
  }

  fn generations(&self) -> MutexGuard<'_, HashMap<Slot, u64>> {
    self.generations.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub(crate) fn update<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
    let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
    f(&mut state)
  }

  /// Issue a new generation for `slot`, superseding earlier ones.
  pub(crate) fn begin(&self, slot: Slot) -> u64 {
    let mut generations = self.generations();
    let generation = generations.entry(slot).or_insert(0);
    *generation += 1;
    *generation
  }

  #[cfg(test)]
  pub(crate) fn is_current(&self, slot: Slot, generation: u64) -> bool {
    self.generations().get(&slot).copied().unwrap_or(0) == generation
  }

  /// Apply `f` only if `generation` is still the latest for `slot`.
  pub(crate) fn update_if_current<R>(
    &self,
    slot: Slot,
    generation: u64,
    f: impl FnOnce(&mut StoreState) -> R,
  ) -> Option<R> {
    // Holding the generation lock keeps a newer fetch from publishing
    // between the check and the write.
    let generations = self.generations();
    if generations.get(&slot).copied().unwrap_or(0) != generation {
      debug!(?slot, generation, "discarding superseded result");
      return None;
    }
    let result = self.update(f);
    drop(generations);
    Some(result)
  }

  /// Apply `start` now and `end` when the returned guard drops. The pair
  /// counts fetches, so a superseded fetch still lowers the flag it raised.
  pub(crate) fn start_loading(
    &self,
    start: fn(&mut StoreState),
    end: fn(&mut StoreState),
  ) -> LoadingGuard<'_> {
    self.update(start);
    LoadingGuard { store: self, end }
  }

  pub(crate) fn notify(&self, notification: Notification) {
    match &notification {
      Notification::Error(message) => error!(%message, "notification"),
      Notification::Success(message) => info!(%message, "notification"),
      Notification::LoginRequired => info!("login required"),
    }
    let notifier = self.notifier.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(tx) = notifier.as_ref() {
      // Receiver may have been dropped
      let _ = tx.send(notification);
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn city(id: i64) -> City {
    serde_json::from_value(json!({"id": id, "name": format!("City {}", id)})).unwrap()
  }

  #[test]
  fn test_generations_supersede() {
    let store = ClientStateStore::new();
    let slot = Slot::Items(Resource::Cities);
    let first = store.begin(slot);
    let second = store.begin(slot);

    assert!(!store.is_current(slot, first));
    assert!(store.is_current(slot, second));
    assert!(store
      .update_if_current(slot, first, |s| s.cities.set_items(vec![city(1)], None))
      .is_none());
    assert!(store.cities().items.is_empty());

    store.update_if_current(slot, second, |s| s.cities.set_items(vec![city(2)], None));
    assert_eq!(store.cities().items, vec![city(2)]);
  }

  #[test]
  fn test_slots_are_independent() {
    let store = ClientStateStore::new();
    let items = store.begin(Slot::Items(Resource::Cities));
    store.begin(Slot::Current(Resource::Cities));
    store.begin(Slot::Items(Resource::Jobs));
    assert!(store.is_current(Slot::Items(Resource::Cities), items));
  }

  #[test]
  fn test_append_unique() {
    let mut state = ResourceState::<City>::default();
    state.set_items(vec![city(5)], None);
    let added = state.append_unique(vec![city(5), city(6), city(6)]);
    assert_eq!(added, 1);
    let ids: Vec<_> = state.items.iter().map(|c| c.id.clone()).collect();
    assert_eq!(ids, vec![EntityId::Int(5), EntityId::Int(6)]);
  }

  #[test]
  fn test_existing_entities_not_replaced() {
    let mut state = ResourceState::<City>::default();
    state.set_items(vec![city(1)], None);
    let mut renamed = city(1);
    renamed.name = "Renamed".to_string();
    state.append_unique(vec![renamed]);
    assert_eq!(state.items[0].name, "City 1");
  }

  #[test]
  fn test_failure_then_clear_error() {
    let mut state = ResourceState::<City>::default();
    state.start_loading();
    assert!(state.status.is_loading());
    state.set_failure("Failed to load cities".to_string());
    state.end_loading();
    assert!(!state.is_loading);
    assert_eq!(state.status.error(), Some("Failed to load cities"));

    state.clear_error();
    assert_eq!(state.error, None);
    assert_eq!(state.status, FetchStatus::Idle);
  }

  #[test]
  fn test_filters_reset_page() {
    let mut state = ResourceState::<City>::default();
    state.set_items(
      vec![],
      Some(Pagination {
        current_page: 3,
        ..Default::default()
      }),
    );
    state.set_filters(&QueryParams::new().with("climate", "warm"));
    assert_eq!(state.pagination.as_ref().unwrap().current_page, 1);
    assert_eq!(state.filters.get("climate"), Some(&json!("warm")));

    state.clear_filters();
    assert!(state.filters.is_empty());
  }

  #[test]
  fn test_set_items_keeps_pagination_when_absent() {
    let mut state = ResourceState::<City>::default();
    state.set_items(
      vec![city(1)],
      Some(Pagination {
        total_pages: 3,
        ..Default::default()
      }),
    );
    state.set_items(vec![city(2)], None);
    assert_eq!(state.pagination.unwrap().total_pages, 3);
  }

  #[test]
  fn test_loading_counts_overlapping_fetches() {
    let store = ClientStateStore::new();
    let start: fn(&mut StoreState) = |s| s.cities.start_loading();
    let end: fn(&mut StoreState) = |s| s.cities.end_loading();

    let older = store.start_loading(start, end);
    let newer = store.start_loading(start, end);
    store.update(|s| s.cities.set_items(vec![city(1)], None));
    drop(newer);
    assert!(store.cities().is_loading);

    drop(older);
    let state = store.cities();
    assert!(!state.is_loading);
    assert!(state.status.is_success());
  }

  #[tokio::test]
  async fn test_notifications_delivered() {
    let store = ClientStateStore::new();
    let mut rx = store.subscribe();
    store.notify(Notification::Error("Failed to load cities".to_string()));
    store.notify(Notification::LoginRequired);

    assert_eq!(
      rx.recv().await,
      Some(Notification::Error("Failed to load cities".to_string()))
    );
    assert_eq!(rx.recv().await, Some(Notification::LoginRequired));
  }

  #[test]
  fn test_notify_without_subscriber() {
    ClientStateStore::new().notify(Notification::Success("ok".to_string()));
  }
}
