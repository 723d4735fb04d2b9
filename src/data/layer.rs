//! Data layer that orchestrates caching, fetching and publishing.
//!
//! Every operation follows the same path:
//!
//! 1. Check the memory cache - if fresh, publish and return immediately
//! 2. Otherwise mark the resource as loading and fetch from the network
//!    (joining an identical request already in flight). The flag drops once
//!    every fetch that raised it has ended, superseded ones included
//! 3. Normalize the response and write it to the cache, including the
//!    per-entity id/slug entries
//! 4. Publish to the store, unless a newer fetch for the same store slot was
//!    issued in the meantime
//! 5. On failure publish the message, notify, and return the error

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::api::normalize::ResponseNormalizer;
use crate::api::types::{Pagination, Personalized, UserPreferences};
use crate::api::ApiClient;
use crate::cache::{CacheKey, CacheResult, InFlight, MemoryCache, QueryKey, QueryParams};
use crate::error::{ApiError, Result};
use crate::store::{ClientStateStore, LoadingGuard, Notification, Slot, StoreState, Stored};

/// Shared collaborators handed to every resource's data layer.
#[derive(Clone)]
pub struct DataContext {
  pub api: ApiClient,
  pub cache: Arc<MemoryCache>,
  pub inflight: Arc<InFlight>,
  pub store: Arc<ClientStateStore>,
}

impl DataContext {
  pub fn new(api: ApiClient, cache: Arc<MemoryCache>, store: Arc<ClientStateStore>) -> Self {
    Self {
      api,
      cache,
      inflight: Arc::new(InFlight::new()),
      store,
    }
  }
}

/// A list endpoint call together with the key it is cached under.
#[derive(Debug, Clone)]
pub struct ListRequest {
  pub key: QueryKey,
  pub path: String,
  pub params: QueryParams,
}

/// A single-entity endpoint call.
#[derive(Debug, Clone)]
pub struct EntityRequest {
  pub key: QueryKey,
  pub path: String,
  /// The id or slug being looked up, for messages
  pub lookup: String,
}

/// One normalized page, also the shape stored in the collection cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
  pub items: Vec<T>,
  pub pagination: Option<Pagination>,
  pub user_preferences: Option<UserPreferences>,
}

/// Builds pagination for envelopes that carry only item totals.
pub type PaginationFallback = fn(&Value, &QueryParams) -> Option<Pagination>;

pub struct DataLayer<T> {
  ctx: DataContext,
  normalizer: Arc<ResponseNormalizer>,
  personalized: Arc<ResponseNormalizer>,
  pagination_fallback: Option<PaginationFallback>,
  _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for DataLayer<T> {
  fn clone(&self) -> Self {
    Self {
      ctx: self.ctx.clone(),
      normalizer: Arc::clone(&self.normalizer),
      personalized: Arc::clone(&self.personalized),
      pagination_fallback: self.pagination_fallback,
      _entity: PhantomData,
    }
  }
}

impl<T: Stored> DataLayer<T> {
  pub fn new(ctx: DataContext) -> Self {
    Self {
      ctx,
      normalizer: Arc::new(ResponseNormalizer::standard()),
      personalized: Arc::new(ResponseNormalizer::personalized()),
      pagination_fallback: None,
      _entity: PhantomData,
    }
  }

  pub fn with_pagination_fallback(mut self, fallback: PaginationFallback) -> Self {
    self.pagination_fallback = Some(fallback);
    self
  }

  pub fn context(&self) -> &DataContext {
    &self.ctx
  }

  pub fn store(&self) -> &ClientStateStore {
    &self.ctx.store
  }

  // ==========================================================================
  // Cache / network
  // ==========================================================================

  pub(crate) fn normalizer(&self) -> &ResponseNormalizer {
    &self.normalizer
  }

  fn cached_page(&self, key: &QueryKey) -> Option<CacheResult<Page<T>>> {
    let entry = self.ctx.cache.get(&key.cache_key())?;
    let cached_at = entry.timestamp();
    match serde_json::from_value::<Page<T>>(entry.into_data()?) {
      Ok(page) => {
        debug!(key = %key.description(), "cache hit");
        Some(CacheResult::from_cache(page, cached_at))
      }
      Err(e) => {
        warn!(key = %key.description(), error = %e, "ignoring undecodable cache entry");
        None
      }
    }
  }

  fn cached_entity(&self, key: &QueryKey) -> Option<T> {
    let entry = self.ctx.cache.get(&key.cache_key())?;
    serde_json::from_value(entry.into_data()?).ok()
  }

  /// Network GET, coalesced with identical requests in flight.
  pub(crate) async fn get(&self, key: &QueryKey, path: &str, params: &QueryParams) -> Result<Value> {
    let api = self.ctx.api.clone();
    let path = path.to_string();
    let params = params.clone();
    self
      .ctx
      .inflight
      .run(&key.cache_hash(), move || async move { api.get(&path, &params).await })
      .await
  }

  fn decode_items(raw: Vec<Value>) -> Vec<T> {
    raw
      .into_iter()
      .filter_map(|value| match serde_json::from_value(value) {
        Ok(item) => Some(item),
        Err(e) => {
          warn!(resource = %T::resource(), error = %e, "skipping malformed item");
          None
        }
      })
      .collect()
  }

  async fn fetch_network(&self, request: &ListRequest) -> Result<Page<T>> {
    debug!(key = %request.key.description(), "cache miss, fetching");
    let body = self.get(&request.key, &request.path, &request.params).await?;

    let normalizer = match request.key {
      QueryKey::Personalized { .. } => &self.personalized,
      _ => &self.normalizer,
    };
    let raw = normalizer.page(&body, T::collection_field());
    let pagination = raw
      .pagination
      .or_else(|| self.pagination_fallback.and_then(|f| f(&body, &request.params)));

    let page = Page {
      items: Self::decode_items(raw.items),
      pagination,
      user_preferences: raw.user_preferences,
    };
    self.store_page(&request.key.cache_key(), &request.params, &page);
    Ok(page)
  }

  fn store_page(&self, key: &CacheKey, params: &QueryParams, page: &Page<T>) {
    match serde_json::to_value(page) {
      Ok(value) => self.ctx.cache.put(key, value, Some(params.clone())),
      Err(e) => warn!(error = %e, "failed to cache page"),
    }
    for item in &page.items {
      self.cache_entity(item, None);
    }
  }

  /// Cache an entity under its id and slug, and under `requested_by` when
  /// the lookup used a key the record itself does not carry.
  fn cache_entity(&self, item: &T, requested_by: Option<&QueryKey>) {
    let value = match serde_json::to_value(item) {
      Ok(value) => value,
      Err(e) => {
        warn!(error = %e, "failed to cache entity");
        return;
      }
    };
    for key in item.entity_keys().iter().chain(requested_by) {
      self.ctx.cache.put(&key.cache_key(), value.clone(), None);
    }
  }

  /// Cache-first page fetch without touching the store.
  pub async fn fetch_page(
    &self,
    request: &ListRequest,
    force_refresh: bool,
  ) -> Result<CacheResult<Page<T>>> {
    if !force_refresh {
      if let Some(hit) = self.cached_page(&request.key) {
        return Ok(hit);
      }
    }
    Ok(CacheResult::from_network(self.fetch_network(request).await?))
  }

  // ==========================================================================
  // Store-publishing operations
  // ==========================================================================

  /// Publish a failure for `slot` if it is still current, and notify.
  pub(crate) fn fail(&self, slot: Slot, generation: u64, err: ApiError, failure: &str) -> ApiError {
    let message = err.user_message(failure);
    error!(resource = %T::resource(), error = %err, "{}", failure);

    let published = self.ctx.store.update_if_current(slot, generation, |s| {
      T::state_mut(s).set_failure(message.clone())
    });
    // 401s were already announced as LoginRequired by the client
    if published.is_some() && err != ApiError::Unauthorized {
      self.ctx.store.notify(Notification::Error(message));
    }
    err
  }

  /// Report a failed mutation. Mutations are not generation-tracked, so the
  /// error is always published.
  pub(crate) fn report(&self, err: ApiError, failure: &str) -> ApiError {
    let message = err.user_message(failure);
    error!(resource = %T::resource(), error = %err, "{}", failure);
    self
      .ctx
      .store
      .update(|s| T::state_mut(s).set_failure(message.clone()));
    if err != ApiError::Unauthorized {
      self.ctx.store.notify(Notification::Error(message));
    }
    err
  }

  /// Load a page and publish it with `apply`.
  pub async fn load_into<F>(
    &self,
    slot: Slot,
    request: &ListRequest,
    force_refresh: bool,
    failure: &str,
    apply: F,
  ) -> Result<Page<T>>
  where
    F: FnOnce(&mut StoreState, Page<T>),
  {
    let store = &self.ctx.store;
    let generation = store.begin(slot);

    if !force_refresh {
      if let Some(hit) = self.cached_page(&request.key) {
        let page = hit.data;
        store.update_if_current(slot, generation, |s| {
          apply(s, page.clone());
          T::state_mut(s).mark_success();
        });
        return Ok(page);
      }
    }

    let _loading = self.start_loading();

    match self.fetch_network(request).await {
      Ok(page) => {
        store.update_if_current(slot, generation, |s| {
          apply(s, page.clone());
          T::state_mut(s).mark_success();
        });
        Ok(page)
      }
      Err(e) => Err(self.fail(slot, generation, e, failure)),
    }
  }

  /// Raise the resource's loading flag until the guard drops.
  fn start_loading(&self) -> LoadingGuard<'_> {
    self.ctx.store.start_loading(
      |s| T::state_mut(s).start_loading(),
      |s| T::state_mut(s).end_loading(),
    )
  }

  /// Load a collection and replace the resource's items with it.
  pub async fn load_collection(
    &self,
    request: &ListRequest,
    force_refresh: bool,
    failure: &str,
  ) -> Result<Vec<T>> {
    let page = self
      .load_into(
        Slot::Items(T::resource()),
        request,
        force_refresh,
        failure,
        publish_page::<T>,
      )
      .await?;
    Ok(page.items)
  }

  /// Load a personalized collection. Cached separately from the plain one.
  pub async fn load_personalized(
    &self,
    request: &ListRequest,
    force_refresh: bool,
    failure: &str,
  ) -> Result<Personalized<T>> {
    let page = self
      .load_into(
        Slot::Items(T::resource()),
        request,
        force_refresh,
        failure,
        publish_page::<T>,
      )
      .await?;
    Ok(Personalized {
      items: page.items,
      user_preferences: page.user_preferences,
    })
  }

  /// Load one entity into `current_item`. A failed lookup leaves the
  /// previous `current_item` in place.
  pub async fn load_entity(
    &self,
    request: &EntityRequest,
    force_refresh: bool,
    failure: &str,
  ) -> Result<T> {
    let store = &self.ctx.store;
    let slot = Slot::Current(T::resource());
    let generation = store.begin(slot);

    if !force_refresh {
      if let Some(entity) = self.cached_entity(&request.key) {
        debug!(key = %request.key.description(), "cache hit");
        store.update_if_current(slot, generation, |s| {
          T::state_mut(s).set_current(entity.clone())
        });
        return Ok(entity);
      }
    }

    let _loading = self.start_loading();

    match self.fetch_entity(request).await {
      Ok(entity) => {
        self.cache_entity(&entity, Some(&request.key));
        store.update_if_current(slot, generation, |s| {
          T::state_mut(s).set_current(entity.clone())
        });
        Ok(entity)
      }
      Err(e) => Err(self.fail(slot, generation, e, failure)),
    }
  }

  async fn fetch_entity(&self, request: &EntityRequest) -> Result<T> {
    let not_found = || ApiError::NotFound(format!("{} '{}'", T::label(), request.lookup));

    let body = match self
      .get(&request.key, &request.path, &QueryParams::new())
      .await
    {
      Ok(body) => body,
      Err(ApiError::NotFound(_)) => return Err(not_found()),
      Err(e) => return Err(e),
    };

    let value = self
      .normalizer
      .entity(&body, T::entity_field())
      .ok_or_else(not_found)?;
    Ok(serde_json::from_value(value)?)
  }

  /// Fetch the next page and append entities not already present.
  ///
  /// Returns `Ok(false)` when the page adds nothing new, which callers treat
  /// as "no more data". `current_page` advances before the request and is
  /// rolled back if nothing was appended.
  pub async fn load_more(
    &self,
    request: &ListRequest,
    next_page: u64,
    failure: &str,
  ) -> Result<bool> {
    let store = &self.ctx.store;
    let slot = Slot::Items(T::resource());
    let generation = store.begin(slot);

    let previous_page = store.read(|s| {
      T::state(s)
        .pagination
        .as_ref()
        .map(|p| p.current_page)
    });
    let _loading = self.start_loading();
    store.update_if_current(slot, generation, |s| T::state_mut(s).set_page(next_page));

    let page = match self.fetch_page(request, false).await {
      Ok(result) => result.data,
      Err(e) => {
        if let Some(previous) = previous_page {
          store.update_if_current(slot, generation, |s| T::state_mut(s).set_page(previous));
        }
        return Err(self.fail(slot, generation, e, failure));
      }
    };

    let added = store.update_if_current(slot, generation, |s| {
      let state = T::state_mut(s);
      let added = state.append_unique(page.items);
      if added > 0 {
        if page.pagination.is_some() {
          state.pagination = page.pagination;
        }
      } else if let Some(previous) = previous_page {
        state.set_page(previous);
      }
      state.mark_success();
      added
    });

    match added {
      Some(0) => {
        debug!(resource = %T::resource(), page = next_page, "no more data");
        Ok(false)
      }
      Some(count) => {
        debug!(resource = %T::resource(), page = next_page, count, "appended page");
        Ok(true)
      }
      None => Ok(false),
    }
  }

  /// Drop every cached entry. The store is left untouched.
  pub fn clear_all_cache(&self) {
    self.ctx.cache.invalidate_all();
  }

  pub fn clear_errors(&self) {
    self.ctx.store.update(|s| T::state_mut(s).clear_error());
  }

  pub fn clear_collection(&self) {
    self.ctx.store.update(|s| T::state_mut(s).clear());
  }

  pub fn set_filters(&self, filters: &QueryParams) {
    self.ctx.store.update(|s| T::state_mut(s).set_filters(filters));
  }

  pub fn clear_filters(&self) {
    self.ctx.store.update(|s| T::state_mut(s).clear_filters());
  }

  pub fn set_page(&self, page: u64) {
    self.ctx.store.update(|s| T::state_mut(s).set_page(page));
  }
}

/// Replace items, pagination and preferences with `page`.
pub fn publish_page<T: Stored>(state: &mut StoreState, page: Page<T>) {
  let resource = T::state_mut(state);
  if page.user_preferences.is_some() {
    resource.user_preferences = page.user_preferences;
  }
  resource.set_items(page.items, page.pagination);
}
