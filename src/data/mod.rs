//! Data-access layer: per-resource operations on top of the API client,
//! memory cache and state store.

pub mod auth;
pub mod cities;
pub mod jobs;
pub mod layer;
pub mod user;

use std::sync::Arc;

use crate::api::{ApiClient, Transport};
use crate::cache::MemoryCache;
use crate::storage::LocalStorage;
use crate::store::{ClientStateStore, Notification};

pub use auth::{AuthData, Credentials, Registration, Session};
pub use cities::CitiesData;
pub use jobs::JobsData;
pub use layer::{DataContext, DataLayer, EntityRequest, ListRequest, Page};
pub use user::UserData;

/// All data-access operations, sharing one client, cache and store.
#[derive(Clone)]
pub struct DataAccess {
  pub auth: AuthData,
  pub cities: CitiesData,
  pub jobs: JobsData,
  pub user: UserData,
  ctx: DataContext,
}

impl DataAccess {
  pub fn new(
    transport: Arc<dyn Transport>,
    storage: Arc<dyn LocalStorage>,
    cache: Arc<MemoryCache>,
  ) -> Self {
    let store = Arc::new(ClientStateStore::new());

    let notifier = Arc::clone(&store);
    let api = ApiClient::new(transport, Arc::clone(&storage))
      .with_unauthorized_handler(move || notifier.notify(Notification::LoginRequired));

    let ctx = DataContext::new(api, cache, store);
    Self {
      auth: AuthData::new(ctx.clone()),
      cities: CitiesData::new(ctx.clone()),
      jobs: JobsData::new(ctx.clone()),
      user: UserData::new(ctx.clone(), storage),
      ctx,
    }
  }

  pub fn store(&self) -> &Arc<ClientStateStore> {
    &self.ctx.store
  }

  pub fn api(&self) -> &ApiClient {
    &self.ctx.api
  }

  pub fn cache(&self) -> &Arc<MemoryCache> {
    &self.ctx.cache
  }

  /// Drop every cached entry. The store keeps what it has.
  pub fn clear_all_cache(&self) {
    self.ctx.cache.invalidate_all();
  }
}
