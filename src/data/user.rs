//! User data access: profile, preferences and saved items.
//!
//! Every operation here needs a session. Loading the profile without a
//! stored token is a silent no-op; mutations without one fail with
//! [`ApiError::Unauthorized`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::api::normalize::ResponseNormalizer;
use crate::api::path_segment;
use crate::api::types::{City, EntityId, SavedJob, UserPreferences, UserProfile, DEFAULT_SAVED_STATUS};
use crate::cache::{QueryKey, QueryParams, Resource};
use crate::error::{ApiError, Result};
use crate::storage::{LocalStorage, SavedJobIds};
use crate::store::{LoadingGuard, Notification, Slot, StoreState};

use super::layer::DataContext;

const CONNECTION_MESSAGE: &str = "Unable to connect to server. Please check your connection.";

fn profile_key() -> QueryKey {
  QueryKey::Entity {
    resource: Resource::User,
    field: "profile",
    value: "me".to_string(),
  }
}

fn list_key(endpoint: &str) -> QueryKey {
  QueryKey::Collection {
    resource: Resource::User,
    endpoint: endpoint.to_string(),
    params: QueryParams::new(),
  }
}

#[derive(Clone)]
pub struct UserData {
  ctx: DataContext,
  normalizer: Arc<ResponseNormalizer>,
  saved_job_ids: SavedJobIds,
}

impl UserData {
  pub fn new(ctx: DataContext, storage: Arc<dyn LocalStorage>) -> Self {
    Self {
      ctx,
      normalizer: Arc::new(ResponseNormalizer::standard()),
      saved_job_ids: SavedJobIds::new(storage),
    }
  }

  fn require_session(&self) -> Result<()> {
    if self.ctx.api.has_token() {
      Ok(())
    } else {
      self.ctx.store.notify(Notification::LoginRequired);
      Err(ApiError::Unauthorized)
    }
  }

  /// Publish a failure to the user state and notify. Connection failures
  /// only notify.
  fn fail(&self, slot: Option<(Slot, u64)>, err: ApiError, failure: &str) -> ApiError {
    error!(error = %err, "{}", failure);

    if err.is_connection_failure() {
      self
        .ctx
        .store
        .notify(Notification::Error(CONNECTION_MESSAGE.to_string()));
      return err;
    }

    let message = err.user_message(failure);
    let apply = |s: &mut StoreState| s.user.error = Some(message.clone());
    let published = match slot {
      Some((slot, generation)) => self.ctx.store.update_if_current(slot, generation, apply),
      None => Some(self.ctx.store.update(apply)),
    };
    if published.is_some() && err != ApiError::Unauthorized {
      self.ctx.store.notify(Notification::Error(message));
    }
    err
  }

  /// Raise the user loading flag until the guard drops.
  fn start_loading(&self) -> LoadingGuard<'_> {
    self
      .ctx
      .store
      .start_loading(|s| s.user.start_loading(), |s| s.user.end_loading())
  }

  fn cached<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    let entry = self.ctx.cache.get(&key.cache_key())?;
    serde_json::from_value(entry.into_data()?).ok()
  }

  fn cache<T: Serialize>(&self, key: &QueryKey, value: &T) {
    match serde_json::to_value(value) {
      Ok(value) => self.ctx.cache.put(&key.cache_key(), value, None),
      Err(e) => warn!(error = %e, "failed to cache user data"),
    }
  }

  fn decode_list<T: DeserializeOwned>(&self, body: &Value, collection: &str) -> Vec<T> {
    self
      .normalizer
      .items(body, collection)
      .into_iter()
      .filter_map(|value| serde_json::from_value(value).ok())
      .collect()
  }

  fn decode_profile(&self, body: &Value) -> Result<UserProfile> {
    let value = self
      .normalizer
      .entity(body, "user")
      .ok_or_else(|| ApiError::NotFound("User profile".to_string()))?;
    Ok(serde_json::from_value(value)?)
  }

  /// `GET /users/profile`. Returns `Ok(None)` without a request when no
  /// token is stored.
  pub async fn load_profile(&self, force_refresh: bool) -> Result<Option<UserProfile>> {
    if !self.ctx.api.has_token() {
      debug!("no auth token, skipping profile load");
      return Ok(None);
    }

    let store = &self.ctx.store;
    let key = profile_key();
    let generation = store.begin(Slot::Profile);

    if !force_refresh {
      if let Some(profile) = self.cached::<UserProfile>(&key) {
        debug!("profile cache hit");
        store.update_if_current(Slot::Profile, generation, |s| {
          s.user.profile = Some(profile.clone())
        });
        return Ok(Some(profile));
      }
    }

    let _loading = self.start_loading();

    let result = match self.ctx.api.get("/users/profile", &QueryParams::new()).await {
      Ok(body) => self.decode_profile(&body),
      Err(e) => Err(e),
    };

    match result {
      Ok(profile) => {
        self.cache(&key, &profile);
        store.update_if_current(Slot::Profile, generation, |s| {
          s.user.profile = Some(profile.clone())
        });
        Ok(Some(profile))
      }
      Err(e) => Err(self.fail(
        Some((Slot::Profile, generation)),
        e,
        "Failed to load profile",
      )),
    }
  }

  /// `PUT /users/profile`
  pub async fn update_profile(&self, changes: &Value) -> Result<UserProfile> {
    self.require_session()?;
    let _loading = self.start_loading();

    let result = match self.ctx.api.put("/users/profile", changes.clone()).await {
      Ok(body) => self.decode_profile(&body),
      Err(e) => Err(e),
    };

    match result {
      Ok(profile) => {
        info!("profile updated");
        self.cache(&profile_key(), &profile);
        // Supersede any profile load still in flight
        let generation = self.ctx.store.begin(Slot::Profile);
        self.ctx.store.update_if_current(Slot::Profile, generation, |s| {
          s.user.profile = Some(profile.clone())
        });
        self
          .ctx
          .store
          .notify(Notification::Success("Profile updated successfully".to_string()));
        Ok(profile)
      }
      Err(e) => Err(self.fail(None, e, "Failed to update profile")),
    }
  }

  /// `PUT /users/preferences`. The stored profile is updated in place.
  ///
  /// Cached personalized results still reflect the old preferences until
  /// reloaded with `force_refresh`.
  pub async fn update_preferences(&self, preferences: &UserPreferences) -> Result<UserPreferences> {
    self.require_session()?;
    let body = serde_json::to_value(preferences)?;

    if let Err(e) = self.ctx.api.put("/users/preferences", body.clone()).await {
      return Err(self.fail(None, e, "Failed to update preferences"));
    }
    info!("preferences updated");

    let profile = self.ctx.store.update(|s| {
      let profile = s.user.profile.as_mut()?;
      if let Value::Object(fields) = &body {
        for (k, v) in fields {
          profile.extra.insert(k.clone(), v.clone());
        }
      }
      Some(profile.clone())
    });
    if let Some(profile) = profile {
      self.cache(&profile_key(), &profile);
    }

    self
      .ctx
      .store
      .notify(Notification::Success("Preferences updated successfully".to_string()));
    Ok(preferences.clone())
  }

  async fn load_list<T>(
    &self,
    slot: Slot,
    endpoint: &str,
    collection: &str,
    force_refresh: bool,
    failure: &str,
    publish: impl Fn(&mut StoreState, Vec<T>),
  ) -> Result<Vec<T>>
  where
    T: Clone + Serialize + DeserializeOwned,
  {
    self.require_session()?;
    let key = list_key(endpoint);
    let generation = self.ctx.store.begin(slot);

    if !force_refresh {
      if let Some(items) = self.cached::<Vec<T>>(&key) {
        debug!(key = %key.description(), "cache hit");
        self
          .ctx
          .store
          .update_if_current(slot, generation, |s| publish(s, items.clone()));
        return Ok(items);
      }
    }

    let _loading = self.start_loading();

    match self.ctx.api.get(endpoint, &QueryParams::new()).await {
      Ok(body) => {
        let items: Vec<T> = self.decode_list(&body, collection);
        self.cache(&key, &items);
        self
          .ctx
          .store
          .update_if_current(slot, generation, |s| publish(s, items.clone()));
        Ok(items)
      }
      Err(e) => Err(self.fail(Some((slot, generation)), e, failure)),
    }
  }

  /// `GET /users/saved-cities`
  pub async fn load_saved_cities(&self, force_refresh: bool) -> Result<Vec<City>> {
    self
      .load_list(
        Slot::SavedCities,
        "/users/saved-cities",
        "cities",
        force_refresh,
        "Failed to load saved cities",
        |s, cities| s.user.saved_cities = cities,
      )
      .await
  }

  /// `GET /users/saved-jobs`
  pub async fn load_saved_jobs(&self, force_refresh: bool) -> Result<Vec<SavedJob>> {
    self
      .load_list(
        Slot::SavedJobs,
        "/users/saved-jobs",
        "saved_jobs",
        force_refresh,
        "Failed to load saved jobs",
        |s, jobs| s.user.saved_jobs = jobs,
      )
      .await
  }

  /// Apply `change` to the saved-jobs list and keep the cache in step.
  fn update_saved_jobs(&self, change: impl FnOnce(&mut Vec<SavedJob>)) {
    // Supersede any saved-jobs load still in flight
    self.ctx.store.begin(Slot::SavedJobs);
    let jobs = self.ctx.store.update(|s| {
      change(&mut s.user.saved_jobs);
      s.user.saved_jobs.clone()
    });
    self.cache(&list_key("/users/saved-jobs"), &jobs);
  }

  /// `POST /users/saved-jobs`. `status` defaults to "Interested".
  pub async fn save_job(&self, job_id: &EntityId, status: Option<&str>) -> Result<SavedJob> {
    self.require_session()?;
    let saved = SavedJob {
      job_id: job_id.clone(),
      status: status.unwrap_or(DEFAULT_SAVED_STATUS).to_string(),
    };

    let body = json!({"job_id": saved.job_id, "status": saved.status});
    if let Err(e) = self.ctx.api.post("/users/saved-jobs", Some(body)).await {
      return Err(self.fail(None, e, "Failed to save job"));
    }

    self.update_saved_jobs(|jobs| {
      jobs.retain(|j| j.job_id != saved.job_id);
      jobs.push(saved.clone());
    });
    info!(%job_id, status = %saved.status, "job saved");
    self
      .ctx
      .store
      .notify(Notification::Success("Job saved".to_string()));
    Ok(saved)
  }

  /// `PUT /users/saved-jobs/:id`
  pub async fn update_saved_job(&self, job_id: &EntityId, status: &str) -> Result<()> {
    self.require_session()?;
    let path = format!("/users/saved-jobs/{}", path_segment(&job_id.to_string()));

    if let Err(e) = self.ctx.api.put(&path, json!({"status": status})).await {
      return Err(self.fail(None, e, "Failed to update saved job"));
    }

    self.update_saved_jobs(|jobs| {
      for job in jobs.iter_mut().filter(|j| &j.job_id == job_id) {
        job.status = status.to_string();
      }
    });
    self
      .ctx
      .store
      .notify(Notification::Success("Saved job updated".to_string()));
    Ok(())
  }

  /// `DELETE /users/saved-jobs/:id`
  pub async fn remove_saved_job(&self, job_id: &EntityId) -> Result<()> {
    self.require_session()?;
    let path = format!("/users/saved-jobs/{}", path_segment(&job_id.to_string()));

    if let Err(e) = self.ctx.api.delete(&path).await {
      return Err(self.fail(None, e, "Failed to remove saved job"));
    }

    self.update_saved_jobs(|jobs| jobs.retain(|j| &j.job_id != job_id));
    self
      .ctx
      .store
      .notify(Notification::Success("Job removed from saved".to_string()));
    Ok(())
  }

  /// Jobs bookmarked on this device.
  pub fn local_saved_jobs(&self) -> &SavedJobIds {
    &self.saved_job_ids
  }

  pub fn clear_errors(&self) {
    self.ctx.store.update(|s| s.user.error = None);
  }
}
