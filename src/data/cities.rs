//! Cities data access.

use serde_json::Value;
use tracing::info;

use crate::api::path_segment;
use crate::api::types::{City, EntityId, Personalized};
use crate::cache::{QueryKey, QueryParams, Resource};
use crate::error::{ApiError, Result};
use crate::store::{Notification, Slot};

use super::layer::{DataContext, DataLayer, EntityRequest, ListRequest};

fn collection(endpoint: &str, params: &QueryParams) -> ListRequest {
  ListRequest {
    key: QueryKey::Collection {
      resource: Resource::Cities,
      endpoint: endpoint.to_string(),
      params: params.clone(),
    },
    path: endpoint.to_string(),
    params: params.clone(),
  }
}

#[derive(Clone)]
pub struct CitiesData {
  layer: DataLayer<City>,
}

impl CitiesData {
  pub fn new(ctx: DataContext) -> Self {
    Self {
      layer: DataLayer::new(ctx),
    }
  }

  pub fn layer(&self) -> &DataLayer<City> {
    &self.layer
  }

  /// `GET /cities`
  pub async fn load_cities(&self, params: &QueryParams, force_refresh: bool) -> Result<Vec<City>> {
    self
      .layer
      .load_collection(
        &collection("/cities", params),
        force_refresh,
        "Failed to load cities",
      )
      .await
  }

  /// `GET /cities/slug/:slug`
  pub async fn load_city_by_slug(&self, slug: &str, force_refresh: bool) -> Result<City> {
    let request = EntityRequest {
      key: QueryKey::Entity {
        resource: Resource::Cities,
        field: "slug",
        value: slug.to_string(),
      },
      path: format!("/cities/slug/{}", path_segment(slug)),
      lookup: slug.to_string(),
    };
    self
      .layer
      .load_entity(&request, force_refresh, "Failed to load city details")
      .await
  }

  /// `GET /cities/:id`
  pub async fn load_city_by_id(&self, id: &EntityId, force_refresh: bool) -> Result<City> {
    let id = id.to_string();
    let request = EntityRequest {
      key: QueryKey::Entity {
        resource: Resource::Cities,
        field: "id",
        value: id.clone(),
      },
      path: format!("/cities/{}", path_segment(&id)),
      lookup: id,
    };
    self
      .layer
      .load_entity(&request, force_refresh, "Failed to load city details")
      .await
  }

  /// Append page `next_page` of `GET /cities` to the loaded cities.
  pub async fn load_more_cities(&self, next_page: u64, params: &QueryParams) -> Result<bool> {
    let params = params.clone().with("page", next_page);
    self
      .layer
      .load_more(
        &collection("/cities", &params),
        next_page,
        "Failed to load more cities",
      )
      .await
  }

  /// `GET /cities/search/:query`
  pub async fn search_cities(
    &self,
    query: &str,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<City>> {
    let query = query.trim();
    if query.is_empty() {
      return Err(ApiError::Validation("Search query cannot be empty".to_string()));
    }

    let request = ListRequest {
      key: QueryKey::Search {
        resource: Resource::Cities,
        query: query.to_string(),
        params: params.clone(),
      },
      path: format!("/cities/search/{}", path_segment(query)),
      params: params.clone(),
    };
    self
      .layer
      .load_collection(&request, force_refresh, "Failed to search cities")
      .await
  }

  /// `GET /cities/filter`
  pub async fn load_cities_with_filters(
    &self,
    filters: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<City>> {
    self
      .layer
      .load_collection(
        &collection("/cities/filter", filters),
        force_refresh,
        "Failed to load cities with filters",
      )
      .await
  }

  /// `GET /cities/popular`
  pub async fn load_popular_cities(&self, force_refresh: bool) -> Result<Vec<City>> {
    self
      .layer
      .load_collection(
        &collection("/cities/popular", &QueryParams::new()),
        force_refresh,
        "Failed to load popular cities",
      )
      .await
  }

  /// `GET /cities/country/:country`
  pub async fn load_cities_by_country(
    &self,
    country: &str,
    force_refresh: bool,
  ) -> Result<Vec<City>> {
    let endpoint = format!("/cities/country/{}", path_segment(country));
    self
      .layer
      .load_collection(
        &collection(&endpoint, &QueryParams::new()),
        force_refresh,
        "Failed to load cities by country",
      )
      .await
  }

  /// `GET /cities/saved`, published to the user's saved cities.
  pub async fn load_saved_cities(
    &self,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Vec<City>> {
    let page = self
      .layer
      .load_into(
        Slot::SavedCities,
        &collection("/cities/saved", params),
        force_refresh,
        "Failed to load saved cities",
        |s, page| s.user.saved_cities = page.items,
      )
      .await?;
    Ok(page.items)
  }

  /// `POST /cities/:id/save`. Returns whether the city is saved afterwards.
  ///
  /// Cached saved-city lists are not invalidated; reload them with
  /// `force_refresh` to see the change.
  pub async fn toggle_save_city(&self, id: &EntityId) -> Result<bool> {
    let path = format!("/cities/{}/save", path_segment(&id.to_string()));
    let body = match self.layer.context().api.post(&path, None).await {
      Ok(body) => body,
      Err(e) => return Err(self.layer.report(e, "Failed to save city")),
    };

    let saved = saved_flag(&body).unwrap_or(true);
    info!(%id, saved, "toggled saved city");
    let message = if saved {
      "City saved"
    } else {
      "City removed from saved"
    };
    self
      .layer
      .store()
      .notify(Notification::Success(message.to_string()));
    Ok(saved)
  }

  /// `GET /cities/personalized`
  pub async fn load_personalized_cities(
    &self,
    params: &QueryParams,
    force_refresh: bool,
  ) -> Result<Personalized<City>> {
    let request = ListRequest {
      key: QueryKey::Personalized {
        resource: Resource::Cities,
        params: params.clone(),
      },
      path: "/cities/personalized".to_string(),
      params: params.clone(),
    };
    self
      .layer
      .load_personalized(
        &request,
        force_refresh,
        "Failed to load personalized cities",
      )
      .await
  }

  pub fn clear_all_cache(&self) {
    self.layer.clear_all_cache();
  }

  pub fn clear_errors(&self) {
    self.layer.clear_errors();
  }

  pub fn clear_cities(&self) {
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

/// `saved` from a toggle response, at the top level or under `data`.
fn saved_flag(body: &Value) -> Option<bool> {
  body
    .get("saved")
    .or_else(|| body.get("data").and_then(|d| d.get("saved")))
    .and_then(Value::as_bool)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::data::test_support::harness;
  use serde_json::json;

  #[tokio::test]
  async fn test_popular_bare_data_list() {
    let h = harness();
    h.transport.on(
      "GET /cities/popular",
      200,
      json!({"data": [{"id": 1, "name": "Lisbon"}, {"id": 2, "name": "Bali"}]}),
    );

    let cities = h.data.cities.load_popular_cities(false).await.unwrap();
    assert_eq!(cities.len(), 2);
    assert_eq!(h.data.store().cities().items.len(), 2);
  }

  #[tokio::test]
  async fn test_entity_cached_from_collection() {
    let h = harness();
    h.transport.on(
      "GET /cities",
      200,
      json!({"cities": [{"id": 3, "slug": "porto", "name": "Porto"}]}),
    );

    h.data
      .cities
      .load_cities(&QueryParams::new(), false)
      .await
      .unwrap();
    let porto = h.data.cities.load_city_by_slug("porto", false).await.unwrap();
    let same = h
      .data
      .cities
      .load_city_by_id(&EntityId::Int(3), false)
      .await
      .unwrap();

    assert_eq!(porto, same);
    assert_eq!(h.transport.total_calls(), 1);
    assert_eq!(
      h.data.store().cities().current_item.map(|c| c.name),
      Some("Porto".to_string())
    );
  }

  #[tokio::test]
  async fn test_blank_search_rejected_without_request() {
    let h = harness();
    let err = h
      .data
      .cities
      .search_cities("   ", &QueryParams::new(), false)
      .await
      .unwrap_err();
    assert!(matches!(err, ApiError::Validation(_)));
    assert_eq!(h.transport.total_calls(), 0);
  }

  #[tokio::test]
  async fn test_search_path_encoded() {
    let h = harness();
    h.transport
      .on("GET /cities/search/new%20york", 200, json!({"data": {"cities": []}}));
    h.data
      .cities
      .search_cities("new york", &QueryParams::new(), false)
      .await
      .unwrap();
    assert_eq!(h.transport.calls("/cities/search/new%20york"), 1);
  }

  #[tokio::test]
  async fn test_saved_cities_published_to_user() {
    let h = harness();
    h.transport.on(
      "GET /cities/saved",
      200,
      json!({"data": {"cities": [{"id": 8, "name": "Tbilisi"}], "pagination": {"page": 1}}}),
    );

    h.data
      .cities
      .load_saved_cities(&QueryParams::new(), false)
      .await
      .unwrap();
    let state = h.data.store().snapshot();
    assert_eq!(state.user.saved_cities.len(), 1);
    assert!(state.cities.items.is_empty());
  }

  #[tokio::test]
  async fn test_toggle_save_city() {
    let h = harness();
    let mut rx = h.data.store().subscribe();
    h.transport
      .on("POST /cities/4/save", 200, json!({"data": {"saved": false}}));

    let saved = h
      .data
      .cities
      .toggle_save_city(&EntityId::Int(4))
      .await
      .unwrap();
    assert!(!saved);
    assert_eq!(
      rx.recv().await,
      Some(Notification::Success("City removed from saved".to_string()))
    );
  }

  #[tokio::test]
  async fn test_toggle_save_failure_reported() {
    let h = harness();
    h.transport
      .on("POST /cities/4/save", 500, json!({"message": "Database down"}));

    let err = h
      .data
      .cities
      .toggle_save_city(&EntityId::Int(4))
      .await
      .unwrap_err();
    assert_eq!(err, ApiError::network(Some(500), "Database down"));
    assert_eq!(
      h.data.store().cities().error.as_deref(),
      Some("Database down")
    );
  }
}
