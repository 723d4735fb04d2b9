//! Session management: login, registration, logout and the health check.
//!
//! A successful login or registration persists the returned token through
//! [`ApiClient::set_token`](crate::api::ApiClient::set_token), so every later
//! request carries it. Logging out forgets the token and everything cached
//! on behalf of the session.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{error, info};

use crate::api::types::UserProfile;
use crate::cache::QueryParams;
use crate::error::{ApiError, Result};
use crate::store::{Notification, Slot};

use super::layer::DataContext;

static EMAIL: Lazy<Regex> =
  Lazy::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("valid regex"));

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
  pub email: String,
  pub password: String,
}

impl Credentials {
  pub fn validate(&self) -> Result<()> {
    validate_email(&self.email)?;
    if self.password.is_empty() {
      return Err(ApiError::Validation("Password is required".to_string()));
    }
    Ok(())
  }
}

/// Sign-up payload. Profile fields beyond the required ones go in `extra`.
#[derive(Debug, Clone, Serialize)]
pub struct Registration {
  pub email: String,
  pub password: String,
  #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
  pub display_name: Option<String>,
  #[serde(flatten)]
  pub extra: Map<String, Value>,
}

impl Registration {
  pub fn validate(&self) -> Result<()> {
    validate_email(&self.email)?;

    let password = &self.password;
    if password.chars().count() < MIN_PASSWORD_LEN {
      return Err(ApiError::Validation(format!(
        "Password must be at least {} characters",
        MIN_PASSWORD_LEN
      )));
    }
    let mixed = password.chars().any(|c| c.is_ascii_lowercase())
      && password.chars().any(|c| c.is_ascii_uppercase())
      && password.chars().any(|c| c.is_ascii_digit());
    if !mixed {
      return Err(ApiError::Validation(
        "Password must contain at least one uppercase letter, one lowercase letter, and one number"
          .to_string(),
      ));
    }

    if let Some(name) = &self.display_name {
      let len = name.chars().count();
      if !(2..128).contains(&len) {
        return Err(ApiError::Validation(
          "Display name must be between 2 and 127 characters".to_string(),
        ));
      }
    }
    Ok(())
  }
}

fn validate_email(email: &str) -> Result<()> {
  if email.trim().is_empty() {
    return Err(ApiError::Validation("Email is required".to_string()));
  }
  if !EMAIL.is_match(email.trim()) {
    return Err(ApiError::Validation(
      "Please enter a valid email address".to_string(),
    ));
  }
  Ok(())
}

/// What the backend hands back for a new session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
  pub token: String,
  pub user: Option<UserProfile>,
}

/// `field` at the top level or inside a `data` envelope.
fn session_field<'a>(body: &'a Value, field: &str) -> Option<&'a Value> {
  body
    .get(field)
    .or_else(|| body.get("data").and_then(|data| data.get(field)))
}

fn decode_session(body: &Value) -> Result<Session> {
  let token = session_field(body, "token")
    .and_then(Value::as_str)
    .filter(|t| !t.is_empty())
    .ok_or_else(|| ApiError::Decode("response carried no token".to_string()))?;
  let user = match session_field(body, "user") {
    Some(Value::Null) | None => None,
    Some(user) => Some(serde_json::from_value(user.clone())?),
  };
  Ok(Session {
    token: token.to_string(),
    user,
  })
}

#[derive(Clone)]
pub struct AuthData {
  ctx: DataContext,
}

impl AuthData {
  pub fn new(ctx: DataContext) -> Self {
    Self { ctx }
  }

  pub fn is_authenticated(&self) -> bool {
    self.ctx.api.has_token()
  }

  /// `POST /auth/login`
  pub async fn login(&self, credentials: &Credentials) -> Result<Session> {
    credentials.validate()?;
    let body = serde_json::to_value(credentials)?;
    let session = self.authenticate("/auth/login", body, "Login failed").await?;
    info!(email = %credentials.email, "logged in");
    self
      .ctx
      .store
      .notify(Notification::Success("Logged in successfully".to_string()));
    Ok(session)
  }

  /// `POST /auth/register`
  pub async fn register(&self, registration: &Registration) -> Result<Session> {
    registration.validate()?;
    let body = serde_json::to_value(registration)?;
    let session = self
      .authenticate("/auth/register", body, "Registration failed")
      .await?;
    info!(email = %registration.email, "registered");
    self
      .ctx
      .store
      .notify(Notification::Success("Account created successfully".to_string()));
    Ok(session)
  }

  async fn authenticate(&self, path: &str, body: Value, failure: &str) -> Result<Session> {
    let session = match self.ctx.api.post(path, Some(body)).await {
      Ok(body) => decode_session(&body),
      Err(e) => Err(e),
    }
    .map_err(|e| self.fail(e, failure))?;

    self.ctx.api.set_token(&session.token)?;
    // Results cached for a previous session no longer apply
    self.ctx.cache.invalidate_all();

    let generation = self.ctx.store.begin(Slot::Profile);
    self.ctx.store.update_if_current(Slot::Profile, generation, |s| {
      s.user.profile = session.user.clone();
      s.user.error = None;
    });
    Ok(session)
  }

  fn fail(&self, err: ApiError, failure: &str) -> ApiError {
    let message = err.user_message(failure);
    error!(error = %err, "{}", failure);
    self.ctx.store.update(|s| s.user.error = Some(message.clone()));
    self.ctx.store.notify(Notification::Error(message));
    err
  }

  /// Forget the token, the signed-in user's state and every cached entry.
  pub fn logout(&self) -> Result<()> {
    self.ctx.api.clear_token()?;
    self.ctx.cache.invalidate_all();

    // Loads still in flight must not repopulate the cleared state
    for slot in [Slot::Profile, Slot::SavedCities, Slot::SavedJobs] {
      self.ctx.store.begin(slot);
    }
    self.ctx.store.update(|s| {
      s.user.profile = None;
      s.user.saved_cities.clear();
      s.user.saved_jobs.clear();
      s.user.error = None;
    });

    info!("logged out");
    self
      .ctx
      .store
      .notify(Notification::Success("Logged out".to_string()));
    Ok(())
  }

  /// `GET /health`. Returns the backend's status payload as is.
  pub async fn check_health(&self) -> Result<Value> {
    self.ctx.api.get("/health", &QueryParams::new()).await
  }
}
