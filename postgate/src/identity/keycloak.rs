use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use reqwest::Url;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{
	same_identity, Clock, HttpTransport, IdentityError, IdentityResolver, SystemClock, TtlCache,
	DEFAULT_CACHE_TTL,
};

#[derive(Clone, Debug)]
pub struct KeycloakConfig {
	pub base_url: String,
	pub realm: String,
	pub client_id: String,
	pub client_secret: String,
	pub cache_ttl: Duration,
}

/// Looks users up through the Keycloak admin API, authenticating with a
/// client-credentials grant. A fresh token is requested for every lookup
/// that misses the cache.
pub struct Keycloak<C = SystemClock> {
	base: Url,
	config: KeycloakConfig,
	transport: Arc<dyn HttpTransport>,
	cache: TtlCache<C>,
}

#[derive(Deserialize)]
struct TokenResponse {
	#[serde(default)]
	access_token: Option<String>,
}

#[derive(Deserialize)]
struct KeycloakUser {
	#[serde(default)]
	username: Option<String>,
	#[serde(default)]
	email: Option<String>,
	#[serde(default)]
	enabled: bool,
}

impl Keycloak {
	pub fn new(config: KeycloakConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, IdentityError> {
		Self::with_clock(config, transport, SystemClock)
	}
}

impl<C: Clock> Keycloak<C> {
	pub fn with_clock(
		config: KeycloakConfig,
		transport: Arc<dyn HttpTransport>,
		clock: C,
	) -> Result<Self, IdentityError> {
		let base = Url::parse(&config.base_url)
			.ok()
			.filter(|url| !url.cannot_be_a_base())
			.ok_or_else(|| IdentityError::BaseUrl(config.base_url.clone()))?;

		let ttl = if config.cache_ttl.is_zero() {
			warn!(provider = "keycloak", "no positive cache ttl configured, using 120 seconds");
			DEFAULT_CACHE_TTL
		} else {
			config.cache_ttl
		};

		Ok(Self {
			base,
			config,
			transport,
			cache: TtlCache::with_clock(ttl, clock),
		})
	}

	fn endpoint(&self, segments: &[&str]) -> String {
		let mut url = self.base.clone();
		// new() rejected urls that cannot take path segments
		if let Ok(mut path) = url.path_segments_mut() {
			path.pop_if_empty().extend(segments);
		}
		url.into()
	}

	async fn token(&self) -> Result<String, IdentityError> {
		let url = self.endpoint(&[
			"realms",
			&self.config.realm,
			"protocol",
			"openid-connect",
			"token",
		]);

		let body = self
			.transport
			.post_form(
				&url,
				&[
					("grant_type", "client_credentials"),
					("client_id", &self.config.client_id),
					("client_secret", &self.config.client_secret),
				],
			)
			.await
			.map_err(|err| {
				warn!(%err, "keycloak token request failed");
				err
			})?;

		let token: TokenResponse = serde_json::from_slice(&body)?;
		match token.access_token {
			Some(token) if !token.is_empty() => Ok(token),
			_ => {
				warn!("keycloak token response missing access_token");
				Err(IdentityError::EmptyToken)
			}
		}
	}

	async fn users(
		&self,
		bearer: &str,
		query: &[(&str, &str)],
	) -> Result<Vec<KeycloakUser>, IdentityError> {
		let url = self.endpoint(&["admin", "realms", &self.config.realm, "users"]);
		let body = self.transport.get(&url, query, bearer).await?;

		Ok(serde_json::from_slice(&body)?)
	}

	// Exact match first, then one broader search. Callers filter the results.
	async fn find_users(
		&self,
		bearer: &str,
		field: &str,
		value: &str,
	) -> Result<Vec<KeycloakUser>, IdentityError> {
		match self.users(bearer, &[(field, value), ("exact", "true")]).await {
			Ok(users) => Ok(users),
			Err(err) => {
				warn!(field, value, %err, "keycloak exact lookup failed, falling back to search");

				self.users(bearer, &[("search", value)]).await.map_err(|err| {
					warn!(field, value, %err, "keycloak search lookup failed");
					err
				})
			}
		}
	}
}

#[async_trait]
impl<C: Clock + 'static> IdentityResolver for Keycloak<C> {
	async fn resolve_user_email(&self, user: &str) -> Result<Option<String>, IdentityError> {
		let key = format!("email_by_user:{}", user.to_lowercase());
		if let Some(cached) = self.cache.get(&key) {
			debug!(user, found = cached.found, "keycloak cache hit");
			return Ok(cached.found.then_some(cached.value));
		}

		let bearer = self.token().await?;
		let users = self.find_users(&bearer, "username", user).await?;

		let email = users
			.into_iter()
			.filter(|u| u.enabled)
			.filter(|u| u.username.as_deref().is_some_and(|name| same_identity(name, user)))
			.find_map(|u| u.email.filter(|email| !email.is_empty()))
			.map(|email| email.to_lowercase());

		match &email {
			Some(email) => self.cache.put(key, email.as_str(), true),
			None => self.cache.put(key, "", false),
		}

		Ok(email)
	}

	async fn email_exists(&self, email: &str) -> Result<bool, IdentityError> {
		let key = format!("email_exists:{}", email.to_lowercase());
		if let Some(cached) = self.cache.get(&key) {
			debug!(email, found = cached.found, "keycloak cache hit");
			return Ok(cached.found);
		}

		let bearer = self.token().await?;
		let users = self.find_users(&bearer, "email", email).await?;

		let exists = users.iter().any(|u| {
			u.enabled && u.email.as_deref().is_some_and(|e| same_identity(e, email))
		});

		self.cache.put(key, "", exists);
		Ok(exists)
	}
}
