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
pub struct AuthentikConfig {
	pub base_url: String,
	pub api_token: String,
	pub cache_ttl: Duration,
}

/// Looks users up through the Authentik core API with a static API token.
pub struct Authentik<C = SystemClock> {
	users_url: String,
	token: String,
	transport: Arc<dyn HttpTransport>,
	cache: TtlCache<C>,
}

#[derive(Deserialize)]
struct UsersResponse {
	#[serde(default)]
	results: Vec<AuthentikUser>,
}

#[derive(Deserialize)]
struct AuthentikUser {
	#[serde(default)]
	username: Option<String>,
	#[serde(default)]
	email: Option<String>,
	#[serde(default)]
	is_active: bool,
}

impl Authentik {
	pub fn new(config: AuthentikConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, IdentityError> {
		Self::with_clock(config, transport, SystemClock)
	}
}

impl<C: Clock> Authentik<C> {
	pub fn with_clock(
		config: AuthentikConfig,
		transport: Arc<dyn HttpTransport>,
		clock: C,
	) -> Result<Self, IdentityError> {
		let token = config.api_token.trim();
		if token.is_empty() {
			return Err(IdentityError::MissingToken);
		}

		let mut url = Url::parse(&config.base_url)
			.map_err(|_| IdentityError::BaseUrl(config.base_url.clone()))?;
		url.path_segments_mut()
			.map_err(|_| IdentityError::BaseUrl(config.base_url.clone()))?
			.pop_if_empty()
			// The trailing empty segment keeps the slash the API insists on
			.extend(["api", "v3", "core", "users", ""]);

		let ttl = if config.cache_ttl.is_zero() {
			warn!(provider = "authentik", "no positive cache ttl configured, using 120 seconds");
			DEFAULT_CACHE_TTL
		} else {
			config.cache_ttl
		};

		Ok(Self {
			users_url: url.into(),
			token: token.to_owned(),
			transport,
			cache: TtlCache::with_clock(ttl, clock),
		})
	}

	async fn users(&self, field: &str, value: &str) -> Result<Vec<AuthentikUser>, IdentityError> {
		let query = [(field, value), ("is_active", "true")];

		let body = self
			.transport
			.get(&self.users_url, &query, &self.token)
			.await
			.map_err(|err| {
				warn!(field, value, %err, "authentik user lookup failed");
				err
			})?;

		let response: UsersResponse = serde_json::from_slice(&body).map_err(|err| {
			warn!(field, value, %err, "authentik response could not be decoded");
			err
		})?;

		Ok(response.results)
	}
}

#[async_trait]
impl<C: Clock + 'static> IdentityResolver for Authentik<C> {
	async fn resolve_user_email(&self, user: &str) -> Result<Option<String>, IdentityError> {
		let key = format!("email_by_user:{}", user.to_lowercase());
		if let Some(cached) = self.cache.get(&key) {
			debug!(user, found = cached.found, "authentik cache hit");
			return Ok(cached.found.then_some(cached.value));
		}

		let email = self
			.users("username", user)
			.await?
			.into_iter()
			.filter(|u| u.is_active)
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
			debug!(email, found = cached.found, "authentik cache hit");
			return Ok(cached.found);
		}

		let exists = self.users("email", email).await?.iter().any(|u| {
			u.is_active && u.email.as_deref().is_some_and(|e| same_identity(e, email))
		});

		self.cache.put(key, "", exists);
		Ok(exists)
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::identity::{
		cache::test::ManualClock,
		fake::{server_error, Call, FakeTransport},
	};

	const USERS_PATH: &str = "/authentik/api/v3/core/users/";

	fn authentik<F>(handler: F) -> (Authentik, Arc<FakeTransport>)
	where
		F: Fn(&Call) -> Result<String, IdentityError> + Send + Sync + 'static,
	{
		let transport = Arc::new(FakeTransport::new(handler));
		let config = AuthentikConfig {
			base_url: "https://idp.test/authentik".into(),
			api_token: " static-token ".into(),
			cache_ttl: Duration::from_secs(60),
		};

		(Authentik::new(config, transport.clone()).unwrap(), transport)
	}

	#[tokio::test]
	async fn resolves_active_user_by_username() {
		let (ak, transport) = authentik(|call| {
			assert_eq!(call.path(), USERS_PATH);
			assert_eq!(call.param("username"), Some("alice"));
			assert_eq!(call.param("is_active"), Some("true"));
			assert_eq!(call.bearer.as_deref(), Some("static-token"));
			Ok(r#"{"results":[{"username":"Alice","email":"Alice@Example.com","is_active":true}]}"#.into())
		});

		assert_eq!(
			ak.resolve_user_email("alice").await.unwrap(),
			Some("alice@example.com".into())
		);
		assert_eq!(transport.calls().len(), 1);
	}

	#[tokio::test]
	async fn inactive_or_mismatched_users_do_not_resolve() {
		let (ak, _) = authentik(|call| match call.param("username") {
			Some("sleepy") => Ok(
				r#"{"results":[{"username":"sleepy","email":"s@example.com","is_active":false}]}"#
					.into(),
			),
			_ => Ok(r#"{"results":[{"username":"someone-else","email":"x@example.com","is_active":true}]}"#.into()),
		});

		assert_eq!(ak.resolve_user_email("sleepy").await.unwrap(), None);
		assert_eq!(ak.resolve_user_email("carol").await.unwrap(), None);
	}

	#[tokio::test]
	async fn email_exists_is_cached_both_ways() {
		let (ak, transport) = authentik(|call| match call.param("email") {
			Some("alice@example.com") => Ok(
				r#"{"results":[{"username":"alice","email":"alice@example.com","is_active":true}]}"#
					.into(),
			),
			_ => Ok(r#"{"results":[]}"#.into()),
		});

		assert!(ak.email_exists("alice@example.com").await.unwrap());
		assert!(ak.email_exists("ALICE@example.com").await.unwrap());
		assert!(!ak.email_exists("ghost@example.com").await.unwrap());
		assert!(!ak.email_exists("ghost@example.com").await.unwrap());

		assert_eq!(transport.calls().len(), 2);
	}

	#[tokio::test]
	async fn negative_answers_expire_with_the_ttl() {
		let transport = Arc::new(FakeTransport::new(|_| Ok(r#"{"results":[]}"#.into())));
		let clock = ManualClock::new();
		let config = AuthentikConfig {
			base_url: "https://idp.test/authentik".into(),
			api_token: "static-token".into(),
			cache_ttl: Duration::from_secs(30),
		};
		let ak = Authentik::with_clock(config, transport.clone(), clock.clone()).unwrap();

		assert_eq!(ak.resolve_user_email("ghost").await.unwrap(), None);
		clock.advance(Duration::from_secs(30));
		assert_eq!(ak.resolve_user_email("ghost").await.unwrap(), None);
		assert_eq!(transport.calls().len(), 1);

		clock.advance(Duration::from_secs(1));
		assert_eq!(ak.resolve_user_email("ghost").await.unwrap(), None);
		assert_eq!(transport.calls().len(), 2);
	}

	#[tokio::test]
	async fn errors_are_not_retried_or_cached() {
		let (ak, transport) = authentik(|_| Err(server_error()));

		assert!(ak.email_exists("alice@example.com").await.is_err());
		assert!(ak.email_exists("alice@example.com").await.is_err());
		assert_eq!(transport.calls().len(), 2);
	}

	#[tokio::test]
	async fn garbage_body_is_a_decode_error() {
		let (ak, _) = authentik(|_| Ok("<html>".into()));

		assert!(matches!(
			ak.resolve_user_email("alice").await,
			Err(IdentityError::Decode(_))
		));
	}
}
