//! Resolving mail identities against an external identity provider.
//!
//! Two providers are supported, chosen once at startup. Each keeps a private
//! [TtlCache] in front of the network so repeated questions about the same
//! user or address, including ones that came back empty, are answered
//! locally until the entry goes stale.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;

mod authentik;
mod cache;
#[cfg(test)]
pub(crate) mod fake;
mod keycloak;
mod transport;

pub use authentik::{Authentik, AuthentikConfig};
pub use cache::{Cached, Clock, SystemClock, TtlCache};
pub use keycloak::{Keycloak, KeycloakConfig};
pub use transport::{HttpTransport, ReqwestTransport};

/// Upper bound for a single call to the identity provider.
pub const LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Used when a provider is configured without a positive cache lifetime.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(120);

#[async_trait]
pub trait IdentityResolver: Send + Sync {
	/// The primary email of the named user, if the provider knows an active
	/// user by that name with an email set. The email is lowercased.
	async fn resolve_user_email(&self, user: &str) -> Result<Option<String>, IdentityError>;

	/// True if `email` is the primary email of an active user.
	async fn email_exists(&self, email: &str) -> Result<bool, IdentityError>;
}

#[derive(Clone, Debug)]
pub enum ProviderConfig {
	Keycloak(KeycloakConfig),
	Authentik(AuthentikConfig),
}

/// Builds the configured provider on top of a reqwest client.
pub fn build(config: &ProviderConfig) -> Result<Arc<dyn IdentityResolver>, IdentityError> {
	let transport = Arc::new(ReqwestTransport::new(LOOKUP_TIMEOUT)?);

	let resolver: Arc<dyn IdentityResolver> = match config {
		ProviderConfig::Keycloak(config) => Arc::new(Keycloak::new(config.clone(), transport)?),
		ProviderConfig::Authentik(config) => Arc::new(Authentik::new(config.clone(), transport)?),
	};

	Ok(resolver)
}

pub(crate) fn same_identity(a: &str, b: &str) -> bool {
	a.to_lowercase() == b.to_lowercase()
}

#[derive(Debug, Error)]
pub enum IdentityError {
	#[error("invalid provider base url '{0}'")]
	BaseUrl(String),
	#[error("no api token configured")]
	MissingToken,
	#[error("http request failed: {0}")]
	Http(#[from] reqwest::Error),
	#[error("provider answered http {status}: {body}")]
	Status { status: u16, body: String },
	#[error("could not decode provider response: {0}")]
	Decode(#[from] serde_json::Error),
	#[error("token response did not contain an access_token")]
	EmptyToken,
	#[error("lookup timed out")]
	Timeout,
}
