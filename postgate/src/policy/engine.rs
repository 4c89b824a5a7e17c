use std::{future::Future, sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{error, warn};

use crate::{
	directory::{Directory, DirectoryError},
	identity::{same_identity, IdentityError, IdentityResolver, LOOKUP_TIMEOUT},
};

use super::{Action, FailureMode, PolicyRequest};

/// Decides whether a sender, recipient and authentication combination may
/// proceed.
///
/// Recipients in local domains must exist, either as a primary identity at
/// the identity provider or as an enabled alias. Unauthenticated clients may
/// only deliver to local domains and may not claim a local sender.
/// Authenticated clients may only use senders they own: their primary email
/// or one of their aliases for token logins, and the app's allow-list for
/// password logins.
pub struct Engine {
	directory: Arc<dyn Directory>,
	resolver: Arc<dyn IdentityResolver>,
	failure_mode: FailureMode,
	lookup_timeout: Duration,
}

#[derive(Debug, Error)]
enum DecisionError {
	#[error("directory: {0}")]
	Directory(#[from] DirectoryError),
	#[error("identity provider: {0}")]
	Identity(#[from] IdentityError),
}

impl Engine {
	pub fn new(
		directory: Arc<dyn Directory>,
		resolver: Arc<dyn IdentityResolver>,
		failure_mode: FailureMode,
	) -> Self {
		Self {
			directory,
			resolver,
			failure_mode,
			lookup_timeout: LOOKUP_TIMEOUT,
		}
	}

	pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
		self.lookup_timeout = timeout;
		self
	}

	/// Answers a policy request. Only the RCPT stage is checked; the mail
	/// server is expected to delay rejections until then, so every other
	/// stage passes.
	pub async fn evaluate(&self, request: &PolicyRequest) -> Action {
		match request.protocol_state() {
			"RCPT" => {
				self.decide(
					&request.sender(),
					&request.recipient(),
					&request.sasl_method(),
					request.sasl_username(),
				)
				.await
			}
			_ => Action::Dunno,
		}
	}

	/// `sender`, `recipient` and `auth_method` are expected lowercased;
	/// `auth_method` and `auth_identity` are empty for unauthenticated clients.
	pub async fn decide(
		&self,
		sender: &str,
		recipient: &str,
		auth_method: &str,
		auth_identity: &str,
	) -> Action {
		match self.check(sender, recipient, auth_method, auth_identity).await {
			Ok(action) => action,
			Err(DecisionError::Directory(err)) => {
				error!(%err, sender, recipient, "directory lookup failed");
				Action::InternalError
			}
			Err(DecisionError::Identity(err)) => {
				warn!(%err, sender, recipient, user = auth_identity, "identity lookup failed");
				self.failure_mode.action()
			}
		}
	}

	async fn check(
		&self,
		sender: &str,
		recipient: &str,
		auth_method: &str,
		auth_identity: &str,
	) -> Result<Action, DecisionError> {
		if recipient.is_empty() {
			return Ok(Action::Dunno);
		}

		// Only local domains are ours to vouch for; others may be relayed.
		let recipient_local = self.directory.is_local(recipient).await?;
		if recipient_local && !self.recipient_exists(recipient).await? {
			return Ok(Action::NoSuchUser);
		}

		match auth_method {
			"" => {
				if !recipient_local {
					return Ok(Action::RecipientNotLocal);
				}

				if self.directory.is_local(sender).await? {
					return Ok(Action::LocalSenderNeedsAuth);
				}

				Ok(Action::Dunno)
			}
			"xoauth2" | "oauthbearer" => self.check_user_sender(sender, auth_identity).await,
			"plain" | "login" => {
				if self.directory.app_from_allowed(auth_identity, sender).await? {
					Ok(Action::Dunno)
				} else {
					Ok(Action::SenderNotOwned)
				}
			}
			_ => Ok(Action::UnsupportedAuthMethod),
		}
	}

	async fn recipient_exists(&self, recipient: &str) -> Result<bool, DecisionError> {
		if self.lookup(self.resolver.email_exists(recipient)).await? {
			return Ok(true);
		}

		Ok(self.directory.alias_owner(recipient).await?.is_some())
	}

	async fn check_user_sender(&self, sender: &str, user: &str) -> Result<Action, DecisionError> {
		let primary = self.lookup(self.resolver.resolve_user_email(user)).await?;

		if primary.is_some_and(|email| same_identity(&email, sender)) {
			return Ok(Action::Dunno);
		}

		if self.directory.alias_belongs_to(sender, user).await? {
			return Ok(Action::Dunno);
		}

		Ok(Action::SenderNotOwned)
	}

	async fn lookup<T, F>(&self, call: F) -> Result<T, IdentityError>
	where
		F: Future<Output = Result<T, IdentityError>>,
	{
		tokio::time::timeout(self.lookup_timeout, call)
			.await
			.map_err(|_| IdentityError::Timeout)?
	}
}

#[cfg(test)]
mod test {
	use super::*;
	use crate::{directory::fixture::Fixture, identity::fake::FakeResolver};

	fn fixture() -> Fixture {
		let fx = Fixture::new();
		fx.domain("example.com", true)
			.domain("retired.example", false)
			.alias("alias1@example.com", "alice", true)
			.alias("bobs@example.com", "bob", true)
			.alias("disabled@example.com", "alice", false)
			.app("app1", true)
			.app_from("app1", "news@example.com", true);
		fx
	}

	fn resolver() -> FakeResolver {
		FakeResolver::default()
			.user("alice", "alice@example.com")
			.user("bob", "Bob@Example.com")
	}

	fn engine(fx: &Fixture, resolver: FakeResolver, mode: FailureMode) -> Engine {
		Engine::new(fx.directory.clone(), Arc::new(resolver), mode)
	}

	#[tokio::test]
	async fn recipient_checks() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		let cases = [
			("", Action::Dunno),
			("alice@example.com", Action::Dunno),
			("alias1@example.com", Action::Dunno),
			("missing@example.com", Action::NoSuchUser),
			("disabled@example.com", Action::NoSuchUser),
			// Disabled domains are not local, so nothing is checked and we refuse to relay
			("anyone@retired.example", Action::RecipientNotLocal),
			("someone@other.org", Action::RecipientNotLocal),
		];

		for (recipient, expected) in cases {
			assert_eq!(
				engine.decide("sender@other.org", recipient, "", "").await,
				expected,
				"recipient {recipient}"
			);
		}
	}

	#[tokio::test]
	async fn unauthenticated_local_senders_are_refused() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		assert_eq!(
			engine.decide("alice@example.com", "bob@example.com", "", "").await,
			Action::LocalSenderNeedsAuth
		);
		assert_eq!(
			engine.decide("", "bob@example.com", "", "").await,
			Action::Dunno
		);
	}

	#[tokio::test]
	async fn token_logins_may_use_primary_or_own_aliases() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		let cases = [
			("alice", "alice@example.com", Action::Dunno),
			("alice", "alias1@example.com", Action::Dunno),
			("alice", "bobs@example.com", Action::SenderNotOwned),
			("alice", "disabled@example.com", Action::SenderNotOwned),
			("bob", "bob@example.com", Action::Dunno),
			("mallory", "mallory@example.com", Action::SenderNotOwned),
		];

		for (user, sender, expected) in cases {
			for method in ["xoauth2", "oauthbearer"] {
				assert_eq!(
					engine.decide(sender, "someone@other.org", method, user).await,
					expected,
					"{method} {user} as {sender}"
				);
			}
		}
	}

	#[tokio::test]
	async fn password_logins_are_limited_to_the_app_allow_list() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		for method in ["plain", "login"] {
			assert_eq!(
				engine.decide("news@example.com", "x@other.org", method, "app1").await,
				Action::Dunno
			);
			assert_eq!(
				engine.decide("nope@example.com", "x@other.org", method, "app1").await,
				Action::SenderNotOwned
			);
			assert_eq!(
				engine.decide("news@example.com", "x@other.org", method, "app2").await,
				Action::SenderNotOwned
			);
		}
	}

	#[tokio::test]
	async fn unknown_methods_are_refused() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		assert_eq!(
			engine.decide("alice@example.com", "x@other.org", "cram-md5", "alice").await,
			Action::UnsupportedAuthMethod
		);
	}

	#[tokio::test]
	async fn identity_failures_follow_the_failure_mode() {
		let fx = fixture();

		for (mode, expected) in [
			(FailureMode::TempFail, Action::LookupFailure),
			(FailureMode::Dunno, Action::Dunno),
		] {
			let engine = engine(&fx, FakeResolver::failing(), mode);

			// Recipient existence
			assert_eq!(
				engine.decide("x@other.org", "alice@example.com", "", "").await,
				expected
			);
			// Sender ownership
			assert_eq!(
				engine.decide("alice@example.com", "x@other.org", "xoauth2", "alice").await,
				expected
			);
		}
	}

	#[tokio::test]
	async fn failing_resolver_is_not_consulted_for_foreign_recipients() {
		let fx = fixture();
		let engine = engine(&fx, FakeResolver::failing(), FailureMode::TempFail);

		assert_eq!(
			engine.decide("news@example.com", "x@other.org", "plain", "app1").await,
			Action::Dunno
		);
	}

	#[tokio::test]
	async fn slow_identity_provider_times_out() {
		let fx = fixture();
		let engine = engine(&fx, FakeResolver::hanging(), FailureMode::TempFail)
			.with_lookup_timeout(Duration::from_millis(20));

		assert_eq!(
			engine.decide("x@other.org", "alice@example.com", "", "").await,
			Action::LookupFailure
		);
	}

	#[tokio::test]
	async fn directory_failures_are_internal_errors_in_any_mode() {
		let fx = fixture();
		fx.break_store();

		for mode in [FailureMode::TempFail, FailureMode::Dunno] {
			let engine = engine(&fx, resolver(), mode);
			assert_eq!(
				engine.decide("x@other.org", "alice@example.com", "", "").await,
				Action::InternalError
			);
		}
	}

	#[tokio::test]
	async fn evaluate_only_checks_rcpt() {
		let fx = fixture();
		let engine = engine(&fx, resolver(), FailureMode::TempFail);

		let mail: PolicyRequest = ["protocol_state=MAIL", "recipient=missing@example.com"]
			.into_iter()
			.collect();
		assert_eq!(engine.evaluate(&mail).await, Action::Dunno);

		let rcpt: PolicyRequest = [
			"protocol_state=RCPT",
			"sasl_method=XOAUTH2",
			"sasl_username=alice",
			"sender=Alias1@Example.com",
			"recipient=Missing@Example.com",
		]
		.into_iter()
		.collect();
		assert_eq!(engine.evaluate(&rcpt).await, Action::NoSuchUser);

		let rcpt: PolicyRequest = [
			"protocol_state=RCPT",
			"sasl_method=XOAUTH2",
			"sasl_username=alice",
			"sender=Alias1@Example.com",
			"recipient=Bob@Example.com",
		]
		.into_iter()
		.collect();
		assert_eq!(engine.evaluate(&rcpt).await, Action::Dunno);

		assert_eq!(engine.evaluate(&PolicyRequest::default()).await, Action::Dunno);
	}
}
