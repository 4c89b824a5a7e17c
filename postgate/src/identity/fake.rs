//! Stand-ins for the identity provider used across the crate's tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{HttpTransport, IdentityError, IdentityResolver};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Call {
	pub method: &'static str,
	pub url: String,
	pub params: Vec<(String, String)>,
	pub bearer: Option<String>,
}

impl Call {
	pub fn param(&self, name: &str) -> Option<&str> {
		self.params
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value.as_str())
	}

	pub fn path(&self) -> &str {
		let rest = self.url.split_once("://").map_or(&*self.url, |(_, rest)| rest);
		rest.find('/').map_or("/", |at| &rest[at..])
	}
}

type Handler = Box<dyn Fn(&Call) -> Result<String, IdentityError> + Send + Sync>;

/// Records every request and answers it with a canned JSON body.
pub(crate) struct FakeTransport {
	handler: Handler,
	calls: Mutex<Vec<Call>>,
}

impl FakeTransport {
	pub fn new<F>(handler: F) -> Self
	where
		F: Fn(&Call) -> Result<String, IdentityError> + Send + Sync + 'static,
	{
		Self {
			handler: Box::new(handler),
			calls: Mutex::new(vec![]),
		}
	}

	pub fn calls(&self) -> Vec<Call> {
		self.calls.lock().clone()
	}

	pub fn calls_to(&self, path: &str) -> usize {
		self.calls.lock().iter().filter(|c| c.path() == path).count()
	}

	fn answer(&self, call: Call) -> Result<Vec<u8>, IdentityError> {
		let answer = (self.handler)(&call);
		self.calls.lock().push(call);
		answer.map(String::into_bytes)
	}
}

fn owned(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
	pairs
		.iter()
		.map(|(k, v)| (k.to_string(), v.to_string()))
		.collect()
}

#[async_trait]
impl HttpTransport for FakeTransport {
	async fn get(
		&self,
		url: &str,
		query: &[(&str, &str)],
		bearer: &str,
	) -> Result<Vec<u8>, IdentityError> {
		self.answer(Call {
			method: "GET",
			url: url.into(),
			params: owned(query),
			bearer: Some(bearer.into()),
		})
	}

	async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, IdentityError> {
		self.answer(Call {
			method: "POST",
			url: url.into(),
			params: owned(form),
			bearer: None,
		})
	}
}

pub(crate) fn server_error() -> IdentityError {
	IdentityError::Status {
		status: 500,
		body: "boom".into(),
	}
}

#[derive(Default)]
pub(crate) struct FakeResolver {
	pub emails_by_user: HashMap<String, String>,
	pub primary_emails: Vec<String>,
	pub fail: bool,
	pub hang: bool,
}

impl FakeResolver {
	pub fn user(mut self, name: &str, email: &str) -> Self {
		self.emails_by_user.insert(name.to_lowercase(), email.to_lowercase());
		self.primary_emails.push(email.to_lowercase());
		self
	}

	pub fn failing() -> Self {
		Self {
			fail: true,
			..Default::default()
		}
	}

	pub fn hanging() -> Self {
		Self {
			hang: true,
			..Default::default()
		}
	}

	async fn check(&self) -> Result<(), IdentityError> {
		if self.hang {
			std::future::pending::<()>().await;
		}

		if self.fail {
			return Err(server_error());
		}

		Ok(())
	}
}

#[async_trait]
impl IdentityResolver for FakeResolver {
	async fn resolve_user_email(&self, user: &str) -> Result<Option<String>, IdentityError> {
		self.check().await?;
		Ok(self.emails_by_user.get(&user.to_lowercase()).cloned())
	}

	async fn email_exists(&self, email: &str) -> Result<bool, IdentityError> {
		self.check().await?;
		Ok(self.primary_emails.contains(&email.to_lowercase()))
	}
}
