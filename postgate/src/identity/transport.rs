use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header::ACCEPT, Client, Response};

use super::IdentityError;

const ERROR_BODY_LIMIT: usize = 2048;

/// The HTTP calls the identity providers make. Both return the body of a
/// 2xx response; any other status is an [IdentityError::Status].
#[async_trait]
pub trait HttpTransport: Send + Sync {
	async fn get(
		&self,
		url: &str,
		query: &[(&str, &str)],
		bearer: &str,
	) -> Result<Vec<u8>, IdentityError>;

	async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, IdentityError>;
}

pub struct ReqwestTransport {
	client: Client,
}

impl ReqwestTransport {
	pub fn new(timeout: Duration) -> Result<Self, IdentityError> {
		let client = Client::builder().timeout(timeout).build()?;
		Ok(Self { client })
	}

	async fn body(response: Response) -> Result<Vec<u8>, IdentityError> {
		let status = response.status();

		if !status.is_success() {
			let body = response.bytes().await.unwrap_or_default();
			let body = &body[..body.len().min(ERROR_BODY_LIMIT)];

			return Err(IdentityError::Status {
				status: status.as_u16(),
				body: String::from_utf8_lossy(body).into_owned(),
			});
		}

		Ok(response.bytes().await?.to_vec())
	}
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
	async fn get(
		&self,
		url: &str,
		query: &[(&str, &str)],
		bearer: &str,
	) -> Result<Vec<u8>, IdentityError> {
		let response = self
			.client
			.get(url)
			.query(query)
			.bearer_auth(bearer)
			.header(ACCEPT, "application/json")
			.send()
			.await?;

		Self::body(response).await
	}

	async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Vec<u8>, IdentityError> {
		let response = self.client.post(url).form(form).send().await?;

		Self::body(response).await
	}
}
