//! Read-only access to the locally managed domains, aliases and application
//! sender credentials.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::address::domain_of;

#[cfg(test)]
pub(crate) mod fixture;
mod sqlite;

pub use sqlite::SqliteDirectory;

#[async_trait]
pub trait Directory: Send + Sync {
	/// True if the domain exists and is enabled. Domain names compare
	/// case-insensitively.
	async fn domain_enabled(&self, domain: &str) -> Result<bool, DirectoryError>;

	/// The target user of an alias, if both the alias and its owning domain
	/// are enabled.
	async fn alias_owner(&self, alias: &str) -> Result<Option<String>, DirectoryError>;

	/// True if the alias is enabled, its domain is enabled, and it targets `user`.
	async fn alias_belongs_to(&self, alias: &str, user: &str) -> Result<bool, DirectoryError>;

	/// True if the app is enabled and `from` is an enabled sender on its allow-list.
	async fn app_from_allowed(&self, app_id: &str, from: &str) -> Result<bool, DirectoryError>;

	/// True if the domain part of `address` is an enabled local domain.
	/// Addresses without a usable domain are never local.
	async fn is_local(&self, address: &str) -> Result<bool, DirectoryError> {
		match domain_of(address) {
			Some(domain) => self.domain_enabled(&domain).await,
			None => Ok(false),
		}
	}
}

#[derive(Debug, Error)]
pub enum DirectoryError {
	#[error("sqlite database not found at {0}")]
	Missing(PathBuf),
	#[error("failed to stat the database: {0}")]
	Io(#[from] std::io::Error),
	#[error("could not get a database connection: {0}")]
	Pool(#[from] r2d2::Error),
	#[error("query failed: {0}")]
	Sqlite(#[from] rusqlite::Error),
	#[error("query worker died: {0}")]
	Worker(#[from] tokio::task::JoinError),
}
