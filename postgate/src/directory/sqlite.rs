use std::path::Path;

use async_trait::async_trait;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use super::{Directory, DirectoryError};

const PRAGMAS: &str = "
PRAGMA foreign_keys=ON;
PRAGMA journal_mode=WAL;
PRAGMA synchronous=NORMAL;
";

/// A [Directory] backed by a pool of sqlite connections. Queries run on the
/// blocking thread pool so they never stall the connection tasks.
#[derive(Clone)]
pub struct SqliteDirectory {
	pool: Pool<SqliteConnectionManager>,
}

impl SqliteDirectory {
	/// Opens an existing database. The schema is created and maintained by
	/// the administration tooling, never here.
	pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DirectoryError> {
		let path = path.as_ref();
		ensure_exists(path)?;

		info!(path = %path.display(), "opening directory store");

		let manager =
			SqliteConnectionManager::file(path).with_init(|conn| conn.execute_batch(PRAGMAS));
		let pool = Pool::builder().build(manager)?;

		info!("directory store ready");
		Ok(Self { pool })
	}

	async fn query<T, F>(&self, query: F) -> Result<T, DirectoryError>
	where
		T: Send + 'static,
		F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
	{
		let pool = self.pool.clone();

		tokio::task::spawn_blocking(move || -> Result<T, DirectoryError> {
			let conn = pool.get()?;
			Ok(query(&*conn)?)
		})
		.await?
	}
}

#[async_trait]
impl Directory for SqliteDirectory {
	async fn domain_enabled(&self, domain: &str) -> Result<bool, DirectoryError> {
		if domain.is_empty() {
			return Ok(false);
		}

		let domain = domain.to_lowercase();
		self.query(move |conn| {
			conn.query_row(
				"SELECT enabled FROM domains WHERE domain_name = ?1 COLLATE NOCASE",
				params![domain],
				|row| row.get::<_, i64>(0),
			)
			.optional()
			.map(|enabled| enabled == Some(1))
		})
		.await
	}

	async fn alias_owner(&self, alias: &str) -> Result<Option<String>, DirectoryError> {
		let alias = alias.to_owned();
		self.query(move |conn| {
			conn.query_row(
				"SELECT a.target_user FROM aliases a
				JOIN domains d ON d.domain_name = a.alias_domain_name
				WHERE a.alias_email = ?1 AND a.enabled = 1 AND d.enabled = 1",
				params![alias],
				|row| row.get(0),
			)
			.optional()
		})
		.await
	}

	async fn alias_belongs_to(&self, alias: &str, user: &str) -> Result<bool, DirectoryError> {
		let (alias, user) = (alias.to_owned(), user.to_owned());
		self.query(move |conn| {
			conn.query_row(
				"SELECT 1 FROM aliases a
				JOIN domains d ON d.domain_name = a.alias_domain_name
				WHERE a.alias_email = ?1 AND a.target_user = ?2
				AND a.enabled = 1 AND d.enabled = 1",
				params![alias, user],
				|_| Ok(()),
			)
			.optional()
			.map(|found| found.is_some())
		})
		.await
	}

	async fn app_from_allowed(&self, app_id: &str, from: &str) -> Result<bool, DirectoryError> {
		let (app_id, from) = (app_id.to_owned(), from.to_owned());
		self.query(move |conn| {
			conn.query_row(
				"SELECT 1 FROM app_from af
				JOIN apps a ON a.app_id = af.app_id
				WHERE af.app_id = ?1 AND af.from_addr = ?2
				AND a.enabled = 1 AND af.enabled = 1",
				params![app_id, from],
				|_| Ok(()),
			)
			.optional()
			.map(|found| found.is_some())
		})
		.await
	}
}

// In-memory databases and URIs are left for sqlite to interpret.
fn ensure_exists(path: &Path) -> Result<(), DirectoryError> {
	let raw = path.to_string_lossy();
	if raw == ":memory:" || raw.starts_with("file:") {
		return Ok(());
	}

	if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
		if !dir.try_exists()? {
			return Err(DirectoryError::Missing(dir.to_path_buf()));
		}
	}

	if !path.try_exists()? {
		return Err(DirectoryError::Missing(path.to_path_buf()));
	}

	Ok(())
}
