use std::{path::PathBuf, sync::Arc};

use rusqlite::{params, Connection, Params};
use tempfile::TempDir;

use super::SqliteDirectory;

const SCHEMA: &str = "
CREATE TABLE domains (
	domain_name TEXT PRIMARY KEY,
	enabled     INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE aliases (
	alias_email       TEXT PRIMARY KEY,
	target_user       TEXT NOT NULL,
	alias_domain_name TEXT NOT NULL,
	enabled           INTEGER NOT NULL DEFAULT 1 CHECK (enabled IN (0,1)),
	updated_at        INTEGER NOT NULL DEFAULT (strftime('%s','now')),
	FOREIGN KEY (alias_domain_name) REFERENCES domains(domain_name) ON DELETE CASCADE
);

CREATE TABLE apps (
	app_id      TEXT PRIMARY KEY,
	secret_hash TEXT NOT NULL,
	enabled     INTEGER NOT NULL DEFAULT 1,
	created_at  INTEGER NOT NULL DEFAULT (strftime('%s','now'))
);

CREATE TABLE app_from (
	app_id    TEXT NOT NULL,
	from_addr TEXT NOT NULL,
	enabled   INTEGER NOT NULL DEFAULT 1,
	PRIMARY KEY (app_id, from_addr),
	FOREIGN KEY (app_id) REFERENCES apps(app_id) ON DELETE CASCADE
);
";

/// A throwaway sqlite database with the directory schema.
pub(crate) struct Fixture {
	_dir: TempDir,
	path: PathBuf,
	pub directory: Arc<SqliteDirectory>,
}

impl Fixture {
	pub fn new() -> Self {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("state.db");

		let conn = Connection::open(&path).unwrap();
		conn.execute_batch(SCHEMA).unwrap();
		drop(conn);

		let directory = Arc::new(SqliteDirectory::open(&path).unwrap());

		Self {
			_dir: dir,
			path,
			directory,
		}
	}

	pub fn domain(&self, name: &str, enabled: bool) -> &Self {
		self.execute(
			"INSERT INTO domains (domain_name, enabled) VALUES (?1, ?2)",
			params![name, enabled],
		)
	}

	/// The owning domain is taken from the alias and must already exist.
	pub fn alias(&self, alias: &str, user: &str, enabled: bool) -> &Self {
		let (_, domain) = alias.rsplit_once('@').unwrap();
		self.execute(
			"INSERT INTO aliases (alias_email, target_user, alias_domain_name, enabled)
			VALUES (?1, ?2, ?3, ?4)",
			params![alias, user, domain, enabled],
		)
	}

	pub fn app(&self, app_id: &str, enabled: bool) -> &Self {
		self.execute(
			"INSERT INTO apps (app_id, secret_hash, enabled) VALUES (?1, '{ARGON2ID}dummy', ?2)",
			params![app_id, enabled],
		)
	}

	pub fn app_from(&self, app_id: &str, from: &str, enabled: bool) -> &Self {
		self.execute(
			"INSERT INTO app_from (app_id, from_addr, enabled) VALUES (?1, ?2, ?3)",
			params![app_id, from, enabled],
		)
	}

	// every query fails afterwards
	pub fn break_store(&self) {
		Connection::open(&self.path)
			.unwrap()
			.execute_batch(
				"PRAGMA foreign_keys=OFF;
				DROP TABLE app_from; DROP TABLE apps; DROP TABLE aliases; DROP TABLE domains;",
			)
			.unwrap();
	}

	fn execute<P: Params>(&self, sql: &str, params: P) -> &Self {
		let conn = Connection::open(&self.path).unwrap();
		conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
		conn.execute(sql, params).unwrap();
		self
	}
}
