// src/db/connection.rs

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use std::path::PathBuf;
use std::time::Duration;
use anyhow::{Result, Context, bail};
use log::info;

pub type SqlitePool = Pool<SqliteConnectionManager>;

/// Upper bound for waiting on a locked database or a free pooled connection.
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// Turns a `DB_CONNECTION_STRING` value into the path of the SQLite file.
///
/// Both a bare path and a `sqlite://` style URL are accepted.
pub fn database_path(connection_string: &str) -> Result<PathBuf> {
	let trimmed = connection_string.trim();
	let path = trimmed
		.strip_prefix("sqlite://")
		.or_else(|| trimmed.strip_prefix("sqlite:"))
		.unwrap_or(trimmed);

	if path.is_empty() {
		bail!("Database connection string is empty");
	}
	Ok(PathBuf::from(path))
}

/// Establishes a connection pool with a custom database path
pub fn establish_pool_with_path(custom_path: PathBuf) -> Result<SqlitePool> {
	info!("SQLite database will be located at: {:?}", custom_path);

	if let Some(parent) = custom_path.parent().filter(|p| !p.as_os_str().is_empty()) {
		std::fs::create_dir_all(parent)
			.context("Failed to create database directory")?;
	}

	let manager = SqliteConnectionManager::file(custom_path).with_init(|conn| {
		conn.busy_timeout(BUSY_TIMEOUT)?;
		conn.pragma_update(None, "foreign_keys", "ON")
	});

	let pool = Pool::builder()
		.max_size(4)
		.connection_timeout(BUSY_TIMEOUT)
		.build(manager)
		.context("Failed to connect to the database")?;

	info!("Database connection established");
	Ok(pool)
}

/// Establishes a connection pool from a connection string
pub fn establish_pool(connection_string: &str) -> Result<SqlitePool> {
	establish_pool_with_path(database_path(connection_string)?)
}
