// src/repositories/target_repo.rs

use crate::db::{self, connection::SqlitePool};
use crate::models::target::{Target, TargetAddr};
use rusqlite::params;
use std::sync::Arc;
use anyhow::{Result, Context};
use tokio::task;

pub struct TargetRepository {
	pool: Arc<SqlitePool>,
}

impl TargetRepository {
	pub fn new(pool: Arc<SqlitePool>) -> Self {
		Self { pool }
	}

	/// Adds a discovered target. A target that is already known only gets
	/// its `last_seen` refreshed.
	pub async fn upsert_target(&self, target: Target) -> Result<()> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			conn.execute(
				"INSERT INTO domains (name, port, discovered_tool, discovered_time, last_seen, blacklisted, info)
				 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
				 ON CONFLICT(name, port) DO UPDATE SET last_seen = excluded.last_seen",
				params![
					target.addr.host,
					target.addr.port,
					target.discovered_tool,
					target.discovered_time.as_ref().map(db::format_timestamp),
					target.last_seen.as_ref().map(db::format_timestamp),
					target.blacklisted,
					target.info,
				],
			).context("Failed to upsert target")?;
			Ok(())
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Returns `false` when the target does not exist.
	pub async fn set_blacklisted(&self, addr: TargetAddr, blacklisted: bool) -> Result<bool> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let changed = conn.execute(
				"UPDATE domains SET blacklisted = ?1 WHERE name = ?2 AND port = ?3",
				params![blacklisted, addr.host, addr.port],
			).context("Failed to update blacklist flag")?;
			Ok(changed > 0)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// All targets that may be scanned. A NULL blacklist flag counts as not blacklisted.
	pub async fn list_eligible(&self) -> Result<Vec<TargetAddr>> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let mut stmt = conn.prepare(
				"SELECT name, port
				 FROM domains
				 WHERE COALESCE(blacklisted, 0) = 0
				 ORDER BY name, port"
			)?;

			let targets = stmt.query_map([], |row| {
				Ok(TargetAddr {
					host: row.get(0)?,
					port: row.get(1)?,
				})
			})?;

			targets
				.collect::<rusqlite::Result<Vec<_>>>()
				.context("Failed to collect targets")
		})
			.await
			.context("Failed to execute database operation")?
	}
}
