// src/repositories/scan_repo.rs

use crate::db::{self, connection::SqlitePool};
use crate::models::scan::ScanRecord;
use crate::models::target::TargetAddr;
use rusqlite::params;
use std::sync::Arc;
use anyhow::{Result, Context};
use tokio::task;

/// Scan history queries. A scan belongs to this tool when its scan id starts
/// with the configured prefix; other tools share the table.
pub struct ScanRepository {
	pool: Arc<SqlitePool>,
}

impl ScanRepository {
	pub fn new(pool: Arc<SqlitePool>) -> Self {
		Self { pool }
	}

	/// Gives every eligible target without any history for `prefix` a synthetic
	/// record at the minimum timestamp. Returns the number of records added;
	/// running it again adds none. A slot already taken by another tool's record
	/// is left alone.
	pub async fn prepare_history(&self, prefix: String) -> Result<usize> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let mut conn = pool.get().context("Failed to get database connection")?;
			let tx = conn.transaction()?;

			let inserted = tx.execute(
				"INSERT OR IGNORE INTO scan_info (name, port, scan_id, timestamp, info)
				 SELECT d.name, d.port, ?2, ?3, 'prepared: never scanned'
				 FROM domains d
				 WHERE COALESCE(d.blacklisted, 0) = 0
				   AND NOT EXISTS (
					SELECT 1 FROM scan_info s
					WHERE s.name = d.name
					  AND s.port = d.port
					  AND substr(s.scan_id, 1, length(?1)) = ?1
				   )",
				params![prefix, format!("{}:prepare", prefix), db::MIN_TIMESTAMP],
			).context("Failed to prepare scan history")?;

			tx.commit().context("Failed to commit transaction")?;
			Ok(inserted)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Eligible targets ordered by their most recent scan, oldest first.
	///
	/// Targets without any history for `prefix` rank as scanned at the minimum
	/// timestamp, whether or not their prepared record could be stored.
	pub async fn least_recently_scanned(&self, prefix: String, limit: usize) -> Result<Vec<TargetAddr>> {
		let pool = self.pool.clone();
		let limit = i64::try_from(limit).context("Target limit out of range")?;

		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let mut stmt = conn.prepare(
				"SELECT d.name, d.port
				 FROM domains d
				 LEFT JOIN scan_info s
				   ON s.name = d.name
				  AND s.port = d.port
				  AND substr(s.scan_id, 1, length(?1)) = ?1
				 WHERE COALESCE(d.blacklisted, 0) = 0
				 GROUP BY d.name, d.port
				 ORDER BY COALESCE(MAX(s.timestamp), ?3) ASC, d.name, d.port
				 LIMIT ?2"
			)?;

			let targets = stmt.query_map(params![prefix, limit, db::MIN_TIMESTAMP], |row| {
				Ok(TargetAddr {
					host: row.get(0)?,
					port: row.get(1)?,
				})
			})?;

			targets
				.collect::<rusqlite::Result<Vec<_>>>()
				.context("Failed to collect least recently scanned targets")
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Appends the records in one transaction.
	pub async fn record_scans(&self, records: Vec<ScanRecord>) -> Result<usize> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let mut conn = pool.get().context("Failed to get database connection")?;
			let tx = conn.transaction()?;

			for record in &records {
				tx.execute(
					"INSERT INTO scan_info (name, port, scan_id, timestamp, info)
					 VALUES (?1, ?2, ?3, ?4, ?5)",
					params![
						record.target.host,
						record.target.port,
						record.scan_id,
						db::format_timestamp(&record.timestamp),
						record.info,
					],
				).with_context(|| format!("Failed to record scan of {}", record.target))?;
			}

			tx.commit().context("Failed to commit transaction")?;
			Ok(records.len())
		})
			.await
			.context("Failed to execute database operation")?
	}
}
