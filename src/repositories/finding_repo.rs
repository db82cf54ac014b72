// src/repositories/finding_repo.rs

use crate::db::{self, connection::SqlitePool};
use crate::models::finding::{Finding, NewFinding, Severity};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use std::sync::Arc;
use anyhow::{Result, Context};
use tokio::task;
use log::warn;

/// Findings are addressed by their canonical fingerprint, which is unique.
pub struct FindingRepository {
	pool: Arc<SqlitePool>,
}

impl FindingRepository {
	pub fn new(pool: Arc<SqlitePool>) -> Self {
		Self { pool }
	}

	pub async fn find_by_canonical(&self, canonical: String) -> Result<Option<Finding>> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let row = conn.query_row(
				"SELECT primary_key, finding_identifier, canonical_identifier, name, finding,
				        scan_id, issue_id, last_seen, severity
				 FROM findings
				 WHERE canonical_identifier = ?1",
				params![canonical],
				|row| {
					Ok((
						row.get::<_, i64>(0)?,
						row.get::<_, String>(1)?,
						row.get::<_, String>(2)?,
						row.get::<_, String>(3)?,
						row.get::<_, String>(4)?,
						row.get::<_, Option<String>>(5)?,
						row.get::<_, Option<String>>(6)?,
						row.get::<_, Option<String>>(7)?,
						row.get::<_, Option<String>>(8)?,
					))
				},
			)
				.optional()
				.context("Failed to query finding")?;

			let Some((id, fingerprint, canonical_fingerprint, name, payload, scan_id, issue_id, last_seen, severity)) = row else {
				return Ok(None);
			};

			let severity = match severity {
				Some(raw) => match raw.parse::<Severity>() {
					Ok(severity) => Some(severity),
					Err(e) => {
						warn!("Ignoring stored severity of {}: {}", fingerprint, e);
						None
					}
				},
				None => None,
			};

			Ok(Some(Finding {
				id,
				payload: serde_json::from_str(&payload)
					.with_context(|| format!("Stored payload of {} is not valid JSON", fingerprint))?,
				fingerprint,
				canonical_fingerprint,
				name,
				scan_id,
				issue_id,
				last_seen: last_seen.as_deref().and_then(db::parse_timestamp),
				severity,
			}))
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Inserts the finding unless one with the same canonical fingerprint exists.
	/// Returns whether a row was added.
	pub async fn insert_new(&self, finding: NewFinding) -> Result<bool> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let mut conn = pool.get().context("Failed to get database connection")?;
			let tx = conn.transaction()?;

			let inserted = tx.execute(
				"INSERT INTO findings (finding_identifier, canonical_identifier, name, finding, scan_id)
				 VALUES (?1, ?2, ?3, ?4, ?5)
				 ON CONFLICT(canonical_identifier) DO NOTHING",
				params![
					finding.fingerprint,
					finding.canonical_fingerprint,
					finding.name,
					finding.payload,
					finding.scan_id,
				],
			).context("Failed to insert finding")?;

			tx.commit().context("Failed to commit transaction")?;
			Ok(inserted == 1)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Returns `false` when no finding matched.
	pub async fn set_issue_id(&self, canonical: String, issue_id: String) -> Result<bool> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let changed = conn.execute(
				"UPDATE findings SET issue_id = ?1 WHERE canonical_identifier = ?2",
				params![issue_id, canonical],
			).context("Failed to store issue id")?;
			Ok(changed > 0)
		})
			.await
			.context("Failed to execute database operation")?
	}

	/// Records a sighting. `last_seen` is always overwritten, `severity` only
	/// filled in while it is still unset. Returns `false` when no finding matched.
	pub async fn mark_seen(&self, canonical: String, last_seen: DateTime<Utc>, severity: Severity) -> Result<bool> {
		let pool = self.pool.clone();
		task::spawn_blocking(move || {
			let conn = pool.get().context("Failed to get database connection")?;
			let changed = conn.execute(
				"UPDATE findings
				 SET last_seen = ?1, severity = COALESCE(severity, ?2)
				 WHERE canonical_identifier = ?3",
				params![db::format_timestamp(&last_seen), severity.as_str(), canonical],
			).context("Failed to update last seen")?;
			Ok(changed > 0)
		})
			.await
			.context("Failed to execute database operation")?
	}
}
