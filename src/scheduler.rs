// src/scheduler.rs

use crate::context::RunContext;
use crate::db::connection::SqlitePool;
use crate::error::RunnerError;
use crate::models::scan::ScanRecord;
use crate::models::target::TargetAddr;
use crate::repositories::scan_repo::ScanRepository;
use crate::repositories::target_repo::TargetRepository;
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::collections::BTreeSet;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionMode {
	/// Every non-blacklisted target.
	All,
	/// The least recently scanned targets, never-scanned ones first.
	Rotation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSelection {
	Targets(Vec<TargetAddr>),
	/// Nothing is eligible; the run should end without scanning.
	NoTargets,
}

impl From<Vec<TargetAddr>> for TargetSelection {
	fn from(targets: Vec<TargetAddr>) -> Self {
		if targets.is_empty() {
			TargetSelection::NoTargets
		} else {
			TargetSelection::Targets(targets)
		}
	}
}

pub struct TargetScheduler {
	targets: TargetRepository,
	scans: ScanRepository,
	scan_id_prefix: String,
}

impl TargetScheduler {
	pub fn new(pool: Arc<SqlitePool>, context: &RunContext) -> Self {
		Self {
			targets: TargetRepository::new(pool.clone()),
			scans: ScanRepository::new(pool),
			scan_id_prefix: context.scan_id_prefix.clone(),
		}
	}

	/// Backfills a minimum-timestamp scan record for every target that was
	/// never scanned by this tool. Idempotent.
	pub async fn prepare(&self) -> Result<usize, RunnerError> {
		let prepared = self
			.scans
			.prepare_history(self.scan_id_prefix.clone())
			.await
			.map_err(RunnerError::Storage)?;

		if prepared > 0 {
			info!("Prepared scan history for {} never scanned targets", prepared);
		}
		Ok(prepared)
	}

	pub async fn select_targets(&self, mode: SelectionMode, limit: usize) -> Result<TargetSelection, RunnerError> {
		if limit < 1 {
			return Err(RunnerError::InvalidLimit(limit));
		}

		let targets = match mode {
			SelectionMode::All => self.targets.list_eligible().await,
			SelectionMode::Rotation => {
				self.prepare().await?;
				self.scans
					.least_recently_scanned(self.scan_id_prefix.clone(), limit)
					.await
			}
		}
			.map_err(RunnerError::Storage)?;

		info!("Selected {} targets ({:?} mode)", targets.len(), mode);
		Ok(targets.into())
	}

	/// Appends one scan record per distinct target. Never called on dry runs.
	pub async fn record_scan(
		&self,
		targets: &[TargetAddr],
		scan_id: &str,
		timestamp: DateTime<Utc>,
		info: Option<&str>,
	) -> Result<usize, RunnerError> {
		if targets.is_empty() {
			return Ok(0);
		}

		let distinct: BTreeSet<&TargetAddr> = targets.iter().collect();
		if distinct.len() < targets.len() {
			warn!("Ignoring {} repeated targets", targets.len() - distinct.len());
		}

		let records = distinct
			.into_iter()
			.map(|target| ScanRecord::new(target.clone(), scan_id, timestamp, info))
			.collect();

		let recorded = self.scans.record_scans(records).await.map_err(RunnerError::Storage)?;
		info!("Marked {} targets as scanned by {}", recorded, scan_id);
		Ok(recorded)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::db::testing::setup_test_db;
	use crate::models::target::Target;
	use crate::repositories::scan_repo::tests::count_records;
	use anyhow::Result;
	use chrono::TimeZone;

	fn day(d: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 5, d, 9, 0, 0).unwrap()
	}

	async fn add_targets(pool: &Arc<SqlitePool>, hosts: &[&str]) -> Result<Vec<TargetAddr>> {
		let repo = TargetRepository::new(pool.clone());
		let mut added = Vec::new();
		for host in hosts {
			let addr = TargetAddr::new(*host, 443);
			repo.upsert_target(Target::discovered(addr.clone(), "test".to_string(), None)).await?;
			added.push(addr);
		}
		Ok(added)
	}

	fn scheduler(pool: &Arc<SqlitePool>) -> TargetScheduler {
		TargetScheduler::new(pool.clone(), &RunContext::new("nuclei", Some("nuclei:500000".to_string())))
	}

	#[tokio::test]
	async fn never_scanned_first_then_oldest() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["a.example", "b.example", "c.example"]).await?;
		let (a, b, c) = (added[0].clone(), added[1].clone(), added[2].clone());

		let scheduler = scheduler(&pool);
		scheduler.record_scan(&[a.clone()], "nuclei:1", day(1), None).await?;
		scheduler.record_scan(&[c.clone()], "nuclei:3", day(3), None).await?;

		let selection = scheduler.select_targets(SelectionMode::Rotation, 2).await?;
		assert_eq!(selection, TargetSelection::Targets(vec![b, a]));
		Ok(())
	}

	#[tokio::test]
	async fn every_never_scanned_target_precedes_scanned_ones() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let scanned = add_targets(&pool, &["old.example", "older.example"]).await?;
		let fresh = add_targets(&pool, &["x.example", "y.example", "z.example"]).await?;

		let scheduler = scheduler(&pool);
		scheduler.record_scan(&scanned, "nuclei:1", day(1), None).await?;

		for limit in 1..=fresh.len() {
			let TargetSelection::Targets(selected) = scheduler.select_targets(SelectionMode::Rotation, limit).await? else {
				panic!("expected targets");
			};
			assert_eq!(selected.len(), limit);
			assert!(selected.iter().all(|t| fresh.contains(t)), "limit {}: {:?}", limit, selected);
		}
		Ok(())
	}

	#[tokio::test]
	async fn ranks_by_most_recent_scan() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["x.example", "y.example"]).await?;
		let (x, y) = (added[0].clone(), added[1].clone());

		let scheduler = scheduler(&pool);
		// x has the oldest single scan but also the newest one
		scheduler.record_scan(&[x.clone()], "nuclei:1", day(1), None).await?;
		scheduler.record_scan(&[y.clone()], "nuclei:5", day(5), None).await?;
		scheduler.record_scan(&[x.clone()], "nuclei:10", day(10), None).await?;

		let selection = scheduler.select_targets(SelectionMode::Rotation, 2).await?;
		assert_eq!(selection, TargetSelection::Targets(vec![y, x]));
		Ok(())
	}

	#[tokio::test]
	async fn rotation_covers_every_target_eventually() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["a.example", "b.example", "c.example", "d.example", "e.example"]).await?;
		let scheduler = scheduler(&pool);

		let mut seen = std::collections::HashSet::new();
		for run in 1..=3 {
			let TargetSelection::Targets(selected) = scheduler.select_targets(SelectionMode::Rotation, 2).await? else {
				panic!("expected targets");
			};
			scheduler.record_scan(&selected, &format!("nuclei:{}", run), day(run), None).await?;
			seen.extend(selected);
		}
		assert_eq!(seen.len(), added.len());
		Ok(())
	}

	#[tokio::test]
	async fn blacklisted_targets_are_never_selected() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["ok.example", "banned.example"]).await?;
		TargetRepository::new(pool.clone()).set_blacklisted(added[1].clone(), true).await?;

		let scheduler = scheduler(&pool);
		for mode in [SelectionMode::All, SelectionMode::Rotation] {
			let selection = scheduler.select_targets(mode, 10).await?;
			assert_eq!(selection, TargetSelection::Targets(vec![added[0].clone()]));
		}
		Ok(())
	}

	#[tokio::test]
	async fn prepare_is_idempotent() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["a.example", "b.example"]).await?;
		let scheduler = scheduler(&pool);

		assert_eq!(scheduler.prepare().await?, 2);
		assert_eq!(scheduler.prepare().await?, 0);
		for addr in &added {
			assert_eq!(count_records(&pool, addr)?, 1);
		}
		Ok(())
	}

	#[tokio::test]
	async fn empty_inventory_signals_no_targets() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let scheduler = scheduler(&pool);

		assert_eq!(scheduler.select_targets(SelectionMode::Rotation, 5).await?, TargetSelection::NoTargets);
		assert_eq!(scheduler.select_targets(SelectionMode::All, 5).await?, TargetSelection::NoTargets);
		Ok(())
	}

	#[tokio::test]
	async fn zero_limit_is_rejected() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let scheduler = scheduler(&pool);

		assert!(matches!(
			scheduler.select_targets(SelectionMode::Rotation, 0).await,
			Err(RunnerError::InvalidLimit(0))
		));
		Ok(())
	}

	#[tokio::test]
	async fn recording_nothing_has_no_side_effects() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["a.example"]).await?;
		let scheduler = scheduler(&pool);

		assert_eq!(scheduler.record_scan(&[], "nuclei:1", day(1), None).await?, 0);
		assert_eq!(count_records(&pool, &added[0])?, 0);
		Ok(())
	}

	#[tokio::test]
	async fn repeated_targets_are_recorded_once() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["a.example", "b.example"]).await?;
		let (a, b) = (added[0].clone(), added[1].clone());
		let scheduler = scheduler(&pool);

		let recorded = scheduler
			.record_scan(&[a.clone(), b.clone(), a.clone()], "nuclei:1", day(1), None)
			.await?;
		assert_eq!(recorded, 2);
		assert_eq!(count_records(&pool, &a)?, 1);
		assert_eq!(count_records(&pool, &b)?, 1);
		Ok(())
	}

	#[tokio::test]
	async fn target_sharing_the_prepare_slot_with_another_tool_is_selected() -> Result<()> {
		let (_dir, pool) = setup_test_db().await?;
		let added = add_targets(&pool, &["shared.example"]).await?;
		pool.get()?.execute(
			"INSERT INTO scan_info (name, port, scan_id, timestamp) VALUES (?1, ?2, 'nmap:prepare', ?3)",
			rusqlite::params![added[0].host, added[0].port, crate::db::MIN_TIMESTAMP],
		)?;

		let selection = scheduler(&pool).select_targets(SelectionMode::Rotation, 5).await?;
		assert_eq!(selection, TargetSelection::Targets(added));
		Ok(())
	}
}
