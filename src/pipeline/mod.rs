// src/pipeline/mod.rs

pub mod fingerprint;
pub mod record;

use chrono::Utc;
use log::{error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::sleep;

use crate::context::RunContext;
use crate::db::connection::SqlitePool;
use crate::error::RunnerError;
use crate::models::finding::{NewFinding, Severity};
use crate::repositories::finding_repo::FindingRepository;
use crate::templates::DescriptionRenderer;
use crate::tracker::{NewTicket, TicketTracker};
use fingerprint::canonical_fingerprint;
use record::FindingRecord;

/// When and how tickets are filed for new findings.
#[derive(Debug, Clone)]
pub struct TicketPolicy {
	/// New findings with these severities never get a ticket.
	pub ignored: Vec<Severity>,
	pub assignee_ids: Vec<u64>,
	/// Tracker calls per finding before giving up; at least one is made.
	pub attempts: u32,
	pub retry_delay: Duration,
}

impl TicketPolicy {
	pub fn ignores(&self, severity: Severity) -> bool {
		self.ignored.contains(&severity)
	}
}

impl Default for TicketPolicy {
	fn default() -> Self {
		Self {
			ignored: vec![Severity::Info, Severity::Low],
			assignee_ids: Vec::new(),
			attempts: 3,
			retry_delay: Duration::from_secs(2),
		}
	}
}

/// Everything needed to file tickets. A pipeline without it never calls out.
pub struct Ticketing {
	pub tracker: Box<dyn TicketTracker>,
	pub renderer: Box<dyn DescriptionRenderer>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncSummary {
	pub processed: usize,
	pub new_findings: usize,
	pub existing_findings: usize,
	pub tickets_filed: usize,
	pub tickets_skipped: usize,
	pub malformed_lines: usize,
	pub errors: usize,
}

enum TicketOutcome {
	Filed(String),
	Skipped,
}

impl TicketOutcome {
	/// Value stored as the finding's issue id; empty marks a deliberate skip.
	fn into_issue_id(self) -> String {
		match self {
			TicketOutcome::Filed(url) => url,
			TicketOutcome::Skipped => String::new(),
		}
	}
}

/// Deduplicates scanner output against stored findings and files tickets for
/// new ones. Every write commits on its own, so a run that dies half way can be
/// repeated over the same file.
pub struct FindingPipeline {
	findings: FindingRepository,
	context: RunContext,
	policy: TicketPolicy,
	ticketing: Option<Ticketing>,
}

impl FindingPipeline {
	pub fn new(
		pool: Arc<SqlitePool>,
		context: RunContext,
		policy: TicketPolicy,
		ticketing: Option<Ticketing>,
	) -> Self {
		Self {
			findings: FindingRepository::new(pool),
			context,
			policy,
			ticketing,
		}
	}

	pub async fn process_result_file(&self, path: &Path) -> Result<SyncSummary, RunnerError> {
		let io_error = |source| RunnerError::Io {
			path: path.to_path_buf(),
			source,
		};

		let file = File::open(path).await.map_err(io_error)?;
		let mut lines = BufReader::new(file).split(b'\n');
		let mut summary = SyncSummary::default();
		let mut line_number = 0usize;

		info!("Processing results from {:?} for scan {}", path, self.context.scan_id);

		while let Some(raw) = lines.next_segment().await.map_err(io_error)? {
			line_number += 1;
			let line = String::from_utf8_lossy(&raw);
			if line.trim().is_empty() {
				continue;
			}

			let record = match FindingRecord::parse_line(&line) {
				Ok(record) => record,
				Err(e) => {
					warn!("Skipping malformed line {} of {:?}: {:#}", line_number, path, e);
					summary.malformed_lines += 1;
					continue;
				}
			};

			self.process_record(&record, path, &mut summary).await?;
		}

		info!(
			"Processing complete: {} findings ({} new, {} known), {} issues filed, {} skipped, {} malformed lines, {} errors",
			summary.processed,
			summary.new_findings,
			summary.existing_findings,
			summary.tickets_filed,
			summary.tickets_skipped,
			summary.malformed_lines,
			summary.errors,
		);
		Ok(summary)
	}

	async fn process_record(
		&self,
		record: &FindingRecord,
		results_path: &Path,
		summary: &mut SyncSummary,
	) -> Result<(), RunnerError> {
		let fingerprint = record.fingerprint();
		let canonical = canonical_fingerprint(&fingerprint).to_string();
		let name = record.display_name();
		let severity = record.severity();
		summary.processed += 1;

		if self.is_known(&canonical, summary).await {
			info!("Finding {} already exists in the database", name);
			summary.existing_findings += 1;
		} else {
			let new_finding = NewFinding {
				fingerprint: fingerprint.clone(),
				canonical_fingerprint: canonical.clone(),
				name: name.clone(),
				payload: record.to_json().map_err(RunnerError::Storage)?,
				scan_id: self.context.scan_id.clone(),
			};

			let inserted = self.findings
				.insert_new(new_finding)
				.await
				.map_err(RunnerError::Storage)?;

			if inserted {
				summary.new_findings += 1;
				let outcome = self.file_ticket(record, &name, severity, results_path).await?;
				match outcome {
					TicketOutcome::Filed(_) => summary.tickets_filed += 1,
					TicketOutcome::Skipped => summary.tickets_skipped += 1,
				}

				match self.findings.set_issue_id(canonical.clone(), outcome.into_issue_id()).await {
					Ok(true) => {}
					Ok(false) => {
						error!("Failed to associate issue ID with finding {}: finding vanished", fingerprint);
						summary.errors += 1;
					}
					Err(e) => {
						error!("Failed to associate issue ID with finding {}: {:#}", fingerprint, e);
						summary.errors += 1;
					}
				}
			} else {
				info!("Finding {} was stored concurrently, treating it as known", name);
				summary.existing_findings += 1;
			}
		}

		let seen_at = record.seen_at().unwrap_or_else(Utc::now);
		match self.findings.mark_seen(canonical, seen_at, severity).await {
			Ok(true) => info!("Updated last seen for {}", name),
			Ok(false) => {
				error!("Cannot update last seen for {}", fingerprint);
				summary.errors += 1;
			}
			Err(e) => {
				error!("Cannot update last seen for {}: {:#}", fingerprint, e);
				summary.errors += 1;
			}
		}
		Ok(())
	}

	/// A failed lookup is logged and treated as unknown; the unique index on the
	/// canonical fingerprint still keeps the insert from duplicating a row.
	async fn is_known(&self, canonical: &str, summary: &mut SyncSummary) -> bool {
		match self.findings.find_by_canonical(canonical.to_string()).await {
			Ok(found) => found.is_some(),
			Err(e) => {
				error!("Existence check for {} failed: {:#}", canonical, e);
				summary.errors += 1;
				false
			}
		}
	}

	async fn file_ticket(
		&self,
		record: &FindingRecord,
		name: &str,
		severity: Severity,
		results_path: &Path,
	) -> Result<TicketOutcome, RunnerError> {
		let Some(ticketing) = &self.ticketing else {
			info!("Skipping issue creation for {} with severity {}: issue creation disabled", name, severity);
			return Ok(TicketOutcome::Skipped);
		};

		if self.policy.ignores(severity) {
			info!("Skipping issue creation for {} with severity {}", name, severity);
			return Ok(TicketOutcome::Skipped);
		}

		let fatal = |source| RunnerError::TicketCreation {
			fingerprint: record.fingerprint(),
			source,
		};

		let description = ticketing.renderer.render(record, results_path).map_err(fatal)?;
		let ticket = NewTicket::new(name, &description, self.policy.assignee_ids.clone(), severity);

		let attempts = self.policy.attempts.max(1);
		let mut attempt = 1;
		loop {
			match ticketing.tracker.create_ticket(&ticket).await {
				Ok(issue_id) => {
					info!("Created issue {} for {}", issue_id, name);
					return Ok(TicketOutcome::Filed(issue_id));
				}
				Err(e) if attempt < attempts => {
					warn!("Issue creation for {} failed (attempt {}/{}): {:#}", name, attempt, attempts, e);
					attempt += 1;
					sleep(self.policy.retry_delay).await;
				}
				Err(e) => {
					error!("Failed to create issue for {}", record.fingerprint());
					return Err(fatal(e));
				}
			}
		}
	}
}
