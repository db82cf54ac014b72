// src/models/scan.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::models::target::TargetAddr;

/// One scan of one target. Rows are append-only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanRecord {
	pub target: TargetAddr,
	pub scan_id: String,
	pub timestamp: DateTime<Utc>,
	pub info: Option<String>,
}

impl ScanRecord {
	pub fn new(target: TargetAddr, scan_id: &str, timestamp: DateTime<Utc>, info: Option<&str>) -> Self {
		Self {
			target,
			scan_id: scan_id.to_string(),
			timestamp,
			info: info.map(str::to_string),
		}
	}
}
