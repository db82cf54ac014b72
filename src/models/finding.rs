// src/models/finding.rs

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Tracker-side severity, mapped from the scanner's severity names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
	Info,
	Low,
	Moderate,
	Important,
	Critical,
	Unknown,
}

impl Severity {
	/// Maps a scanner severity (`info`, `low`, `medium`, `high`, `critical`).
	/// Anything else becomes `Unknown`.
	pub fn from_scanner(raw: &str) -> Self {
		match raw.trim().to_ascii_lowercase().as_str() {
			"info" => Severity::Info,
			"low" => Severity::Low,
			"medium" => Severity::Moderate,
			"high" => Severity::Important,
			"critical" => Severity::Critical,
			_ => Severity::Unknown,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Severity::Info => "info",
			Severity::Low => "low",
			Severity::Moderate => "moderate",
			Severity::Important => "important",
			Severity::Critical => "critical",
			Severity::Unknown => "unknown",
		}
	}
}

impl fmt::Display for Severity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Severity {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"info" => Ok(Severity::Info),
			"low" => Ok(Severity::Low),
			"moderate" => Ok(Severity::Moderate),
			"important" => Ok(Severity::Important),
			"critical" => Ok(Severity::Critical),
			"unknown" => Ok(Severity::Unknown),
			other => Err(anyhow!("Unknown severity {:?}", other)),
		}
	}
}

/// A stored, deduplicated finding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
	pub id: i64,
	pub fingerprint: String,
	pub canonical_fingerprint: String,
	pub name: String,
	pub payload: serde_json::Value,
	pub scan_id: Option<String>,
	/// `None` until the ticket step ran; empty when filing was skipped.
	pub issue_id: Option<String>,
	pub last_seen: Option<DateTime<Utc>>,
	pub severity: Option<Severity>,
}

#[derive(Debug, Clone)]
pub struct NewFinding {
	pub fingerprint: String,
	pub canonical_fingerprint: String,
	pub name: String,
	pub payload: String,
	pub scan_id: String,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn maps_scanner_severities() {
		assert_eq!(Severity::from_scanner("info"), Severity::Info);
		assert_eq!(Severity::from_scanner("low"), Severity::Low);
		assert_eq!(Severity::from_scanner("medium"), Severity::Moderate);
		assert_eq!(Severity::from_scanner("high"), Severity::Important);
		assert_eq!(Severity::from_scanner("critical"), Severity::Critical);
		assert_eq!(Severity::from_scanner("unknown"), Severity::Unknown);
		assert_eq!(Severity::from_scanner("catastrophic"), Severity::Unknown);
	}

	#[test]
	fn parses_tracker_severity_names() -> anyhow::Result<()> {
		assert_eq!("important".parse::<Severity>()?, Severity::Important);
		assert_eq!(" Moderate ".parse::<Severity>()?, Severity::Moderate);
		assert!("medium".parse::<Severity>().is_err());
		Ok(())
	}
}
