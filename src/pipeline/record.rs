use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::models::finding::Severity;

/// Keys of a scanner record that are kept; everything else is dropped.
pub const REQUIRED_FINDING_ATTRIBUTES: [&str; 13] = [
	"template",
	"template-url",
	"template-id",
	"template-path",
	"info",
	"type",
	"host",
	"matched-at",
	"extracted-results",
	"ip",
	"timestamp",
	"matcher-status",
	"matched-line",
];

const UNKNOWN: &str = "unknown";

/// One line of scanner output, reduced to the allow-listed keys.
#[derive(Debug, Clone, PartialEq)]
pub struct FindingRecord {
	payload: Map<String, Value>,
}

impl FindingRecord {
	pub fn parse_line(line: &str) -> Result<Self> {
		let value: Value = serde_json::from_str(line).context("Error decoding JSON string")?;
		let Value::Object(raw) = value else {
			bail!("Expected a JSON object per line");
		};

		let payload = raw
			.into_iter()
			.filter(|(key, _)| REQUIRED_FINDING_ATTRIBUTES.contains(&key.as_str()))
			.collect();

		Ok(Self { payload })
	}

	pub fn payload(&self) -> &Map<String, Value> {
		&self.payload
	}

	/// A top-level string field, empty when absent.
	pub fn field(&self, key: &str) -> &str {
		self.payload.get(key).and_then(Value::as_str).unwrap_or("")
	}

	fn field_or_unknown(&self, key: &str) -> &str {
		self.payload.get(key).and_then(Value::as_str).unwrap_or(UNKNOWN)
	}

	fn info_field(&self, key: &str) -> Option<&str> {
		self.payload.get("info")?.get(key)?.as_str()
	}

	pub fn matched_at(&self) -> &str {
		self.field_or_unknown("matched-at")
	}

	pub fn template(&self) -> &str {
		self.field_or_unknown("template")
	}

	pub fn timestamp(&self) -> &str {
		self.field_or_unknown("timestamp")
	}

	/// `info.name`, the human readable name of the matched template.
	pub fn finding_name(&self) -> Option<&str> {
		self.info_field("name")
	}

	/// Severity as reported by the scanner, `unknown` when absent.
	pub fn raw_severity(&self) -> &str {
		self.info_field("severity").unwrap_or(UNKNOWN)
	}

	pub fn severity(&self) -> Severity {
		Severity::from_scanner(self.raw_severity())
	}

	pub fn display_name(&self) -> String {
		format!("[{}] [{}]", self.finding_name().unwrap_or(UNKNOWN), self.matched_at())
	}

	pub fn fingerprint(&self) -> String {
		format!("{} {}", self.matched_at(), self.template())
	}

	/// The record's own timestamp, if it is valid RFC 3339.
	pub fn seen_at(&self) -> Option<DateTime<Utc>> {
		DateTime::parse_from_rfc3339(self.timestamp())
			.ok()
			.map(|ts| ts.with_timezone(&Utc))
	}

	pub fn to_json(&self) -> Result<String> {
		serde_json::to_string(&self.payload).context("Failed to serialize finding")
	}
}
