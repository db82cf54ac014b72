use chrono::{DateTime, Utc};
use rand::Rng;

/// Per-run state handed to every component at construction.
#[derive(Debug, Clone)]
pub struct RunContext {
	pub scan_id: String,
	/// Scan ids of this tool start with this prefix.
	pub scan_id_prefix: String,
	pub started_at: DateTime<Utc>,
}

impl RunContext {
	pub fn new(scan_id_prefix: &str, scan_id: Option<String>) -> Self {
		Self {
			scan_id: scan_id.unwrap_or_else(|| generate_scan_id(scan_id_prefix)),
			scan_id_prefix: scan_id_prefix.to_string(),
			started_at: Utc::now(),
		}
	}
}

fn generate_scan_id(prefix: &str) -> String {
	format!("{}:{}", prefix, rand::rng().random_range(100_000..=999_999))
}
