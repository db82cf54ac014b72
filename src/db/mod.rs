pub mod connection;
pub mod schema;

use chrono::{DateTime, NaiveDateTime, Utc};

/// Fixed-width UTC format, so text order equals chronological order.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Smallest timestamp the store can hold; sorts before every real scan.
pub const MIN_TIMESTAMP: &str = "0001-01-01 00:00:00.000000";

pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
	ts.format(TIMESTAMP_FORMAT).to_string()
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
	NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
		.ok()
		.map(|naive| naive.and_utc())
}

#[cfg(test)]
pub mod testing {
	use super::connection::{self, SqlitePool};
	use anyhow::Result;
	use std::sync::Arc;
	use tempfile::{tempdir, TempDir};

	/// The returned directory must outlive the pool.
	pub async fn setup_test_db() -> Result<(TempDir, Arc<SqlitePool>)> {
		let dir = tempdir()?;
		let db_path = dir.path().join("test.db");
		let pool = Arc::new(connection::establish_pool_with_path(db_path)?);

		let conn = pool.get()?;
		super::schema::create_tables(&conn)?;

		Ok((dir, pool))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;

	#[test]
	fn timestamps_round_trip_and_sort_lexicographically() {
		let early = Utc.with_ymd_and_hms(2023, 1, 2, 3, 4, 5).unwrap();
		let late = Utc.with_ymd_and_hms(2024, 11, 2, 3, 4, 5).unwrap();

		assert_eq!(parse_timestamp(&format_timestamp(&early)), Some(early));
		assert!(format_timestamp(&early) < format_timestamp(&late));
		assert!(MIN_TIMESTAMP < format_timestamp(&early).as_str());
		assert!(parse_timestamp(MIN_TIMESTAMP).is_some());
	}
}
