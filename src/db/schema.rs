use rusqlite::Connection;
use anyhow::{Result, Context};

pub fn create_tables(conn: &Connection) -> Result<()> {
	conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
		.context("Failed to enable WAL journal")?;

	conn.execute_batch(
		"
		CREATE TABLE IF NOT EXISTS domains (
			name TEXT NOT NULL,
			port INTEGER NOT NULL,
			discovered_tool TEXT,
			discovered_time TEXT,
			last_seen TEXT,
			blacklisted INTEGER,
			info TEXT,
			PRIMARY KEY (name, port)
		);

		-- scan history shared by every scanning tool, told apart by scan_id prefix
		CREATE TABLE IF NOT EXISTS scan_info (
			name TEXT NOT NULL,
			port INTEGER NOT NULL,
			scan_id TEXT,
			timestamp TEXT NOT NULL,
			info TEXT,
			PRIMARY KEY (name, port, timestamp),
			FOREIGN KEY (name, port) REFERENCES domains(name, port)
		);

		CREATE INDEX IF NOT EXISTS idx_scan_info_scan_id
		ON scan_info(scan_id);

		CREATE TABLE IF NOT EXISTS findings (
			primary_key INTEGER PRIMARY KEY AUTOINCREMENT,
			finding_identifier TEXT NOT NULL,
			canonical_identifier TEXT NOT NULL UNIQUE,
			name TEXT NOT NULL,
			finding TEXT NOT NULL,
			scan_id TEXT,
			issue_id TEXT,
			last_seen TEXT,
			severity TEXT
		);
		"
	).context("Failed to create tables")?;

	Ok(())
}
