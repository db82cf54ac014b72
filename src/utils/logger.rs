use anyhow::{Context, Result};
use chrono::Utc;
use env_logger::{Builder, Env, Logger, Target};
use log::{Log, Metadata, Record};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;

/// Console logging plus an optional JSON-lines file tagged with the scan id.
pub struct RunLogger {
	console: Logger,
	file: Option<Logger>,
}

impl Log for RunLogger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		self.console.enabled(metadata) || self.file.as_ref().is_some_and(|f| f.enabled(metadata))
	}

	fn log(&self, record: &Record) {
		self.console.log(record);
		if let Some(file) = &self.file {
			file.log(record);
		}
	}

	fn flush(&self) {
		self.console.flush();
		if let Some(file) = &self.file {
			file.flush();
		}
	}
}

fn env() -> Env<'static> {
	Env::default().default_filter_or("info")
}

pub fn init(logfile: Option<&Path>, scan_id: &str) -> Result<()> {
	let console = Builder::from_env(env())
		.format_timestamp_millis()
		.format_module_path(true)
		.build();

	let file = match logfile {
		Some(path) => {
			let file = OpenOptions::new()
				.create(true)
				.append(true)
				.open(path)
				.with_context(|| format!("Failed to open log file {:?}", path))?;
			let mut builder = file_builder(file, scan_id);
			builder.parse_env(env());
			Some(builder.build())
		}
		None => None,
	};

	let max_level = file
		.as_ref()
		.map_or(console.filter(), |f| f.filter().max(console.filter()));

	log::set_boxed_logger(Box::new(RunLogger { console, file }))
		.context("Logger already initialized")?;
	log::set_max_level(max_level);
	Ok(())
}

fn file_builder(file: File, scan_id: &str) -> Builder {
	let scan_id = scan_id.to_string();
	let mut builder = Builder::new();
	builder
		.target(Target::Pipe(Box::new(file)))
		.format(move |buf, record| {
			let timestamp = Utc::now().to_rfc3339();
			writeln!(buf, "{}", json_line(record, &scan_id, &timestamp))
		});
	builder
}

fn json_line(record: &Record, scan_id: &str, timestamp: &str) -> serde_json::Value {
	serde_json::json!({
		"level": record.level().as_str(),
		"timestamp": timestamp,
		"scan_id": scan_id,
		"target": record.target(),
		"message": record.args().to_string(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use log::{Level, LevelFilter};
	use tempfile::tempdir;

	#[test]
	fn json_lines_carry_the_scan_id() {
		let line = json_line(
			&Record::builder()
				.args(format_args!("Selected {} targets", 3))
				.level(Level::Info)
				.target("nuclei_scan_runner::scheduler")
				.build(),
			"nuclei:123456",
			"2024-05-01T10:00:00+00:00",
		);

		assert_eq!(line["level"], "INFO");
		assert_eq!(line["scan_id"], "nuclei:123456");
		assert_eq!(line["target"], "nuclei_scan_runner::scheduler");
		assert_eq!(line["message"], "Selected 3 targets");
	}

	#[test]
	fn file_logger_appends_one_object_per_record() -> Result<()> {
		let dir = tempdir()?;
		let path = dir.path().join("run.log");
		let file = OpenOptions::new().create(true).append(true).open(&path)?;
		let logger = file_builder(file, "nuclei:654321")
			.filter_level(LevelFilter::Info)
			.build();

		logger.log(&Record::builder().args(format_args!("kept")).level(Level::Warn).build());
		logger.log(&Record::builder().args(format_args!("dropped")).level(Level::Debug).build());
		logger.flush();

		let written = std::fs::read_to_string(&path)?;
		let lines: Vec<serde_json::Value> = written
			.lines()
			.map(serde_json::from_str)
			.collect::<Result<_, _>>()?;
		assert_eq!(lines.len(), 1);
		assert_eq!(lines[0]["message"], "kept");
		assert_eq!(lines[0]["level"], "WARN");
		assert_eq!(lines[0]["scan_id"], "nuclei:654321");
		Ok(())
	}
}
