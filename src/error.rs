use std::path::PathBuf;
use thiserror::Error;

/// Run-level failures. Anything that reaches `main` as a `RunnerError` ends the run.
#[derive(Debug, Error)]
pub enum RunnerError {
	#[error("number of targets must be at least 1, got {0}")]
	InvalidLimit(usize),

	#[error("{0} is not set")]
	MissingSetting(&'static str),

	#[error("invalid configuration: {0}")]
	Config(String),

	#[error("failed to read {path:?}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("storage error: {0}")]
	Storage(#[source] anyhow::Error),

	#[error("failed to create issue for finding {fingerprint}: {source}")]
	TicketCreation {
		fingerprint: String,
		#[source]
		source: anyhow::Error,
	},
}
