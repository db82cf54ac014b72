// src/config.rs

use log::{debug, info};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::RunnerError;
use crate::models::finding::Severity;

pub const ENV_PREFIX: &str = "NUCLEI_SCAN_RUNNER_";
pub const DATABASE_URL_VAR: &str = "DB_CONNECTION_STRING";
pub const GITLAB_TOKEN_VARS: [&str; 2] = ["GL_TOKEN", "GL-TOKEN"];

const LOCAL_CONFIG_FILE: &str = "nuclei-scan-runner.toml";
const DEV_ENV_FILE: &str = ".env.testing";

const DEFAULT_NUMBER_OF_TARGETS: usize = 50;
const DEFAULT_SCAN_ID_PREFIX: &str = "nuclei";
const DEFAULT_GITLAB_HOST: &str = "https://gitlab.com";
const DEFAULT_ASSIGNEE: &str = "1985";
const DEFAULT_IGNORED_SEVERITIES: [Severity; 2] = [Severity::Info, Severity::Low];
const DEFAULT_TEMPLATES_DIRECTORY: &str = "vulnerability-templates";
const DEFAULT_TICKET_ATTEMPTS: u32 = 3;
const DEFAULT_TICKET_RETRY_DELAY_MS: u64 = 2000;

/// One source of settings. Every field is optional so sources can be stacked.
#[derive(Debug, Default, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ConfigLayer {
	pub number_of_targets: Option<usize>,
	pub all_targets: Option<bool>,
	pub scan_id_prefix: Option<String>,
	pub gitlab_host: Option<String>,
	pub gitlab_project_id: Option<String>,
	pub assignee: Option<String>,
	pub dont_create_issues: Option<bool>,
	pub ignored_severities: Option<Vec<String>>,
	pub templates_directory: Option<PathBuf>,
	pub ticket_attempts: Option<u32>,
	pub ticket_retry_delay_ms: Option<u64>,
	pub logfile: Option<PathBuf>,
}

impl ConfigLayer {
	/// Fields set in `self` win over those in `lower`.
	pub fn or(self, lower: ConfigLayer) -> ConfigLayer {
		ConfigLayer {
			number_of_targets: self.number_of_targets.or(lower.number_of_targets),
			all_targets: self.all_targets.or(lower.all_targets),
			scan_id_prefix: self.scan_id_prefix.or(lower.scan_id_prefix),
			gitlab_host: self.gitlab_host.or(lower.gitlab_host),
			gitlab_project_id: self.gitlab_project_id.or(lower.gitlab_project_id),
			assignee: self.assignee.or(lower.assignee),
			dont_create_issues: self.dont_create_issues.or(lower.dont_create_issues),
			ignored_severities: self.ignored_severities.or(lower.ignored_severities),
			templates_directory: self.templates_directory.or(lower.templates_directory),
			ticket_attempts: self.ticket_attempts.or(lower.ticket_attempts),
			ticket_retry_delay_ms: self.ticket_retry_delay_ms.or(lower.ticket_retry_delay_ms),
			logfile: self.logfile.or(lower.logfile),
		}
	}

	pub fn from_toml(raw: &str) -> Result<Self, RunnerError> {
		toml::from_str(raw).map_err(|e| RunnerError::Config(e.to_string()))
	}

	pub fn from_file(path: &Path) -> Result<Self, RunnerError> {
		let raw = std::fs::read_to_string(path).map_err(|source| RunnerError::Io {
			path: path.to_path_buf(),
			source,
		})?;
		Self::from_toml(&raw)
	}
}

/// Settings and secrets read from `NUCLEI_SCAN_RUNNER_*` and the secret variables.
#[derive(Debug, Default, Clone)]
pub struct EnvConfig {
	pub layer: ConfigLayer,
	pub database_url: Option<String>,
	pub gitlab_token: Option<String>,
}

impl EnvConfig {
	pub fn gather() -> Result<Self, RunnerError> {
		Self::from_lookup(|key| std::env::var(key).ok())
	}

	pub fn from_lookup<F>(lookup: F) -> Result<Self, RunnerError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

		let layer = ConfigLayer {
			number_of_targets: parse_var("NUMBER_OF_TARGETS", var("NUMBER_OF_TARGETS"))?,
			all_targets: parse_flag("ALL_TARGETS", var("ALL_TARGETS"))?,
			scan_id_prefix: var("SCAN_ID_PREFIX"),
			gitlab_host: var("GITLAB_HOST"),
			gitlab_project_id: var("GITLAB_PROJECT_ID"),
			assignee: var("ASSIGNEE"),
			dont_create_issues: parse_flag("DONT_CREATE_ISSUES", var("DONT_CREATE_ISSUES"))?,
			ignored_severities: var("IGNORED_SEVERITIES")
				.map(|raw| split_list(&raw).map(str::to_string).collect()),
			templates_directory: var("TEMPLATES_DIRECTORY").map(PathBuf::from),
			ticket_attempts: parse_var("TICKET_ATTEMPTS", var("TICKET_ATTEMPTS"))?,
			ticket_retry_delay_ms: parse_var("TICKET_RETRY_DELAY_MS", var("TICKET_RETRY_DELAY_MS"))?,
			logfile: var("LOGFILE").map(PathBuf::from),
		};

		Ok(Self {
			layer,
			database_url: lookup(DATABASE_URL_VAR).filter(|v| !v.is_empty()),
			gitlab_token: GITLAB_TOKEN_VARS
				.iter()
				.find_map(|name| lookup(name).filter(|v| !v.is_empty())),
		})
	}
}

fn parse_var<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, RunnerError> {
	raw.map(|value| {
		value.trim().parse().map_err(|_| {
			RunnerError::Config(format!("{}{} has an invalid value {:?}", ENV_PREFIX, name, value))
		})
	})
	.transpose()
}

fn parse_flag(name: &str, raw: Option<String>) -> Result<Option<bool>, RunnerError> {
	raw.map(|value| match value.trim().to_ascii_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Ok(true),
		"0" | "false" | "no" | "off" => Ok(false),
		_ => Err(RunnerError::Config(format!("{}{} is not a boolean: {:?}", ENV_PREFIX, name, value))),
	})
	.transpose()
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
	raw.split(',').map(str::trim).filter(|part| !part.is_empty())
}

/// Loads a dotenv file into the process environment.
///
/// An explicit path must load. Otherwise `.env.testing` (with `dev`) or `.env`
/// is picked up from the working directory when present.
pub fn load_env_file(explicit: Option<&Path>, dev: bool) -> Result<Option<PathBuf>, RunnerError> {
	if let Some(path) = explicit {
		dotenvy::from_path(path).map_err(|e| RunnerError::Config(format!("cannot load {:?}: {}", path, e)))?;
		return Ok(Some(path.to_path_buf()));
	}

	let loaded = if dev {
		dotenvy::from_filename(DEV_ENV_FILE)
	} else {
		dotenvy::dotenv()
	};

	match loaded {
		Ok(path) => Ok(Some(path)),
		Err(dotenvy::Error::Io(_)) => Ok(None),
		Err(e) => Err(RunnerError::Config(format!("cannot parse env file: {}", e))),
	}
}

fn default_config_locations() -> Vec<PathBuf> {
	let mut locations = vec![PathBuf::from(LOCAL_CONFIG_FILE)];
	if let Some(dir) = dirs::config_dir() {
		locations.push(dir.join("nuclei-scan-runner").join("config.toml"));
	}
	locations
}

/// Resolved settings for one run.
#[derive(Debug, Clone)]
pub struct Settings {
	pub database_url: Option<String>,
	pub gitlab_token: Option<String>,
	pub number_of_targets: usize,
	pub all_targets: bool,
	pub scan_id_prefix: String,
	pub gitlab_host: String,
	pub gitlab_project_id: Option<String>,
	pub assignee_ids: Vec<u64>,
	pub dont_create_issues: bool,
	pub ignored_severities: Vec<Severity>,
	pub templates_directory: PathBuf,
	pub ticket_attempts: u32,
	pub ticket_retry_delay: Duration,
	pub logfile: Option<PathBuf>,
	/// Config file the settings were read from, if any.
	pub source: Option<PathBuf>,
}

impl Settings {
	/// CLI flags, then the environment, then the config file, then defaults.
	pub fn load(cli: ConfigLayer, config_path: Option<&Path>) -> Result<Self, RunnerError> {
		let env = EnvConfig::gather()?;

		let source = match config_path {
			Some(path) => Some(path.to_path_buf()),
			None => default_config_locations().into_iter().find(|p| p.is_file()),
		};
		let file = match &source {
			Some(path) => {
				debug!("Reading configuration from {:?}", path);
				ConfigLayer::from_file(path)?
			}
			None => ConfigLayer::default(),
		};

		let mut settings = Self::resolve(cli.or(env.layer).or(file), env.database_url, env.gitlab_token)?;
		settings.source = source;
		Ok(settings)
	}

	pub fn resolve(
		layer: ConfigLayer,
		database_url: Option<String>,
		gitlab_token: Option<String>,
	) -> Result<Self, RunnerError> {
		let assignee_ids = parse_assignees(layer.assignee.as_deref().unwrap_or(DEFAULT_ASSIGNEE))?;
		let ignored_severities = match layer.ignored_severities {
			Some(raw) => raw
				.iter()
				.map(|s| parse_severity(s))
				.collect::<Result<Vec<_>, _>>()?,
			None => DEFAULT_IGNORED_SEVERITIES.to_vec(),
		};

		let scan_id_prefix = layer.scan_id_prefix.unwrap_or_else(|| DEFAULT_SCAN_ID_PREFIX.to_string());
		if scan_id_prefix.is_empty() {
			return Err(RunnerError::Config("scan-id-prefix must not be empty".to_string()));
		}

		Ok(Self {
			database_url,
			gitlab_token,
			number_of_targets: layer.number_of_targets.unwrap_or(DEFAULT_NUMBER_OF_TARGETS),
			all_targets: layer.all_targets.unwrap_or(false),
			scan_id_prefix,
			gitlab_host: layer.gitlab_host.unwrap_or_else(|| DEFAULT_GITLAB_HOST.to_string()),
			gitlab_project_id: layer.gitlab_project_id,
			assignee_ids,
			dont_create_issues: layer.dont_create_issues.unwrap_or(false),
			ignored_severities,
			templates_directory: layer
				.templates_directory
				.unwrap_or_else(|| PathBuf::from(DEFAULT_TEMPLATES_DIRECTORY)),
			ticket_attempts: layer.ticket_attempts.unwrap_or(DEFAULT_TICKET_ATTEMPTS),
			ticket_retry_delay: Duration::from_millis(
				layer.ticket_retry_delay_ms.unwrap_or(DEFAULT_TICKET_RETRY_DELAY_MS),
			),
			logfile: layer.logfile,
			source: None,
		})
	}

	pub fn require_database_url(&self) -> Result<&str, RunnerError> {
		self.database_url.as_deref().ok_or(RunnerError::MissingSetting(DATABASE_URL_VAR))
	}

	pub fn require_gitlab_project_id(&self) -> Result<&str, RunnerError> {
		self.gitlab_project_id
			.as_deref()
			.ok_or(RunnerError::MissingSetting("gitlab-project-id"))
	}

	pub fn require_gitlab_token(&self) -> Result<&str, RunnerError> {
		self.gitlab_token.as_deref().ok_or(RunnerError::MissingSetting("GL_TOKEN"))
	}

	pub fn log_summary(&self) {
		info!(
			"Settings: {} targets per run (all targets: {}), scan id prefix {:?}, GitLab {} project {}, issue creation {}",
			self.number_of_targets,
			self.all_targets,
			self.scan_id_prefix,
			self.gitlab_host,
			self.gitlab_project_id.as_deref().unwrap_or("<unset>"),
			if self.dont_create_issues { "disabled" } else { "enabled" },
		);
	}
}

/// Comma-separated numeric user ids.
pub fn parse_assignees(raw: &str) -> Result<Vec<u64>, RunnerError> {
	split_list(raw)
		.map(|id| {
			id.parse::<u64>()
				.map_err(|_| RunnerError::Config(format!("invalid assignee id {:?}", id)))
		})
		.collect()
}

/// Accepts tracker names (`moderate`) as well as scanner names (`medium`).
fn parse_severity(raw: &str) -> Result<Severity, RunnerError> {
	raw.parse::<Severity>().or_else(|_| match Severity::from_scanner(raw) {
		Severity::Unknown => Err(RunnerError::Config(format!("unknown severity {:?}", raw))),
		severity => Ok(severity),
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;
	use tempfile::tempdir;

	fn env(vars: &[(&str, &str)]) -> Result<EnvConfig, RunnerError> {
		let vars: HashMap<String, String> = vars
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		EnvConfig::from_lookup(|key| vars.get(key).cloned())
	}

	#[test]
	fn defaults_apply_when_nothing_is_set() -> Result<(), RunnerError> {
		let settings = Settings::resolve(ConfigLayer::default(), None, None)?;

		assert_eq!(settings.number_of_targets, 50);
		assert!(!settings.all_targets);
		assert_eq!(settings.scan_id_prefix, "nuclei");
		assert_eq!(settings.gitlab_host, "https://gitlab.com");
		assert_eq!(settings.assignee_ids, vec![1985]);
		assert_eq!(settings.ignored_severities, vec![Severity::Info, Severity::Low]);
		assert_eq!(settings.templates_directory, PathBuf::from("vulnerability-templates"));
		assert_eq!(settings.ticket_attempts, 3);
		assert_eq!(settings.ticket_retry_delay, Duration::from_secs(2));
		assert!(matches!(settings.require_database_url(), Err(RunnerError::MissingSetting("DB_CONNECTION_STRING"))));
		assert!(settings.require_gitlab_project_id().is_err());
		Ok(())
	}

	#[test]
	fn cli_beats_env_beats_file() -> Result<(), RunnerError> {
		let file = ConfigLayer::from_toml(
			r#"
			number-of-targets = 10
			scan-id-prefix = "file"
			gitlab-project-id = "security/findings"
			ignored-severities = ["info"]
			"#,
		)?;
		let env = env(&[
			("NUCLEI_SCAN_RUNNER_NUMBER_OF_TARGETS", "20"),
			("NUCLEI_SCAN_RUNNER_SCAN_ID_PREFIX", "env"),
			("DB_CONNECTION_STRING", "sqlite:///tmp/runner.db"),
			("GL-TOKEN", "glpat-legacy"),
		])?;
		let cli = ConfigLayer {
			number_of_targets: Some(30),
			..ConfigLayer::default()
		};

		let settings = Settings::resolve(cli.or(env.layer).or(file), env.database_url, env.gitlab_token)?;
		assert_eq!(settings.number_of_targets, 30);
		assert_eq!(settings.scan_id_prefix, "env");
		assert_eq!(settings.gitlab_project_id.as_deref(), Some("security/findings"));
		assert_eq!(settings.ignored_severities, vec![Severity::Info]);
		assert_eq!(settings.require_database_url()?, "sqlite:///tmp/runner.db");
		assert_eq!(settings.require_gitlab_token()?, "glpat-legacy");
		Ok(())
	}

	#[test]
	fn underscore_token_is_preferred() -> Result<(), RunnerError> {
		let env = env(&[("GL_TOKEN", "glpat-new"), ("GL-TOKEN", "glpat-legacy")])?;
		assert_eq!(env.gitlab_token.as_deref(), Some("glpat-new"));
		Ok(())
	}

	#[test]
	fn env_values_are_validated() {
		assert!(env(&[("NUCLEI_SCAN_RUNNER_NUMBER_OF_TARGETS", "many")]).is_err());
		assert!(env(&[("NUCLEI_SCAN_RUNNER_ALL_TARGETS", "perhaps")]).is_err());

		let parsed = env(&[
			("NUCLEI_SCAN_RUNNER_ALL_TARGETS", "1"),
			("NUCLEI_SCAN_RUNNER_IGNORED_SEVERITIES", "info, low,medium"),
		])
		.map(|e| e.layer);
		let layer = parsed.unwrap_or_default();
		assert_eq!(layer.all_targets, Some(true));
		assert_eq!(
			layer.ignored_severities,
			Some(vec!["info".to_string(), "low".to_string(), "medium".to_string()])
		);
	}

	#[test]
	fn severities_accept_scanner_and_tracker_names() -> Result<(), RunnerError> {
		let layer = ConfigLayer {
			ignored_severities: Some(vec!["medium".into(), "important".into(), "Info".into()]),
			..ConfigLayer::default()
		};
		let settings = Settings::resolve(layer, None, None)?;
		assert_eq!(
			settings.ignored_severities,
			vec![Severity::Moderate, Severity::Important, Severity::Info]
		);

		let bad = ConfigLayer {
			ignored_severities: Some(vec!["severe".into()]),
			..ConfigLayer::default()
		};
		assert!(Settings::resolve(bad, None, None).is_err());
		Ok(())
	}

	#[test]
	fn assignees_are_comma_separated_ids() -> Result<(), RunnerError> {
		assert_eq!(parse_assignees("1985, 42,,7")?, vec![1985, 42, 7]);
		assert_eq!(parse_assignees("")?, Vec::<u64>::new());
		assert!(parse_assignees("1985,bob").is_err());
		Ok(())
	}

	#[test]
	fn unknown_keys_in_config_file_are_rejected() {
		assert!(ConfigLayer::from_toml("number-of-target = 5").is_err());
	}

	#[test]
	fn explicit_config_file_is_read() -> Result<(), Box<dyn std::error::Error>> {
		let dir = tempdir()?;
		let path = dir.path().join("runner.toml");
		std::fs::write(&path, "assignee = \"7,8\"\nticket-retry-delay-ms = 0\n")?;

		let settings = Settings::load(ConfigLayer::default(), Some(&path))?;
		assert_eq!(settings.source.as_deref(), Some(path.as_path()));
		assert_eq!(settings.ticket_retry_delay, Duration::ZERO);

		let missing = Settings::load(ConfigLayer::default(), Some(&dir.path().join("missing.toml")));
		assert!(matches!(missing, Err(RunnerError::Io { .. })));
		Ok(())
	}
}
