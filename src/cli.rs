// src/cli.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::ConfigLayer;
use crate::models::target::TargetAddr;

#[derive(Parser, Debug)]
#[command(name = "nuclei-scan-runner")]
#[command(version)]
#[command(about = "Rotates nuclei scan targets and syncs findings into GitLab issues", long_about = None)]
pub struct Args {
	#[command(subcommand)]
	pub command: Command,

	/// TOML config file
	#[arg(long, global = true)]
	pub config: Option<PathBuf>,

	/// Dotenv file with DB_CONNECTION_STRING and GL_TOKEN
	#[arg(long, global = true, conflicts_with = "dev")]
	pub env_file: Option<PathBuf>,

	/// Load .env.testing instead of .env
	#[arg(long, global = true)]
	pub dev: bool,

	/// Also append JSON log lines to this file
	#[arg(long, global = true)]
	pub logfile: Option<PathBuf>,

	/// Use this scan id instead of generating one
	#[arg(long, global = true)]
	pub scan_id: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Print the targets for the next scan, one host:port per line
	Select(SelectArgs),
	/// Record a scan of the targets listed in a file
	Mark(MarkArgs),
	/// Deduplicate a nuclei JSON-lines result file and file issues
	Process(ProcessArgs),
	/// Add a discovered target or refresh its last-seen time
	AddTarget(AddTargetArgs),
	/// Exclude a target from scanning
	Blacklist(BlacklistArgs),
}

#[derive(Parser, Debug)]
pub struct SelectArgs {
	#[arg(short, long)]
	pub number_of_targets: Option<usize>,

	/// Ignore rotation and return every eligible target
	#[arg(long)]
	pub all_targets: bool,

	#[arg(short, long)]
	pub output: Option<PathBuf>,

	/// Record the selected targets as scanned right away
	#[arg(long)]
	pub mark: bool,

	#[arg(long)]
	pub scan_info: Option<String>,
}

#[derive(Parser, Debug)]
pub struct MarkArgs {
	#[arg(short, long)]
	pub targets: PathBuf,

	#[arg(long)]
	pub scan_info: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ProcessArgs {
	#[arg(short, long)]
	pub results: PathBuf,

	#[arg(long)]
	pub dont_create_issues: bool,

	#[arg(long)]
	pub gitlab_project_id: Option<String>,

	#[arg(long)]
	pub gitlab_host: Option<String>,

	/// Comma-separated GitLab user ids
	#[arg(long)]
	pub assignee: Option<String>,

	#[arg(long)]
	pub templates_directory: Option<PathBuf>,
}

#[derive(Parser, Debug)]
pub struct AddTargetArgs {
	pub target: TargetAddr,

	#[arg(long, default_value = "manual")]
	pub tool: String,

	#[arg(long)]
	pub info: Option<String>,
}

#[derive(Parser, Debug)]
pub struct BlacklistArgs {
	pub target: TargetAddr,

	/// Allow the target to be scanned again
	#[arg(long)]
	pub remove: bool,
}

impl Args {
	/// Settings given on the command line. Unset flags leave lower sources alone.
	pub fn overrides(&self) -> ConfigLayer {
		let mut layer = ConfigLayer {
			logfile: self.logfile.clone(),
			..ConfigLayer::default()
		};

		match &self.command {
			Command::Select(args) => {
				layer.number_of_targets = args.number_of_targets;
				layer.all_targets = args.all_targets.then_some(true);
			}
			Command::Process(args) => {
				layer.dont_create_issues = args.dont_create_issues.then_some(true);
				layer.gitlab_project_id = args.gitlab_project_id.clone();
				layer.gitlab_host = args.gitlab_host.clone();
				layer.assignee = args.assignee.clone();
				layer.templates_directory = args.templates_directory.clone();
			}
			Command::Mark(_) | Command::AddTarget(_) | Command::Blacklist(_) => {}
		}
		layer
	}
}
