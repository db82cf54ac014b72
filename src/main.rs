// src/main.rs

mod cli;
mod config;
mod context;
mod db;
mod error;
mod models;
mod pipeline;
mod repositories;
mod scheduler;
mod templates;
mod tracker;
mod utils;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use cli::{AddTargetArgs, Args, BlacklistArgs, Command, MarkArgs, ProcessArgs, SelectArgs};
use config::Settings;
use context::RunContext;
use db::connection::{self, SqlitePool};
use db::schema;
use log::{error, info, warn};
use models::target::{Target, TargetAddr};
use pipeline::{FindingPipeline, TicketPolicy, Ticketing};
use repositories::target_repo::TargetRepository;
use scheduler::{SelectionMode, TargetScheduler, TargetSelection};
use std::path::Path;
use std::sync::Arc;
use templates::TemplateLibrary;
use tokio::io::AsyncWriteExt;
use tracker::gitlab::GitLabTracker;

struct App {
	pool: Arc<SqlitePool>,
	settings: Settings,
	context: RunContext,
}

impl App {
	fn new(settings: Settings, context: RunContext) -> Result<Self> {
		let database_url = settings.require_database_url()?;
		let pool = Arc::new(
			connection::establish_pool(database_url)
				.context("Failed to establish database connection pool")?,
		);

		Ok(App { pool, settings, context })
	}

	async fn init_database(&self) -> Result<()> {
		let conn = self.pool.get().context("Failed to get database connection")?;
		schema::create_tables(&conn).context("Failed to create database tables")?;
		info!("Database tables initialized successfully");
		Ok(())
	}

	async fn run(&self, command: Command) -> Result<()> {
		self.init_database().await?;

		match command {
			Command::Select(args) => self.select(args).await,
			Command::Mark(args) => self.mark(args).await,
			Command::Process(args) => self.process(args).await,
			Command::AddTarget(args) => self.add_target(args).await,
			Command::Blacklist(args) => self.blacklist(args).await,
		}
	}

	fn scheduler(&self) -> TargetScheduler {
		TargetScheduler::new(self.pool.clone(), &self.context)
	}

	async fn select(&self, args: SelectArgs) -> Result<()> {
		let mode = if self.settings.all_targets {
			SelectionMode::All
		} else {
			SelectionMode::Rotation
		};

		let scheduler = self.scheduler();
		let targets = match scheduler.select_targets(mode, self.settings.number_of_targets).await? {
			TargetSelection::Targets(targets) => targets,
			TargetSelection::NoTargets => {
				info!("No targets found");
				return Ok(());
			}
		};

		let listing: String = targets.iter().map(|t| format!("{}\n", t)).collect();
		match &args.output {
			Some(path) => {
				tokio::fs::write(path, listing)
					.await
					.with_context(|| format!("Failed to write targets to {:?}", path))?;
				info!("Wrote {} targets to {:?}", targets.len(), path);
			}
			None => {
				let mut stdout = tokio::io::stdout();
				stdout.write_all(listing.as_bytes()).await?;
				stdout.flush().await?;
			}
		}

		if args.mark {
			scheduler
				.record_scan(&targets, &self.context.scan_id, Utc::now(), args.scan_info.as_deref())
				.await?;
		}
		Ok(())
	}

	async fn mark(&self, args: MarkArgs) -> Result<()> {
		let targets = read_targets(&args.targets).await?;
		if targets.is_empty() {
			warn!("No targets listed in {:?}", args.targets);
		}

		self.scheduler()
			.record_scan(&targets, &self.context.scan_id, Utc::now(), args.scan_info.as_deref())
			.await?;
		Ok(())
	}

	async fn process(&self, args: ProcessArgs) -> Result<()> {
		let ticketing = if self.settings.dont_create_issues {
			info!("Issue creation disabled, findings are only recorded");
			None
		} else {
			Some(self.ticketing()?)
		};

		let policy = TicketPolicy {
			ignored: self.settings.ignored_severities.clone(),
			assignee_ids: self.settings.assignee_ids.clone(),
			attempts: self.settings.ticket_attempts,
			retry_delay: self.settings.ticket_retry_delay,
		};

		let pipeline = FindingPipeline::new(self.pool.clone(), self.context.clone(), policy, ticketing);
		pipeline.process_result_file(&args.results).await?;
		Ok(())
	}

	fn ticketing(&self) -> Result<Ticketing> {
		let project_id = self.settings.require_gitlab_project_id()?;
		let token = self.settings.require_gitlab_token()?;

		let tracker = GitLabTracker::new(&self.settings.gitlab_host, project_id, token)?;
		let renderer = TemplateLibrary::load(&self.settings.templates_directory)
			.context("Failed to load vulnerability templates")?;

		Ok(Ticketing {
			tracker: Box::new(tracker),
			renderer: Box::new(renderer),
		})
	}

	async fn add_target(&self, args: AddTargetArgs) -> Result<()> {
		let target = Target::discovered(args.target.clone(), args.tool, args.info);
		TargetRepository::new(self.pool.clone())
			.upsert_target(target)
			.await
			.context("Failed to store target")?;
		info!("Stored target {}", args.target);
		Ok(())
	}

	async fn blacklist(&self, args: BlacklistArgs) -> Result<()> {
		let changed = TargetRepository::new(self.pool.clone())
			.set_blacklisted(args.target.clone(), !args.remove)
			.await?;

		if !changed {
			warn!("Target {} is unknown", args.target);
		} else if args.remove {
			info!("Removed {} from the blacklist", args.target);
		} else {
			info!("Blacklisted {}", args.target);
		}
		Ok(())
	}
}

/// One `host:port` per line; unparsable lines are reported and skipped.
async fn read_targets(path: &Path) -> Result<Vec<TargetAddr>> {
	let raw = tokio::fs::read_to_string(path)
		.await
		.map_err(|source| error::RunnerError::Io { path: path.to_path_buf(), source })?;

	let mut targets = Vec::new();
	for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
		match line.parse::<TargetAddr>() {
			Ok(target) => targets.push(target),
			Err(e) => warn!("Skipping target line {:?}: {:#}", line, e),
		}
	}
	Ok(targets)
}

fn load_settings(args: &Args) -> Result<Settings> {
	config::load_env_file(args.env_file.as_deref(), args.dev)?;
	Ok(Settings::load(args.overrides(), args.config.as_deref())?)
}

/// Configuration errors happen before the run logger exists, so one is set up
/// from the command line alone to record them.
fn log_startup_failure(args: &Args, e: &anyhow::Error) -> Result<()> {
	utils::logger::init(args.logfile.as_deref(), args.scan_id.as_deref().unwrap_or("-"))?;
	error!("Error during startup: {:#}", e);
	log::Log::flush(log::logger());
	Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	let settings = match load_settings(&args) {
		Ok(settings) => settings,
		Err(e) => {
			log_startup_failure(&args, &e)?;
			return Err(e);
		}
	};
	let context = RunContext::new(&settings.scan_id_prefix, args.scan_id.clone());

	utils::logger::init(settings.logfile.as_deref(), &context.scan_id)?;
	info!("Starting nuclei scan runner with scan id {}", context.scan_id);
	if let Some(source) = &settings.source {
		info!("Configuration read from {:?}", source);
	}
	settings.log_summary();

	let started_at = context.started_at;
	let result = match App::new(settings, context) {
		Ok(app) => app.run(args.command).await,
		Err(e) => Err(e),
	};

	match &result {
		Ok(()) => info!("Finished in {}ms", (Utc::now() - started_at).num_milliseconds()),
		Err(e) => error!("Error during execution: {:#}", e),
	}
	result
}
