// src/templates/mod.rs

use anyhow::{anyhow, bail, Context, Result};
use log::info;
use minijinja::{context, path_loader, Environment};
use regex::{Regex, RegexBuilder};
use std::fs;
use std::path::{Path, PathBuf};

use crate::pipeline::record::FindingRecord;

const DEFAULT_TEMPLATE: &str = "default.jinja";
const REGEX_FILE: &str = "regex.txt";
const TEMPLATE_EXTENSION: &str = "jinja";
const TOOL_NAME: &str = "nuclei";

/// Renders the ticket description for a finding.
pub trait DescriptionRenderer: Send + Sync {
	fn render(&self, record: &FindingRecord, results_path: &Path) -> Result<String>;
}

/// A directory of description templates.
///
/// `regex.txt` holds one case-insensitive pattern per line. A template is used
/// for a finding when one pattern matches both the template's file name and
/// the finding name; otherwise `default.jinja` is used. Templates are Jinja and
/// see the variables `tool` and `tool_output`; undefined variables render empty.
pub struct TemplateLibrary {
	templates: Vec<String>,
	patterns: Vec<Regex>,
	env: Environment<'static>,
}

impl TemplateLibrary {
	pub fn load(directory: impl Into<PathBuf>) -> Result<Self> {
		let directory = directory.into();
		if !directory.is_dir() {
			bail!("Could not find vulnerability templates directory {:?}", directory);
		}

		let raw_patterns = fs::read_to_string(directory.join(REGEX_FILE))
			.with_context(|| format!("Could not load {} from {:?}", REGEX_FILE, directory))?;
		let patterns = raw_patterns
			.lines()
			.map(str::trim_end)
			.filter(|line| !line.is_empty())
			.map(|line| {
				RegexBuilder::new(line)
					.case_insensitive(true)
					.build()
					.with_context(|| format!("Invalid template pattern {:?}", line))
			})
			.collect::<Result<Vec<_>>>()?;
		info!("Loaded {} template patterns from {:?}", patterns.len(), directory);

		let mut templates = Vec::new();
		for entry in fs::read_dir(&directory).context("Failed to list templates directory")? {
			let path = entry?.path();
			if path.extension().and_then(|e| e.to_str()) != Some(TEMPLATE_EXTENSION) {
				continue;
			}
			if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
				templates.push(name.to_string());
			}
		}
		templates.sort();

		if !templates.iter().any(|t| t == DEFAULT_TEMPLATE) {
			bail!("Templates directory {:?} has no {}", directory, DEFAULT_TEMPLATE);
		}

		let mut env = Environment::new();
		env.set_loader(path_loader(directory.clone()));

		Ok(Self {
			templates,
			patterns,
			env,
		})
	}

	pub fn select_template(&self, finding_name: &str) -> &str {
		self.templates
			.iter()
			.find(|template| {
				self.patterns
					.iter()
					.any(|re| re.is_match(template) && re.is_match(finding_name))
			})
			.map(String::as_str)
			.unwrap_or(DEFAULT_TEMPLATE)
	}
}

impl DescriptionRenderer for TemplateLibrary {
	fn render(&self, record: &FindingRecord, results_path: &Path) -> Result<String> {
		let name = record
			.finding_name()
			.ok_or_else(|| anyhow!("Finding {} has no name", record.fingerprint()))?;

		let template_name = self.select_template(name);
		let tool_output = tool_output(record, results_path)?;
		let template = self.env
			.get_template(template_name)
			.with_context(|| format!("Failed to load template {}", template_name))?;

		template
			.render(context! {
				tool => TOOL_NAME,
				tool_output => tool_output,
			})
			.with_context(|| format!("Failed to render template {}", template_name))
	}
}

/// Collapsible summary of the raw scanner record appended to every description.
fn tool_output(record: &FindingRecord, results_path: &Path) -> Result<String> {
	let pretty = serde_json::to_string_pretty(record.payload())
		.context("Failed to format finding")?;

	Ok(format!(
		"<details>\n\
		 <summary>Info</summary>\n\n\
		 Scan ID: `{path}`\n\n\
		 | Finding Template | Finding Template URL | Finding Template ID | Type | Host |\n\
		 | --- | --- | --- | --- | --- |\n\
		 | {template} | {template_url} | {template_id} | {kind} | {host} |\n\n\
		 | Matched At | IP | Timestamp | Severity |\n\
		 | --- | --- | --- | --- |\n\
		 | ``` {matched_at} ``` | {ip} | {timestamp} | {severity} |\n\n\
		 </details>\n\n\
		 <details>\n\
		 <summary>Nuclei log</summary>\n\n\
		 ```json\n\
		 {pretty}\n\
		 ```\n\
		 </details>\n",
		path = results_path.display(),
		template = record.field("template"),
		template_url = record.field("template-url"),
		template_id = record.field("template-id"),
		kind = record.field("type"),
		host = record.field("host"),
		matched_at = record.field("matched-at"),
		ip = record.field("ip"),
		timestamp = record.field("timestamp"),
		severity = record.raw_severity(),
		pretty = pretty,
	))
}
