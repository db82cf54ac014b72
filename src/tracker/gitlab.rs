use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, USER_AGENT};
use serde::Deserialize;
use std::time::Duration;

use super::{NewTicket, TicketTracker};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const PRIVATE_TOKEN: HeaderName = HeaderName::from_static("private-token");

#[derive(Debug, Deserialize)]
struct GitLabIssue {
	web_url: String,
}

/// Creates GitLab issues in one project through the REST API.
#[derive(Clone)]
pub struct GitLabTracker {
	client: reqwest::Client,
	issues_url: String,
}

impl GitLabTracker {
	pub fn new(host: &str, project_id: &str, token: &str) -> Result<Self> {
		let mut token_value = HeaderValue::from_str(token)
			.context("GitLab token contains characters not allowed in a header")?;
		token_value.set_sensitive(true);

		let mut headers = HeaderMap::new();
		headers.insert(
			USER_AGENT,
			HeaderValue::from_static(concat!("nuclei-scan-runner/", env!("CARGO_PKG_VERSION"))),
		);
		headers.insert(PRIVATE_TOKEN, token_value);

		let client = reqwest::Client::builder()
			.default_headers(headers)
			.timeout(REQUEST_TIMEOUT)
			.build()
			.context("Failed to create HTTP client")?;

		info!("Connecting to GitLab project {} on {}", project_id, host);
		Ok(Self {
			client,
			issues_url: issues_url(host, project_id),
		})
	}
}

/// Project paths like `group/project` must be URL-encoded.
fn issues_url(host: &str, project_id: &str) -> String {
	format!(
		"{}/api/v4/projects/{}/issues",
		host.trim_end_matches('/'),
		project_id.trim().replace('/', "%2F"),
	)
}

fn issue_body(ticket: &NewTicket) -> serde_json::Value {
	serde_json::json!({
		"title": ticket.title,
		"description": ticket.description,
		"assignee_ids": ticket.assignee_ids,
		"labels": ticket.labels.join(","),
	})
}

#[async_trait]
impl TicketTracker for GitLabTracker {
	async fn create_ticket(&self, ticket: &NewTicket) -> Result<String> {
		debug!("Creating GitLab issue {:?}", ticket.title);

		let response = self.client
			.post(&self.issues_url)
			.json(&issue_body(ticket))
			.send()
			.await
			.context("Failed to send request to GitLab")?;

		if !response.status().is_success() {
			let status = response.status();
			let body = response.text().await.unwrap_or_default();
			return Err(anyhow::anyhow!(
				"GitLab issue creation failed with status {}: {}",
				status,
				body
			));
		}

		let issue = response
			.json::<GitLabIssue>()
			.await
			.context("Failed to parse GitLab response")?;

		Ok(issue.web_url)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::models::finding::Severity;

	#[test]
	fn builds_project_issue_urls() {
		assert_eq!(
			issues_url("https://gitlab.com/", "1234"),
			"https://gitlab.com/api/v4/projects/1234/issues"
		);
		assert_eq!(
			issues_url("https://gitlab.example", "security/findings"),
			"https://gitlab.example/api/v4/projects/security%2Ffindings/issues"
		);
	}

	#[test]
	fn issue_body_uses_comma_separated_labels() {
		let ticket = NewTicket::new("[XSS] [https://a.example]", "body", vec![7, 9], Severity::Moderate);
		let body = issue_body(&ticket);

		assert_eq!(body["labels"], "severity::moderate,state::new");
		assert_eq!(body["assignee_ids"], serde_json::json!([7, 9]));
		assert_eq!(body["title"], "[XSS] [https://a.example]");
	}

	#[test]
	fn rejects_tokens_that_cannot_be_headers() {
		assert!(GitLabTracker::new("https://gitlab.com", "1", "bad\ntoken").is_err());
		assert!(GitLabTracker::new("https://gitlab.com", "1", "glpat-abc").is_ok());
	}
}
