pub mod gitlab;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::models::finding::Severity;

pub const MAX_TITLE_LEN: usize = 255;
pub const MAX_DESCRIPTION_LEN: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewTicket {
	pub title: String,
	pub description: String,
	pub assignee_ids: Vec<u64>,
	pub labels: Vec<String>,
}

impl NewTicket {
	/// Title and description are cut to the tracker's limits (in characters).
	pub fn new(title: &str, description: &str, assignee_ids: Vec<u64>, severity: Severity) -> Self {
		Self {
			title: truncate_chars(title, MAX_TITLE_LEN),
			description: truncate_chars(description, MAX_DESCRIPTION_LEN),
			assignee_ids,
			labels: vec![format!("severity::{}", severity), "state::new".to_string()],
		}
	}
}

fn truncate_chars(text: &str, max: usize) -> String {
	text.chars().take(max).collect()
}

/// Files tickets in an external tracker and returns the ticket's identifier.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TicketTracker: Send + Sync {
	async fn create_ticket(&self, ticket: &NewTicket) -> Result<String>;
}
