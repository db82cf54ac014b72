// src/models/target.rs

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A scan destination, identified by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TargetAddr {
	pub host: String,
	pub port: u16,
}

impl TargetAddr {
	pub fn new(host: impl Into<String>, port: u16) -> Self {
		Self { host: host.into(), port }
	}
}

impl fmt::Display for TargetAddr {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}:{}", self.host, self.port)
	}
}

impl FromStr for TargetAddr {
	type Err = anyhow::Error;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (host, port) = s
			.trim()
			.rsplit_once(':')
			.ok_or_else(|| anyhow!("Target {:?} is not in host:port form", s))?;

		if host.is_empty() {
			return Err(anyhow!("Target {:?} has an empty host", s));
		}

		let port = port
			.parse::<u16>()
			.with_context(|| format!("Target {:?} has an invalid port", s))?;

		Ok(Self::new(host, port))
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
	pub addr: TargetAddr,
	pub discovered_tool: Option<String>,
	pub discovered_time: Option<DateTime<Utc>>,
	pub last_seen: Option<DateTime<Utc>>,
	pub blacklisted: bool,
	pub info: Option<String>,
}

impl Target {
	pub fn discovered(addr: TargetAddr, tool: String, info: Option<String>) -> Self {
		let now = Utc::now();
		Self {
			addr,
			discovered_tool: Some(tool),
			discovered_time: Some(now),
			last_seen: Some(now),
			blacklisted: false,
			info,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_host_port_pairs() -> anyhow::Result<()> {
		assert_eq!("a.example:443".parse::<TargetAddr>()?, TargetAddr::new("a.example", 443));
		assert_eq!(" 10.0.0.1:8080\n".parse::<TargetAddr>()?, TargetAddr::new("10.0.0.1", 8080));
		assert_eq!(TargetAddr::new("a.example", 80).to_string(), "a.example:80");
		Ok(())
	}

	#[test]
	fn rejects_malformed_targets() {
		assert!("a.example".parse::<TargetAddr>().is_err());
		assert!(":443".parse::<TargetAddr>().is_err());
		assert!("a.example:http".parse::<TargetAddr>().is_err());
		assert!("a.example:70000".parse::<TargetAddr>().is_err());
	}
}
