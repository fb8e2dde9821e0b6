//! External interface adapter: classify a raw value and dispatch it to the
//! right index lookup.
//!
//! `check` is the single entry point external callers (CLI, RPC, batch
//! tooling) map onto. Classification order: IP first (no fallback), then
//! URL (with the one permitted cross-kind fallback to the URL's host as a
//! domain), then domain. Anything else is invalid input — which is an
//! error, not a "safe" answer.

use std::net::IpAddr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use url::Url;

use crate::canon;
use crate::error::{IndexError, Result};
use crate::index::Blacklist;
use crate::store::EntryKind;

/// Well-formed lowercase ASCII domain: at least two labels of up to 63
/// characters, no leading/trailing hyphens.
static DOMAIN_LABELS: Lazy<Regex> = Lazy::new(|| {
	Regex::new(
		r"^(?:[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z0-9](?:[a-z0-9-]{0,61}[a-z0-9])?$",
	)
	.expect("domain label pattern compiles")
});

/// Outcome of a [`check`] call.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
	pub blacklisted: bool,
	/// The kind the value resolved to. A URL that only matched through its
	/// host reports `Domain`.
	pub kind: EntryKind,
	pub source: Option<String>,
	pub explanation: String,
}

impl Verdict {
	fn hit(kind: EntryKind, source: Option<String>) -> Self {
		let explanation = match &source {
			Some(source) => format!("Blacklisted by {source}"),
			None => "Blacklisted".to_string(),
		};
		Self {
			blacklisted: true,
			kind,
			source,
			explanation,
		}
	}

	fn miss(kind: EntryKind) -> Self {
		Self {
			blacklisted: false,
			kind,
			source: None,
			explanation: "Not blacklisted".to_string(),
		}
	}
}

/// Check a single domain, URL, or IP address against the index.
///
/// Returns `IndexError::InvalidInput` when the value cannot be classified
/// as any supported kind.
pub async fn check(index: &Blacklist, value: &str) -> Result<Verdict> {
	let trimmed = value.trim();
	if trimmed.is_empty() {
		return Err(IndexError::InvalidInput("empty value".to_string()));
	}

	// IPs first; an address never falls back to any other kind.
	if trimmed.parse::<IpAddr>().is_ok() {
		if index.is_ip(trimmed).await {
			let source = index.source_of_ip(trimmed).await;
			return Ok(Verdict::hit(EntryKind::Ip, source));
		}
		return Ok(Verdict::miss(EntryKind::Ip));
	}

	let lower = trimmed.to_lowercase();
	if lower.starts_with("http://") || lower.starts_with("https://") {
		if index.is_url(trimmed).await {
			// The URL entry is more specific than its host domain, so its
			// source wins even when both are blacklisted.
			let source = index.source_of_url(trimmed).await;
			return Ok(Verdict::hit(EntryKind::Url, source));
		}
		// The only cross-kind fallback: a URL whose host is a blacklisted
		// domain is itself considered blacklisted.
		if let Some(host) = url_host(&lower) {
			if index.is_domain(&host).await {
				let source = index.source_of_domain(&host).await;
				return Ok(Verdict::hit(EntryKind::Domain, source));
			}
		}
		return Ok(Verdict::miss(EntryKind::Url));
	}

	if let Ok(domain) = canon::normalize_domain(trimmed) {
		if DOMAIN_LABELS.is_match(&domain) {
			if index.is_domain(trimmed).await {
				let source = index.source_of_domain(trimmed).await;
				return Ok(Verdict::hit(EntryKind::Domain, source));
			}
			return Ok(Verdict::miss(EntryKind::Domain));
		}
	}

	Err(IndexError::InvalidInput(format!(
		"not a domain, URL, or IP address: {trimmed}"
	)))
}

/// Check many values; each result is independent.
pub async fn check_batch(index: &Blacklist, values: &[String]) -> Vec<Result<Verdict>> {
	let mut results = Vec::with_capacity(values.len());
	for value in values {
		results.push(check(index, value).await);
	}
	results
}

fn url_host(lowered: &str) -> Option<String> {
	Url::parse(lowered)
		.ok()
		.and_then(|url| url.host_str().map(str::to_string))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn domain_pattern_requires_well_formed_labels() {
		assert!(DOMAIN_LABELS.is_match("evil.com"));
		assert!(DOMAIN_LABELS.is_match("a.b.evil-site.com"));
		assert!(!DOMAIN_LABELS.is_match("evilcom"));
		assert!(!DOMAIN_LABELS.is_match("-evil.com"));
		assert!(!DOMAIN_LABELS.is_match("evil-.com"));
		assert!(!DOMAIN_LABELS.is_match("evil..com"));
	}

	#[test]
	fn url_host_extracts_authority() {
		assert_eq!(
			url_host("http://evil.com/login?x=1").as_deref(),
			Some("evil.com")
		);
		assert_eq!(url_host("nonsense"), None);
	}
}
