//! Source-tier classification driving the hot/cold shard split.
//!
//! A small set of sources contributes the dominant share of each kind's
//! entries in production (for URLs, PhishTank and URLhaus alone carry close
//! to half the catalog). Routing those sources' entries into a hot shard
//! that is probed first lets the majority of positive lookups finish on the
//! first probe while preserving identical semantics: hot and cold together
//! are always the full set.

use std::collections::HashSet;

use crate::index::cores::Shard;
use crate::store::EntryKind;

/// Default hot domain sources. Domain entries are dominated by the URL
/// feeds' host extraction plus PhishStats' domain feed.
const DEFAULT_HOT_DOMAIN_SOURCES: [&str; 3] = ["PhishTank", "PhishStats", "URLhaus"];

/// Default hot URL sources (largest URL share in production).
const DEFAULT_HOT_URL_SOURCES: [&str; 2] = ["PhishTank", "URLhaus"];

/// Default hot IP sources (largest IP share in production).
const DEFAULT_HOT_IP_SOURCES: [&str; 2] = ["BlocklistDE", "CINSSCORE"];

/// Static source→tier classification. Built once at index construction;
/// rebalancing means constructing a new map and reloading.
#[derive(Debug, Clone)]
pub struct TierMap {
	enabled: bool,
	hot_domain_sources: HashSet<String>,
	hot_url_sources: HashSet<String>,
	hot_ip_sources: HashSet<String>,
}

impl Default for TierMap {
	fn default() -> Self {
		Self::new(
			true,
			DEFAULT_HOT_DOMAIN_SOURCES.map(str::to_string),
			DEFAULT_HOT_URL_SOURCES.map(str::to_string),
			DEFAULT_HOT_IP_SOURCES.map(str::to_string),
		)
	}
}

impl TierMap {
	pub fn new(
		enabled: bool,
		hot_domain_sources: impl IntoIterator<Item = String>,
		hot_url_sources: impl IntoIterator<Item = String>,
		hot_ip_sources: impl IntoIterator<Item = String>,
	) -> Self {
		Self {
			enabled,
			hot_domain_sources: hot_domain_sources.into_iter().collect(),
			hot_url_sources: hot_url_sources.into_iter().collect(),
			hot_ip_sources: hot_ip_sources.into_iter().collect(),
		}
	}

	/// A map with tiering disabled: every entry is assigned to the cold
	/// shard and lookups skip the hot probe.
	pub fn disabled() -> Self {
		Self::new(false, [], [], [])
	}

	/// Build the classification from runtime settings, falling back to the
	/// baked-in defaults for any kind without an override.
	pub fn from_settings(settings: &crate::config::Settings) -> Self {
		if !settings.tiering {
			return Self::disabled();
		}
		Self::new(
			true,
			settings
				.hot_domain_sources
				.clone()
				.unwrap_or_else(|| DEFAULT_HOT_DOMAIN_SOURCES.map(str::to_string).to_vec()),
			settings
				.hot_url_sources
				.clone()
				.unwrap_or_else(|| DEFAULT_HOT_URL_SOURCES.map(str::to_string).to_vec()),
			settings
				.hot_ip_sources
				.clone()
				.unwrap_or_else(|| DEFAULT_HOT_IP_SOURCES.map(str::to_string).to_vec()),
		)
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Shard assignment for an entry of `kind` from `source`. Unknown
	/// sources default to the cold shard.
	pub fn shard_for(&self, kind: EntryKind, source: &str) -> Shard {
		if !self.enabled {
			return Shard::Cold;
		}
		let hot = match kind {
			EntryKind::Domain => self.hot_domain_sources.contains(source),
			EntryKind::Url => self.hot_url_sources.contains(source),
			EntryKind::Ip => self.hot_ip_sources.contains(source),
		};
		if hot { Shard::Hot } else { Shard::Cold }
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn default_classification_matches_production_shares() {
		let tiers = TierMap::default();

		assert_eq!(tiers.shard_for(EntryKind::Domain, "PhishTank"), Shard::Hot);
		assert_eq!(tiers.shard_for(EntryKind::Domain, "OpenPhish"), Shard::Cold);
		assert_eq!(tiers.shard_for(EntryKind::Url, "URLhaus"), Shard::Hot);
		assert_eq!(tiers.shard_for(EntryKind::Url, "OpenPhish"), Shard::Cold);
		assert_eq!(tiers.shard_for(EntryKind::Ip, "BlocklistDE"), Shard::Hot);
		assert_eq!(tiers.shard_for(EntryKind::Ip, "SpamhausDROP"), Shard::Cold);
	}

	#[test]
	fn unknown_sources_are_cold() {
		let tiers = TierMap::default();
		assert_eq!(tiers.shard_for(EntryKind::Url, "SomeNewFeed"), Shard::Cold);
	}

	#[test]
	fn disabled_map_sends_everything_cold() {
		let tiers = TierMap::disabled();
		assert!(!tiers.is_enabled());
		assert_eq!(tiers.shard_for(EntryKind::Url, "PhishTank"), Shard::Cold);
	}
}
