use std::path::PathBuf;

use anyhow::Result;
use serde::Deserialize;

/// Runtime configuration for the index.
///
/// Values are loaded from (in order): a `palisade` config file (optional)
/// and environment variables prefixed with `PAL_` (e.g. `PAL_DB_PATH`).
/// Hot-source overrides are comma-separated lists; unknown sources always
/// land in the cold shard.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
	/// Path of the SQLite database file.
	pub db_path: PathBuf,
	/// Whether hot/cold tiering is enabled.
	pub tiering: bool,
	pub hot_domain_sources: Option<Vec<String>>,
	pub hot_url_sources: Option<Vec<String>>,
	pub hot_ip_sources: Option<Vec<String>>,
	pub log_level: Option<String>,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			db_path: default_db_path(),
			tiering: true,
			hot_domain_sources: None,
			hot_url_sources: None,
			hot_ip_sources: None,
			log_level: Some("info".to_string()),
		}
	}
}

fn default_db_path() -> PathBuf {
	dirs::data_local_dir()
		.map(|dir| dir.join("palisade").join("blacklist.db"))
		.unwrap_or_else(|| PathBuf::from("palisade.db"))
}

/// Partial settings used to overlay environment/file values on top of
/// defaults. Source lists arrive as comma-separated strings.
#[derive(Debug, Deserialize)]
struct PartialSettings {
	db_path: Option<String>,
	tiering: Option<bool>,
	hot_domain_sources: Option<String>,
	hot_url_sources: Option<String>,
	hot_ip_sources: Option<String>,
	log_level: Option<String>,
}

fn parse_source_list(raw: &str) -> Option<Vec<String>> {
	let sources: Vec<String> = raw
		.split(',')
		.map(str::trim)
		.filter(|s| !s.is_empty())
		.map(str::to_string)
		.collect();
	if sources.is_empty() { None } else { Some(sources) }
}

fn parse_bool(raw: &str) -> Option<bool> {
	match raw.trim().to_lowercase().as_str() {
		"1" | "true" | "yes" | "on" => Some(true),
		"0" | "false" | "no" | "off" => Some(false),
		_ => None,
	}
}

/// Load settings from config file (optional) and environment variables.
pub fn load() -> Result<Settings> {
	let builder = config::Config::builder()
		.add_source(config::File::with_name("palisade").required(false))
		// Double-underscore separator so single-underscore env names like
		// `PAL_DB_PATH` map to `db_path` instead of nested `db.path`.
		.add_source(config::Environment::with_prefix("PAL").separator("__"));

	let cfg = builder.build()?;
	let partial: PartialSettings = cfg.try_deserialize()?;

	let mut s = Settings::default();
	if let Some(path) = partial.db_path {
		s.db_path = PathBuf::from(path);
	}
	if let Some(tiering) = partial.tiering {
		s.tiering = tiering;
	}
	if let Some(raw) = partial.hot_domain_sources {
		s.hot_domain_sources = parse_source_list(&raw);
	}
	if let Some(raw) = partial.hot_url_sources {
		s.hot_url_sources = parse_source_list(&raw);
	}
	if let Some(raw) = partial.hot_ip_sources {
		s.hot_ip_sources = parse_source_list(&raw);
	}
	if let Some(level) = partial.log_level {
		s.log_level = Some(level);
	}

	// Explicitly prefer direct environment variables when present. Some
	// environments (CI, test harnesses) set env vars in ways the `config`
	// crate doesn't map as expected; read them directly so explicit
	// overrides always take effect.
	if let Ok(path) = std::env::var("PAL_DB_PATH") {
		if !path.is_empty() {
			s.db_path = PathBuf::from(path);
		}
	}
	if let Ok(raw) = std::env::var("PAL_TIERING") {
		if let Some(tiering) = parse_bool(&raw) {
			s.tiering = tiering;
		}
	}
	if let Ok(raw) = std::env::var("PAL_HOT_DOMAIN_SOURCES") {
		s.hot_domain_sources = parse_source_list(&raw);
	}
	if let Ok(raw) = std::env::var("PAL_HOT_URL_SOURCES") {
		s.hot_url_sources = parse_source_list(&raw);
	}
	if let Ok(raw) = std::env::var("PAL_HOT_IP_SOURCES") {
		s.hot_ip_sources = parse_source_list(&raw);
	}
	if let Ok(level) = std::env::var("PAL_LOG_LEVEL") {
		if !level.is_empty() {
			s.log_level = Some(level);
		}
	}

	Ok(s)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::env;

	#[test]
	fn test_load_defaults_and_env_overlay() {
		// Save original values so we can restore them
		let orig_db = env::var_os("PAL_DB_PATH");
		let orig_tiering = env::var_os("PAL_TIERING");
		let orig_hot_urls = env::var_os("PAL_HOT_URL_SOURCES");
		let orig_level = env::var_os("PAL_LOG_LEVEL");

		// Ensure environment is clean for the defaults check
		unsafe { env::remove_var("PAL_DB_PATH") };
		unsafe { env::remove_var("PAL_TIERING") };
		unsafe { env::remove_var("PAL_HOT_URL_SOURCES") };
		unsafe { env::remove_var("PAL_LOG_LEVEL") };

		let s = load().expect("load should succeed with defaults");
		let d = Settings::default();
		assert_eq!(s.db_path, d.db_path);
		assert!(s.tiering);
		assert_eq!(s.hot_url_sources, None);

		// Overlay environment values and verify they take effect
		unsafe { env::set_var("PAL_DB_PATH", "/tmp/pal-test.db") };
		unsafe { env::set_var("PAL_TIERING", "false") };
		unsafe { env::set_var("PAL_HOT_URL_SOURCES", "FeedA, FeedB") };
		unsafe { env::set_var("PAL_LOG_LEVEL", "debug") };

		let s2 = load().expect("load should succeed with env");
		assert_eq!(s2.db_path, PathBuf::from("/tmp/pal-test.db"));
		assert!(!s2.tiering);
		assert_eq!(
			s2.hot_url_sources,
			Some(vec!["FeedA".to_string(), "FeedB".to_string()])
		);
		assert_eq!(s2.log_level.as_deref(), Some("debug"));

		// restore originals
		match orig_db {
			Some(v) => unsafe { env::set_var("PAL_DB_PATH", v) },
			None => unsafe { env::remove_var("PAL_DB_PATH") },
		}
		match orig_tiering {
			Some(v) => unsafe { env::set_var("PAL_TIERING", v) },
			None => unsafe { env::remove_var("PAL_TIERING") },
		}
		match orig_hot_urls {
			Some(v) => unsafe { env::set_var("PAL_HOT_URL_SOURCES", v) },
			None => unsafe { env::remove_var("PAL_HOT_URL_SOURCES") },
		}
		match orig_level {
			Some(v) => unsafe { env::set_var("PAL_LOG_LEVEL", v) },
			None => unsafe { env::remove_var("PAL_LOG_LEVEL") },
		}
	}
}
