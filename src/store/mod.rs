//! Durable SQLite persistence for the blacklist catalog and its audit log.
//!
//! Four tables: `blacklist_domain`, `blacklist_url`, `blacklist_ip` (CIDR
//! entries ride the IP table; the `/` in the stored text distinguishes
//! them), and the append-only `updates` audit table. Schema creation is
//! idempotent on open and never destroys existing data, so a database
//! written by an older build keeps working.
//!
//! Connections are short-lived: every operation opens its own connection
//! with WAL journaling, `synchronous=NORMAL`, and a 30 s busy timeout, and
//! closes it when done. Each write is its own transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::{
	SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteSynchronous,
};
use sqlx::{ConnectOptions, Connection, Executor};

use crate::error::Result;

/// The three entry kinds the store persists. CIDR entries are `Ip` rows
/// whose key contains a `/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
	Domain,
	Url,
	Ip,
}

impl EntryKind {
	pub fn table(self) -> &'static str {
		match self {
			EntryKind::Domain => "blacklist_domain",
			EntryKind::Url => "blacklist_url",
			EntryKind::Ip => "blacklist_ip",
		}
	}

	pub fn key_column(self) -> &'static str {
		match self {
			EntryKind::Domain => "domain",
			EntryKind::Url => "url",
			EntryKind::Ip => "ip",
		}
	}

	pub fn as_str(self) -> &'static str {
		match self {
			EntryKind::Domain => "domain",
			EntryKind::Url => "url",
			EntryKind::Ip => "ip",
		}
	}
}

/// Metadata carried by every entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryMeta {
	pub date: String,
	pub score: f64,
	pub source: String,
}

/// One row of the append-only `updates` audit table.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct UpdateRecord {
	pub id: i64,
	pub timestamp: String,
	pub source: String,
	pub entry_count: i64,
}

/// Optional filters for [`BlacklistStore::update_history`]. Timestamps are
/// compared lexically against the stored `YYYY-MM-DD HH:MM:SS` form.
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
	pub source: Option<String>,
	pub start: Option<String>,
	pub end: Option<String>,
}

/// Persistence seam the coordinator writes through. Exactly one production
/// implementation exists ([`SqliteStore`]); tests substitute failing
/// implementations to exercise the dual-write rollback paths.
#[async_trait]
pub trait BlacklistStore: Send + Sync {
	/// Upsert a single entry in its own transaction. An existing key has
	/// its metadata replaced, not ignored.
	async fn upsert_one(&self, kind: EntryKind, key: &str, meta: &EntryMeta) -> Result<()>;

	/// Upsert a batch of entries in one transaction.
	async fn upsert_batch(&self, kind: EntryKind, rows: &[(String, EntryMeta)]) -> Result<()>;

	/// Delete by value across all three entry tables in one transaction,
	/// returning the number of rows removed.
	async fn remove_value(&self, domain_key: &str, url_key: &str, ip_key: &str) -> Result<u64>;

	/// All rows of one kind, for (re)building the in-memory index.
	async fn load_kind(&self, kind: EntryKind) -> Result<Vec<(String, EntryMeta)>>;

	/// Total rows across the three entry tables.
	async fn count_entries(&self) -> Result<i64>;

	/// Per-source row counts across the three entry tables.
	async fn source_counts(&self) -> Result<BTreeMap<String, i64>>;

	/// Most recent audit timestamp per source.
	async fn last_update_per_source(&self) -> Result<BTreeMap<String, String>>;

	/// Append an audit row.
	async fn log_update(&self, source: &str, entry_count: i64) -> Result<()>;

	/// Audit rows matching `filter`, ordered by timestamp ascending.
	async fn update_history(&self, filter: &HistoryFilter) -> Result<Vec<UpdateRecord>>;
}

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS blacklist_domain (
	domain TEXT PRIMARY KEY,
	date TEXT,
	score REAL,
	source TEXT
);
CREATE INDEX IF NOT EXISTS idx_blacklist_domain_source ON blacklist_domain(source);
CREATE TABLE IF NOT EXISTS blacklist_url (
	url TEXT PRIMARY KEY,
	date TEXT,
	score REAL,
	source TEXT
);
CREATE INDEX IF NOT EXISTS idx_blacklist_url_source ON blacklist_url(source);
CREATE TABLE IF NOT EXISTS blacklist_ip (
	ip TEXT PRIMARY KEY,
	date TEXT,
	score REAL,
	source TEXT
);
CREATE INDEX IF NOT EXISTS idx_blacklist_ip_source ON blacklist_ip(source);
CREATE TABLE IF NOT EXISTS updates (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
	source TEXT NOT NULL,
	entry_count INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_updates_source ON updates(source);
CREATE INDEX IF NOT EXISTS idx_updates_timestamp ON updates(timestamp);
";

/// SQLite-backed [`BlacklistStore`].
#[derive(Debug, Clone)]
pub struct SqliteStore {
	path: PathBuf,
}

impl SqliteStore {
	/// Open (creating if missing) the database at `path` and ensure the
	/// schema exists. Existing tables and rows are left untouched.
	pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref().to_path_buf();
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent).map_err(sqlx::Error::Io)?;
			}
		}

		let store = Self { path };
		let mut conn = store.connect().await?;
		conn.execute(SCHEMA_SQL).await?;
		Ok(store)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	async fn connect(&self) -> Result<SqliteConnection> {
		let options = SqliteConnectOptions::new()
			.filename(&self.path)
			.create_if_missing(true)
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.busy_timeout(Duration::from_secs(30))
			.pragma("cache_size", "10000");
		Ok(options.connect().await?)
	}
}

#[async_trait]
impl BlacklistStore for SqliteStore {
	async fn upsert_one(&self, kind: EntryKind, key: &str, meta: &EntryMeta) -> Result<()> {
		let sql = format!(
			"INSERT INTO {table} ({column}, date, score, source) VALUES (?1, ?2, ?3, ?4) \
			 ON CONFLICT({column}) DO UPDATE SET \
			 date = excluded.date, score = excluded.score, source = excluded.source",
			table = kind.table(),
			column = kind.key_column(),
		);

		let mut conn = self.connect().await?;
		sqlx::query(&sql)
			.bind(key)
			.bind(&meta.date)
			.bind(meta.score)
			.bind(&meta.source)
			.execute(&mut conn)
			.await?;
		Ok(())
	}

	async fn upsert_batch(&self, kind: EntryKind, rows: &[(String, EntryMeta)]) -> Result<()> {
		if rows.is_empty() {
			return Ok(());
		}
		let sql = format!(
			"INSERT INTO {table} ({column}, date, score, source) VALUES (?1, ?2, ?3, ?4) \
			 ON CONFLICT({column}) DO UPDATE SET \
			 date = excluded.date, score = excluded.score, source = excluded.source",
			table = kind.table(),
			column = kind.key_column(),
		);

		let mut conn = self.connect().await?;
		let mut tx = conn.begin().await?;
		for (key, meta) in rows {
			sqlx::query(&sql)
				.bind(key)
				.bind(&meta.date)
				.bind(meta.score)
				.bind(&meta.source)
				.execute(&mut *tx)
				.await?;
		}
		tx.commit().await?;
		Ok(())
	}

	async fn remove_value(&self, domain_key: &str, url_key: &str, ip_key: &str) -> Result<u64> {
		let targets = [
			(EntryKind::Domain, domain_key),
			(EntryKind::Url, url_key),
			(EntryKind::Ip, ip_key),
		];

		let mut conn = self.connect().await?;
		let mut tx = conn.begin().await?;
		let mut deleted = 0;
		for (kind, key) in targets {
			let sql = format!(
				"DELETE FROM {table} WHERE {column} = ?1",
				table = kind.table(),
				column = kind.key_column(),
			);
			deleted += sqlx::query(&sql).bind(key).execute(&mut *tx).await?.rows_affected();
		}
		tx.commit().await?;
		Ok(deleted)
	}

	async fn load_kind(&self, kind: EntryKind) -> Result<Vec<(String, EntryMeta)>> {
		let sql = format!(
			"SELECT {column}, date, score, source FROM {table}",
			table = kind.table(),
			column = kind.key_column(),
		);

		let mut conn = self.connect().await?;
		let rows: Vec<(String, Option<String>, Option<f64>, Option<String>)> =
			sqlx::query_as(&sql).fetch_all(&mut conn).await?;

		Ok(rows
			.into_iter()
			.map(|(key, date, score, source)| {
				(
					key,
					EntryMeta {
						date: date.unwrap_or_default(),
						score: score.unwrap_or_default(),
						source: source.unwrap_or_default(),
					},
				)
			})
			.collect())
	}

	async fn count_entries(&self) -> Result<i64> {
		let mut conn = self.connect().await?;
		let count: i64 = sqlx::query_scalar(
			"SELECT (SELECT COUNT(*) FROM blacklist_domain) \
			 + (SELECT COUNT(*) FROM blacklist_url) \
			 + (SELECT COUNT(*) FROM blacklist_ip)",
		)
		.fetch_one(&mut conn)
		.await?;
		Ok(count)
	}

	async fn source_counts(&self) -> Result<BTreeMap<String, i64>> {
		let mut conn = self.connect().await?;
		let rows: Vec<(Option<String>, i64)> = sqlx::query_as(
			"SELECT source, COUNT(*) FROM ( \
			 SELECT source FROM blacklist_domain \
			 UNION ALL SELECT source FROM blacklist_url \
			 UNION ALL SELECT source FROM blacklist_ip \
			 ) GROUP BY source",
		)
		.fetch_all(&mut conn)
		.await?;

		Ok(rows
			.into_iter()
			.map(|(source, count)| (source.unwrap_or_default(), count))
			.collect())
	}

	async fn last_update_per_source(&self) -> Result<BTreeMap<String, String>> {
		let mut conn = self.connect().await?;
		let rows: Vec<(String, Option<String>)> =
			sqlx::query_as("SELECT source, MAX(timestamp) FROM updates GROUP BY source")
				.fetch_all(&mut conn)
				.await?;

		Ok(rows
			.into_iter()
			.filter_map(|(source, last)| last.map(|l| (source, l)))
			.collect())
	}

	async fn log_update(&self, source: &str, entry_count: i64) -> Result<()> {
		let mut conn = self.connect().await?;
		sqlx::query("INSERT INTO updates (source, entry_count) VALUES (?1, ?2)")
			.bind(source)
			.bind(entry_count)
			.execute(&mut conn)
			.await?;
		Ok(())
	}

	async fn update_history(&self, filter: &HistoryFilter) -> Result<Vec<UpdateRecord>> {
		let mut sql =
			String::from("SELECT id, timestamp, source, entry_count FROM updates");
		let mut clauses: Vec<&str> = Vec::new();
		if filter.source.is_some() {
			clauses.push("source = ?");
		}
		if filter.start.is_some() {
			clauses.push("timestamp >= ?");
		}
		if filter.end.is_some() {
			clauses.push("timestamp <= ?");
		}
		if !clauses.is_empty() {
			sql.push_str(" WHERE ");
			sql.push_str(&clauses.join(" AND "));
		}
		sql.push_str(" ORDER BY timestamp ASC");

		let mut query = sqlx::query_as::<_, UpdateRecord>(&sql);
		if let Some(source) = &filter.source {
			query = query.bind(source);
		}
		if let Some(start) = &filter.start {
			query = query.bind(start);
		}
		if let Some(end) = &filter.end {
			query = query.bind(end);
		}

		let mut conn = self.connect().await?;
		Ok(query.fetch_all(&mut conn).await?)
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	fn meta(source: &str) -> EntryMeta {
		EntryMeta {
			date: "2025-01-01".to_string(),
			score: 8.0,
			source: source.to_string(),
		}
	}

	#[tokio::test]
	async fn schema_open_is_idempotent() {
		let dir = tempfile::tempdir().expect("tempdir");
		let path = dir.path().join("blacklist.db");

		let store = SqliteStore::open(&path).await.expect("first open");
		store
			.upsert_one(EntryKind::Domain, "evil.com", &meta("test"))
			.await
			.expect("upsert");

		// A second open must keep the existing rows.
		let reopened = SqliteStore::open(&path).await.expect("second open");
		assert_eq!(reopened.count_entries().await.expect("count"), 1);
	}

	#[tokio::test]
	async fn upsert_replaces_metadata() {
		let dir = tempfile::tempdir().expect("tempdir");
		let store = SqliteStore::open(dir.path().join("b.db")).await.expect("open");

		store
			.upsert_one(EntryKind::Url, "http://evil.com", &meta("first"))
			.await
			.expect("insert");
		store
			.upsert_one(EntryKind::Url, "http://evil.com", &meta("second"))
			.await
			.expect("upsert");

		let rows = store.load_kind(EntryKind::Url).await.expect("load");
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].1.source, "second");
	}

	#[tokio::test]
	async fn remove_spans_all_tables() {
		let dir = tempfile::tempdir().expect("tempdir");
		let store = SqliteStore::open(dir.path().join("b.db")).await.expect("open");

		store
			.upsert_one(EntryKind::Domain, "evil.com", &meta("a"))
			.await
			.expect("domain");
		store
			.upsert_one(EntryKind::Url, "http://evil.com", &meta("b"))
			.await
			.expect("url");
		store
			.upsert_one(EntryKind::Ip, "192.168.1.100", &meta("c"))
			.await
			.expect("ip");

		let deleted = store
			.remove_value("evil.com", "http://evil.com", "192.168.1.100")
			.await
			.expect("remove");
		assert_eq!(deleted, 3);
		assert_eq!(store.count_entries().await.expect("count"), 0);
	}

	#[tokio::test]
	async fn history_filters_by_source_and_orders_ascending() {
		let dir = tempfile::tempdir().expect("tempdir");
		let store = SqliteStore::open(dir.path().join("b.db")).await.expect("open");

		store.log_update("OpenPhish", 1000).await.expect("log");
		store.log_update("PhishTank", 2000).await.expect("log");
		store.log_update("OpenPhish", 1100).await.expect("log");

		let all = store
			.update_history(&HistoryFilter::default())
			.await
			.expect("history");
		assert_eq!(all.len(), 3);
		assert!(all.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));

		let filtered = store
			.update_history(&HistoryFilter {
				source: Some("OpenPhish".to_string()),
				..HistoryFilter::default()
			})
			.await
			.expect("filtered");
		assert_eq!(filtered.len(), 2);
		assert!(filtered.iter().all(|r| r.source == "OpenPhish"));
	}
}
