//! The blacklist coordinator: the public query/mutation API over the
//! in-memory cores, with dual-write persistence to the durable store.
//!
//! One process-wide `tokio::sync::RwLock` guards the whole in-memory state.
//! Lookups take the read lock and touch nothing but memory. A writer holds
//! the write lock across both the in-memory mutation and the durable
//! commit, so a reader can never observe a state where memory and the store
//! disagree: if the commit fails, the memoized pre-state is restored before
//! the lock is released and the error is surfaced.
//!
//! The index owns no background tasks. Refresh orchestration lives with the
//! caller, which drives `add_batch` and `reload` as it sees fit.

pub mod cores;
pub mod metrics;
pub mod radix;
pub mod tier;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::{IpAddr, Ipv6Addr};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use ipnet::IpNet;
use rand::seq::IteratorRandom;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::canon;
use crate::config::Settings;
use crate::error::{IndexError, Result};
use crate::index::cores::{IpKey, Shard, TieredIpSet, TieredSet, shard_matches_domain, suffixes};
use crate::index::metrics::{LookupMetrics, LookupOutcome, MetricsSnapshot};
use crate::index::radix::CidrTable;
use crate::index::tier::TierMap;
use crate::store::{
	BlacklistStore, EntryKind, EntryMeta, HistoryFilter, SqliteStore, UpdateRecord,
};

/// One item of an [`Blacklist::add_batch`] call.
#[derive(Debug, Clone)]
pub struct BatchEntry {
	pub value: String,
	pub date: String,
	pub score: f64,
	pub source: String,
}

/// Per-kind entry counts for one source.
#[derive(Debug, Clone, Default, Serialize)]
pub struct KindCounts {
	pub domains: usize,
	pub urls: usize,
	/// Exact IPs and CIDR ranges together.
	pub ips: usize,
}

/// Aggregate view of the index returned by [`Blacklist::status`].
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
	pub entry_count: usize,
	pub active_sources: Vec<String>,
	pub last_update_per_source: BTreeMap<String, String>,
	pub last_reload: Option<DateTime<Utc>>,
}

/// An IP-kind value after canonicalization: either a single address or a
/// network. `text` is the canonical form used as the durable key.
enum IpEntry {
	Exact { key: IpKey, text: String },
	Net { net: IpNet, text: String },
}

impl IpEntry {
	fn text(&self) -> &str {
		match self {
			IpEntry::Exact { text, .. } | IpEntry::Net { text, .. } => text,
		}
	}
}

/// Parse an IP-kind value. A `/` marks a CIDR; IPv4 packs to 32 bits;
/// anything else must parse as IPv6.
fn parse_ip_entry(value: &str) -> Result<IpEntry> {
	let trimmed = value.trim();
	if trimmed.contains('/') {
		let net = IpNet::from_str(trimmed)
			.map_err(|e| IndexError::CidrParse(format!("{trimmed}: {e}")))?;
		let net = net.trunc();
		Ok(IpEntry::Net {
			text: net.to_string(),
			net,
		})
	} else if let Some(packed) = canon::pack_ipv4(trimmed) {
		Ok(IpEntry::Exact {
			key: IpKey::V4(packed),
			text: canon::unpack_ipv4(packed),
		})
	} else if let Ok(v6) = trimmed.parse::<Ipv6Addr>() {
		Ok(IpEntry::Exact {
			key: IpKey::V6(v6),
			text: v6.to_string(),
		})
	} else {
		Err(IndexError::InvalidInput(format!(
			"not an IP address or CIDR: {trimmed}"
		)))
	}
}

/// Memoized pre-state of one entry, captured before an insert so a failed
/// durable commit can be rolled back.
struct EntryUndo {
	prev_meta: Option<EntryMeta>,
	prev_shard: Option<Shard>,
}

/// Memoized pre-state of one removed IP entry.
enum IpRemoval {
	Exact {
		shard: Shard,
		meta: Option<EntryMeta>,
	},
	Net {
		meta: EntryMeta,
	},
}

/// Everything behind the read/write lock.
#[derive(Default)]
struct IndexState {
	domains: TieredSet,
	urls: TieredSet,
	ips: TieredIpSet,
	cidrs: CidrTable,
	domain_meta: HashMap<String, EntryMeta>,
	url_meta: HashMap<String, EntryMeta>,
	ip_meta: HashMap<String, EntryMeta>,
	cidr_meta: HashMap<String, EntryMeta>,
	last_reload: Option<DateTime<Utc>>,
}

impl IndexState {
	fn entry_count(&self) -> usize {
		self.domains.len() + self.urls.len() + self.ips.len() + self.cidrs.len()
	}

	fn domain_lookup(&self, canonical: &str, probe_hot: bool) -> LookupOutcome {
		if probe_hot && shard_matches_domain(&self.domains, canonical, Shard::Hot) {
			return LookupOutcome::HotHit;
		}
		if shard_matches_domain(&self.domains, canonical, Shard::Cold) {
			return LookupOutcome::ColdHit;
		}
		LookupOutcome::Miss
	}

	fn url_lookup(&self, canonical: &str, probe_hot: bool) -> LookupOutcome {
		if probe_hot && self.urls.contains(canonical, Shard::Hot) {
			return LookupOutcome::HotHit;
		}
		if self.urls.contains(canonical, Shard::Cold) {
			return LookupOutcome::ColdHit;
		}
		LookupOutcome::Miss
	}

	fn ip_lookup(&self, addr: IpAddr, probe_hot: bool) -> LookupOutcome {
		let key = match addr {
			IpAddr::V4(v4) => IpKey::V4(u32::from(v4)),
			IpAddr::V6(v6) => IpKey::V6(v6),
		};
		if probe_hot && self.ips.contains(key, Shard::Hot) {
			return LookupOutcome::HotHit;
		}
		if self.ips.contains(key, Shard::Cold) {
			return LookupOutcome::ColdHit;
		}
		if self.cidrs.lookup(addr).is_some() {
			return LookupOutcome::CidrHit;
		}
		LookupOutcome::Miss
	}

	fn insert_domain(&mut self, canonical: &str, meta: &EntryMeta, shard: Shard) -> EntryUndo {
		let prev_shard = self.domains.insert(canonical, shard);
		let prev_meta = self.domain_meta.insert(canonical.to_string(), meta.clone());
		EntryUndo {
			prev_meta,
			prev_shard,
		}
	}

	fn undo_insert_domain(&mut self, canonical: &str, undo: EntryUndo) {
		self.domains.remove(canonical);
		self.domain_meta.remove(canonical);
		if let (Some(meta), Some(shard)) = (undo.prev_meta, undo.prev_shard) {
			self.domains.insert(canonical, shard);
			self.domain_meta.insert(canonical.to_string(), meta);
		}
	}

	fn insert_url(&mut self, canonical: &str, meta: &EntryMeta, shard: Shard) -> EntryUndo {
		let prev_shard = self.urls.insert(canonical, shard);
		let prev_meta = self.url_meta.insert(canonical.to_string(), meta.clone());
		EntryUndo {
			prev_meta,
			prev_shard,
		}
	}

	fn undo_insert_url(&mut self, canonical: &str, undo: EntryUndo) {
		self.urls.remove(canonical);
		self.url_meta.remove(canonical);
		if let (Some(meta), Some(shard)) = (undo.prev_meta, undo.prev_shard) {
			self.urls.insert(canonical, shard);
			self.url_meta.insert(canonical.to_string(), meta);
		}
	}

	fn insert_ip(&mut self, entry: &IpEntry, meta: &EntryMeta, shard: Shard) -> EntryUndo {
		match entry {
			IpEntry::Exact { key, text } => {
				let prev_shard = self.ips.insert(*key, shard);
				let prev_meta = self.ip_meta.insert(text.clone(), meta.clone());
				EntryUndo {
					prev_meta,
					prev_shard,
				}
			}
			IpEntry::Net { net, text } => {
				self.cidrs.insert(net, &meta.source);
				let prev_meta = self.cidr_meta.insert(text.clone(), meta.clone());
				EntryUndo {
					prev_meta,
					prev_shard: None,
				}
			}
		}
	}

	fn undo_insert_ip(&mut self, entry: &IpEntry, undo: EntryUndo) {
		match entry {
			IpEntry::Exact { key, text } => {
				self.ips.remove(*key);
				self.ip_meta.remove(text.as_str());
				if let (Some(meta), Some(shard)) = (undo.prev_meta, undo.prev_shard) {
					self.ips.insert(*key, shard);
					self.ip_meta.insert(text.clone(), meta);
				}
			}
			IpEntry::Net { net, text } => {
				self.cidrs.remove(net);
				self.cidr_meta.remove(text.as_str());
				if let Some(meta) = undo.prev_meta {
					self.cidrs.insert(net, &meta.source);
					self.cidr_meta.insert(text.clone(), meta);
				}
			}
		}
	}

	fn remove_domain(&mut self, key: &str) -> Option<(Shard, EntryMeta)> {
		let shard = self.domains.remove(key)?;
		let meta = self.domain_meta.remove(key).unwrap_or_else(|| EntryMeta {
			date: String::new(),
			score: 0.0,
			source: String::new(),
		});
		Some((shard, meta))
	}

	fn restore_domain(&mut self, key: &str, shard: Shard, meta: EntryMeta) {
		self.domains.insert(key, shard);
		self.domain_meta.insert(key.to_string(), meta);
	}

	fn remove_url(&mut self, key: &str) -> Option<(Shard, EntryMeta)> {
		let shard = self.urls.remove(key)?;
		let meta = self.url_meta.remove(key).unwrap_or_else(|| EntryMeta {
			date: String::new(),
			score: 0.0,
			source: String::new(),
		});
		Some((shard, meta))
	}

	fn restore_url(&mut self, key: &str, shard: Shard, meta: EntryMeta) {
		self.urls.insert(key, shard);
		self.url_meta.insert(key.to_string(), meta);
	}

	fn remove_ip(&mut self, entry: &IpEntry) -> Option<IpRemoval> {
		match entry {
			IpEntry::Exact { key, text } => {
				let shard = self.ips.remove(*key)?;
				let meta = self.ip_meta.remove(text.as_str());
				Some(IpRemoval::Exact { shard, meta })
			}
			IpEntry::Net { net, text } => {
				if !self.cidrs.remove(net) {
					return None;
				}
				let meta = self.cidr_meta.remove(text.as_str()).unwrap_or_else(|| EntryMeta {
					date: String::new(),
					score: 0.0,
					source: String::new(),
				});
				Some(IpRemoval::Net { meta })
			}
		}
	}

	fn restore_ip(&mut self, entry: &IpEntry, removal: IpRemoval) {
		match (entry, removal) {
			(IpEntry::Exact { key, text }, IpRemoval::Exact { shard, meta }) => {
				self.ips.insert(*key, shard);
				if let Some(meta) = meta {
					self.ip_meta.insert(text.clone(), meta);
				}
			}
			(IpEntry::Net { net, text }, IpRemoval::Net { meta }) => {
				self.cidrs.insert(net, &meta.source);
				self.cidr_meta.insert(text.clone(), meta);
			}
			// Removal variants always pair with the entry they came from.
			_ => {}
		}
	}

	fn clear_kind(&mut self, kind: EntryKind) {
		match kind {
			EntryKind::Domain => {
				self.domains.clear();
				self.domain_meta.clear();
			}
			EntryKind::Url => {
				self.urls.clear();
				self.url_meta.clear();
			}
			EntryKind::Ip => {
				self.ips.clear();
				self.cidrs.clear();
				self.ip_meta.clear();
				self.cidr_meta.clear();
			}
		}
	}
}

/// The in-memory blacklist index with durable SQLite persistence.
///
/// Constructible multiple times with independent database paths; no global
/// state is involved, so tests can run isolated instances side by side.
pub struct Blacklist {
	store: Arc<dyn BlacklistStore>,
	tiers: TierMap,
	state: RwLock<IndexState>,
	metrics: LookupMetrics,
}

impl Blacklist {
	/// Open the durable store described by `settings` and build the
	/// in-memory index from it.
	pub async fn open(settings: &Settings) -> Result<Self> {
		let store = SqliteStore::open(&settings.db_path).await?;
		Self::with_store(Arc::new(store), TierMap::from_settings(settings)).await
	}

	/// Build an index over an already-open store. Used directly by tests to
	/// substitute failing stores.
	pub async fn with_store(store: Arc<dyn BlacklistStore>, tiers: TierMap) -> Result<Self> {
		let index = Self {
			store,
			tiers,
			state: RwLock::new(IndexState::default()),
			metrics: LookupMetrics::default(),
		};
		index.reload().await?;
		Ok(index)
	}

	// --- queries -------------------------------------------------------

	/// Whether `domain` or any of its parent domains is blacklisted.
	/// Total: malformed input is a miss, never an error.
	pub async fn is_domain(&self, domain: &str) -> bool {
		let started = Instant::now();
		let Ok(canonical) = canon::normalize_domain(domain) else {
			self.metrics
				.observe_lookup(EntryKind::Domain, LookupOutcome::Miss, started.elapsed());
			return false;
		};

		let state = self.state.read().await;
		let outcome = state.domain_lookup(&canonical, self.tiers.is_enabled());
		// Counters are updated while the read lock is still held.
		self.metrics
			.observe_lookup(EntryKind::Domain, outcome, started.elapsed());
		drop(state);

		outcome.is_hit()
	}

	/// Whether the canonical form of `url` is blacklisted.
	pub async fn is_url(&self, url: &str) -> bool {
		let started = Instant::now();
		let canonical = canon::canonicalize_url(url);

		let state = self.state.read().await;
		let outcome = state.url_lookup(&canonical.text, self.tiers.is_enabled());
		self.metrics
			.observe_lookup(EntryKind::Url, outcome, started.elapsed());
		drop(state);

		outcome.is_hit()
	}

	/// Whether `addr` matches an exact IP entry or is contained in a CIDR
	/// entry. Unparseable input is a miss.
	pub async fn is_ip(&self, addr: &str) -> bool {
		let started = Instant::now();
		let Ok(parsed) = addr.trim().parse::<IpAddr>() else {
			self.metrics
				.observe_lookup(EntryKind::Ip, LookupOutcome::Miss, started.elapsed());
			return false;
		};

		let state = self.state.read().await;
		let outcome = state.ip_lookup(parsed, self.tiers.is_enabled());
		self.metrics
			.observe_lookup(EntryKind::Ip, outcome, started.elapsed());
		drop(state);

		outcome.is_hit()
	}

	/// Source of the most specific domain entry covering `domain`.
	pub async fn source_of_domain(&self, domain: &str) -> Option<String> {
		let canonical = canon::normalize_domain(domain).ok()?;
		let state = self.state.read().await;
		suffixes(&canonical)
			.find_map(|suffix| state.domain_meta.get(suffix))
			.map(|meta| meta.source.clone())
	}

	/// Source of the canonical URL entry, if any.
	pub async fn source_of_url(&self, url: &str) -> Option<String> {
		let canonical = canon::canonicalize_url(url);
		let state = self.state.read().await;
		state
			.url_meta
			.get(&canonical.text)
			.map(|meta| meta.source.clone())
	}

	/// Source covering `addr`: an exact entry if present, otherwise the
	/// most specific containing CIDR.
	pub async fn source_of_ip(&self, addr: &str) -> Option<String> {
		let entry = parse_ip_entry(addr).ok()?;
		let state = self.state.read().await;
		match &entry {
			IpEntry::Exact { text, .. } => {
				if let Some(meta) = state.ip_meta.get(text.as_str()) {
					return Some(meta.source.clone());
				}
				let parsed: IpAddr = text.parse().ok()?;
				state.cidrs.lookup(parsed).map(str::to_string)
			}
			IpEntry::Net { text, .. } => state
				.cidr_meta
				.get(text.as_str())
				.map(|meta| meta.source.clone()),
		}
	}

	// --- mutations -----------------------------------------------------

	/// Add (or upsert) a domain entry.
	pub async fn add_domain(&self, domain: &str, date: &str, score: f64, source: &str) -> Result<()> {
		let canonical = canon::normalize_domain(domain)
			.map_err(|e| IndexError::InvalidInput(e.to_string()))?;
		let meta = EntryMeta {
			date: date.to_string(),
			score,
			source: source.to_string(),
		};
		let shard = self.tiers.shard_for(EntryKind::Domain, source);

		let mut state = self.state.write().await;
		let undo = state.insert_domain(&canonical, &meta, shard);
		if let Err(e) = self.store.upsert_one(EntryKind::Domain, &canonical, &meta).await {
			state.undo_insert_domain(&canonical, undo);
			return Err(e);
		}
		Ok(())
	}

	/// Add (or upsert) a URL entry, canonicalizing first.
	pub async fn add_url(&self, url: &str, date: &str, score: f64, source: &str) -> Result<()> {
		let canonical = canon::canonicalize_url(url);
		if canonical.altered {
			self.metrics.record_url_canonicalized();
		}
		let meta = EntryMeta {
			date: date.to_string(),
			score,
			source: source.to_string(),
		};
		let shard = self.tiers.shard_for(EntryKind::Url, source);

		let mut state = self.state.write().await;
		let undo = state.insert_url(&canonical.text, &meta, shard);
		if let Err(e) = self
			.store
			.upsert_one(EntryKind::Url, &canonical.text, &meta)
			.await
		{
			state.undo_insert_url(&canonical.text, undo);
			return Err(e);
		}
		Ok(())
	}

	/// Add (or upsert) an IP or CIDR entry. A `/` in the value marks a
	/// CIDR range.
	pub async fn add_ip(&self, addr: &str, date: &str, score: f64, source: &str) -> Result<()> {
		let entry = parse_ip_entry(addr)?;
		let meta = EntryMeta {
			date: date.to_string(),
			score,
			source: source.to_string(),
		};
		let shard = self.tiers.shard_for(EntryKind::Ip, source);

		let mut state = self.state.write().await;
		let undo = state.insert_ip(&entry, &meta, shard);
		if let Err(e) = self
			.store
			.upsert_one(EntryKind::Ip, entry.text(), &meta)
			.await
		{
			state.undo_insert_ip(&entry, undo);
			return Err(e);
		}
		Ok(())
	}

	/// Add a batch of entries of one kind. The durable write is a single
	/// transaction. On commit failure the in-memory view of that kind is
	/// rebuilt from the store, which restores consistency, and the error is
	/// surfaced. Malformed items are skipped with a warning.
	pub async fn add_batch(&self, kind: EntryKind, items: &[BatchEntry]) -> Result<()> {
		let mut state = self.state.write().await;
		let mut rows: Vec<(String, EntryMeta)> = Vec::with_capacity(items.len());

		for item in items {
			let meta = EntryMeta {
				date: item.date.clone(),
				score: item.score,
				source: item.source.clone(),
			};
			let shard = self.tiers.shard_for(kind, &item.source);
			match kind {
				EntryKind::Domain => match canon::normalize_domain(&item.value) {
					Ok(canonical) => {
						state.insert_domain(&canonical, &meta, shard);
						rows.push((canonical, meta));
					}
					Err(e) => log::warn!("skipping malformed domain in batch: {e}"),
				},
				EntryKind::Url => {
					let canonical = canon::canonicalize_url(&item.value);
					if canonical.altered {
						self.metrics.record_url_canonicalized();
					}
					state.insert_url(&canonical.text, &meta, shard);
					rows.push((canonical.text, meta));
				}
				EntryKind::Ip => match parse_ip_entry(&item.value) {
					Ok(entry) => {
						state.insert_ip(&entry, &meta, shard);
						rows.push((entry.text().to_string(), meta));
					}
					Err(e) => log::warn!("skipping malformed IP in batch: {e}"),
				},
			}
		}

		if let Err(e) = self.store.upsert_batch(kind, &rows).await {
			log::warn!(
				"batch commit of {} {} entries failed; rebuilding kind from store: {e}",
				rows.len(),
				kind.as_str()
			);
			if let Err(reload_err) = self.reload_kind_locked(&mut state, kind).await {
				log::error!(
					"kind rebuild after failed batch also failed; {} entries left empty: {reload_err}",
					kind.as_str()
				);
			}
			return Err(e);
		}
		Ok(())
	}

	/// Remove an entry by value from every structure and all three durable
	/// tables. Returns whether anything was removed. Idempotent.
	pub async fn remove(&self, value: &str) -> Result<bool> {
		let trimmed = value.trim();
		let domain_key =
			canon::normalize_domain(trimmed).unwrap_or_else(|_| trimmed.to_string());
		let lower = trimmed.to_lowercase();
		let url_key = if lower.starts_with("http://") || lower.starts_with("https://") {
			canon::canonicalize_url(trimmed).text
		} else {
			trimmed.to_string()
		};
		let ip_entry = parse_ip_entry(trimmed).ok();
		let ip_key = ip_entry
			.as_ref()
			.map(|entry| entry.text().to_string())
			.unwrap_or_else(|| trimmed.to_string());

		let mut state = self.state.write().await;
		let removed_domain = state.remove_domain(&domain_key);
		let removed_url = state.remove_url(&url_key);
		let removed_ip = ip_entry
			.as_ref()
			.and_then(|entry| state.remove_ip(entry));

		match self.store.remove_value(&domain_key, &url_key, &ip_key).await {
			Ok(rows) => Ok(rows > 0
				|| removed_domain.is_some()
				|| removed_url.is_some()
				|| removed_ip.is_some()),
			Err(e) => {
				if let Some((shard, meta)) = removed_domain {
					state.restore_domain(&domain_key, shard, meta);
				}
				if let Some((shard, meta)) = removed_url {
					state.restore_url(&url_key, shard, meta);
				}
				if let (Some(entry), Some(removal)) = (ip_entry.as_ref(), removed_ip) {
					state.restore_ip(entry, removal);
				}
				Err(e)
			}
		}
	}

	/// Wipe the in-memory state and rebuild it from the durable store.
	/// Malformed rows are skipped with a warning and counted; a failed
	/// table read leaves the in-memory index empty and surfaces the error.
	pub async fn reload(&self) -> Result<()> {
		let mut state = self.state.write().await;
		*state = IndexState::default();

		for kind in [EntryKind::Domain, EntryKind::Url, EntryKind::Ip] {
			match self.store.load_kind(kind).await {
				Ok(rows) => {
					for (key, meta) in rows {
						if !self.insert_loaded(&mut state, kind, &key, &meta) {
							self.metrics.record_reload_row_skipped();
						}
					}
				}
				Err(e) => {
					*state = IndexState::default();
					log::error!(
						"reload failed while reading {} rows; in-memory index left empty: {e}",
						kind.as_str()
					);
					return Err(IndexError::Reload(format!(
						"reading {} rows: {e}",
						kind.as_str()
					)));
				}
			}
		}

		state.last_reload = Some(Utc::now());
		log::info!("blacklist index reloaded: {} entries", state.entry_count());
		Ok(())
	}

	/// Rebuild a single kind from the store while already holding the
	/// write lock. Used by the batch failure path.
	async fn reload_kind_locked(&self, state: &mut IndexState, kind: EntryKind) -> Result<()> {
		state.clear_kind(kind);
		let rows = self.store.load_kind(kind).await?;
		for (key, meta) in rows {
			if !self.insert_loaded(state, kind, &key, &meta) {
				self.metrics.record_reload_row_skipped();
			}
		}
		Ok(())
	}

	/// Canonicalize and insert one durable row. Returns false when the row
	/// is malformed and was skipped.
	fn insert_loaded(
		&self,
		state: &mut IndexState,
		kind: EntryKind,
		key: &str,
		meta: &EntryMeta,
	) -> bool {
		let shard = self.tiers.shard_for(kind, &meta.source);
		match kind {
			EntryKind::Domain => match canon::normalize_domain(key) {
				Ok(canonical) => {
					state.insert_domain(&canonical, meta, shard);
					true
				}
				Err(e) => {
					log::warn!("skipping malformed domain row: {e}");
					false
				}
			},
			EntryKind::Url => {
				let canonical = canon::canonicalize_url(key);
				if canonical.altered {
					self.metrics.record_url_canonicalized();
				}
				state.insert_url(&canonical.text, meta, shard);
				true
			}
			EntryKind::Ip => match parse_ip_entry(key) {
				Ok(entry) => {
					state.insert_ip(&entry, meta, shard);
					true
				}
				Err(e) => {
					log::warn!("skipping malformed IP row: {e}");
					false
				}
			},
		}
	}

	// --- snapshots & audit ---------------------------------------------

	/// Total entries currently indexed, each counted once.
	pub async fn count_entries(&self) -> usize {
		self.state.read().await.entry_count()
	}

	/// Entry counts per source, from the in-memory view.
	pub async fn source_counts(&self) -> BTreeMap<String, usize> {
		let state = self.state.read().await;
		let mut counts: BTreeMap<String, usize> = BTreeMap::new();
		for meta in state
			.domain_meta
			.values()
			.chain(state.url_meta.values())
			.chain(state.ip_meta.values())
			.chain(state.cidr_meta.values())
		{
			*counts.entry(meta.source.clone()).or_default() += 1;
		}
		counts
	}

	/// Per-kind entry counts per source.
	pub async fn source_type_counts(&self) -> BTreeMap<String, KindCounts> {
		let state = self.state.read().await;
		let mut counts: BTreeMap<String, KindCounts> = BTreeMap::new();
		for meta in state.domain_meta.values() {
			counts.entry(meta.source.clone()).or_default().domains += 1;
		}
		for meta in state.url_meta.values() {
			counts.entry(meta.source.clone()).or_default().urls += 1;
		}
		for meta in state.ip_meta.values().chain(state.cidr_meta.values()) {
			counts.entry(meta.source.clone()).or_default().ips += 1;
		}
		counts
	}

	/// Distinct sources with at least one entry, sorted.
	pub async fn active_sources(&self) -> Vec<String> {
		let state = self.state.read().await;
		let sources: BTreeSet<String> = state
			.domain_meta
			.values()
			.chain(state.url_meta.values())
			.chain(state.ip_meta.values())
			.chain(state.cidr_meta.values())
			.map(|meta| meta.source.clone())
			.collect();
		sources.into_iter().collect()
	}

	/// Up to `n` values sampled uniformly from the union of current
	/// entries.
	pub async fn sample(&self, n: usize) -> Vec<String> {
		let state = self.state.read().await;
		let mut rng = rand::thread_rng();
		state
			.domain_meta
			.keys()
			.chain(state.url_meta.keys())
			.chain(state.ip_meta.keys())
			.chain(state.cidr_meta.keys())
			.choose_multiple(&mut rng, n)
			.into_iter()
			.cloned()
			.collect()
	}

	/// Append an audit row recording an update from `source`.
	pub async fn log_update(&self, source: &str, entry_count: i64) -> Result<()> {
		self.store.log_update(source, entry_count).await
	}

	/// Audit rows, optionally filtered, ordered by timestamp ascending.
	pub async fn update_history(&self, filter: &HistoryFilter) -> Result<Vec<UpdateRecord>> {
		self.store.update_history(filter).await
	}

	/// Aggregate status: entry count, active sources, last update per
	/// source, last reload time.
	pub async fn status(&self) -> Result<StatusSnapshot> {
		let (entry_count, active_sources, last_reload) = {
			let state = self.state.read().await;
			let sources: BTreeSet<String> = state
				.domain_meta
				.values()
				.chain(state.url_meta.values())
				.chain(state.ip_meta.values())
				.chain(state.cidr_meta.values())
				.map(|meta| meta.source.clone())
				.collect();
			(
				state.entry_count(),
				sources.into_iter().collect(),
				state.last_reload,
			)
		};
		let last_update_per_source = self.store.last_update_per_source().await?;
		Ok(StatusSnapshot {
			entry_count,
			active_sources,
			last_update_per_source,
			last_reload,
		})
	}

	/// Snapshot of the query-path counters.
	pub async fn metrics(&self) -> MetricsSnapshot {
		let packed = self.state.read().await.ips.packed_v4_len() as u64;
		self.metrics.snapshot(packed)
	}

	/// Timestamp of the last successful reload.
	pub async fn last_reload(&self) -> Option<DateTime<Utc>> {
		self.state.read().await.last_reload
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn ip_entry_classifies_and_canonicalizes() {
		match parse_ip_entry("192.168.1.100").expect("ipv4") {
			IpEntry::Exact {
				key: IpKey::V4(packed),
				text,
			} => {
				assert_eq!(packed, 3_232_235_876);
				assert_eq!(text, "192.168.1.100");
			}
			_ => panic!("expected packed IPv4"),
		}

		match parse_ip_entry("10.0.0.5/8").expect("cidr") {
			IpEntry::Net { text, .. } => assert_eq!(text, "10.0.0.0/8"),
			_ => panic!("expected network"),
		}

		assert!(matches!(
			parse_ip_entry("2001:db8::1").expect("ipv6"),
			IpEntry::Exact {
				key: IpKey::V6(_),
				..
			}
		));

		assert!(matches!(
			parse_ip_entry("not-an-ip"),
			Err(IndexError::InvalidInput(_))
		));
		assert!(matches!(
			parse_ip_entry("10.0.0.0/99"),
			Err(IndexError::CidrParse(_))
		));
	}
}
