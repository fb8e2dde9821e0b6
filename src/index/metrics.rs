//! Query-path counters and the metrics snapshot.
//!
//! Counters are plain atomics updated from the lookup path while the read
//! lock is held; they are best-effort monotonic and never block a lookup.
//! The running mean lookup latency uses the incremental Welford update so it
//! stays numerically stable over billions of observations. We avoid a heavy
//! metrics-client dependency and render a minimal Prometheus-compatible text
//! format from the snapshot instead.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

use crate::store::EntryKind;

/// Where a positive lookup was resolved, or that it missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupOutcome {
	/// Exact match in the hot shard.
	HotHit,
	/// Exact match in the cold shard.
	ColdHit,
	/// Containment match in the CIDR radix (checked after both exact sets).
	CidrHit,
	Miss,
}

impl LookupOutcome {
	pub fn is_hit(self) -> bool {
		!matches!(self, LookupOutcome::Miss)
	}
}

#[derive(Debug, Default)]
struct RunningMean {
	count: u64,
	mean_ns: f64,
}

impl RunningMean {
	fn observe(&mut self, sample_ns: f64) {
		self.count += 1;
		self.mean_ns += (sample_ns - self.mean_ns) / self.count as f64;
	}
}

/// Lock-free counters updated from the query and mutation paths.
#[derive(Debug, Default)]
pub struct LookupMetrics {
	total_lookups: AtomicU64,
	domain_lookups: AtomicU64,
	url_lookups: AtomicU64,
	ip_lookups: AtomicU64,
	hits: AtomicU64,
	misses: AtomicU64,
	hot_hits: AtomicU64,
	cold_hits: AtomicU64,
	cidr_hits: AtomicU64,
	urls_canonicalized: AtomicU64,
	reload_rows_skipped: AtomicU64,
	latency: Mutex<RunningMean>,
}

impl LookupMetrics {
	pub fn observe_lookup(&self, kind: EntryKind, outcome: LookupOutcome, elapsed: Duration) {
		self.total_lookups.fetch_add(1, Ordering::Relaxed);
		match kind {
			EntryKind::Domain => &self.domain_lookups,
			EntryKind::Url => &self.url_lookups,
			EntryKind::Ip => &self.ip_lookups,
		}
		.fetch_add(1, Ordering::Relaxed);

		match outcome {
			LookupOutcome::HotHit => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				self.hot_hits.fetch_add(1, Ordering::Relaxed);
			}
			LookupOutcome::ColdHit => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				self.cold_hits.fetch_add(1, Ordering::Relaxed);
			}
			LookupOutcome::CidrHit => {
				self.hits.fetch_add(1, Ordering::Relaxed);
				self.cidr_hits.fetch_add(1, Ordering::Relaxed);
			}
			LookupOutcome::Miss => {
				self.misses.fetch_add(1, Ordering::Relaxed);
			}
		}

		if let Ok(mut mean) = self.latency.lock() {
			mean.observe(elapsed.as_nanos() as f64);
		}
	}

	pub fn record_url_canonicalized(&self) {
		self.urls_canonicalized.fetch_add(1, Ordering::Relaxed);
	}

	pub fn record_reload_row_skipped(&self) {
		self.reload_rows_skipped.fetch_add(1, Ordering::Relaxed);
	}

	/// Snapshot the counters. `packed_ipv4_entries` is supplied by the
	/// caller because it is a property of the index state, not a counter.
	pub fn snapshot(&self, packed_ipv4_entries: u64) -> MetricsSnapshot {
		let avg_ns = match self.latency.lock() {
			Ok(mean) => mean.mean_ns,
			Err(_) => 0.0,
		};

		MetricsSnapshot {
			total_lookups: self.total_lookups.load(Ordering::Relaxed),
			domain_lookups: self.domain_lookups.load(Ordering::Relaxed),
			url_lookups: self.url_lookups.load(Ordering::Relaxed),
			ip_lookups: self.ip_lookups.load(Ordering::Relaxed),
			hits: self.hits.load(Ordering::Relaxed),
			misses: self.misses.load(Ordering::Relaxed),
			hot_hits: self.hot_hits.load(Ordering::Relaxed),
			cold_hits: self.cold_hits.load(Ordering::Relaxed),
			cidr_hits: self.cidr_hits.load(Ordering::Relaxed),
			avg_lookup_time_ms: avg_ns / 1_000_000.0,
			packed_ipv4_entries,
			urls_canonicalized: self.urls_canonicalized.load(Ordering::Relaxed),
			reload_rows_skipped: self.reload_rows_skipped.load(Ordering::Relaxed),
		}
	}
}

/// Point-in-time view of the query counters.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MetricsSnapshot {
	pub total_lookups: u64,
	pub domain_lookups: u64,
	pub url_lookups: u64,
	pub ip_lookups: u64,
	pub hits: u64,
	pub misses: u64,
	pub hot_hits: u64,
	pub cold_hits: u64,
	pub cidr_hits: u64,
	pub avg_lookup_time_ms: f64,
	pub packed_ipv4_entries: u64,
	pub urls_canonicalized: u64,
	pub reload_rows_skipped: u64,
}

impl MetricsSnapshot {
	/// Render the snapshot as Prometheus text exposition format.
	pub fn to_prometheus_text(&self) -> String {
		let mut out = String::new();
		let mut counter = |name: &str, help: &str, value: f64| {
			out.push_str(&format!("# HELP palisade_{name} {help}\n"));
			out.push_str(&format!("# TYPE palisade_{name} counter\n"));
			out.push_str(&format!("palisade_{name} {value}\n"));
		};

		counter("lookups_total", "Total lookups served", self.total_lookups as f64);
		counter(
			"domain_lookups_total",
			"Domain lookups served",
			self.domain_lookups as f64,
		);
		counter("url_lookups_total", "URL lookups served", self.url_lookups as f64);
		counter("ip_lookups_total", "IP lookups served", self.ip_lookups as f64);
		counter("lookup_hits_total", "Lookups that matched", self.hits as f64);
		counter("lookup_misses_total", "Lookups that missed", self.misses as f64);
		counter(
			"hot_shard_hits_total",
			"Hits resolved in the hot shard",
			self.hot_hits as f64,
		);
		counter(
			"cold_shard_hits_total",
			"Hits resolved in the cold shard",
			self.cold_hits as f64,
		);
		counter(
			"cidr_hits_total",
			"Hits resolved by CIDR containment",
			self.cidr_hits as f64,
		);
		counter(
			"urls_canonicalized_total",
			"URL entries altered by canonicalization",
			self.urls_canonicalized as f64,
		);
		counter(
			"reload_rows_skipped_total",
			"Malformed rows skipped during reload",
			self.reload_rows_skipped as f64,
		);

		out.push_str("# HELP palisade_packed_ipv4_entries Entries held in packed IPv4 form\n");
		out.push_str("# TYPE palisade_packed_ipv4_entries gauge\n");
		out.push_str(&format!(
			"palisade_packed_ipv4_entries {}\n",
			self.packed_ipv4_entries
		));
		out.push_str("# HELP palisade_avg_lookup_time_ms Running mean lookup latency\n");
		out.push_str("# TYPE palisade_avg_lookup_time_ms gauge\n");
		out.push_str(&format!("palisade_avg_lookup_time_ms {}\n", self.avg_lookup_time_ms));

		out
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn outcomes_split_hit_counters() {
		let metrics = LookupMetrics::default();
		metrics.observe_lookup(EntryKind::Domain, LookupOutcome::HotHit, Duration::from_nanos(100));
		metrics.observe_lookup(EntryKind::Domain, LookupOutcome::ColdHit, Duration::from_nanos(300));
		metrics.observe_lookup(EntryKind::Url, LookupOutcome::Miss, Duration::from_nanos(200));

		let snap = metrics.snapshot(0);
		assert_eq!(snap.total_lookups, 3);
		assert_eq!(snap.domain_lookups, 2);
		assert_eq!(snap.url_lookups, 1);
		assert_eq!(snap.hits, 2);
		assert_eq!(snap.misses, 1);
		assert_eq!(snap.hot_hits, 1);
		assert_eq!(snap.cold_hits, 1);
	}

	#[test]
	fn running_mean_is_incremental() {
		let mut mean = RunningMean::default();
		for sample in [100.0, 200.0, 300.0] {
			mean.observe(sample);
		}
		assert!((mean.mean_ns - 200.0).abs() < f64::EPSILON);
	}

	#[test]
	fn prometheus_text_renders_all_series() {
		let metrics = LookupMetrics::default();
		metrics.observe_lookup(EntryKind::Ip, LookupOutcome::CidrHit, Duration::from_nanos(50));
		let text = metrics.snapshot(7).to_prometheus_text();

		assert!(text.contains("palisade_cidr_hits_total 1"));
		assert!(text.contains("palisade_packed_ipv4_entries 7"));
	}
}
