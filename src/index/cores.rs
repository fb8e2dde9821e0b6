//! In-memory lookup structures: tiered exact-match sets for domains, URLs,
//! and IPs, plus the hierarchical domain-suffix walk.
//!
//! Every set is split into a hot and a cold shard. The two shards are kept
//! disjoint; their union is the full catalog for that kind, so the per-kind
//! entry count is simply `hot.len() + cold.len()`.

use std::collections::HashSet;
use std::net::Ipv6Addr;

/// Which shard an entry lives in, decided by its source's tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shard {
	Hot,
	Cold,
}

/// A hot/cold pair of string sets (domains or canonical URLs).
#[derive(Debug, Default)]
pub struct TieredSet {
	hot: HashSet<String>,
	cold: HashSet<String>,
}

impl TieredSet {
	/// Insert `value` into `shard`, evicting it from the other shard if a
	/// re-insert moved it. Returns the shard it previously lived in.
	pub fn insert(&mut self, value: &str, shard: Shard) -> Option<Shard> {
		let previous = self.remove(value);
		match shard {
			Shard::Hot => self.hot.insert(value.to_string()),
			Shard::Cold => self.cold.insert(value.to_string()),
		};
		previous
	}

	pub fn remove(&mut self, value: &str) -> Option<Shard> {
		if self.hot.remove(value) {
			Some(Shard::Hot)
		} else if self.cold.remove(value) {
			Some(Shard::Cold)
		} else {
			None
		}
	}

	pub fn contains(&self, value: &str, shard: Shard) -> bool {
		match shard {
			Shard::Hot => self.hot.contains(value),
			Shard::Cold => self.cold.contains(value),
		}
	}

	pub fn shard_of(&self, value: &str) -> Option<Shard> {
		if self.hot.contains(value) {
			Some(Shard::Hot)
		} else if self.cold.contains(value) {
			Some(Shard::Cold)
		} else {
			None
		}
	}

	pub fn len(&self) -> usize {
		self.hot.len() + self.cold.len()
	}

	pub fn is_empty(&self) -> bool {
		self.hot.is_empty() && self.cold.is_empty()
	}

	pub fn clear(&mut self) {
		self.hot.clear();
		self.cold.clear();
	}
}

/// Exact-match key for a single IP address. IPv4 lives as a packed 32-bit
/// integer; IPv6 keeps its 128-bit container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IpKey {
	V4(u32),
	V6(Ipv6Addr),
}

#[derive(Debug, Default)]
struct IpExactSet {
	v4: HashSet<u32>,
	v6: HashSet<Ipv6Addr>,
}

impl IpExactSet {
	fn insert(&mut self, key: IpKey) {
		match key {
			IpKey::V4(packed) => self.v4.insert(packed),
			IpKey::V6(addr) => self.v6.insert(addr),
		};
	}

	fn remove(&mut self, key: IpKey) -> bool {
		match key {
			IpKey::V4(packed) => self.v4.remove(&packed),
			IpKey::V6(addr) => self.v6.remove(&addr),
		}
	}

	fn contains(&self, key: IpKey) -> bool {
		match key {
			IpKey::V4(packed) => self.v4.contains(&packed),
			IpKey::V6(addr) => self.v6.contains(&addr),
		}
	}

	fn len(&self) -> usize {
		self.v4.len() + self.v6.len()
	}
}

/// Hot/cold pair of exact IP sets.
#[derive(Debug, Default)]
pub struct TieredIpSet {
	hot: IpExactSet,
	cold: IpExactSet,
}

impl TieredIpSet {
	pub fn insert(&mut self, key: IpKey, shard: Shard) -> Option<Shard> {
		let previous = self.remove(key);
		match shard {
			Shard::Hot => self.hot.insert(key),
			Shard::Cold => self.cold.insert(key),
		}
		previous
	}

	pub fn remove(&mut self, key: IpKey) -> Option<Shard> {
		if self.hot.remove(key) {
			Some(Shard::Hot)
		} else if self.cold.remove(key) {
			Some(Shard::Cold)
		} else {
			None
		}
	}

	pub fn contains(&self, key: IpKey, shard: Shard) -> bool {
		match shard {
			Shard::Hot => self.hot.contains(key),
			Shard::Cold => self.cold.contains(key),
		}
	}

	pub fn len(&self) -> usize {
		self.hot.len() + self.cold.len()
	}

	/// Number of entries stored in packed IPv4 form across both shards.
	pub fn packed_v4_len(&self) -> usize {
		self.hot.v4.len() + self.cold.v4.len()
	}

	pub fn clear(&mut self) {
		self.hot = IpExactSet::default();
		self.cold = IpExactSet::default();
	}
}

/// Iterate the label suffixes of a domain from most to least specific:
/// `a.b.c` yields `a.b.c`, `b.c`, `c`.
pub fn suffixes(domain: &str) -> impl Iterator<Item = &str> {
	std::iter::successors(Some(domain), |current| {
		current.split_once('.').map(|(_, rest)| rest)
	})
}

/// Hierarchical domain match against one shard: true when any label suffix
/// of `domain` is present.
pub fn shard_matches_domain(set: &TieredSet, domain: &str, shard: Shard) -> bool {
	suffixes(domain).any(|suffix| set.contains(suffix, shard))
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn suffix_walk_is_most_specific_first() {
		let walked: Vec<&str> = suffixes("a.b.evil.com").collect();
		assert_eq!(walked, vec!["a.b.evil.com", "b.evil.com", "evil.com", "com"]);
	}

	#[test]
	fn shards_stay_disjoint_on_reinsert() {
		let mut set = TieredSet::default();
		assert_eq!(set.insert("evil.com", Shard::Cold), None);
		// A re-insert from a hot source moves the entry between shards.
		assert_eq!(set.insert("evil.com", Shard::Hot), Some(Shard::Cold));

		assert_eq!(set.len(), 1);
		assert!(set.contains("evil.com", Shard::Hot));
		assert!(!set.contains("evil.com", Shard::Cold));
	}

	#[test]
	fn hierarchical_match_covers_subdomains() {
		let mut set = TieredSet::default();
		set.insert("evil.com", Shard::Hot);

		assert!(shard_matches_domain(&set, "evil.com", Shard::Hot));
		assert!(shard_matches_domain(&set, "sub.evil.com", Shard::Hot));
		assert!(shard_matches_domain(&set, "a.b.c.evil.com", Shard::Hot));
		assert!(!shard_matches_domain(&set, "evilcom", Shard::Hot));
		assert!(!shard_matches_domain(&set, "evil.com", Shard::Cold));
	}

	#[test]
	fn tiered_ip_set_counts_once_per_entry() {
		let mut ips = TieredIpSet::default();
		ips.insert(IpKey::V4(3_232_235_876), Shard::Hot);
		ips.insert(IpKey::V6("2001:db8::1".parse().unwrap()), Shard::Cold);

		assert_eq!(ips.len(), 2);
		assert_eq!(ips.packed_v4_len(), 1);

		// Re-inserting the same address must not inflate the count.
		ips.insert(IpKey::V4(3_232_235_876), Shard::Cold);
		assert_eq!(ips.len(), 2);
	}
}
