//! Longest-prefix-match tries for CIDR containment, one per address family.
//!
//! Each trie is a binary trie keyed on the network bits of an
//! [`ipnet::IpNet`], most-significant bit first. The value stored at a node
//! is the source identifier of the entry, which is all a containment query
//! needs to answer both "is this blacklisted" and "which source". Unlike
//! append-only radix structures, these tries support per-key removal with
//! node pruning, so `remove()` takes effect immediately rather than waiting
//! for the next reload.

use std::marker::PhantomData;
use std::net::IpAddr;

use ipnet::IpNet;

/// Address-family-sized bit container a trie can walk.
pub(crate) trait PrefixBits: Copy {
	const WIDTH: u8;

	/// Bit at `index`, where index 0 is the most significant bit.
	fn bit(self, index: u8) -> bool;
}

impl PrefixBits for u32 {
	const WIDTH: u8 = 32;

	fn bit(self, index: u8) -> bool {
		(self >> (31 - index)) & 1 == 1
	}
}

impl PrefixBits for u128 {
	const WIDTH: u8 = 128;

	fn bit(self, index: u8) -> bool {
		(self >> (127 - index)) & 1 == 1
	}
}

#[derive(Debug, Default)]
struct Node {
	value: Option<String>,
	zero: Option<Box<Node>>,
	one: Option<Box<Node>>,
}

impl Node {
	fn is_leafless(&self) -> bool {
		self.value.is_none() && self.zero.is_none() && self.one.is_none()
	}
}

/// Binary longest-prefix-match trie over one address family.
#[derive(Debug, Default)]
pub(crate) struct PrefixTrie<B: PrefixBits> {
	root: Node,
	len: usize,
	_bits: PhantomData<B>,
}

impl<B: PrefixBits> PrefixTrie<B> {
	/// Insert a network, replacing the source on an existing key.
	fn insert(&mut self, bits: B, prefix_len: u8, source: String) {
		let mut node = &mut self.root;
		for index in 0..prefix_len.min(B::WIDTH) {
			let child = if bits.bit(index) {
				&mut node.one
			} else {
				&mut node.zero
			};
			node = child.get_or_insert_with(Box::default).as_mut();
		}
		if node.value.replace(source).is_none() {
			self.len += 1;
		}
	}

	/// Longest-prefix match: the source of the most specific network
	/// containing `bits`, if any.
	fn lookup(&self, bits: B) -> Option<&str> {
		let mut node = &self.root;
		let mut best = node.value.as_deref();
		for index in 0..B::WIDTH {
			let child = if bits.bit(index) { &node.one } else { &node.zero };
			match child {
				Some(next) => {
					node = &**next;
					if let Some(value) = node.value.as_deref() {
						best = Some(value);
					}
				}
				None => break,
			}
		}
		best
	}

	/// Remove an exact network key, pruning emptied nodes on the way out.
	fn remove(&mut self, bits: B, prefix_len: u8) -> bool {
		let removed = Self::remove_below(&mut self.root, bits, 0, prefix_len.min(B::WIDTH));
		if removed {
			self.len -= 1;
		}
		removed
	}

	fn remove_below(node: &mut Node, bits: B, depth: u8, prefix_len: u8) -> bool {
		if depth == prefix_len {
			return node.value.take().is_some();
		}
		let child = if bits.bit(depth) {
			&mut node.one
		} else {
			&mut node.zero
		};
		let Some(next) = child else {
			return false;
		};
		let removed = Self::remove_below(&mut **next, bits, depth + 1, prefix_len);
		if removed && next.is_leafless() {
			*child = None;
		}
		removed
	}

	fn clear(&mut self) {
		self.root = Node::default();
		self.len = 0;
	}
}

/// The pair of per-family tries the index keeps for CIDR entries.
#[derive(Debug, Default)]
pub struct CidrTable {
	v4: PrefixTrie<u32>,
	v6: PrefixTrie<u128>,
}

impl CidrTable {
	/// Insert a network with its source identifier (upsert on the key).
	pub fn insert(&mut self, net: &IpNet, source: &str) {
		match net {
			IpNet::V4(n) => {
				self.v4
					.insert(u32::from(n.network()), n.prefix_len(), source.to_string())
			}
			IpNet::V6(n) => {
				self.v6
					.insert(u128::from(n.network()), n.prefix_len(), source.to_string())
			}
		}
	}

	/// Source of the most specific network containing `addr`, if any.
	pub fn lookup(&self, addr: IpAddr) -> Option<&str> {
		match addr {
			IpAddr::V4(v4) => self.v4.lookup(u32::from(v4)),
			IpAddr::V6(v6) => self.v6.lookup(u128::from(v6)),
		}
	}

	/// Remove an exact network key. Returns whether it was present.
	pub fn remove(&mut self, net: &IpNet) -> bool {
		match net {
			IpNet::V4(n) => self.v4.remove(u32::from(n.network()), n.prefix_len()),
			IpNet::V6(n) => self.v6.remove(u128::from(n.network()), n.prefix_len()),
		}
	}

	pub fn len(&self) -> usize {
		self.v4.len + self.v6.len
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&mut self) {
		self.v4.clear();
		self.v6.clear();
	}
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;
	use std::str::FromStr;

	fn net(text: &str) -> IpNet {
		IpNet::from_str(text).expect("test networks parse")
	}

	fn addr(text: &str) -> IpAddr {
		text.parse().expect("test addresses parse")
	}

	#[test]
	fn v4_containment() {
		let mut table = CidrTable::default();
		table.insert(&net("10.0.0.0/8"), "SpamhausDROP");

		assert_eq!(table.lookup(addr("10.5.5.5")), Some("SpamhausDROP"));
		assert_eq!(table.lookup(addr("10.255.255.255")), Some("SpamhausDROP"));
		assert_eq!(table.lookup(addr("11.0.0.1")), None);
		assert_eq!(table.lookup(addr("203.0.113.1")), None);
	}

	#[test]
	fn longest_prefix_wins() {
		let mut table = CidrTable::default();
		table.insert(&net("10.0.0.0/8"), "coarse");
		table.insert(&net("10.1.0.0/16"), "fine");

		assert_eq!(table.lookup(addr("10.1.2.3")), Some("fine"));
		assert_eq!(table.lookup(addr("10.2.2.3")), Some("coarse"));
	}

	#[test]
	fn v6_containment() {
		let mut table = CidrTable::default();
		table.insert(&net("2001:db8::/32"), "test");

		assert_eq!(table.lookup(addr("2001:db8::1")), Some("test"));
		assert_eq!(table.lookup(addr("2001:db9::1")), None);
	}

	#[test]
	fn insert_is_upsert() {
		let mut table = CidrTable::default();
		table.insert(&net("10.0.0.0/8"), "first");
		table.insert(&net("10.0.0.0/8"), "second");

		assert_eq!(table.len(), 1);
		assert_eq!(table.lookup(addr("10.0.0.1")), Some("second"));
	}

	#[test]
	fn remove_prunes_and_counts() {
		let mut table = CidrTable::default();
		table.insert(&net("10.0.0.0/8"), "a");
		table.insert(&net("10.1.0.0/16"), "b");
		assert_eq!(table.len(), 2);

		assert!(table.remove(&net("10.1.0.0/16")));
		assert!(!table.remove(&net("10.1.0.0/16")));
		assert_eq!(table.len(), 1);
		assert_eq!(table.lookup(addr("10.1.2.3")), Some("a"));

		assert!(table.remove(&net("10.0.0.0/8")));
		assert!(table.is_empty());
		assert_eq!(table.lookup(addr("10.1.2.3")), None);
	}

	#[test]
	fn removing_parent_keeps_nested_network() {
		let mut table = CidrTable::default();
		table.insert(&net("10.0.0.0/8"), "a");
		table.insert(&net("10.1.0.0/16"), "b");

		assert!(table.remove(&net("10.0.0.0/8")));
		assert_eq!(table.lookup(addr("10.1.2.3")), Some("b"));
		assert_eq!(table.lookup(addr("10.2.2.3")), None);
	}
}
