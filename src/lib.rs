//! Palisade: a high-throughput in-memory blacklist index over
//! threat-intelligence indicators, durably persisted to SQLite.
//!
//! The index answers membership queries for four indicator shapes — exact
//! domains (with hierarchical subdomain matching), canonicalized URLs,
//! single IP addresses (IPv4 packed to 32 bits), and CIDR ranges
//! (longest-prefix match) — from tiered in-memory structures, while every
//! mutation is committed to a local SQLite store under the same write lock
//! so a restart restores the full catalog.
//!
//! Feed downloading, vendor parsing, and refresh scheduling are external
//! collaborators: they drive [`Blacklist::add_batch`] and
//! [`Blacklist::reload`] but are not part of this crate.

pub mod canon;
pub mod check;
pub mod config;
pub mod error;
pub mod index;
pub mod observability;
pub mod store;

pub use check::{Verdict, check, check_batch};
pub use error::IndexError;
pub use index::{BatchEntry, Blacklist, KindCounts, StatusSnapshot};
pub use index::metrics::MetricsSnapshot;
pub use index::tier::TierMap;
pub use store::{
	BlacklistStore, EntryKind, EntryMeta, HistoryFilter, SqliteStore, UpdateRecord,
};
