//! Canonicalizers for blacklist indicators: URLs, IPv4 addresses, and
//! domain names.
//!
//! Every structure in the index is keyed by a canonical form, so two
//! spellings of the same indicator always collide. Canonical forms are also
//! what the durable store persists; reloading therefore re-derives the exact
//! same keys.
//!
//! URL canonicalization is *total*: it never fails. When a value cannot be
//! parsed as a URL the lowercased original is used as the canonical text,
//! which keeps lookups well-defined for garbage input without surfacing an
//! error to the query path.

use std::net::Ipv4Addr;

use thiserror::Error;
use url::Url;
use url::form_urlencoded;

/// Query parameters stripped during URL canonicalization. Matching is
/// case-insensitive (the whole URL is lowercased first).
pub const TRACKING_PARAMS: [&str; 11] = [
	"utm_source",
	"utm_medium",
	"utm_campaign",
	"utm_term",
	"utm_content",
	"fbclid",
	"gclid",
	"mc_eid",
	"_ga",
	"ref",
	"referrer",
];

/// Errors from domain normalization.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CanonError {
	#[error("invalid domain: {0}")]
	InvalidDomain(String),
}

/// Result of URL canonicalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalUrl {
	/// The canonical text used as the entry key.
	pub text: String,
	/// Whether canonicalization changed the input (used for metrics).
	pub altered: bool,
	/// Whether the URL failed to parse and the lowercased original was used.
	pub recovered: bool,
}

/// Canonicalize a URL into its stable identity.
///
/// Steps: lowercase, default a missing scheme to `http`, drop the fragment,
/// drop tracking query parameters and re-encode the rest in insertion order,
/// strip trailing slashes from the path (the root path serializes to no path
/// at all). Idempotent: `canonicalize_url(out.text).text == out.text`.
///
/// # Examples
///
/// ```
/// use palisade::canon::canonicalize_url;
///
/// assert_eq!(canonicalize_url("HTTP://EVIL.COM/").text, "http://evil.com");
/// assert_eq!(
///	canonicalize_url("http://evil.com/page?utm_medium=email&valid=1").text,
///	"http://evil.com/page?valid=1"
/// );
/// ```
pub fn canonicalize_url(input: &str) -> CanonicalUrl {
	let lowered = input.trim().to_lowercase();

	match parse_lowered(&lowered) {
		Some(url) => {
			let text = reassemble(&url);
			CanonicalUrl {
				altered: text != input,
				text,
				recovered: false,
			}
		}
		None => {
			log::debug!("URL canonicalization recovered; keeping lowered input: {lowered}");
			CanonicalUrl {
				altered: lowered != input,
				text: lowered,
				recovered: true,
			}
		}
	}
}

/// Parse an already-lowercased URL, defaulting the scheme to `http` when the
/// input has none (or when the apparent scheme is really a host, as in
/// `evil.com:8080/x`).
fn parse_lowered(lowered: &str) -> Option<Url> {
	if lowered.is_empty() {
		return None;
	}
	match Url::parse(lowered) {
		Ok(url) if url.has_host() => Some(url),
		// Parsed but host-less (`mailto:`-style opaque forms), or no scheme
		// at all: retry as an http URL.
		Ok(_) | Err(url::ParseError::RelativeUrlWithoutBase) => {
			Url::parse(&format!("http://{lowered}"))
				.ok()
				.filter(Url::has_host)
		}
		Err(_) => None,
	}
}

/// Reassemble a parsed URL into canonical text.
///
/// `Url`'s own serialization always renders the root path as `/`; the
/// canonical form drops it, so reassembly is explicit here.
fn reassemble(url: &Url) -> String {
	let mut out = String::with_capacity(url.as_str().len());
	out.push_str(url.scheme());
	out.push_str("://");

	if !url.username().is_empty() {
		out.push_str(url.username());
		if let Some(password) = url.password() {
			out.push(':');
			out.push_str(password);
		}
		out.push('@');
	}

	if let Some(host) = url.host_str() {
		out.push_str(host);
	}
	if let Some(port) = url.port() {
		out.push(':');
		out.push_str(&port.to_string());
	}

	// Trailing slashes carry no identity; `/path/` and `/path` are the same
	// indicator, and the bare root collapses to no path at all.
	out.push_str(url.path().trim_end_matches('/'));

	let kept: Vec<(String, String)> = url
		.query_pairs()
		.filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
		.map(|(key, value)| (key.into_owned(), value.into_owned()))
		.collect();
	if !kept.is_empty() {
		let mut serializer = form_urlencoded::Serializer::new(String::new());
		for (key, value) in &kept {
			serializer.append_pair(key, value);
		}
		out.push('?');
		out.push_str(&serializer.finish());
	}

	out
}

/// Pack a dotted-quad IPv4 string into its 32-bit big-endian integer form.
///
/// Returns `None` for anything that is not a strict dotted quad; values
/// containing `:` are never packable (the caller keeps IPv6 as text or a
/// 128-bit container).
///
/// # Examples
///
/// ```
/// use palisade::canon::pack_ipv4;
///
/// assert_eq!(pack_ipv4("192.168.1.100"), Some(3232235876));
/// assert_eq!(pack_ipv4("2001:db8::1"), None);
/// assert_eq!(pack_ipv4("256.1.1.1"), None);
/// ```
pub fn pack_ipv4(input: &str) -> Option<u32> {
	let trimmed = input.trim();
	if trimmed.contains(':') {
		return None;
	}
	trimmed.parse::<Ipv4Addr>().ok().map(u32::from)
}

/// Inverse of [`pack_ipv4`]: render a packed address back to dotted quad.
pub fn unpack_ipv4(packed: u32) -> String {
	Ipv4Addr::from(packed).to_string()
}

/// Normalize a domain name to its canonical form: trimmed, single trailing
/// dot stripped, IDNA-encoded to ASCII, lowercased.
pub fn normalize_domain(input: &str) -> Result<String, CanonError> {
	let input = input.trim();
	if input.is_empty() {
		return Err(CanonError::InvalidDomain("empty domain".to_string()));
	}

	let input = input.strip_suffix('.').unwrap_or(input);

	let canonical = idna::domain_to_ascii(input)
		.map_err(|e| CanonError::InvalidDomain(format!("{input}: {e}")))?;

	// IDNA may produce uppercase; ensure lowercase
	let canonical = canonical.to_lowercase();

	if canonical.is_empty() {
		return Err(CanonError::InvalidDomain(
			"domain normalized to empty string".to_string(),
		));
	}

	Ok(canonical)
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
	use super::*;

	#[test]
	fn url_lowercases_and_drops_root_path() {
		assert_eq!(canonicalize_url("HTTP://EVIL.COM/").text, "http://evil.com");
	}

	#[test]
	fn url_drops_tracking_only_query() {
		assert_eq!(
			canonicalize_url("http://evil.com/?utm_source=spam").text,
			"http://evil.com"
		);
	}

	#[test]
	fn url_keeps_non_tracking_params_in_order() {
		assert_eq!(
			canonicalize_url("http://evil.com/page?utm_medium=email&valid=1").text,
			"http://evil.com/page?valid=1"
		);
		assert_eq!(
			canonicalize_url("http://evil.com/p?b=2&a=1").text,
			"http://evil.com/p?b=2&a=1"
		);
	}

	#[test]
	fn url_strips_trailing_slash() {
		assert_eq!(
			canonicalize_url("http://evil.com/path/").text,
			"http://evil.com/path"
		);
	}

	#[test]
	fn url_defaults_missing_scheme_to_http() {
		assert_eq!(canonicalize_url("evil.com/login").text, "http://evil.com/login");
		assert_eq!(canonicalize_url("evil.com:8080/x").text, "http://evil.com:8080/x");
	}

	#[test]
	fn url_drops_fragment_and_default_port() {
		assert_eq!(
			canonicalize_url("http://evil.com:80/a#frag").text,
			"http://evil.com/a"
		);
	}

	#[test]
	fn url_unparseable_falls_back_to_lowered() {
		let out = canonicalize_url("::::not a url::::");
		assert!(out.recovered);
		assert_eq!(out.text, "::::not a url::::");
	}

	#[test]
	fn url_canonicalization_is_idempotent() {
		let inputs = [
			"HTTP://EVIL.COM/",
			"http://evil.com/?utm_source=spam",
			"http://evil.com/page?utm_medium=email&valid=1",
			"http://evil.com/path/",
			"evil.com",
			"https://user:pw@evil.com:8443/a/b/?q=1&fbclid=x",
			"http://evil.com/p?v=a%2Fb",
			"not a url at all",
		];
		for input in inputs {
			let once = canonicalize_url(input);
			let twice = canonicalize_url(&once.text);
			assert_eq!(once.text, twice.text, "not idempotent for {input:?}");
		}
	}

	#[test]
	fn url_altered_flag_tracks_changes() {
		assert!(canonicalize_url("HTTP://EVIL.COM/").altered);
		assert!(!canonicalize_url("http://evil.com/page").altered);
	}

	#[test]
	fn pack_ipv4_round_trips() {
		for addr in ["0.0.0.0", "192.168.1.100", "255.255.255.255", "10.0.0.1"] {
			let packed = pack_ipv4(addr).expect("packable");
			assert_eq!(unpack_ipv4(packed), addr);
		}
	}

	#[test]
	fn pack_ipv4_known_value() {
		assert_eq!(pack_ipv4("192.168.1.100"), Some(3_232_235_876));
	}

	#[test]
	fn pack_ipv4_rejects_bad_input() {
		assert_eq!(pack_ipv4("256.1.1.1"), None);
		assert_eq!(pack_ipv4("1.2.3"), None);
		assert_eq!(pack_ipv4("1.2.3.4.5"), None);
		assert_eq!(pack_ipv4("2001:db8::1"), None);
		assert_eq!(pack_ipv4("evil.com"), None);
	}

	#[test]
	fn domain_lowercases() {
		assert_eq!(normalize_domain("Evil.COM").unwrap(), "evil.com");
	}

	#[test]
	fn domain_strips_trailing_dot() {
		assert_eq!(normalize_domain("evil.com.").unwrap(), "evil.com");
	}

	#[test]
	fn domain_idna_encodes() {
		assert_eq!(normalize_domain("münchen.de").unwrap(), "xn--mnchen-3ya.de");
	}

	#[test]
	fn domain_rejects_empty() {
		assert!(normalize_domain("").is_err());
		assert!(normalize_domain("   ").is_err());
	}
}
