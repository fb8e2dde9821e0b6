use thiserror::Error;

/// Errors surfaced by the index and its persistence layer.
///
/// Query operations never construct these for user input; they resolve to
/// `false`/`None` instead. Mutating operations surface `Storage` after the
/// in-memory state has been rolled back to its pre-call shape.
#[derive(Debug, Error)]
pub enum IndexError {
	/// The value could not be classified as a domain, URL, or IP address.
	#[error("invalid input: {0}")]
	InvalidInput(String),

	/// A durable commit, query, or open failed.
	#[error("storage failure: {0}")]
	Storage(#[from] sqlx::Error),

	/// A CIDR string failed to parse.
	#[error("invalid CIDR notation: {0}")]
	CidrParse(String),

	/// A full reload failed mid-stream; in-memory state is left empty.
	#[error("reload failed: {0}")]
	Reload(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
