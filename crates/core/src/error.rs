//! Error types for the downloader core.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	#[error("Download function is disabled by configuration")]
	DownloadDisabled,

	#[error("No active download")]
	NoActiveSession,

	#[error("No tab information")]
	NoTabInfo,

	/// Resource content could not be retrieved through the inspection API.
	#[error("Failed to fetch {url}: {message}")]
	FetchFailed { url: String, message: String },

	/// The control plane was unreachable or rejected an upload.
	#[error("Upload failed: {0}")]
	UploadFailed(String),

	/// Malformed filter pattern; skipped, never fatal.
	#[error("Invalid pattern {pattern:?}: {message}")]
	InvalidPattern { pattern: String, message: String },

	#[error("Config sync failed: {0}")]
	ConfigSync(String),

	/// Inspection API command failed.
	#[error("{0}")]
	Inspector(String),

	#[error("Storage error: {0}")]
	Storage(String),

	#[error("Timeout: {0}")]
	Timeout(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),

	#[error(transparent)]
	Facade(#[from] lid_runtime::Error),

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
