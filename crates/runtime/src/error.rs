//! Error types for the envelope runtime.

use std::time::Duration;

use lid_protocol::Action;
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced to callers of the facade and the transports.
#[derive(Debug, Error)]
pub enum Error {
	/// No response arrived before the deadline; the pending call was dropped.
	#[error("Timeout after {}ms waiting for {what}", timeout.as_millis())]
	Timeout { what: String, timeout: Duration },

	/// The cached policy flag forbids starting a download.
	#[error("Download function is disabled by configuration")]
	DownloadDisabled,

	/// The extension answered with `success: false`.
	#[error("{action} rejected: {message}")]
	Rejected { action: Action, message: String },

	/// The peer endpoint went away.
	#[error("Channel closed unexpectedly")]
	ChannelClosed,

	/// WebSocket or framing failure.
	#[error("Transport error: {0}")]
	Transport(String),

	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl Error {
	pub(crate) fn timeout(what: impl Into<String>, timeout: Duration) -> Self {
		Error::Timeout {
			what: what.into(),
			timeout,
		}
	}

	/// Returns `true` for [`Error::Timeout`].
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
	fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
		Error::Transport(err.to_string())
	}
}
