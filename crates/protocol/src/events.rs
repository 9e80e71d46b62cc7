//! Typed payloads of the events the extension emits.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Config;
use crate::envelope::{Event, EventKind};

/// Lifecycle event of a download run, in typed form.
///
/// Serializes adjacently tagged as `{"event": ..., "data": ...}`, the same
/// shape as the untyped [`Event`] body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum DownloadEvent {
	/// A collect pass finished; `total` counts every entry discovered so far.
	DownloadStarted { total: usize },
	/// One entry is about to be processed. `progress` is a rounded percentage.
	DownloadProgress {
		current: usize,
		total: usize,
		progress: u32,
		url: String,
	},
	DownloadCompleted { total: usize, downloaded: usize },
	DownloadError {
		#[serde(default, skip_serializing_if = "Option::is_none")]
		url: Option<String>,
		error: String,
	},
	DownloadStopped {},
	ConfigUpdated(Config),
	FileUploaded { filename: String, url: String },
	UploadError {
		filename: String,
		url: String,
		error: String,
	},
}

impl DownloadEvent {
	pub fn kind(&self) -> EventKind {
		match self {
			DownloadEvent::DownloadStarted { .. } => EventKind::DownloadStarted,
			DownloadEvent::DownloadProgress { .. } => EventKind::DownloadProgress,
			DownloadEvent::DownloadCompleted { .. } => EventKind::DownloadCompleted,
			DownloadEvent::DownloadError { .. } => EventKind::DownloadError,
			DownloadEvent::DownloadStopped {} => EventKind::DownloadStopped,
			DownloadEvent::ConfigUpdated(_) => EventKind::ConfigUpdated,
			DownloadEvent::FileUploaded { .. } => EventKind::FileUploaded,
			DownloadEvent::UploadError { .. } => EventKind::UploadError,
		}
	}

	/// Shorthand for an error event not tied to a resource.
	pub fn error(message: impl Into<String>) -> Self {
		DownloadEvent::DownloadError {
			url: None,
			error: message.into(),
		}
	}
}

impl From<DownloadEvent> for Event {
	fn from(event: DownloadEvent) -> Self {
		let kind = event.kind();
		let data = serde_json::to_value(&event)
			.ok()
			.and_then(|mut v| v.get_mut("data").map(Value::take))
			.unwrap_or(Value::Null);
		Event { event: kind, data }
	}
}

impl TryFrom<&Event> for DownloadEvent {
	type Error = serde_json::Error;

	fn try_from(event: &Event) -> Result<Self, Self::Error> {
		serde_json::from_value(json!({"event": event.event, "data": event.data}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn progress_event_has_wire_shape() {
		let event: Event = DownloadEvent::DownloadProgress {
			current: 2,
			total: 3,
			progress: 67,
			url: "https://x/a.png".into(),
		}
		.into();

		assert_eq!(event.event, EventKind::DownloadProgress);
		assert_eq!(
			event.data,
			json!({"current": 2, "total": 3, "progress": 67, "url": "https://x/a.png"})
		);
	}

	#[test]
	fn stopped_event_carries_empty_object() {
		let event: Event = DownloadEvent::DownloadStopped {}.into();
		assert_eq!(event.data, json!({}));
	}

	#[test]
	fn error_without_url_omits_field() {
		let event: Event = DownloadEvent::error("boom").into();
		assert_eq!(event.data, json!({"error": "boom"}));
	}

	#[test]
	fn untyped_event_converts_back() {
		let event = Event {
			event: EventKind::DownloadCompleted,
			data: json!({"total": 3, "downloaded": 3}),
		};
		let typed = DownloadEvent::try_from(&event).unwrap();
		assert_eq!(
			typed,
			DownloadEvent::DownloadCompleted {
				total: 3,
				downloaded: 3
			}
		);
	}

	#[test]
	fn config_updated_embeds_config() {
		let event: Event = DownloadEvent::ConfigUpdated(Config::default()).into();
		assert_eq!(event.data["serverPort"], 8080);
	}
}
