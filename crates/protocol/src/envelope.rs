//! Envelope framing shared by the page script and the extension process.
//!
//! Every message crossing the page/extension boundary is one of three
//! envelope shapes, discriminated by the `type` field:
//!
//! | `type` | Shape | Direction |
//! |---|---|---|
//! | [`REQUEST_TYPE`] | `{id, action, data}` | page → extension |
//! | [`RESPONSE_TYPE`] | `{id, success, data, error}` | extension → page |
//! | [`EVENT_TYPE`] | `{event, data}` | either way, unaddressed |
//!
//! A [`Request`] is answered by exactly one [`Response`] carrying the same
//! [`RequestId`]. [`Event`]s are fire-and-forget and may have any number of
//! listeners.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `type` value of request envelopes.
pub const REQUEST_TYPE: &str = "LITE_IMAGE_DOWNLOADER";
/// `type` value of response envelopes.
pub const RESPONSE_TYPE: &str = "LITE_IMAGE_DOWNLOADER_RESPONSE";
/// `type` value of event envelopes.
pub const EVENT_TYPE: &str = "LITE_IMAGE_DOWNLOADER_EVENT";

/// A framed message exchanged between page and extension contexts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Envelope {
	#[serde(rename = "LITE_IMAGE_DOWNLOADER")]
	Request(Request),
	#[serde(rename = "LITE_IMAGE_DOWNLOADER_RESPONSE")]
	Response(Response),
	#[serde(rename = "LITE_IMAGE_DOWNLOADER_EVENT")]
	Event(Event),
}

impl Envelope {
	/// Returns the correlation id for requests and responses.
	pub fn id(&self) -> Option<&RequestId> {
		match self {
			Envelope::Request(req) => Some(&req.id),
			Envelope::Response(resp) => Some(&resp.id),
			Envelope::Event(_) => None,
		}
	}

	/// Short label used in log fields.
	pub fn kind(&self) -> &'static str {
		match self {
			Envelope::Request(_) => "request",
			Envelope::Response(_) => "response",
			Envelope::Event(_) => "event",
		}
	}
}

impl From<Request> for Envelope {
	fn from(req: Request) -> Self {
		Envelope::Request(req)
	}
}

impl From<Response> for Envelope {
	fn from(resp: Response) -> Self {
		Envelope::Response(resp)
	}
}

impl From<Event> for Envelope {
	fn from(event: Event) -> Self {
		Envelope::Event(event)
	}
}

/// Correlation id of a request/response pair.
///
/// Ids are opaque strings; the facade generates them from a timestamp and a
/// random suffix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RequestId {
	fn from(id: &str) -> Self {
		Self(id.to_string())
	}
}

/// Operation requested by the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
	StartDownload,
	StopDownload,
	GetStatus,
	FetchLatestConfig,
	/// Any action string this build does not understand.
	#[serde(other)]
	Unknown,
}

impl Action {
	pub fn as_str(&self) -> &'static str {
		match self {
			Action::StartDownload => "startDownload",
			Action::StopDownload => "stopDownload",
			Action::GetStatus => "getStatus",
			Action::FetchLatestConfig => "fetchLatestConfig",
			Action::Unknown => "unknown",
		}
	}
}

impl fmt::Display for Action {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Request envelope body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
	pub id: RequestId,
	pub action: Action,
	#[serde(default)]
	pub data: Value,
}

impl Request {
	pub fn new(id: RequestId, action: Action, data: Value) -> Self {
		Self { id, action, data }
	}
}

/// Response envelope body.
///
/// `data` is present on success, `error` on failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
	pub id: RequestId,
	pub success: bool,
	#[serde(default, skip_serializing_if = "Value::is_null")]
	pub data: Value,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

impl Response {
	pub fn ok(id: RequestId, data: impl Into<Value>) -> Self {
		Self {
			id,
			success: true,
			data: data.into(),
			error: None,
		}
	}

	pub fn err(id: RequestId, error: impl Into<String>) -> Self {
		Self {
			id,
			success: false,
			data: Value::Null,
			error: Some(error.into()),
		}
	}

	/// Splits the response into its payload or its error message.
	pub fn into_result(self) -> Result<Value, String> {
		if self.success {
			Ok(self.data)
		} else {
			Err(self.error.unwrap_or_else(|| "Unknown error".to_string()))
		}
	}
}

/// Names of events the extension emits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
	DownloadStarted,
	DownloadProgress,
	DownloadCompleted,
	DownloadError,
	DownloadStopped,
	ConfigUpdated,
	FileUploaded,
	UploadError,
	/// Event name not known to this build; delivered to nobody.
	#[serde(other)]
	Other,
}

impl EventKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			EventKind::DownloadStarted => "downloadStarted",
			EventKind::DownloadProgress => "downloadProgress",
			EventKind::DownloadCompleted => "downloadCompleted",
			EventKind::DownloadError => "downloadError",
			EventKind::DownloadStopped => "downloadStopped",
			EventKind::ConfigUpdated => "configUpdated",
			EventKind::FileUploaded => "fileUploaded",
			EventKind::UploadError => "uploadError",
			EventKind::Other => "other",
		}
	}
}

impl fmt::Display for EventKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Event envelope body in its untyped wire form.
///
/// See [`DownloadEvent`](crate::DownloadEvent) for the typed payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	pub event: EventKind,
	#[serde(default)]
	pub data: Value,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn request_serializes_with_type_tag() {
		let env = Envelope::Request(Request::new(
			RequestId::from("lx3k9a0.4f"),
			Action::StartDownload,
			json!({"waitTimeMs": 10}),
		));
		let value = serde_json::to_value(&env).unwrap();
		assert_eq!(value["type"], REQUEST_TYPE);
		assert_eq!(value["id"], "lx3k9a0.4f");
		assert_eq!(value["action"], "startDownload");
		assert_eq!(value["data"]["waitTimeMs"], 10);
	}

	#[test]
	fn failure_response_omits_data() {
		let env = Envelope::Response(Response::err(RequestId::from("a"), "No active download"));
		let value = serde_json::to_value(&env).unwrap();
		assert_eq!(value["type"], RESPONSE_TYPE);
		assert_eq!(value["success"], false);
		assert_eq!(value["error"], "No active download");
		assert!(value.get("data").is_none());
	}

	#[test]
	fn response_without_data_parses() {
		let raw = json!({"type": RESPONSE_TYPE, "id": "b", "success": true});
		let env: Envelope = serde_json::from_value(raw).unwrap();
		match env {
			Envelope::Response(resp) => {
				assert!(resp.success);
				assert_eq!(resp.into_result().unwrap(), Value::Null);
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn unknown_action_decodes_as_unknown() {
		let raw = json!({"type": REQUEST_TYPE, "id": "c", "action": "reticulateSplines"});
		let env: Envelope = serde_json::from_value(raw).unwrap();
		match env {
			Envelope::Request(req) => {
				assert_eq!(req.action, Action::Unknown);
				assert_eq!(req.data, Value::Null);
			}
			other => panic!("expected request, got {other:?}"),
		}
	}

	#[test]
	fn unknown_event_decodes_as_other() {
		let raw = json!({"type": EVENT_TYPE, "event": "somethingElse", "data": {}});
		let env: Envelope = serde_json::from_value(raw).unwrap();
		assert_eq!(env.id(), None);
		match env {
			Envelope::Event(event) => assert_eq!(event.event, EventKind::Other),
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn failure_without_message_reports_unknown_error() {
		let resp = Response {
			id: RequestId::from("d"),
			success: false,
			data: Value::Null,
			error: None,
		};
		assert_eq!(resp.into_result().unwrap_err(), "Unknown error");
	}
}
