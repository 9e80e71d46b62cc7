//! Inspection (debugger) API shapes used to enumerate and fetch page resources.
//!
//! These mirror the subset of the Chrome DevTools Protocol `Page` and
//! `Target` domains the collector relies on.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

/// Browser tab identifier.
pub type TabId = i32;

/// Debugger protocol version requested on attach.
pub const PROTOCOL_VERSION: &str = "1.3";

/// Method names sent through the inspection API.
pub mod methods {
	pub const PAGE_ENABLE: &str = "Page.enable";
	pub const PAGE_GET_RESOURCE_TREE: &str = "Page.getResourceTree";
	pub const PAGE_GET_RESOURCE_CONTENT: &str = "Page.getResourceContent";
	pub const TARGET_SET_AUTO_ATTACH: &str = "Target.setAutoAttach";
	pub const TARGET_ATTACHED_TO_TARGET: &str = "Target.attachedToTarget";
}

/// An inspection target: a tab, or a child session flattened into it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Debuggee {
	pub tab_id: TabId,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

impl Debuggee {
	pub fn tab(tab_id: TabId) -> Self {
		Self {
			tab_id,
			session_id: None,
		}
	}

	pub fn child(tab_id: TabId, session_id: impl Into<String>) -> Self {
		Self {
			tab_id,
			session_id: Some(session_id.into()),
		}
	}
}

/// Result of `Page.getResourceTree`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceTree {
	pub frame_tree: FrameTree,
}

/// A frame with its resources and child frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameTree {
	pub frame: Frame,
	#[serde(default)]
	pub resources: Vec<FrameResource>,
	#[serde(default)]
	pub child_frames: Vec<FrameTree>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Frame {
	pub id: String,
	#[serde(default)]
	pub url: String,
}

/// A resource as reported by the inspection API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameResource {
	pub url: String,
	/// Resource category, e.g. `"Image"`, `"Script"`, `"Stylesheet"`.
	#[serde(rename = "type")]
	pub resource_type: String,
	#[serde(default)]
	pub mime_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub content_size: Option<f64>,
}

/// Result of `Page.getResourceContent`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceContent {
	pub content: String,
	#[serde(default)]
	pub base64_encoded: bool,
}

impl ResourceContent {
	/// Raw bytes of the resource body.
	pub fn bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
		if self.base64_encoded {
			BASE64.decode(self.content.as_bytes())
		} else {
			Ok(self.content.as_bytes().to_vec())
		}
	}

	/// The body as a `data:` URL, suitable for the downloads API.
	pub fn data_url(&self, mime_type: &str) -> String {
		let marker = if self.base64_encoded { ";base64" } else { "" };
		format!("data:{mime_type}{marker},{}", self.content)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn resource_tree_parses_cdp_shape() {
		let tree: ResourceTree = serde_json::from_value(json!({
			"frameTree": {
				"frame": {"id": "F1", "url": "https://example.com/", "loaderId": "L"},
				"resources": [
					{"url": "https://example.com/a.png", "type": "Image", "mimeType": "image/png", "contentSize": 1234}
				],
				"childFrames": [
					{"frame": {"id": "F2", "url": "https://example.com/inner"}, "resources": []}
				]
			}
		}))
		.unwrap();

		let root = tree.frame_tree;
		assert_eq!(root.frame.id, "F1");
		assert_eq!(root.resources[0].resource_type, "Image");
		assert_eq!(root.resources[0].content_size, Some(1234.0));
		assert_eq!(root.child_frames[0].frame.id, "F2");
		assert!(root.child_frames[0].child_frames.is_empty());
	}

	#[test]
	fn base64_content_decodes() {
		let content = ResourceContent {
			content: "aGVsbG8=".into(),
			base64_encoded: true,
		};
		assert_eq!(content.bytes().unwrap(), b"hello");
		assert_eq!(content.data_url("image/png"), "data:image/png;base64,aGVsbG8=");
	}

	#[test]
	fn text_content_is_passed_through() {
		let content = ResourceContent {
			content: "<svg/>".into(),
			base64_encoded: false,
		};
		assert_eq!(content.bytes().unwrap(), b"<svg/>");
		assert_eq!(content.data_url("image/svg+xml"), "data:image/svg+xml,<svg/>");
	}

	#[test]
	fn child_debuggee_serializes_session() {
		let value = serde_json::to_value(Debuggee::child(7, "S1")).unwrap();
		assert_eq!(value, json!({"tabId": 7, "sessionId": "S1"}));
		let value = serde_json::to_value(Debuggee::tab(7)).unwrap();
		assert_eq!(value, json!({"tabId": 7}));
	}
}
