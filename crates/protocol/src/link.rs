//! Messages on the WebSocket between the extension background worker and the
//! native host.
//!
//! The background worker owns every privileged browser API but no logic. It
//! forwards what the browser tells it as [`ExtensionMessage`]s and executes
//! [`BrowserCommand`]s the host sends, replying with
//! [`ExtensionMessage::CommandResult`] carrying the command id.
//!
//! # Wire format
//!
//! Both directions are adjacently tagged:
//!
//! ```json
//! {"method": "pageRequest", "params": {"tabId": 7, "request": {...}}}
//! {"method": "command", "params": {"id": 3, "command": {"kind": "attach", ...}}}
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::envelope::{Event, Request, Response};
use crate::inspect::{Debuggee, TabId};

/// Port the native host listens on by default.
pub const DEFAULT_HOST_PORT: u16 = 19988;
/// Route the background worker connects to.
pub const EXTENSION_PATH: &str = "/extension";
/// Route prefix for page clients, followed by `/{tab_id}`.
pub const PAGE_PATH: &str = "/page";

/// Extension → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "method",
	content = "params",
	rename_all = "camelCase",
	rename_all_fields = "camelCase"
)]
pub enum ExtensionMessage {
	/// Request envelope posted by a content script. `tab_id` is the sender
	/// tab, absent for messages without tab context.
	PageRequest {
		#[serde(default)]
		tab_id: Option<TabId>,
		request: Request,
	},
	/// Event raised by an attached debugger session.
	DebuggerEvent {
		source: Debuggee,
		method: String,
		#[serde(default)]
		params: Value,
	},
	/// The browser detached the debugger from a tab.
	DebuggerDetached {
		tab_id: TabId,
		#[serde(default)]
		reason: Option<String>,
	},
	/// Toolbar icon clicked.
	ActionClicked { tab_id: TabId },
	/// Reply to [`HostMessage::Command`].
	CommandResult {
		id: u64,
		#[serde(default)]
		result: Value,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<String>,
	},
}

/// Host → extension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
	tag = "method",
	content = "params",
	rename_all = "camelCase",
	rename_all_fields = "camelCase"
)]
pub enum HostMessage {
	/// Answer to a [`ExtensionMessage::PageRequest`], matched by envelope id.
	PageResponse {
		#[serde(default)]
		tab_id: Option<TabId>,
		response: Response,
	},
	/// Event to deliver to the content script of `tab_id`.
	PageEvent { tab_id: TabId, event: Event },
	/// Privileged API call; answered by a `CommandResult` with the same id.
	Command { id: u64, command: BrowserCommand },
}

/// Privileged browser API call executed by the background worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum BrowserCommand {
	/// `chrome.debugger.attach`
	Attach { target: Debuggee, version: String },
	/// `chrome.debugger.detach`
	Detach { target: Debuggee },
	/// `chrome.debugger.sendCommand`
	Send {
		target: Debuggee,
		method: String,
		#[serde(default)]
		params: Value,
	},
	/// `chrome.downloads.download`
	Download {
		url: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		filename: Option<String>,
		conflict_action: String,
	},
	/// `chrome.action.setBadgeText` (+ title and color when given).
	Badge {
		tab_id: TabId,
		text: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		title: Option<String>,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		color: Option<String>,
	},
}

impl BrowserCommand {
	/// Short label used in log fields.
	pub fn name(&self) -> &'static str {
		match self {
			BrowserCommand::Attach { .. } => "attach",
			BrowserCommand::Detach { .. } => "detach",
			BrowserCommand::Send { .. } => "send",
			BrowserCommand::Download { .. } => "download",
			BrowserCommand::Badge { .. } => "badge",
		}
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;
	use crate::envelope::{Action, RequestId};

	#[test]
	fn page_request_wire_shape() {
		let msg = ExtensionMessage::PageRequest {
			tab_id: Some(7),
			request: Request::new(RequestId::from("r1"), Action::GetStatus, Value::Null),
		};
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(value["method"], "pageRequest");
		assert_eq!(value["params"]["tabId"], 7);
		assert_eq!(value["params"]["request"]["action"], "getStatus");
	}

	#[test]
	fn command_is_tagged_by_kind() {
		let msg = HostMessage::Command {
			id: 3,
			command: BrowserCommand::Send {
				target: Debuggee::tab(7),
				method: "Page.enable".into(),
				params: json!({}),
			},
		};
		let value = serde_json::to_value(&msg).unwrap();
		assert_eq!(value["method"], "command");
		assert_eq!(value["params"]["id"], 3);
		assert_eq!(value["params"]["command"]["kind"], "send");
		assert_eq!(value["params"]["command"]["target"]["tabId"], 7);
	}

	#[test]
	fn command_result_without_error_parses() {
		let raw = json!({"method": "commandResult", "params": {"id": 9, "result": {"ok": true}}});
		let msg: ExtensionMessage = serde_json::from_value(raw).unwrap();
		assert_eq!(
			msg,
			ExtensionMessage::CommandResult {
				id: 9,
				result: json!({"ok": true}),
				error: None,
			}
		);
	}

	#[test]
	fn download_command_uses_camel_case_fields() {
		let cmd = BrowserCommand::Download {
			url: "data:image/png;base64,AA==".into(),
			filename: Some("out/a.png".into()),
			conflict_action: "uniquify".into(),
		};
		let value = serde_json::to_value(&cmd).unwrap();
		assert_eq!(value["conflictAction"], "uniquify");
		assert_eq!(value["filename"], "out/a.png");
	}
}
