//! Seams between the collector and the browser it runs against.
//!
//! The native host implements these over the extension link; tests use
//! in-memory fakes.

use std::sync::Arc;

use async_trait::async_trait;
use lid_protocol::inspect::{PROTOCOL_VERSION, methods};
use lid_protocol::{
	ConfigPatch, Debuggee, DownloadEvent, ResourceContent, ResourceTree, TabId,
};
use serde_json::{Value, json};

use crate::error::Result;

/// Browser inspection (debugger) API.
///
/// Only [`attach`](Inspector::attach), [`detach`](Inspector::detach) and
/// [`send`](Inspector::send) are required; the typed helpers are built on
/// `send`.
#[async_trait]
pub trait Inspector: Send + Sync {
	async fn attach(&self, target: &Debuggee, version: &str) -> Result<()>;

	async fn detach(&self, target: &Debuggee) -> Result<()>;

	async fn send(&self, target: &Debuggee, method: &str, params: Value) -> Result<Value>;

	/// Attaches with the protocol version the collector speaks.
	async fn attach_default(&self, target: &Debuggee) -> Result<()> {
		self.attach(target, PROTOCOL_VERSION).await
	}

	/// Auto-attaches child targets as flattened sessions.
	async fn set_auto_attach(&self, target: &Debuggee) -> Result<()> {
		self.send(
			target,
			methods::TARGET_SET_AUTO_ATTACH,
			json!({"autoAttach": true, "waitForDebuggerOnStart": false, "flatten": true}),
		)
		.await
		.map(drop)
	}

	async fn enable_page(&self, target: &Debuggee) -> Result<()> {
		self.send(target, methods::PAGE_ENABLE, json!({}))
			.await
			.map(drop)
	}

	async fn resource_tree(&self, target: &Debuggee) -> Result<ResourceTree> {
		let value = self
			.send(target, methods::PAGE_GET_RESOURCE_TREE, json!({}))
			.await?;
		Ok(serde_json::from_value(value)?)
	}

	async fn resource_content(
		&self,
		target: &Debuggee,
		frame_id: &str,
		url: &str,
	) -> Result<ResourceContent> {
		let value = self
			.send(
				target,
				methods::PAGE_GET_RESOURCE_CONTENT,
				json!({"frameId": frame_id, "url": url}),
			)
			.await?;
		Ok(serde_json::from_value(value)?)
	}
}

/// A resource body ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct FilePayload {
	/// Sanitized `name.ext`, without any directory.
	pub filename: String,
	pub mime_type: String,
	/// Original resource URL.
	pub url: String,
	pub content: ResourceContent,
}

/// Local saves (the browser's downloads API, or a directory).
#[async_trait]
pub trait Downloads: Send + Sync {
	/// Saves `file` under `filename`, relative to the downloads root. With
	/// `None` the store picks the name itself.
	async fn save(&self, filename: Option<&str>, file: &FilePayload) -> Result<()>;
}

/// Remote collector (`POST /upload` on the control plane).
#[async_trait]
pub trait Uploader: Send + Sync {
	async fn upload(&self, port: u16, file: &FilePayload) -> Result<()>;
}

/// Source of control-plane configuration (`GET /config`).
#[async_trait]
pub trait ConfigSource: Send + Sync {
	async fn fetch(&self, port: u16) -> Result<ConfigPatch>;
}

/// Delivers events to the page of a tab. Fire-and-forget.
pub trait EventSink: Send + Sync {
	fn emit(&self, tab: TabId, event: DownloadEvent);
}

/// Toolbar badge contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Badge {
	pub text: String,
	pub title: Option<String>,
	pub color: Option<String>,
}

impl Badge {
	pub fn text(text: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			..Self::default()
		}
	}

	/// Red badge with a tooltip, used for errors and the disabled policy.
	pub fn alert(text: impl Into<String>, title: impl Into<String>) -> Self {
		Self {
			text: text.into(),
			title: Some(title.into()),
			color: Some("red".into()),
		}
	}

	pub fn clear() -> Self {
		Self::default()
	}
}

/// Toolbar indicator. Fire-and-forget.
pub trait Indicator: Send + Sync {
	fn badge(&self, tab: TabId, badge: Badge);
}

/// Every seam the collector and the service depend on.
#[derive(Clone)]
pub struct Platform {
	pub inspector: Arc<dyn Inspector>,
	pub downloads: Arc<dyn Downloads>,
	pub uploader: Arc<dyn Uploader>,
	pub config_source: Arc<dyn ConfigSource>,
	pub events: Arc<dyn EventSink>,
	pub indicator: Arc<dyn Indicator>,
}

impl std::fmt::Debug for Platform {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Platform").finish_non_exhaustive()
	}
}
