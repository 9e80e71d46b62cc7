//! Browser seams implemented over the extension link.

use async_trait::async_trait;
use lid::{Badge, Downloads, EventSink, FilePayload, Indicator, Inspector, PageChannels};
use lid_protocol::{BrowserCommand, Debuggee, DownloadEvent, HostMessage, TabId};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::link::ExtensionLink;

/// Conflict policy handed to the downloads API.
const CONFLICT_ACTION: &str = "uniquify";

/// Inspection, downloads and badge calls forwarded to the extension.
#[derive(Clone)]
pub struct LinkBrowser {
	link: ExtensionLink,
	badges: mpsc::UnboundedSender<(TabId, Badge)>,
}

impl LinkBrowser {
	/// Must be called within a Tokio runtime: badge updates are applied by
	/// one background task, in the order they were issued.
	pub fn new(link: ExtensionLink) -> Self {
		let (badges, rx) = mpsc::unbounded_channel();
		tokio::spawn(apply_badges(link.clone(), rx));
		Self { link, badges }
	}
}

async fn apply_badges(link: ExtensionLink, mut rx: mpsc::UnboundedReceiver<(TabId, Badge)>) {
	while let Some((tab, badge)) = rx.recv().await {
		let command = BrowserCommand::Badge {
			tab_id: tab,
			text: badge.text,
			title: badge.title,
			color: badge.color,
		};
		if let Err(err) = link.command(command).await {
			tracing::debug!(target = "lid", tab, error = %err, "badge update failed");
		}
	}
}

#[async_trait]
impl Inspector for LinkBrowser {
	async fn attach(&self, target: &Debuggee, version: &str) -> lid::Result<()> {
		self.link
			.command(BrowserCommand::Attach {
				target: target.clone(),
				version: version.to_string(),
			})
			.await?;
		Ok(())
	}

	async fn detach(&self, target: &Debuggee) -> lid::Result<()> {
		self.link
			.command(BrowserCommand::Detach {
				target: target.clone(),
			})
			.await?;
		Ok(())
	}

	async fn send(&self, target: &Debuggee, method: &str, params: Value) -> lid::Result<Value> {
		Ok(self
			.link
			.command(BrowserCommand::Send {
				target: target.clone(),
				method: method.to_string(),
				params,
			})
			.await?)
	}
}

#[async_trait]
impl Downloads for LinkBrowser {
	async fn save(&self, filename: Option<&str>, file: &FilePayload) -> lid::Result<()> {
		self.link
			.command(BrowserCommand::Download {
				url: file.content.data_url(&file.mime_type),
				filename: filename.map(str::to_string),
				conflict_action: CONFLICT_ACTION.into(),
			})
			.await?;
		Ok(())
	}
}

impl Indicator for LinkBrowser {
	fn badge(&self, tab: TabId, badge: Badge) {
		let _ = self.badges.send((tab, badge));
	}
}

/// Delivers events to the tab's content script and to WebSocket page clients.
#[derive(Clone)]
pub struct TabEvents {
	link: ExtensionLink,
	pages: PageChannels,
}

impl TabEvents {
	pub fn new(link: ExtensionLink, pages: PageChannels) -> Self {
		Self { link, pages }
	}
}

impl EventSink for TabEvents {
	fn emit(&self, tab: TabId, event: DownloadEvent) {
		if self.link.is_connected() {
			let message = HostMessage::PageEvent {
				tab_id: tab,
				event: event.clone().into(),
			};
			if let Err(err) = self.link.send(message) {
				tracing::debug!(target = "lid", tab, error = %err, "event not delivered to extension");
			}
		}
		self.pages.emit(tab, event);
	}
}

#[cfg(test)]
mod tests {
	use lid_protocol::{EventKind, ResourceContent};
	use serde_json::json;

	use super::*;

	#[tokio::test]
	async fn local_save_sends_data_url() {
		let link = ExtensionLink::default();
		let (_, mut outbound) = link.connect();
		let browser = LinkBrowser::new(link.clone());

		let file = FilePayload {
			filename: "a.png".into(),
			mime_type: "image/png".into(),
			url: "https://x.test/a.png".into(),
			content: ResourceContent {
				content: "aW1n".into(),
				base64_encoded: true,
			},
		};
		let save = tokio::spawn(async move { browser.save(Some("shots/a.png"), &file).await });

		let Some(HostMessage::Command { id, command }) = outbound.recv().await else {
			panic!("expected a command");
		};
		assert_eq!(
			command,
			BrowserCommand::Download {
				url: "data:image/png;base64,aW1n".into(),
				filename: Some("shots/a.png".into()),
				conflict_action: "uniquify".into(),
			}
		);
		link.resolve(id, json!(42), None);
		save.await.unwrap().unwrap();
	}

	#[tokio::test]
	async fn badge_updates_apply_in_order() {
		let link = ExtensionLink::default();
		let (_, mut outbound) = link.connect();
		let browser = LinkBrowser::new(link.clone());

		browser.badge(3, Badge::text("33%"));
		browser.badge(3, Badge::clear());

		let mut texts = Vec::new();
		for _ in 0..2 {
			let Some(HostMessage::Command { id, command }) = outbound.recv().await else {
				panic!("expected a command");
			};
			let BrowserCommand::Badge { text, .. } = command else {
				panic!("expected a badge command");
			};
			texts.push(text);
			link.resolve(id, Value::Null, None);
		}
		assert_eq!(texts, ["33%", ""]);
	}

	#[tokio::test]
	async fn events_reach_extension_and_pages() {
		let link = ExtensionLink::default();
		let (_, mut outbound) = link.connect();
		let pages = PageChannels::default();
		let (near, mut far) = lid_runtime::Endpoint::pair();
		pages.register(3, near.tx);

		TabEvents::new(link, pages).emit(3, DownloadEvent::DownloadStopped {});

		match outbound.recv().await {
			Some(HostMessage::PageEvent { tab_id, event }) => {
				assert_eq!(tab_id, 3);
				assert_eq!(event.event, EventKind::DownloadStopped);
			}
			other => panic!("unexpected {other:?}"),
		}
		assert!(far.rx.recv().await.is_some());
	}
}
