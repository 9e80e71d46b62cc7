//! Event delivery to page endpoints.

use std::sync::Arc;

use dashmap::DashMap;
use lid_protocol::{DownloadEvent, Envelope, Event, TabId};
use lid_runtime::EnvelopeTx;

use crate::platform::EventSink;

/// Page endpoints by tab. Closed endpoints are pruned on the next emit.
#[derive(Debug, Clone, Default)]
pub struct PageChannels {
	pages: Arc<DashMap<TabId, Vec<EnvelopeTx>>>,
}

impl PageChannels {
	pub fn register(&self, tab: TabId, tx: EnvelopeTx) {
		self.pages.entry(tab).or_default().push(tx);
	}

	/// Number of live page endpoints for `tab`.
	pub fn count(&self, tab: TabId) -> usize {
		self.pages
			.get(&tab)
			.map_or(0, |txs| txs.iter().filter(|tx| !tx.is_closed()).count())
	}
}

impl EventSink for PageChannels {
	fn emit(&self, tab: TabId, event: DownloadEvent) {
		let Some(mut txs) = self.pages.get_mut(&tab) else {
			return;
		};
		let event: Event = event.into();
		txs.retain(|tx| tx.send(Envelope::Event(event.clone())).is_ok());
		let empty = txs.is_empty();
		drop(txs);
		if empty {
			self.pages.remove_if(&tab, |_, txs| txs.is_empty());
		}
	}
}

#[cfg(test)]
mod tests {
	use lid_protocol::EventKind;
	use lid_runtime::Endpoint;

	use super::*;

	#[tokio::test]
	async fn events_reach_registered_pages_only() {
		let channels = PageChannels::default();
		let (near, mut far) = Endpoint::pair();
		channels.register(7, near.tx);

		channels.emit(7, DownloadEvent::DownloadStopped {});
		channels.emit(8, DownloadEvent::DownloadStopped {});

		match far.rx.recv().await {
			Some(Envelope::Event(event)) => assert_eq!(event.event, EventKind::DownloadStopped),
			other => panic!("unexpected {other:?}"),
		}
		assert!(far.rx.try_recv().is_err());
	}

	#[test]
	fn closed_pages_are_pruned() {
		let channels = PageChannels::default();
		let (near, far) = Endpoint::pair();
		channels.register(1, near.tx);
		drop(far);

		channels.emit(1, DownloadEvent::DownloadStopped {});
		assert_eq!(channels.count(1), 0);
	}
}
