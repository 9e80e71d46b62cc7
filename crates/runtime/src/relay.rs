//! Bridge relay between a page endpoint and an extension endpoint.
//!
//! The relay is pure store-and-forward: it never inspects payloads, only the
//! envelope kind, and never reorders. Requests travel page → extension,
//! responses travel extension → page, events may travel either way. Anything
//! else is dropped with a debug log.

use lid_protocol::Envelope;
use tokio::task::JoinHandle;

use crate::endpoint::{Endpoint, EnvelopeRx, EnvelopeTx};

/// Direction of a relay leg, used for filtering and log fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
	ToExtension,
	ToPage,
}

impl Direction {
	fn as_str(self) -> &'static str {
		match self {
			Direction::ToExtension => "to_extension",
			Direction::ToPage => "to_page",
		}
	}

	/// Whether `envelope` may travel in this direction.
	pub fn admits(self, envelope: &Envelope) -> bool {
		match (self, envelope) {
			(_, Envelope::Event(_)) => true,
			(Direction::ToExtension, Envelope::Request(_)) => true,
			(Direction::ToPage, Envelope::Response(_)) => true,
			_ => false,
		}
	}
}

/// Running relay; one forwarding task per direction.
#[derive(Debug)]
pub struct Relay {
	to_extension: JoinHandle<()>,
	to_page: JoinHandle<()>,
}

impl Relay {
	/// Starts forwarding between `page` and `extension`.
	pub fn spawn(page: Endpoint, extension: Endpoint) -> Self {
		let (page_tx, page_rx) = page.split();
		let (ext_tx, ext_rx) = extension.split();

		Self {
			to_extension: tokio::spawn(forward(page_rx, ext_tx, Direction::ToExtension)),
			to_page: tokio::spawn(forward(ext_rx, page_tx, Direction::ToPage)),
		}
	}

	/// Resolves once either side has closed, then stops the other leg.
	pub async fn closed(mut self) {
		tokio::select! {
			_ = &mut self.to_extension => self.to_page.abort(),
			_ = &mut self.to_page => self.to_extension.abort(),
		}
	}

	pub fn abort(&self) {
		self.to_extension.abort();
		self.to_page.abort();
	}
}

async fn forward(mut rx: EnvelopeRx, tx: EnvelopeTx, direction: Direction) {
	while let Some(envelope) = rx.recv().await {
		if !direction.admits(&envelope) {
			tracing::debug!(
				target = "lid",
				direction = direction.as_str(),
				kind = envelope.kind(),
				id = ?envelope.id(),
				"relay dropped envelope"
			);
			continue;
		}
		if tx.send(envelope).is_err() {
			break;
		}
	}
	tracing::debug!(target = "lid", direction = direction.as_str(), "relay leg closed");
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use lid_protocol::{Action, Event, EventKind, Request, RequestId, Response};
	use serde_json::Value;

	use super::*;

	fn request(id: &str) -> Envelope {
		Request::new(RequestId::from(id), Action::GetStatus, Value::Null).into()
	}

	fn event(kind: EventKind) -> Envelope {
		Event {
			event: kind,
			data: Value::Null,
		}
		.into()
	}

	#[tokio::test]
	async fn test_requests_reach_extension_in_order() {
		let (page_side, mut page) = Endpoint::pair();
		let (ext_side, mut ext) = Endpoint::pair();
		let _relay = Relay::spawn(page_side, ext_side);

		for id in ["a", "b", "c"] {
			page.tx.send(request(id)).unwrap();
		}
		for id in ["a", "b", "c"] {
			let got = ext.rx.recv().await.unwrap();
			assert_eq!(got.id(), Some(&RequestId::from(id)));
		}

		ext.tx.send(Response::ok(RequestId::from("a"), "ok").into()).unwrap();
		let got = page.rx.recv().await.unwrap();
		assert!(matches!(got, Envelope::Response(_)));
		drop(ext);
	}

	#[tokio::test]
	async fn test_wrong_direction_is_dropped() {
		let (page_side, mut page) = Endpoint::pair();
		let (ext_side, mut ext) = Endpoint::pair();
		let _relay = Relay::spawn(page_side, ext_side);

		// A response coming from the page and a request coming from the
		// extension are both discarded; the events behind them still pass.
		page.tx.send(Response::ok(RequestId::from("x"), "x").into()).unwrap();
		page.tx.send(event(EventKind::ConfigUpdated)).unwrap();
		ext.tx.send(request("y")).unwrap();
		ext.tx.send(event(EventKind::DownloadStarted)).unwrap();

		let to_ext = ext.rx.recv().await.unwrap();
		assert_eq!(to_ext, event(EventKind::ConfigUpdated));
		let to_page = page.rx.recv().await.unwrap();
		assert_eq!(to_page, event(EventKind::DownloadStarted));

		let nothing = tokio::time::timeout(Duration::from_millis(50), ext.rx.recv()).await;
		assert!(nothing.is_err());
	}

	#[tokio::test]
	async fn test_relay_stops_when_page_closes() {
		let (page_side, page) = Endpoint::pair();
		let (ext_side, mut ext) = Endpoint::pair();
		let relay = Relay::spawn(page_side, ext_side);

		drop(page);
		tokio::time::timeout(Duration::from_secs(1), relay.closed())
			.await
			.unwrap();
		assert!(ext.rx.recv().await.is_none());
	}
}
