//! In-process envelope endpoints.
//!
//! An [`Endpoint`] is one side of a bidirectional envelope channel. The page
//! facade, the relay, and the extension service each own endpoints; the
//! WebSocket adapters in [`crate::ws`] produce endpoints too, so every
//! component is transport-agnostic.

use lid_protocol::Envelope;
use tokio::sync::mpsc;

/// Sending half of an endpoint.
pub type EnvelopeTx = mpsc::UnboundedSender<Envelope>;
/// Receiving half of an endpoint.
pub type EnvelopeRx = mpsc::UnboundedReceiver<Envelope>;

/// One side of a bidirectional envelope channel.
#[derive(Debug)]
pub struct Endpoint {
	pub tx: EnvelopeTx,
	pub rx: EnvelopeRx,
}

impl Endpoint {
	/// Creates two connected endpoints: what one sends, the other receives.
	pub fn pair() -> (Endpoint, Endpoint) {
		let (a_tx, b_rx) = mpsc::unbounded_channel();
		let (b_tx, a_rx) = mpsc::unbounded_channel();
		(
			Endpoint { tx: a_tx, rx: a_rx },
			Endpoint { tx: b_tx, rx: b_rx },
		)
	}

	pub fn split(self) -> (EnvelopeTx, EnvelopeRx) {
		(self.tx, self.rx)
	}
}

#[cfg(test)]
mod tests {
	use lid_protocol::{Event, EventKind};
	use serde_json::Value;

	use super::*;

	#[tokio::test]
	async fn pair_is_crossed() {
		let (a, mut b) = Endpoint::pair();
		let event = Envelope::Event(Event {
			event: EventKind::DownloadStopped,
			data: Value::Null,
		});
		a.tx.send(event.clone()).unwrap();
		assert_eq!(b.rx.recv().await, Some(event));
	}
}
