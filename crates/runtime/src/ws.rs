//! WebSocket client adapter producing an [`Endpoint`].
//!
//! Envelopes travel as JSON text frames. Frames that do not parse as an
//! envelope are logged and skipped; the endpoint closes when the socket does.

use futures::{SinkExt, StreamExt};
use lid_protocol::Envelope;
use tokio_tungstenite::tungstenite::Message;

use crate::endpoint::Endpoint;
use crate::error::Result;

/// Connects to `url` and returns the local end of the envelope channel.
pub async fn connect(url: &str) -> Result<Endpoint> {
	let (stream, _) = tokio_tungstenite::connect_async(url).await?;
	tracing::debug!(target = "lid", url, "websocket connected");

	let (mut sink, mut source) = stream.split();
	let (local, remote) = Endpoint::pair();
	let (inbound_tx, mut outbound_rx) = remote.split();

	tokio::spawn(async move {
		while let Some(envelope) = outbound_rx.recv().await {
			let text = match serde_json::to_string(&envelope) {
				Ok(text) => text,
				Err(err) => {
					tracing::warn!(target = "lid", error = %err, "failed to encode envelope");
					continue;
				}
			};
			if sink.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
		let _ = sink.close().await;
	});

	tokio::spawn(async move {
		while let Some(frame) = source.next().await {
			match frame {
				Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(&text) {
					Ok(envelope) => {
						if inbound_tx.send(envelope).is_err() {
							break;
						}
					}
					Err(err) => {
						tracing::warn!(target = "lid", error = %err, "dropping malformed frame");
					}
				},
				Ok(Message::Close(_)) => break,
				Ok(_) => {}
				Err(err) => {
					tracing::debug!(target = "lid", error = %err, "websocket read failed");
					break;
				}
			}
		}
	});

	Ok(local)
}
