//! Command channel to the extension background worker.
//!
//! The worker connects once over `/extension`; every privileged browser call
//! is a [`HostMessage::Command`] with a fresh id, answered by an
//! [`ExtensionMessage::CommandResult`](lid_protocol::ExtensionMessage) with the
//! same id. A new connection replaces the old one and fails whatever was
//! still pending on it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lid_protocol::{BrowserCommand, HostMessage};
use parking_lot::Mutex;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Deadline for one browser command.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum LinkError {
	#[error("Extension not connected")]
	NotConnected,

	#[error("Extension connection closed")]
	Closed,

	#[error("Timeout after {}ms waiting for {command}", timeout.as_millis())]
	Timeout {
		command: &'static str,
		timeout: Duration,
	},

	/// The browser API reported an error; the message is passed through.
	#[error("{0}")]
	Browser(String),
}

impl From<LinkError> for lid::Error {
	fn from(err: LinkError) -> Self {
		lid::Error::Inspector(err.to_string())
	}
}

type Reply = std::result::Result<Value, LinkError>;

#[derive(Default)]
struct LinkState {
	tx: Option<mpsc::UnboundedSender<HostMessage>>,
	generation: u64,
	pending: HashMap<u64, oneshot::Sender<Reply>>,
	next_id: u64,
}

impl LinkState {
	fn fail_pending(&mut self) {
		for (_, pending) in self.pending.drain() {
			let _ = pending.send(Err(LinkError::Closed));
		}
	}
}

/// Shared handle on the current extension connection.
#[derive(Clone)]
pub struct ExtensionLink {
	state: Arc<Mutex<LinkState>>,
	timeout: Duration,
}

impl Default for ExtensionLink {
	fn default() -> Self {
		Self::with_timeout(COMMAND_TIMEOUT)
	}
}

impl ExtensionLink {
	pub fn with_timeout(timeout: Duration) -> Self {
		Self {
			state: Arc::default(),
			timeout,
		}
	}

	/// Installs a new connection and returns its generation and outbound
	/// queue. The previous connection, if any, is dropped.
	pub fn connect(&self) -> (u64, mpsc::UnboundedReceiver<HostMessage>) {
		let (tx, rx) = mpsc::unbounded_channel();
		let mut state = self.state.lock();
		if state.tx.is_some() {
			tracing::warn!(target = "lid", "replacing existing extension connection");
			state.fail_pending();
		}
		state.tx = Some(tx);
		state.generation += 1;
		(state.generation, rx)
	}

	/// Drops the connection of `generation` unless it was already replaced.
	pub fn disconnect(&self, generation: u64) {
		let mut state = self.state.lock();
		if state.generation != generation {
			return;
		}
		state.tx = None;
		state.fail_pending();
	}

	pub fn is_connected(&self) -> bool {
		self.state.lock().tx.is_some()
	}

	/// Queues a message that expects no reply.
	pub fn send(&self, message: HostMessage) -> Result<(), LinkError> {
		let state = self.state.lock();
		let tx = state.tx.as_ref().ok_or(LinkError::NotConnected)?;
		tx.send(message).map_err(|_| LinkError::Closed)
	}

	/// Runs `command` in the browser and waits for its result.
	pub async fn command(&self, command: BrowserCommand) -> Result<Value, LinkError> {
		let name = command.name();
		let (reply_tx, reply_rx) = oneshot::channel();
		let id = {
			let mut state = self.state.lock();
			let Some(tx) = state.tx.clone() else {
				return Err(LinkError::NotConnected);
			};
			state.next_id += 1;
			let id = state.next_id;
			state.pending.insert(id, reply_tx);
			if tx.send(HostMessage::Command { id, command }).is_err() {
				state.pending.remove(&id);
				return Err(LinkError::Closed);
			}
			id
		};
		let _guard = PendingGuard {
			id,
			state: Arc::clone(&self.state),
		};

		tracing::trace!(target = "lid", id, command = name, "browser command");
		match tokio::time::timeout(self.timeout, reply_rx).await {
			Ok(Ok(reply)) => reply,
			Ok(Err(_)) => Err(LinkError::Closed),
			Err(_) => Err(LinkError::Timeout {
				command: name,
				timeout: self.timeout,
			}),
		}
	}

	/// Completes the pending command `id`.
	pub fn resolve(&self, id: u64, result: Value, error: Option<String>) {
		let pending = self.state.lock().pending.remove(&id);
		let Some(pending) = pending else {
			tracing::warn!(target = "lid", id, "result for unknown command id");
			return;
		};
		let reply = match error {
			Some(message) => Err(LinkError::Browser(message)),
			None => Ok(result),
		};
		let _ = pending.send(reply);
	}

	#[cfg(test)]
	fn pending_len(&self) -> usize {
		self.state.lock().pending.len()
	}
}

/// Removes a pending command when its caller gives up.
struct PendingGuard {
	id: u64,
	state: Arc<Mutex<LinkState>>,
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		self.state.lock().pending.remove(&self.id);
	}
}

#[cfg(test)]
mod tests {
	use lid_protocol::Debuggee;
	use serde_json::json;

	use super::*;

	fn detach() -> BrowserCommand {
		BrowserCommand::Detach {
			target: Debuggee::tab(1),
		}
	}

	#[tokio::test]
	async fn command_resolves_by_id() {
		let link = ExtensionLink::default();
		let (_, mut outbound) = link.connect();

		let caller = tokio::spawn({
			let link = link.clone();
			async move { link.command(detach()).await }
		});

		let id = match outbound.recv().await {
			Some(HostMessage::Command { id, command }) => {
				assert_eq!(command, detach());
				id
			}
			other => panic!("unexpected {other:?}"),
		};
		link.resolve(id, json!({"ok": true}), None);

		assert_eq!(caller.await.unwrap().unwrap(), json!({"ok": true}));
		assert_eq!(link.pending_len(), 0);
	}

	#[tokio::test]
	async fn browser_errors_pass_through() {
		let link = ExtensionLink::default();
		let (_, mut outbound) = link.connect();

		let caller = tokio::spawn({
			let link = link.clone();
			async move { link.command(detach()).await }
		});
		let Some(HostMessage::Command { id, .. }) = outbound.recv().await else {
			panic!("expected a command");
		};
		link.resolve(id, Value::Null, Some("Debugger is not attached".into()));

		let err = caller.await.unwrap().unwrap_err();
		assert_eq!(err.to_string(), "Debugger is not attached");
	}

	#[tokio::test]
	async fn timeout_clears_pending() {
		let link = ExtensionLink::with_timeout(Duration::from_millis(20));
		let (_, _outbound) = link.connect();

		let err = link.command(detach()).await.unwrap_err();
		assert!(matches!(err, LinkError::Timeout { command: "detach", .. }));
		assert_eq!(link.pending_len(), 0);
	}

	#[tokio::test]
	async fn new_connection_fails_old_pending() {
		let link = ExtensionLink::default();
		let (first, _outbound) = link.connect();

		let caller = tokio::spawn({
			let link = link.clone();
			async move { link.command(detach()).await }
		});
		while link.pending_len() == 0 {
			tokio::task::yield_now().await;
		}

		let (_second, _outbound2) = link.connect();
		assert!(matches!(caller.await.unwrap(), Err(LinkError::Closed)));

		// The stale socket going away must not drop the new connection.
		link.disconnect(first);
		assert!(link.is_connected());
	}

	#[tokio::test]
	async fn commands_fail_fast_without_extension() {
		let link = ExtensionLink::default();
		assert!(matches!(
			link.command(detach()).await,
			Err(LinkError::NotConnected)
		));
	}
}
