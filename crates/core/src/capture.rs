//! Capture gate for page-capture tools.
//!
//! A page-capture tool announces a capture with
//! [`BEFORE_CAPTURE_REQUEST`]; the page must answer with
//! [`BEFORE_CAPTURE_RESPONSE`] exactly once before the capture proceeds.
//! [`CaptureGate`] holds that answer: it is sent by [`CaptureGate::release`]
//! or, failing that, when the gate drops, so an error or a panic on the way
//! never leaves the capture tool waiting.

use std::time::Duration;

use lid_protocol::{DownloadEvent, Event, EventKind, StartOptions};
use lid_runtime::{Facade, Subscription};
use tokio::sync::mpsc;

/// Event the capture tool dispatches before capturing.
pub const BEFORE_CAPTURE_REQUEST: &str = "single-file-on-before-capture-request";
/// Event the page dispatches to let the capture proceed.
pub const BEFORE_CAPTURE_RESPONSE: &str = "single-file-on-before-capture-response";
/// Event announcing that the user script has been injected.
pub const USER_SCRIPT_INIT: &str = "single-file-user-script-init";

/// Default bound on how long a capture waits for the download run.
pub const DEFAULT_CAPTURE_TIMEOUT: Duration = Duration::from_secs(120);

/// Signals capture readiness exactly once.
pub struct CaptureGate {
	signal: Option<Box<dyn FnOnce() + Send>>,
}

impl CaptureGate {
	pub fn new<F>(signal: F) -> Self
	where
		F: FnOnce() + Send + 'static,
	{
		Self {
			signal: Some(Box::new(signal)),
		}
	}

	pub fn release(mut self) {
		self.fire();
	}

	fn fire(&mut self) {
		if let Some(signal) = self.signal.take() {
			signal();
		}
	}
}

impl Drop for CaptureGate {
	fn drop(&mut self) {
		self.fire();
	}
}

impl std::fmt::Debug for CaptureGate {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CaptureGate")
			.field("pending", &self.signal.is_some())
			.finish()
	}
}

#[derive(Debug, Clone)]
pub struct CaptureOptions {
	pub start: StartOptions,
	pub timeout: Duration,
}

impl Default for CaptureOptions {
	fn default() -> Self {
		Self {
			start: StartOptions::default(),
			timeout: DEFAULT_CAPTURE_TIMEOUT,
		}
	}
}

/// How the download run ahead of a capture ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
	Completed { total: usize, downloaded: usize },
	Stopped,
	Disabled,
	Failed(String),
	TimedOut,
}

/// Runs a download ahead of a capture, then releases `gate`.
///
/// Stops any run already active on the tab, then starts a new one and waits
/// for its `downloadCompleted`, `downloadStopped`, or a session-level
/// `downloadError`; per-resource errors do not end the wait. The gate is
/// released whatever happens.
pub async fn prepare_capture(
	facade: &Facade,
	gate: CaptureGate,
	options: CaptureOptions,
) -> CaptureOutcome {
	let outcome = run(facade, options).await;
	match &outcome {
		CaptureOutcome::Completed { total, downloaded } => {
			tracing::info!(target = "lid", total, downloaded, "download finished, releasing capture");
		}
		CaptureOutcome::Failed(error) => {
			tracing::warn!(target = "lid", %error, "download failed, releasing capture");
		}
		other => {
			tracing::info!(target = "lid", outcome = ?other, "releasing capture");
		}
	}
	gate.release();
	outcome
}

async fn run(facade: &Facade, options: CaptureOptions) -> CaptureOutcome {
	if !facade.is_download_enabled() {
		return CaptureOutcome::Disabled;
	}

	// Subscribe before starting so a fast run cannot be missed.
	let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
	let _subscriptions: Vec<Subscription> = [
		EventKind::DownloadCompleted,
		EventKind::DownloadStopped,
		EventKind::DownloadError,
	]
	.into_iter()
	.map(|kind| {
		let tx = tx.clone();
		facade.events().subscribe(kind, move |data| {
			let _ = tx.send(Event {
				event: kind,
				data: data.clone(),
			});
			Ok(())
		})
	})
	.collect();
	drop(tx);

	// A run already active on the tab ends with its own `downloadStopped`;
	// consume it here so it cannot be taken for the end of the new run.
	if let Err(err) = facade.stop_download().await {
		tracing::debug!(target = "lid", error = %err, "no previous run to stop");
	}
	while rx.try_recv().is_ok() {}

	if let Err(err) = facade.start_download(options.start).await {
		return match err {
			lid_runtime::Error::DownloadDisabled => CaptureOutcome::Disabled,
			other => CaptureOutcome::Failed(other.to_string()),
		};
	}

	let wait = async {
		while let Some(event) = rx.recv().await {
			match DownloadEvent::try_from(&event) {
				Ok(DownloadEvent::DownloadCompleted { total, downloaded }) => {
					return CaptureOutcome::Completed { total, downloaded };
				}
				Ok(DownloadEvent::DownloadError { url: None, error }) => {
					return CaptureOutcome::Failed(error);
				}
				Ok(DownloadEvent::DownloadStopped {}) => return CaptureOutcome::Stopped,
				_ => {}
			}
		}
		CaptureOutcome::Failed("event channel closed".into())
	};

	tokio::time::timeout(options.timeout, wait)
		.await
		.unwrap_or(CaptureOutcome::TimedOut)
}
