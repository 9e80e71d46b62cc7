//! Page-side API facade.
//!
//! The [`Facade`] turns method calls into request envelopes, correlates the
//! extension's responses by [`RequestId`], and fans events out to handlers.
//!
//! # Call flow
//!
//! 1. A call allocates a fresh id and registers a pending oneshot sender
//! 2. The request envelope is queued on the outbound endpoint
//! 3. The dispatcher task receives the matching response and completes the
//!    oneshot, or the caller's deadline fires first
//! 4. Either way the pending entry is gone: the dispatcher removes it on
//!    delivery, the [`CancelGuard`] removes it on timeout or when the caller
//!    drops the future
//!
//! A request therefore resolves at most once, and a pending entry never
//! outlives its caller.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use lid_protocol::{
	Action, ConfigFetched, Envelope, Event, EventKind, Request, RequestId, Response, StartOptions,
	Status,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::endpoint::{Endpoint, EnvelopeRx, EnvelopeTx};
use crate::error::{Error, Result};
use crate::handlers::{EventRegistry, HandlerError, HandlerId, Subscription};

/// Default deadline for `getStatus`.
pub const DEFAULT_STATUS_TIMEOUT: Duration = Duration::from_secs(2);
/// Default deadline for every other action.
pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Pending calls keyed by request id.
type PendingMap = Arc<Mutex<HashMap<RequestId, oneshot::Sender<Response>>>>;

/// Facade tuning.
#[derive(Debug, Clone)]
pub struct FacadeOptions {
	pub status_timeout: Duration,
	pub action_timeout: Duration,
	/// Merged under the caller's options by [`Facade::start_download`].
	pub defaults: StartOptions,
}

impl Default for FacadeOptions {
	fn default() -> Self {
		Self {
			status_timeout: DEFAULT_STATUS_TIMEOUT,
			action_timeout: DEFAULT_ACTION_TIMEOUT,
			defaults: StartOptions {
				regex_patterns: None,
				output_path: None,
				send_to_remote: Some(false),
				wait_time_ms: Some(lid_protocol::config::DEFAULT_WAIT_TIME_MS),
			},
		}
	}
}

/// RAII guard removing a pending call when its future is dropped or times out.
struct CancelGuard {
	id: RequestId,
	pending: PendingMap,
}

impl Drop for CancelGuard {
	fn drop(&mut self) {
		if self.pending.lock().remove(&self.id).is_some() {
			tracing::debug!(target = "lid", id = %self.id, "removed orphaned pending call");
		}
	}
}

struct Inner {
	outbound: EnvelopeTx,
	pending: PendingMap,
	events: EventRegistry,
	downloads_enabled: Arc<AtomicBool>,
	options: FacadeOptions,
	dispatcher: JoinHandle<()>,
}

impl Drop for Inner {
	fn drop(&mut self) {
		self.dispatcher.abort();
	}
}

/// Client of the extension service, as seen from the page.
///
/// Cloning is cheap; clones share pending calls, handlers and the cached
/// policy flag.
#[derive(Clone)]
pub struct Facade {
	inner: Arc<Inner>,
}

impl Facade {
	/// Wraps `endpoint` and starts the dispatcher task.
	///
	/// Must be called from within a Tokio runtime. The cached policy flag
	/// starts enabled; see [`Facade::connect`] to refresh it immediately.
	pub fn new(endpoint: Endpoint, options: FacadeOptions) -> Self {
		let (outbound, inbound) = endpoint.split();
		let pending: PendingMap = Arc::default();
		let events = EventRegistry::new();
		let downloads_enabled = Arc::new(AtomicBool::new(true));

		let dispatcher = tokio::spawn(dispatch(
			inbound,
			Arc::clone(&pending),
			events.clone(),
			Arc::clone(&downloads_enabled),
		));

		Self {
			inner: Arc::new(Inner {
				outbound,
				pending,
				events,
				downloads_enabled,
				options,
				dispatcher,
			}),
		}
	}

	/// Creates the facade and performs the initial status refresh.
	pub async fn connect(endpoint: Endpoint, options: FacadeOptions) -> Self {
		let facade = Self::new(endpoint, options);
		facade.refresh_status().await;
		facade
	}

	/// Sends `action` with the default deadline for its kind.
	pub async fn call(&self, action: Action, data: Value) -> Result<Value> {
		let timeout = match action {
			Action::GetStatus => self.inner.options.status_timeout,
			_ => self.inner.options.action_timeout,
		};
		self.call_with_timeout(action, data, timeout).await
	}

	/// Sends `action` and waits at most `timeout` for the response.
	pub async fn call_with_timeout(
		&self,
		action: Action,
		data: Value,
		timeout: Duration,
	) -> Result<Value> {
		let (tx, rx) = oneshot::channel();
		let id = {
			let mut pending = self.inner.pending.lock();
			let mut id = next_request_id();
			while pending.contains_key(&id) {
				id = next_request_id();
			}
			pending.insert(id.clone(), tx);
			id
		};
		let _guard = CancelGuard {
			id: id.clone(),
			pending: Arc::clone(&self.inner.pending),
		};

		tracing::debug!(target = "lid", %id, %action, "sending request");
		let request = Request::new(id, action, data);
		if self.inner.outbound.send(request.into()).is_err() {
			return Err(Error::ChannelClosed);
		}

		let response = match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(response)) => response,
			Ok(Err(_)) => return Err(Error::ChannelClosed),
			Err(_) => return Err(Error::timeout(action.as_str(), timeout)),
		};

		response
			.into_result()
			.map_err(|message| Error::Rejected { action, message })
	}

	/// Starts a download run on the current tab.
	///
	/// Fails with [`Error::DownloadDisabled`] without sending anything when
	/// the cached policy flag is off.
	pub async fn start_download(&self, options: StartOptions) -> Result<String> {
		if !self.is_download_enabled() {
			return Err(Error::DownloadDisabled);
		}
		let merged = options.or(&self.inner.options.defaults);
		let data = serde_json::to_value(merged)?;
		self.call(Action::StartDownload, data).await.map(message)
	}

	pub async fn stop_download(&self) -> Result<String> {
		self.call(Action::StopDownload, Value::Null)
			.await
			.map(message)
	}

	pub async fn get_status(&self) -> Result<Status> {
		let data = self.call(Action::GetStatus, Value::Null).await?;
		Ok(serde_json::from_value(data)?)
	}

	/// Asks the extension to pull the control-plane configuration now.
	pub async fn fetch_latest_config(&self) -> Result<ConfigFetched> {
		let data = self.call(Action::FetchLatestConfig, Value::Null).await?;
		Ok(serde_json::from_value(data)?)
	}

	/// Refreshes the cached policy flag from `getStatus`.
	///
	/// A failed refresh leaves downloads enabled. Returns the flag.
	pub async fn refresh_status(&self) -> bool {
		match self.get_status().await {
			Ok(status) => {
				self.inner
					.downloads_enabled
					.store(status.is_download_enabled, Ordering::SeqCst);
			}
			Err(err) => {
				tracing::warn!(target = "lid", error = %err, "status refresh failed");
				self.inner.downloads_enabled.store(true, Ordering::SeqCst);
			}
		}
		self.is_download_enabled()
	}

	pub fn is_download_enabled(&self) -> bool {
		self.inner.downloads_enabled.load(Ordering::SeqCst)
	}

	/// Registers an event handler; see [`EventRegistry::on`].
	pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
	where
		F: Fn(&Value) -> std::result::Result<(), HandlerError> + Send + Sync + 'static,
	{
		self.inner.events.on(kind, handler)
	}

	pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
		self.inner.events.off(kind, id)
	}

	pub fn events(&self) -> &EventRegistry {
		&self.inner.events
	}

	/// Waits for the first event of any of `kinds`.
	///
	/// The temporary handlers are removed whether the wait succeeds or not.
	pub async fn wait_for(&self, kinds: &[EventKind], timeout: Duration) -> Result<Event> {
		let (tx, mut rx) = mpsc::unbounded_channel();
		let _subscriptions: Vec<Subscription> = kinds
			.iter()
			.map(|&kind| {
				let tx = tx.clone();
				self.inner.events.subscribe(kind, move |data| {
					let _ = tx.send(Event {
						event: kind,
						data: data.clone(),
					});
					Ok(())
				})
			})
			.collect();
		drop(tx);

		match tokio::time::timeout(timeout, rx.recv()).await {
			Ok(Some(event)) => Ok(event),
			Ok(None) => Err(Error::ChannelClosed),
			Err(_) => {
				let names: Vec<&str> = kinds.iter().map(EventKind::as_str).collect();
				Err(Error::timeout(names.join("|"), timeout))
			}
		}
	}

	#[cfg(test)]
	fn pending_len(&self) -> usize {
		self.inner.pending.lock().len()
	}
}

impl std::fmt::Debug for Facade {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Facade")
			.field("pending", &self.inner.pending.lock().len())
			.field("downloads_enabled", &self.is_download_enabled())
			.field("events", &self.inner.events)
			.finish()
	}
}

async fn dispatch(
	mut inbound: EnvelopeRx,
	pending: PendingMap,
	events: EventRegistry,
	downloads_enabled: Arc<AtomicBool>,
) {
	while let Some(envelope) = inbound.recv().await {
		match envelope {
			Envelope::Response(response) => {
				if response.success {
					if let Some(enabled) = response.data.get("isDownloadEnabled").and_then(Value::as_bool) {
						downloads_enabled.store(enabled, Ordering::SeqCst);
					}
				}

				let Some(tx) = pending.lock().remove(&response.id) else {
					tracing::debug!(target = "lid", id = %response.id, "response for unknown request");
					continue;
				};
				let _ = tx.send(response);
			}
			Envelope::Event(event) => {
				events.emit(&event);
			}
			Envelope::Request(request) => {
				tracing::debug!(target = "lid", id = %request.id, "ignoring request on page side");
			}
		}
	}

	// Dropping the senders fails every outstanding call with ChannelClosed.
	pending.lock().clear();
}

/// `base36(unix millis)` followed by a random base36 suffix.
fn next_request_id() -> RequestId {
	let millis = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_millis() as u64)
		.unwrap_or_default();
	let suffix: u64 = rand::random();
	RequestId::new(format!("{}{}", base36(millis), base36(suffix)))
}

fn base36(mut n: u64) -> String {
	const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
	if n == 0 {
		return "0".to_string();
	}
	let mut out = Vec::new();
	while n > 0 {
		out.push(DIGITS[(n % 36) as usize]);
		n /= 36;
	}
	out.reverse();
	String::from_utf8(out).unwrap_or_default()
}

fn message(data: Value) -> String {
	match data {
		Value::String(s) => s,
		other => other.to_string(),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use serde_json::json;

	use super::*;

	fn quick() -> FacadeOptions {
		FacadeOptions {
			status_timeout: Duration::from_millis(100),
			action_timeout: Duration::from_millis(200),
			..FacadeOptions::default()
		}
	}

	async fn next_request(ext: &mut Endpoint) -> Request {
		match ext.rx.recv().await {
			Some(Envelope::Request(request)) => request,
			other => panic!("expected request, got {other:?}"),
		}
	}

	#[test]
	fn test_base36() {
		assert_eq!(base36(0), "0");
		assert_eq!(base36(35), "z");
		assert_eq!(base36(36), "10");
	}

	#[test]
	fn test_request_ids_are_distinct() {
		let a = next_request_id();
		let b = next_request_id();
		assert_ne!(a, b);
	}

	#[tokio::test]
	async fn test_response_resolves_matching_call() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let call = tokio::spawn({
			let facade = facade.clone();
			async move { facade.stop_download().await }
		});

		let request = next_request(&mut ext).await;
		assert_eq!(request.action, Action::StopDownload);

		// A stray response is ignored; the real one resolves the call.
		ext.tx
			.send(Response::ok(RequestId::from("stray"), "nope").into())
			.unwrap();
		ext.tx
			.send(Response::ok(request.id, "Download stopped").into())
			.unwrap();

		assert_eq!(call.await.unwrap().unwrap(), "Download stopped");
		assert_eq!(facade.pending_len(), 0);
	}

	#[tokio::test]
	async fn test_timeout_removes_pending_call() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let err = facade.get_status().await.unwrap_err();
		assert!(err.is_timeout(), "{err}");
		assert_eq!(facade.pending_len(), 0);

		// A late response for the expired id is dropped silently.
		let request = next_request(&mut ext).await;
		let _ = ext
			.tx
			.send(Response::ok(request.id, serde_json::to_value(Status::inactive(true)).unwrap()).into());
	}

	#[tokio::test]
	async fn test_dropped_call_removes_pending() {
		let (page, _ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let fut = facade.call_with_timeout(Action::GetStatus, Value::Null, Duration::from_secs(10));
		let _ = tokio::time::timeout(Duration::from_millis(20), fut).await;
		assert_eq!(facade.pending_len(), 0);
	}

	#[tokio::test]
	async fn test_failure_response_is_rejected() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let call = tokio::spawn({
			let facade = facade.clone();
			async move { facade.stop_download().await }
		});
		let request = next_request(&mut ext).await;
		ext.tx
			.send(Response::err(request.id, "No active download").into())
			.unwrap();

		match call.await.unwrap() {
			Err(Error::Rejected { action, message }) => {
				assert_eq!(action, Action::StopDownload);
				assert_eq!(message, "No active download");
			}
			other => panic!("unexpected {other:?}"),
		}
	}

	#[tokio::test]
	async fn test_disabled_start_sends_nothing() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let status = tokio::spawn({
			let facade = facade.clone();
			async move { facade.refresh_status().await }
		});
		let request = next_request(&mut ext).await;
		ext.tx
			.send(Response::ok(request.id, serde_json::to_value(Status::inactive(false)).unwrap()).into())
			.unwrap();
		assert!(!status.await.unwrap());

		let err = facade.start_download(StartOptions::default()).await.unwrap_err();
		assert!(matches!(err, Error::DownloadDisabled));
		assert!(ext.rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_failed_refresh_leaves_enabled() {
		let (page, _ext) = Endpoint::pair();
		let facade = Facade::connect(page, quick()).await;
		assert!(facade.is_download_enabled());
	}

	#[tokio::test]
	async fn test_start_merges_defaults() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let call = tokio::spawn({
			let facade = facade.clone();
			async move {
				facade
					.start_download(StartOptions {
						regex_patterns: Some(lid_protocol::Patterns::new(["\\.png$"])),
						..StartOptions::default()
					})
					.await
			}
		});

		let request = next_request(&mut ext).await;
		assert_eq!(request.action, Action::StartDownload);
		assert_eq!(request.data["regexPatterns"], json!(["\\.png$"]));
		assert_eq!(request.data["sendToRemote"], false);
		assert_eq!(request.data["waitTimeMs"], 1000);

		ext.tx
			.send(Response::ok(request.id, "Download started").into())
			.unwrap();
		assert_eq!(call.await.unwrap().unwrap(), "Download started");
	}

	#[tokio::test]
	async fn test_events_fan_out_and_wait_for() {
		let (page, ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());
		let seen = Arc::new(AtomicUsize::new(0));

		let s = Arc::clone(&seen);
		let id = facade.on(EventKind::DownloadProgress, move |_| {
			s.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});

		let waiter = tokio::spawn({
			let facade = facade.clone();
			async move {
				facade
					.wait_for(
						&[EventKind::DownloadCompleted, EventKind::DownloadStopped],
						Duration::from_secs(1),
					)
					.await
			}
		});
		while facade.events().count(EventKind::DownloadStopped) == 0 {
			tokio::task::yield_now().await;
		}

		ext.tx
			.send(
				Event {
					event: EventKind::DownloadProgress,
					data: json!({"current": 1}),
				}
				.into(),
			)
			.unwrap();
		ext.tx
			.send(
				Event {
					event: EventKind::DownloadCompleted,
					data: json!({"total": 1, "downloaded": 1}),
				}
				.into(),
			)
			.unwrap();

		let event = waiter.await.unwrap().unwrap();
		assert_eq!(event.event, EventKind::DownloadCompleted);
		assert_eq!(seen.load(Ordering::SeqCst), 1);
		assert!(facade.off(EventKind::DownloadProgress, id));
		assert_eq!(facade.events().count(EventKind::DownloadCompleted), 0);
	}

	#[tokio::test]
	async fn test_wait_for_times_out() {
		let (page, _ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());
		let err = facade
			.wait_for(&[EventKind::DownloadCompleted], Duration::from_millis(20))
			.await
			.unwrap_err();
		assert!(err.is_timeout());
		assert_eq!(facade.events().count(EventKind::DownloadCompleted), 0);
	}

	#[tokio::test]
	async fn test_closed_channel_fails_pending() {
		let (page, mut ext) = Endpoint::pair();
		let facade = Facade::new(page, quick());

		let call = tokio::spawn({
			let facade = facade.clone();
			async move {
				facade
					.call_with_timeout(Action::StopDownload, Value::Null, Duration::from_secs(5))
					.await
			}
		});
		let _ = next_request(&mut ext).await;
		drop(ext);

		assert!(matches!(call.await.unwrap(), Err(Error::ChannelClosed)));
	}
}
