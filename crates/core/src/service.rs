//! Extension-side request handling.
//!
//! [`ExtensionService`] answers page requests, reacts to toolbar clicks and
//! inspection events, and owns the periodic config refresh.

use std::sync::Arc;
use std::time::Duration;

use lid_protocol::inspect::methods;
use lid_protocol::{
	Action, ConfigFetched, Debuggee, DownloadEvent, Envelope, Request, Response, StartOptions,
	Status, TabId,
};
use lid_runtime::Endpoint;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::collector::{Collector, Timing};
use crate::config::ConfigStore;
use crate::error::Error;
use crate::platform::{Badge, Platform};
use crate::session::SessionRegistry;
use crate::sync::{ConfigSync, REFRESH_INTERVAL};

const MSG_STARTED: &str = "Download started";
const MSG_STOPPED: &str = "Download stopped";
const MSG_CONFIG_UPDATED: &str = "Config updated successfully";
const MSG_CONFIG_FAILED: &str = "Failed to fetch latest config from server";
const MSG_UNKNOWN_ACTION: &str = "Unknown action";

/// Request handler and event router of the extension process.
#[derive(Clone)]
pub struct ExtensionService {
	collector: Collector,
	sync: ConfigSync,
	platform: Platform,
}

impl ExtensionService {
	pub fn new(platform: Platform, config: ConfigStore, timing: Timing) -> Self {
		let sync = ConfigSync::new(config, Arc::clone(&platform.config_source));
		let collector = Collector::new(
			platform.clone(),
			sync.clone(),
			SessionRegistry::default(),
			timing,
		);
		Self {
			collector,
			sync,
			platform,
		}
	}

	pub fn collector(&self) -> &Collector {
		&self.collector
	}

	pub fn config(&self) -> &ConfigStore {
		self.sync.store()
	}

	/// Answers one request. `tab` is the sender tab, if known.
	pub async fn handle(&self, tab: Option<TabId>, request: Request) -> Response {
		let Request { id, action, data } = request;
		tracing::debug!(target = "lid", %id, %action, ?tab, "request");

		match action {
			Action::StartDownload => match self.start(tab, data).await {
				Ok(()) => Response::ok(id, MSG_STARTED),
				Err(err) => Response::err(id, err.to_string()),
			},
			Action::StopDownload => {
				let stopped = match tab {
					Some(tab) => self.collector.stop(tab).await,
					None => false,
				};
				if stopped {
					Response::ok(id, MSG_STOPPED)
				} else {
					Response::err(id, Error::NoActiveSession.to_string())
				}
			}
			Action::GetStatus => match tab {
				Some(tab) => match serde_json::to_value(self.status(tab)) {
					Ok(data) => Response::ok(id, data),
					Err(err) => Response::err(id, err.to_string()),
				},
				None => Response::err(id, Error::NoTabInfo.to_string()),
			},
			Action::FetchLatestConfig => {
				let Some(tab) = tab else {
					return Response::err(id, Error::NoTabInfo.to_string());
				};
				match self.sync.refresh().await {
					Ok(config) => {
						self.emit(tab, DownloadEvent::ConfigUpdated(config.clone()));
						let fetched = ConfigFetched {
							message: MSG_CONFIG_UPDATED.into(),
							config,
						};
						match serde_json::to_value(fetched) {
							Ok(data) => Response::ok(id, data),
							Err(err) => Response::err(id, err.to_string()),
						}
					}
					Err(_) => Response::err(id, MSG_CONFIG_FAILED),
				}
			}
			Action::Unknown => Response::err(id, MSG_UNKNOWN_ACTION),
		}
	}

	async fn start(&self, tab: Option<TabId>, data: Value) -> Result<(), Error> {
		if !self.config().downloads_enabled() {
			return Err(Error::DownloadDisabled);
		}
		let tab = tab.ok_or(Error::NoTabInfo)?;

		if !data.is_null() {
			let options: StartOptions = serde_json::from_value(data)?;
			let config = self.config().update(options.into_patch());
			self.emit(tab, DownloadEvent::ConfigUpdated(config));
		}

		self.collector.stop(tab).await;
		let collector = self.collector.clone();
		tokio::spawn(async move {
			if let Err(err) = collector.attach(tab).await {
				tracing::debug!(target = "lid", tab, error = %err, "attach ended with error");
			}
		});
		Ok(())
	}

	pub fn status(&self, tab: TabId) -> Status {
		let enabled = self.config().downloads_enabled();
		match self.collector.status(tab) {
			Some(info) => Status::active(info, enabled),
			None => Status::inactive(enabled),
		}
	}

	/// Toolbar click: toggles the session of `tab`.
	pub async fn on_action_clicked(&self, tab: TabId) {
		if !self.config().downloads_enabled() {
			self.platform
				.indicator
				.badge(tab, Badge::alert("X", "Download disabled"));
			return;
		}
		if self.collector.stop(tab).await {
			return;
		}
		if let Err(err) = self.collector.attach(tab).await {
			tracing::debug!(target = "lid", tab, error = %err, "attach ended with error");
		}
	}

	/// Routes an inspection event. Only child-target attachment matters.
	pub async fn on_debugger_event(&self, source: &Debuggee, method: &str, params: &Value) {
		if method != methods::TARGET_ATTACHED_TO_TARGET {
			return;
		}
		let Some(session_id) = params.get("sessionId").and_then(Value::as_str) else {
			tracing::debug!(target = "lid", tab = source.tab_id, "attachedToTarget without sessionId");
			return;
		};
		self.collector
			.on_target_attached(source.tab_id, session_id)
			.await;
	}

	pub async fn on_debugger_detached(&self, tab: TabId) {
		self.collector.on_debugger_detached(tab).await;
	}

	/// Starts the background config refresh (every 30 s while sessions exist).
	pub fn spawn_config_refresh(&self, cancel: CancellationToken) -> JoinHandle<()> {
		self.spawn_config_refresh_every(REFRESH_INTERVAL, cancel)
	}

	pub fn spawn_config_refresh_every(&self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
		self.sync
			.spawn_periodic(self.collector.sessions().clone(), period, cancel)
	}

	/// Answers requests arriving on `endpoint` on behalf of `tab`.
	///
	/// Each request is handled on its own task so a slow config fetch does
	/// not hold up a status query. Events from the page side are ignored.
	pub fn serve(&self, tab: Option<TabId>, endpoint: Endpoint) -> JoinHandle<()> {
		let this = self.clone();
		let (tx, mut rx) = endpoint.split();
		tokio::spawn(async move {
			while let Some(envelope) = rx.recv().await {
				match envelope {
					Envelope::Request(request) => {
						let this = this.clone();
						let tx = tx.clone();
						tokio::spawn(async move {
							let response = this.handle(tab, request).await;
							let _ = tx.send(response.into());
						});
					}
					other => {
						tracing::debug!(target = "lid", kind = other.kind(), "ignoring envelope from page");
					}
				}
			}
		})
	}

	fn emit(&self, tab: TabId, event: DownloadEvent) {
		self.platform.events.emit(tab, event);
	}
}

impl std::fmt::Debug for ExtensionService {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ExtensionService")
			.field("collector", &self.collector)
			.finish_non_exhaustive()
	}
}
