//! Native host: the extension link plus WebSocket page clients.
//!
//! Routes:
//!
//! - `GET /` health check
//! - `GET /extension` WebSocket for the background worker
//! - `GET /page/{tab_id}` WebSocket for a page client of that tab
//!
//! The collector and request handling run here; the background worker only
//! forwards browser events and executes [`BrowserCommand`]s.
//!
//! [`BrowserCommand`]: lid_protocol::BrowserCommand

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use futures::{SinkExt, StreamExt};
use lid::{
	ConfigStore, DirectoryStore, Downloads, ExtensionService, HttpConfigSource, HttpUploader,
	PageChannels, Platform, Timing,
};
use lid_protocol::{Config, Envelope, ExtensionMessage, HostMessage, TabId};
use lid_runtime::{Endpoint, Relay};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::browser::{LinkBrowser, TabEvents};
use crate::link::ExtensionLink;

#[derive(Debug, Clone)]
pub struct HostOptions {
	pub host: String,
	pub port: u16,
	/// Control-plane port the extension pulls config from.
	pub control_port: u16,
	/// Save into this directory instead of the browser's downloads.
	pub save_dir: Option<PathBuf>,
}

/// Everything the routes share.
#[derive(Clone)]
pub struct HostState {
	pub service: ExtensionService,
	pub link: ExtensionLink,
	pub pages: PageChannels,
}

impl HostState {
	pub fn new(options: &HostOptions) -> Result<Self> {
		let link = ExtensionLink::default();
		let pages = PageChannels::default();
		let browser = Arc::new(LinkBrowser::new(link.clone()));

		let downloads: Arc<dyn Downloads> = match &options.save_dir {
			Some(dir) => Arc::new(DirectoryStore::new(dir)),
			None => browser.clone(),
		};
		let platform = Platform {
			inspector: browser.clone(),
			downloads,
			uploader: Arc::new(HttpUploader::new().context("Building upload client")?),
			config_source: Arc::new(HttpConfigSource::new().context("Building config client")?),
			events: Arc::new(TabEvents::new(link.clone(), pages.clone())),
			indicator: browser,
		};
		let config = ConfigStore::new(Config {
			server_port: options.control_port,
			..Config::default()
		});

		Ok(Self {
			service: ExtensionService::new(platform, config, Timing::default()),
			link,
			pages,
		})
	}
}

pub fn router(state: HostState) -> Router {
	Router::new()
		.route("/", get(|| async { "OK" }))
		.route("/extension", get(extension_upgrade))
		.route("/page/{tab_id}", get(page_upgrade))
		.with_state(state)
}

pub async fn run(options: HostOptions) -> Result<()> {
	let state = HostState::new(&options)?;
	let cancel = CancellationToken::new();
	let refresh = state.service.spawn_config_refresh(cancel.clone());

	let addr: SocketAddr = format!("{}:{}", options.host, options.port)
		.parse()
		.with_context(|| format!("Invalid host/port combination: {}:{}", options.host, options.port))?;
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind native host to {addr}"))?;

	tracing::info!(
		target = "lid",
		%addr,
		control_port = options.control_port,
		save_dir = ?options.save_dir,
		"native host listening"
	);

	let result = axum::serve(listener, router(state))
		.with_graceful_shutdown(shutdown_signal())
		.await
		.context("Native host error");

	cancel.cancel();
	let _ = refresh.await;
	result
}

pub(crate) async fn shutdown_signal() {
	if tokio::signal::ctrl_c().await.is_ok() {
		tracing::info!(target = "lid", "shutting down");
	}
}

async fn extension_upgrade(ws: WebSocketUpgrade, State(state): State<HostState>) -> impl IntoResponse {
	ws.on_upgrade(|socket| extension_socket(socket, state))
}

async fn page_upgrade(
	Path(tab): Path<TabId>,
	ws: WebSocketUpgrade,
	State(state): State<HostState>,
) -> impl IntoResponse {
	ws.on_upgrade(move |socket| page_socket(socket, tab, state))
}

async fn extension_socket(socket: WebSocket, state: HostState) {
	tracing::info!(target = "lid", "extension connected");

	let (generation, mut outbound) = state.link.connect();
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(message) = outbound.recv().await {
			let text = match serde_json::to_string(&message) {
				Ok(text) => text,
				Err(err) => {
					tracing::warn!(target = "lid", error = %err, "failed to encode host message");
					continue;
				}
			};
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(frame) = ws_rx.next().await {
		match frame {
			Ok(Message::Text(text)) => match serde_json::from_str::<ExtensionMessage>(text.as_str()) {
				Ok(message) => dispatch(&state, message),
				Err(err) => {
					tracing::warn!(target = "lid", error = %err, "failed handling extension message");
				}
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				tracing::warn!(target = "lid", error = %err, "extension websocket error");
				break;
			}
		}
	}

	state.link.disconnect(generation);
	send_task.abort();
	tracing::info!(target = "lid", "extension disconnected");
}

/// Routes one message from the worker. Anything that may issue browser
/// commands runs on its own task so the socket keeps reading replies.
fn dispatch(state: &HostState, message: ExtensionMessage) {
	match message {
		ExtensionMessage::CommandResult { id, result, error } => {
			state.link.resolve(id, result, error);
		}
		ExtensionMessage::PageRequest { tab_id, request } => {
			let state = state.clone();
			tokio::spawn(async move {
				let response = state.service.handle(tab_id, request).await;
				if let Err(err) = state.link.send(HostMessage::PageResponse { tab_id, response }) {
					tracing::debug!(target = "lid", ?tab_id, error = %err, "response not delivered");
				}
			});
		}
		ExtensionMessage::DebuggerEvent {
			source,
			method,
			params,
		} => {
			let service = state.service.clone();
			tokio::spawn(async move {
				service.on_debugger_event(&source, &method, &params).await;
			});
		}
		ExtensionMessage::DebuggerDetached { tab_id, reason } => {
			tracing::info!(target = "lid", tab = tab_id, ?reason, "debugger detached");
			let service = state.service.clone();
			tokio::spawn(async move { service.on_debugger_detached(tab_id).await });
		}
		ExtensionMessage::ActionClicked { tab_id } => {
			let service = state.service.clone();
			tokio::spawn(async move { service.on_action_clicked(tab_id).await });
		}
	}
}

/// Joins a page client to the service through a relay.
async fn page_socket(socket: WebSocket, tab: TabId, state: HostState) {
	tracing::info!(target = "lid", tab, "page client connected");

	let (page, relay_page) = Endpoint::pair();
	let (relay_ext, extension) = Endpoint::pair();
	let relay = Relay::spawn(relay_page, relay_ext);
	state.pages.register(tab, extension.tx.clone());
	let serving = state.service.serve(Some(tab), extension);

	let (page_tx, mut page_rx) = page.split();
	let (mut ws_tx, mut ws_rx) = socket.split();

	let send_task = tokio::spawn(async move {
		while let Some(envelope) = page_rx.recv().await {
			let text = match serde_json::to_string(&envelope) {
				Ok(text) => text,
				Err(err) => {
					tracing::warn!(target = "lid", error = %err, "failed to encode envelope");
					continue;
				}
			};
			if ws_tx.send(Message::Text(text.into())).await.is_err() {
				break;
			}
		}
	});

	while let Some(frame) = ws_rx.next().await {
		match frame {
			Ok(Message::Text(text)) => match serde_json::from_str::<Envelope>(text.as_str()) {
				Ok(envelope) => {
					if page_tx.send(envelope).is_err() {
						break;
					}
				}
				Err(err) => {
					tracing::warn!(target = "lid", tab, error = %err, "dropping malformed page frame");
				}
			},
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(err) => {
				tracing::debug!(target = "lid", tab, error = %err, "page websocket error");
				break;
			}
		}
	}

	relay.abort();
	serving.abort();
	send_task.abort();
	tracing::info!(target = "lid", tab, "page client disconnected");
}
