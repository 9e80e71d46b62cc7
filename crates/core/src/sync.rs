//! Remote config sync with the local control plane.
//!
//! The control plane serves `GET http://localhost:{serverPort}/config`. A
//! failed fetch is never fatal: the current config stays in effect.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lid_protocol::{Config, ConfigPatch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::platform::ConfigSource;
use crate::session::SessionRegistry;

/// Client-side deadline for one config fetch.
pub const CONFIG_FETCH_TIMEOUT: Duration = Duration::from_secs(5);
/// Period of the background refresh.
pub const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// [`ConfigSource`] over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
	client: reqwest::Client,
	host: String,
}

impl HttpConfigSource {
	pub fn new() -> Result<Self> {
		Self::with_host("localhost")
	}

	/// Targets `host` instead of `localhost`.
	pub fn with_host(host: impl Into<String>) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(CONFIG_FETCH_TIMEOUT)
			.build()?;
		Ok(Self {
			client,
			host: host.into(),
		})
	}
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
	async fn fetch(&self, port: u16) -> Result<ConfigPatch> {
		let url = format!("http://{}:{port}/config", self.host);
		let response = self.client.get(&url).send().await?.error_for_status()?;
		Ok(response.json::<ConfigPatch>().await?)
	}
}

/// Pulls control-plane config into a [`ConfigStore`].
#[derive(Clone)]
pub struct ConfigSync {
	store: ConfigStore,
	source: Arc<dyn ConfigSource>,
}

impl ConfigSync {
	pub fn new(store: ConfigStore, source: Arc<dyn ConfigSource>) -> Self {
		Self { store, source }
	}

	pub fn store(&self) -> &ConfigStore {
		&self.store
	}

	/// Fetches and merges the control-plane config.
	///
	/// On failure the store is untouched and [`Error::ConfigSync`] is
	/// returned; callers treat it as informational.
	pub async fn refresh(&self) -> Result<Config> {
		let port = self.store.server_port();
		match self.source.fetch(port).await {
			Ok(patch) => {
				let config = self.store.update(patch);
				tracing::debug!(target = "lid", port, ?config, "config refreshed");
				Ok(config)
			}
			Err(err) => {
				tracing::info!(target = "lid", port, error = %err, "control plane unreachable, keeping config");
				Err(Error::ConfigSync(err.to_string()))
			}
		}
	}

	/// Refreshes every `period` while at least one session is active.
	pub fn spawn_periodic(
		&self,
		sessions: SessionRegistry,
		period: Duration,
		cancel: CancellationToken,
	) -> JoinHandle<()> {
		let this = self.clone();
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => {}
				}
				if sessions.is_empty() {
					continue;
				}
				let _ = this.refresh().await;
			}
		})
	}
}

impl std::fmt::Debug for ConfigSync {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("ConfigSync")
			.field("store", &self.store)
			.finish_non_exhaustive()
	}
}
