//! Resource collector and download state machine.
//!
//! A session moves through [`Phase::Attaching`], [`Phase::Collecting`],
//! [`Phase::Downloading`] and [`Phase::Finishing`], and can be torn down from
//! any of them. Entries of one tab are processed strictly one at a time, in
//! enumeration order, by a single download task.
//!
//! ```text
//! attach ─► collect ─(settle)─► download ─► finish ─(grace)─► completed ─► teardown
//!              ▲                    │
//!   child ─────┘                    └─ re-run while new entries arrived
//! ```
//!
//! Every exit path, whether stop, completion, detach or failure, goes through
//! [`Collector::teardown`], which emits `downloadStopped` exactly once.

use std::sync::Arc;
use std::time::Duration;

use lid_protocol::{ActiveInfo, Config, Debuggee, DownloadEvent, FrameResource, FrameTree, ResourceTree, TabId};

use crate::config::ConfigStore;
use crate::error::{Error, Result};
use crate::filter::FilterCache;
use crate::naming::{self, FileMeta};
use crate::platform::{Badge, FilePayload, Platform};
use crate::session::{Phase, ResourceEntry, SessionRegistry, TabSession};
use crate::sync::ConfigSync;

/// Delay between a collect pass and the download pass it triggers.
pub const SETTLE_DELAY: Duration = Duration::from_millis(100);
/// Delay between the last processed entry and `downloadCompleted`.
pub const FINISH_GRACE: Duration = Duration::from_secs(1);

const IMAGE_EXTENSIONS: &[&str] = &[
	".png", ".jpg", ".jpeg", ".gif", ".webp", ".bmp", ".svg", ".ico",
];

/// Collector timers.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
	pub settle: Duration,
	pub grace: Duration,
}

impl Default for Timing {
	fn default() -> Self {
		Self {
			settle: SETTLE_DELAY,
			grace: FINISH_GRACE,
		}
	}
}

struct Inner {
	platform: Platform,
	sync: ConfigSync,
	sessions: SessionRegistry,
	timing: Timing,
	filter: FilterCache,
}

/// Drives download sessions for every tab.
#[derive(Clone)]
pub struct Collector {
	inner: Arc<Inner>,
}

impl Collector {
	pub fn new(platform: Platform, sync: ConfigSync, sessions: SessionRegistry, timing: Timing) -> Self {
		Self {
			inner: Arc::new(Inner {
				platform,
				sync,
				sessions,
				timing,
				filter: FilterCache::default(),
			}),
		}
	}

	pub fn sessions(&self) -> &SessionRegistry {
		&self.inner.sessions
	}

	pub fn config(&self) -> &ConfigStore {
		self.inner.sync.store()
	}

	pub fn is_active(&self, tab: TabId) -> bool {
		self.inner.sessions.contains(tab)
	}

	pub fn status(&self, tab: TabId) -> Option<ActiveInfo> {
		self.inner.sessions.get(tab).map(|s| s.info())
	}

	/// Starts a session on `tab`.
	///
	/// Refreshes the config first; a disabled policy flags the badge, emits
	/// `downloadError` and returns [`Error::DownloadDisabled`]. Any failure
	/// while attaching tears the new session down.
	pub async fn attach(&self, tab: TabId) -> Result<()> {
		let _ = self.inner.sync.refresh().await;

		if !self.config().downloads_enabled() {
			self.badge(tab, Badge::alert("X", "Download disabled"));
			self.emit(tab, DownloadEvent::error(Error::DownloadDisabled.to_string()));
			return Err(Error::DownloadDisabled);
		}

		if let Some(previous) = self.inner.sessions.get(tab) {
			self.teardown(&previous).await;
		}
		let session = Arc::new(TabSession::new(tab));
		session.state().pending_collects = 1;
		self.inner.sessions.insert(Arc::clone(&session));
		tracing::info!(target = "lid", tab, "attaching");

		let root = Debuggee::tab(tab);
		let inspector = &self.inner.platform.inspector;
		let result: Result<ResourceTree> = async {
			inspector.attach_default(&root).await?;
			inspector.set_auto_attach(&root).await?;
			inspector.enable_page(&root).await?;
			inspector.resource_tree(&root).await
		}
		.await;
		session.state().pending_collects -= 1;

		match result {
			Ok(tree) => {
				if session.is_stopped() {
					// Stopped while attaching; the teardown ran before we attached.
					let _ = inspector.detach(&root).await;
					return Ok(());
				}
				self.collect(&session, root, &tree.frame_tree);
				Ok(())
			}
			Err(err) => {
				tracing::warn!(target = "lid", tab, error = %err, "attach failed");
				self.badge(tab, Badge::alert("E", format!("Error: {err}")));
				self.emit(tab, DownloadEvent::error(err.to_string()));
				self.teardown(&session).await;
				Err(err)
			}
		}
	}

	/// Tears down the session of `tab`. Returns `false` when there was none.
	pub async fn stop(&self, tab: TabId) -> bool {
		match self.inner.sessions.get(tab) {
			Some(session) => {
				self.teardown(&session).await;
				true
			}
			None => false,
		}
	}

	/// Handles a child target reported by the inspection API.
	pub async fn on_target_attached(&self, tab: TabId, session_id: &str) {
		let Some(session) = self.inner.sessions.get(tab) else {
			return;
		};
		let target = Debuggee::child(tab, session_id);
		{
			let mut state = session.state();
			if state.stopped {
				return;
			}
			state.pending_collects += 1;
			state.entries.entry(target.clone()).or_default();
		}

		let inspector = &self.inner.platform.inspector;
		let result: Result<ResourceTree> = async {
			inspector.enable_page(&target).await?;
			inspector.resource_tree(&target).await
		}
		.await;
		session.state().pending_collects -= 1;

		match result {
			Ok(tree) => self.collect(&session, target, &tree.frame_tree),
			Err(err) => {
				tracing::debug!(target = "lid", tab, session_id, error = %err, "child target collect failed");
				self.schedule_download(&session);
			}
		}
	}

	/// The browser dropped the inspection session of `tab`.
	pub async fn on_debugger_detached(&self, tab: TabId) {
		if self.stop(tab).await {
			tracing::info!(target = "lid", tab, "debugger detached, session stopped");
		}
	}

	/// Walks `tree` and queues every new image resource under `target`.
	fn collect(&self, session: &Arc<TabSession>, target: Debuggee, tree: &FrameTree) {
		let mut found = Vec::new();
		walk(tree, &mut found);

		let (added, total) = {
			let mut state = session.state();
			if state.stopped {
				return;
			}
			if let Some(finish) = state.finish.take() {
				finish.abort();
			}
			if !state.downloading {
				state.phase = Phase::Collecting;
			}

			let state = &mut *state;
			let queue = state.entries.entry(target.clone()).or_default();
			let mut added = 0;
			for (frame_id, resource) in found {
				if !state.seen.insert(ResourceEntry::dedup_key(resource)) {
					continue;
				}
				queue.push_back(ResourceEntry {
					target: target.clone(),
					frame_id: frame_id.to_string(),
					resource: resource.clone(),
				});
				added += 1;
			}
			state.total += added;
			(added, state.total)
		};

		tracing::info!(target = "lid", tab = session.tab, frame = %tree.frame.url, added, total, "collected");
		self.emit(session.tab, DownloadEvent::DownloadStarted { total });
		self.schedule_download(session);
	}

	fn schedule_download(&self, session: &Arc<TabSession>) {
		let this = self.clone();
		let session = Arc::clone(session);
		let settle = self.inner.timing.settle;
		tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(settle) => {}
				_ = session.cancel.cancelled() => return,
			}
			this.download(&session).await;
		});
	}

	/// Processes queued entries until none are left. No-op while another
	/// pass runs.
	async fn download(&self, session: &Arc<TabSession>) {
		{
			let mut state = session.state();
			if state.stopped || state.downloading {
				return;
			}
			state.downloading = true;
			state.phase = Phase::Downloading;
		}

		loop {
			let batch: Vec<ResourceEntry> = {
				let state = session.state();
				state.entries.values().flat_map(|q| q.iter().cloned()).collect()
			};

			for entry in batch {
				if self.interrupted(session) || !self.step(session, entry).await {
					self.teardown(session).await;
					return;
				}
			}

			let more = session.state().has_queued();
			if !more {
				break;
			}
		}

		session.state().downloading = false;
		self.schedule_finish(session);
	}

	/// Takes one entry. Returns `false` when the session was cancelled.
	async fn step(&self, session: &Arc<TabSession>, entry: ResourceEntry) -> bool {
		let tab = session.tab;
		let (current, total) = {
			let mut state = session.state();
			if let Some(queue) = state.entries.get_mut(&entry.target) {
				queue.pop_front();
			}
			state.counter += 1;
			(state.counter, state.total)
		};
		let progress = percent(current, total);
		let url = entry.resource.url.clone();

		self.badge(tab, Badge::text(format!("{progress}%")));
		self.emit(
			tab,
			DownloadEvent::DownloadProgress {
				current,
				total,
				progress,
				url: url.clone(),
			},
		);

		let config = self.config().get();
		if !self.inner.filter.get(&config.regex_patterns).matches(&url) {
			tracing::debug!(target = "lid", tab, %url, "filtered out");
			return true;
		}

		match self.persist(session, &entry, &config).await {
			Ok(true) => {}
			Ok(false) => return false,
			Err(err) => {
				tracing::warn!(target = "lid", tab, %url, error = %err, "resource failed");
				self.emit(
					tab,
					DownloadEvent::DownloadError {
						url: Some(url),
						error: err.to_string(),
					},
				);
				return true;
			}
		}

		tokio::select! {
			_ = tokio::time::sleep(Duration::from_millis(config.wait_time_ms)) => true,
			_ = session.cancel.cancelled() => false,
		}
	}

	/// Fetches and saves one entry. `Ok(false)` when cancelled mid-way.
	async fn persist(&self, session: &Arc<TabSession>, entry: &ResourceEntry, config: &Config) -> Result<bool> {
		let platform = &self.inner.platform;
		let url = &entry.resource.url;

		let content = platform
			.inspector
			.resource_content(&entry.target, &entry.frame_id, url)
			.await
			.map_err(|err| Error::FetchFailed {
				url: url.clone(),
				message: err.to_string(),
			})?;

		if self.interrupted(session) {
			return Ok(false);
		}

		let mime_type = entry.resource.mime_type.clone();
		let meta = naming::guess(url, Some(&mime_type), None);
		let filename = FileMeta {
			name: naming::sanitize(&meta.name),
			..meta
		}
		.file_name();
		let file = FilePayload {
			filename,
			mime_type,
			url: url.clone(),
			content,
		};

		if config.send_to_remote {
			match platform.uploader.upload(config.server_port, &file).await {
				Ok(()) => self.emit(
					session.tab,
					DownloadEvent::FileUploaded {
						filename: file.filename.clone(),
						url: url.clone(),
					},
				),
				Err(err) => {
					tracing::warn!(target = "lid", %url, error = %err, "upload failed, saving locally");
					self.emit(
						session.tab,
						DownloadEvent::UploadError {
							filename: file.filename.clone(),
							url: url.clone(),
							error: err.to_string(),
						},
					);
					platform.downloads.save(None, &file).await?;
				}
			}
		} else {
			let path = match config.output_path.as_deref() {
				Some(dir) if !dir.is_empty() => format!("{dir}/{}", file.filename),
				_ => file.filename.clone(),
			};
			if let Err(err) = platform.downloads.save(Some(&path), &file).await {
				tracing::warn!(target = "lid", %path, error = %err, "save failed, retrying without path");
				platform.downloads.save(None, &file).await?;
			}
		}
		Ok(true)
	}

	/// Arms the completion timer once nothing is queued, running or pending.
	fn schedule_finish(&self, session: &Arc<TabSession>) {
		let mut state = session.state();
		if state.stopped || state.downloading || state.pending_collects > 0 || state.has_queued() {
			return;
		}
		if let Some(previous) = state.finish.take() {
			previous.abort();
		}
		state.phase = Phase::Finishing;

		let this = self.clone();
		let s = Arc::clone(session);
		let grace = self.inner.timing.grace;
		state.finish = Some(tokio::spawn(async move {
			tokio::select! {
				_ = tokio::time::sleep(grace) => {}
				_ = s.cancel.cancelled() => return,
			}
			this.complete(&s).await;
		}));
	}

	async fn complete(&self, session: &Arc<TabSession>) {
		let (total, downloaded) = {
			let mut state = session.state();
			if state.stopped || state.downloading || state.pending_collects > 0 || state.has_queued() {
				return;
			}
			// Detach our own handle so a late collect cannot abort the teardown.
			state.finish = None;
			(state.total, state.counter)
		};

		tracing::info!(target = "lid", tab = session.tab, total, downloaded, "download completed");
		self.emit(session.tab, DownloadEvent::DownloadCompleted { total, downloaded });
		self.teardown(session).await;
	}

	/// Ends `session`. Idempotent: only the first call has any effect.
	pub async fn teardown(&self, session: &Arc<TabSession>) {
		let finish = {
			let mut state = session.state();
			if state.stopped {
				return;
			}
			state.stopped = true;
			if state.phase != Phase::Finishing {
				state.phase = Phase::Aborted;
			}
			state.finish.take()
		};
		session.cancel.cancel();
		if let Some(finish) = finish {
			finish.abort();
		}

		let tab = session.tab;
		self.inner.sessions.remove(session);
		if let Err(err) = self.inner.platform.inspector.detach(&Debuggee::tab(tab)).await {
			tracing::debug!(target = "lid", tab, error = %err, "detach failed");
		}
		self.badge(tab, Badge::clear());
		self.emit(tab, DownloadEvent::DownloadStopped {});
		tracing::info!(target = "lid", tab, "session stopped");
	}

	fn interrupted(&self, session: &Arc<TabSession>) -> bool {
		session.cancel.is_cancelled() || !self.inner.sessions.is_current(session)
	}

	fn emit(&self, tab: TabId, event: DownloadEvent) {
		self.inner.platform.events.emit(tab, event);
	}

	fn badge(&self, tab: TabId, badge: Badge) {
		self.inner.platform.indicator.badge(tab, badge);
	}
}

impl std::fmt::Debug for Collector {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Collector")
			.field("sessions", &self.inner.sessions.len())
			.field("timing", &self.inner.timing)
			.finish()
	}
}

/// Whether a resource is an image by type or by URL suffix.
pub fn is_candidate(resource: &FrameResource) -> bool {
	if resource.resource_type == "Image" {
		return true;
	}
	let url = resource.url.to_ascii_lowercase();
	IMAGE_EXTENSIONS.iter().any(|ext| url.ends_with(ext))
}

/// Depth-first: a frame's own resources, then its children.
fn walk<'a>(tree: &'a FrameTree, out: &mut Vec<(&'a str, &'a FrameResource)>) {
	for resource in &tree.resources {
		if is_candidate(resource) {
			out.push((tree.frame.id.as_str(), resource));
		}
	}
	for child in &tree.child_frames {
		walk(child, out);
	}
}

fn percent(current: usize, total: usize) -> u32 {
	if total == 0 {
		return 100;
	}
	((current as f64 / total as f64) * 100.0).round() as u32
}

#[cfg(test)]
mod tests {
	use lid_protocol::Frame;

	use super::*;

	fn resource(url: &str, kind: &str) -> FrameResource {
		FrameResource {
			url: url.into(),
			resource_type: kind.into(),
			mime_type: String::new(),
			content_size: None,
		}
	}

	#[test]
	fn candidates_by_type_or_suffix() {
		assert!(is_candidate(&resource("https://x/pixel", "Image")));
		assert!(is_candidate(&resource("https://x/LOGO.SVG", "Other")));
		assert!(!is_candidate(&resource("https://x/app.js", "Script")));
		assert!(!is_candidate(&resource("https://x/a.png?v=2", "Other")));
	}

	#[test]
	fn walk_is_depth_first() {
		let tree = FrameTree {
			frame: Frame {
				id: "root".into(),
				url: String::new(),
			},
			resources: vec![resource("https://x/1.png", "Image"), resource("https://x/s.css", "Stylesheet")],
			child_frames: vec![
				FrameTree {
					frame: Frame {
						id: "a".into(),
						url: String::new(),
					},
					resources: vec![resource("https://x/2.png", "Image")],
					child_frames: vec![FrameTree {
						frame: Frame {
							id: "a1".into(),
							url: String::new(),
						},
						resources: vec![resource("https://x/3.png", "Image")],
						child_frames: vec![],
					}],
				},
				FrameTree {
					frame: Frame {
						id: "b".into(),
						url: String::new(),
					},
					resources: vec![resource("https://x/4.png", "Image")],
					child_frames: vec![],
				},
			],
		};

		let mut out = Vec::new();
		walk(&tree, &mut out);
		let frames: Vec<&str> = out.iter().map(|(f, _)| *f).collect();
		assert_eq!(frames, ["root", "a", "a1", "b"]);
	}

	#[test]
	fn percent_rounds() {
		assert_eq!(percent(1, 3), 33);
		assert_eq!(percent(2, 3), 67);
		assert_eq!(percent(3, 3), 100);
		assert_eq!(percent(0, 0), 100);
	}
}
