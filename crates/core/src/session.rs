//! Per-tab download sessions and their registry.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use indexmap::IndexMap;
use lid_protocol::{ActiveInfo, Debuggee, FrameResource, TabId};
use parking_lot::{Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Lifecycle phase of a [`TabSession`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	/// Inspection session being set up.
	Attaching,
	/// Frame trees being walked; entries accumulate.
	Collecting,
	/// The download task is taking entries.
	Downloading,
	/// Everything processed; completion pending after the grace period.
	Finishing,
	/// Torn down before completion.
	Aborted,
}

/// One resource queued for download.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceEntry {
	pub target: Debuggee,
	pub frame_id: String,
	pub resource: FrameResource,
}

impl ResourceEntry {
	/// Key under which duplicates are detected: URL plus reported size.
	pub fn dedup_key(resource: &FrameResource) -> String {
		match resource.content_size {
			Some(size) if size != 0.0 => format!("{}_{size}", resource.url),
			_ => format!("{}_unknown", resource.url),
		}
	}
}

/// Mutable session state; guarded by [`TabSession::state`].
#[derive(Debug)]
pub(crate) struct SessionState {
	/// Per-target queues, in the order targets were first seen.
	pub entries: IndexMap<Debuggee, VecDeque<ResourceEntry>>,
	pub seen: HashSet<String>,
	/// Entries taken so far (processed, filtered or failed).
	pub counter: usize,
	/// Entries discovered so far.
	pub total: usize,
	pub downloading: bool,
	/// Collect passes whose frame tree has not arrived yet.
	pub pending_collects: usize,
	pub phase: Phase,
	pub finish: Option<JoinHandle<()>>,
	pub stopped: bool,
}

impl SessionState {
	pub fn has_queued(&self) -> bool {
		self.entries.values().any(|q| !q.is_empty())
	}
}

/// Download session of one tab.
#[derive(Debug)]
pub struct TabSession {
	pub tab: TabId,
	pub cancel: CancellationToken,
	state: Mutex<SessionState>,
}

impl TabSession {
	pub fn new(tab: TabId) -> Self {
		Self {
			tab,
			cancel: CancellationToken::new(),
			state: Mutex::new(SessionState {
				entries: IndexMap::new(),
				seen: HashSet::new(),
				counter: 0,
				total: 0,
				downloading: false,
				pending_collects: 0,
				phase: Phase::Attaching,
				finish: None,
				stopped: false,
			}),
		}
	}

	/// Locks the state. Never hold the guard across an await.
	pub(crate) fn state(&self) -> MutexGuard<'_, SessionState> {
		self.state.lock()
	}

	pub fn phase(&self) -> Phase {
		self.state.lock().phase
	}

	pub fn info(&self) -> ActiveInfo {
		let state = self.state.lock();
		ActiveInfo {
			counter: state.counter,
			total: state.total,
			downloading: state.downloading,
		}
	}

	pub fn is_stopped(&self) -> bool {
		self.state.lock().stopped
	}
}

/// Active sessions keyed by tab.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
	sessions: Arc<DashMap<TabId, Arc<TabSession>>>,
}

impl SessionRegistry {
	/// Registers `session`, returning the one it replaced.
	pub fn insert(&self, session: Arc<TabSession>) -> Option<Arc<TabSession>> {
		self.sessions.insert(session.tab, session)
	}

	pub fn get(&self, tab: TabId) -> Option<Arc<TabSession>> {
		self.sessions.get(&tab).map(|s| Arc::clone(s.value()))
	}

	/// Removes `session` only if it is still the registered one for its tab.
	pub fn remove(&self, session: &Arc<TabSession>) -> bool {
		self.sessions
			.remove_if(&session.tab, |_, current| Arc::ptr_eq(current, session))
			.is_some()
	}

	/// Whether `session` is the registered one for its tab.
	pub fn is_current(&self, session: &Arc<TabSession>) -> bool {
		self.sessions
			.get(&session.tab)
			.is_some_and(|current| Arc::ptr_eq(current.value(), session))
	}

	pub fn contains(&self, tab: TabId) -> bool {
		self.sessions.contains_key(&tab)
	}

	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}

	pub fn len(&self) -> usize {
		self.sessions.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn resource(url: &str, size: Option<f64>) -> FrameResource {
		FrameResource {
			url: url.into(),
			resource_type: "Image".into(),
			mime_type: "image/png".into(),
			content_size: size,
		}
	}

	#[test]
	fn dedup_key_uses_size_or_unknown() {
		assert_eq!(
			ResourceEntry::dedup_key(&resource("https://x/a.png", Some(1234.0))),
			"https://x/a.png_1234"
		);
		assert_eq!(
			ResourceEntry::dedup_key(&resource("https://x/a.png", None)),
			"https://x/a.png_unknown"
		);
		assert_eq!(
			ResourceEntry::dedup_key(&resource("https://x/a.png", Some(0.0))),
			"https://x/a.png_unknown"
		);
	}

	#[test]
	fn registry_removes_only_current_session() {
		let registry = SessionRegistry::default();
		let old = Arc::new(TabSession::new(1));
		let new = Arc::new(TabSession::new(1));

		registry.insert(Arc::clone(&old));
		registry.insert(Arc::clone(&new));

		assert!(!registry.is_current(&old));
		assert!(!registry.remove(&old));
		assert!(registry.contains(1));
		assert!(registry.remove(&new));
		assert!(registry.is_empty());
	}

	#[test]
	fn new_session_starts_attaching() {
		let session = TabSession::new(3);
		assert_eq!(session.phase(), Phase::Attaching);
		assert_eq!(
			session.info(),
			ActiveInfo {
				counter: 0,
				total: 0,
				downloading: false
			}
		);
	}
}
