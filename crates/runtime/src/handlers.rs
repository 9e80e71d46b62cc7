//! Event handler registry keyed by [`EventKind`].
//!
//! Handlers for one kind are kept in an [`IndexMap`] so removal is O(1) and
//! fan-out follows registration order. Dispatch clones the handler list out of
//! the lock before calling anything, so handlers may register or remove
//! handlers themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use lid_protocol::{Event, EventKind};
use parking_lot::Mutex;
use serde_json::Value;

/// Unique identifier for event handlers.
pub type HandlerId = u64;

static NEXT_HANDLER_ID: AtomicU64 = AtomicU64::new(1);

/// Returns a new globally-unique handler ID.
pub fn next_handler_id() -> HandlerId {
	NEXT_HANDLER_ID.fetch_add(1, Ordering::SeqCst)
}

/// Error type handlers may return; it is logged and otherwise ignored.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Handler function: event data → `Result<()>`.
pub type HandlerFn = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

type HandlerTable = HashMap<EventKind, IndexMap<HandlerId, HandlerFn>>;

/// Multi-subscriber registry of event handlers.
#[derive(Clone, Default)]
pub struct EventRegistry {
	handlers: Arc<Mutex<HandlerTable>>,
}

impl EventRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` for `kind`. The same closure may be registered
	/// more than once; each registration gets its own id.
	pub fn on<F>(&self, kind: EventKind, handler: F) -> HandlerId
	where
		F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		let id = next_handler_id();
		self.handlers
			.lock()
			.entry(kind)
			.or_default()
			.insert(id, Arc::new(handler));
		id
	}

	/// Removes one registration. Returns `false` if it was not present.
	pub fn off(&self, kind: EventKind, id: HandlerId) -> bool {
		let mut table = self.handlers.lock();
		let Some(map) = table.get_mut(&kind) else {
			return false;
		};
		let removed = map.shift_remove(&id).is_some();
		if map.is_empty() {
			table.remove(&kind);
		}
		removed
	}

	/// Number of handlers registered for `kind`.
	pub fn count(&self, kind: EventKind) -> usize {
		self.handlers.lock().get(&kind).map_or(0, IndexMap::len)
	}

	/// Invokes every handler for the event's kind. Returns how many ran.
	pub fn emit(&self, event: &Event) -> usize {
		let handlers: Vec<(HandlerId, HandlerFn)> = match self.handlers.lock().get(&event.event) {
			Some(map) => map.iter().map(|(id, h)| (*id, Arc::clone(h))).collect(),
			None => return 0,
		};

		for (id, handler) in &handlers {
			if let Err(err) = handler(&event.data) {
				tracing::warn!(
					target = "lid",
					event = %event.event,
					handler = id,
					error = %err,
					"event handler failed"
				);
			}
		}
		handlers.len()
	}

	/// Registers a handler that is removed when the returned guard drops.
	pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
	where
		F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
	{
		let id = self.on(kind, handler);
		Subscription {
			kind,
			id,
			table: Arc::downgrade(&self.handlers),
		}
	}
}

impl std::fmt::Debug for EventRegistry {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let table = self.handlers.lock();
		f.debug_map()
			.entries(table.iter().map(|(k, v)| (k, v.len())))
			.finish()
	}
}

/// RAII handle that unregisters an event handler on drop.
///
/// Holds a weak reference to the registry, so dropping after the registry is
/// gone is a no-op.
pub struct Subscription {
	kind: EventKind,
	id: HandlerId,
	table: Weak<Mutex<HandlerTable>>,
}

impl Subscription {
	pub fn id(&self) -> HandlerId {
		self.id
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(table) = self.table.upgrade() {
			let mut table = table.lock();
			if let Some(map) = table.get_mut(&self.kind) {
				map.shift_remove(&self.id);
				if map.is_empty() {
					table.remove(&self.kind);
				}
			}
		}
	}
}

impl std::fmt::Debug for Subscription {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Subscription")
			.field("kind", &self.kind)
			.field("id", &self.id)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::AtomicUsize;

	use serde_json::json;

	use super::*;

	fn event(kind: EventKind) -> Event {
		Event {
			event: kind,
			data: json!({"total": 1}),
		}
	}

	#[test]
	fn test_handler_id_increments() {
		let id1 = next_handler_id();
		let id2 = next_handler_id();
		assert!(id2 > id1);
	}

	#[test]
	fn test_duplicate_registration_runs_twice() {
		let registry = EventRegistry::new();
		let calls = Arc::new(AtomicUsize::new(0));

		let ids: Vec<HandlerId> = (0..2)
			.map(|_| {
				let calls = Arc::clone(&calls);
				registry.on(EventKind::DownloadStarted, move |_| {
					calls.fetch_add(1, Ordering::SeqCst);
					Ok(())
				})
			})
			.collect();
		assert_ne!(ids[0], ids[1]);

		assert_eq!(registry.emit(&event(EventKind::DownloadStarted)), 2);
		assert_eq!(calls.load(Ordering::SeqCst), 2);

		assert!(registry.off(EventKind::DownloadStarted, ids[0]));
		registry.emit(&event(EventKind::DownloadStarted));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[test]
	fn test_failing_handler_does_not_stop_fan_out() {
		let registry = EventRegistry::new();
		let reached = Arc::new(AtomicUsize::new(0));

		registry.on(EventKind::DownloadError, |_| Err("boom".into()));
		let r = Arc::clone(&reached);
		registry.on(EventKind::DownloadError, move |data| {
			assert_eq!(data["total"], 1);
			r.fetch_add(1, Ordering::SeqCst);
			Ok(())
		});

		assert_eq!(registry.emit(&event(EventKind::DownloadError)), 2);
		assert_eq!(reached.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn test_unknown_kinds_reach_nobody() {
		let registry = EventRegistry::new();
		registry.on(EventKind::DownloadStarted, |_| Ok(()));
		assert_eq!(registry.emit(&event(EventKind::Other)), 0);
	}

	#[test]
	fn test_off_unknown_id() {
		let registry = EventRegistry::new();
		assert!(!registry.off(EventKind::DownloadStarted, 42));
	}

	#[test]
	fn test_subscription_drop_unregisters() {
		let registry = EventRegistry::new();
		{
			let _sub = registry.subscribe(EventKind::ConfigUpdated, |_| Ok(()));
			assert_eq!(registry.count(EventKind::ConfigUpdated), 1);
		}
		assert_eq!(registry.count(EventKind::ConfigUpdated), 0);
	}

	#[test]
	fn test_subscription_outlives_registry() {
		let registry = EventRegistry::new();
		let sub = registry.subscribe(EventKind::ConfigUpdated, |_| Ok(()));
		drop(registry);
		drop(sub);
	}
}
