//! Process-wide configuration store.

use std::sync::Arc;

use lid_protocol::{Config, ConfigPatch};
use parking_lot::RwLock;

/// Shared [`Config`]; last write wins.
///
/// Readers take a snapshot with [`ConfigStore::get`]; the download loop does
/// so once per entry, so a concurrent update applies from the next entry on.
#[derive(Debug, Clone, Default)]
pub struct ConfigStore {
	inner: Arc<RwLock<Config>>,
}

impl ConfigStore {
	pub fn new(config: Config) -> Self {
		Self {
			inner: Arc::new(RwLock::new(config)),
		}
	}

	pub fn get(&self) -> Config {
		self.inner.read().clone()
	}

	/// Merges `patch` and returns the resulting config.
	pub fn update(&self, patch: ConfigPatch) -> Config {
		let mut config = self.inner.write();
		config.apply(patch);
		config.clone()
	}

	pub fn server_port(&self) -> u16 {
		self.inner.read().server_port
	}

	pub fn downloads_enabled(&self) -> bool {
		self.inner.read().downloads_enabled
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn update_merges_and_shares() {
		let store = ConfigStore::default();
		let other = store.clone();

		let merged = store.update(ConfigPatch {
			wait_time_ms: Some(5),
			..ConfigPatch::default()
		});
		assert_eq!(merged.wait_time_ms, 5);
		assert_eq!(other.get().wait_time_ms, 5);
		assert_eq!(other.server_port(), 8080);
		assert!(other.downloads_enabled());
	}
}
