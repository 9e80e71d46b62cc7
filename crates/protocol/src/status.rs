//! Payloads answering `getStatus` and `fetchLatestConfig`.

use serde::{Deserialize, Serialize};

use crate::config::Config;

/// Whether a tab currently owns a download session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
	Active,
	Inactive,
}

/// Progress snapshot of an active session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveInfo {
	/// Entries taken so far, including filtered and failed ones.
	pub counter: usize,
	pub total: usize,
	pub downloading: bool,
}

/// `getStatus` response data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
	pub status: SessionState,
	pub active_info: Option<ActiveInfo>,
	pub is_download_enabled: bool,
}

impl Status {
	pub fn inactive(is_download_enabled: bool) -> Self {
		Self {
			status: SessionState::Inactive,
			active_info: None,
			is_download_enabled,
		}
	}

	pub fn active(info: ActiveInfo, is_download_enabled: bool) -> Self {
		Self {
			status: SessionState::Active,
			active_info: Some(info),
			is_download_enabled,
		}
	}

	pub fn is_active(&self) -> bool {
		self.status == SessionState::Active
	}
}

/// `fetchLatestConfig` response data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigFetched {
	pub message: String,
	pub config: Config,
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn inactive_status_has_null_info() {
		let value = serde_json::to_value(Status::inactive(true)).unwrap();
		assert_eq!(
			value,
			json!({"status": "inactive", "activeInfo": null, "isDownloadEnabled": true})
		);
	}

	#[test]
	fn active_status_round_trips() {
		let status = Status::active(
			ActiveInfo {
				counter: 2,
				total: 5,
				downloading: true,
			},
			true,
		);
		let value = serde_json::to_value(&status).unwrap();
		assert_eq!(value["status"], "active");
		assert_eq!(value["activeInfo"]["counter"], 2);

		let back: Status = serde_json::from_value(value).unwrap();
		assert!(back.is_active());
		assert_eq!(back, status);
	}
}
