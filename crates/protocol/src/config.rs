//! Downloader configuration as exchanged with the control plane and the page.
//!
//! Field names follow the camelCase wire format. Inputs written by older
//! extension builds (`regexPattern`, `waitTime`, `sendToRust`, `openDownload`)
//! are accepted as aliases.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Default control-plane port.
pub const DEFAULT_SERVER_PORT: u16 = 8080;
/// Default delay between two downloaded entries.
pub const DEFAULT_WAIT_TIME_MS: u64 = 1000;

/// Process-wide downloader configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	/// URL filters; an empty list admits every resource.
	#[serde(alias = "regexPattern")]
	pub regex_patterns: Patterns,
	/// Sub-directory of the downloads folder used for local saves.
	pub output_path: Option<String>,
	/// Port of the local control plane.
	pub server_port: u16,
	/// Pause after each persisted entry.
	#[serde(alias = "waitTime")]
	pub wait_time_ms: u64,
	/// Forward files to the control plane's `/upload` instead of saving locally.
	#[serde(alias = "sendToRust")]
	pub send_to_remote: bool,
	/// Policy switch; when false no download session may start.
	#[serde(alias = "openDownload")]
	pub downloads_enabled: bool,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			regex_patterns: Patterns::default(),
			output_path: None,
			server_port: DEFAULT_SERVER_PORT,
			wait_time_ms: DEFAULT_WAIT_TIME_MS,
			send_to_remote: false,
			downloads_enabled: true,
		}
	}
}

impl Config {
	/// Merges the fields present in `patch`; absent fields keep their value.
	pub fn apply(&mut self, patch: ConfigPatch) {
		if let Some(patterns) = patch.regex_patterns {
			self.regex_patterns = patterns;
		}
		if let Some(path) = patch.output_path {
			self.output_path = Some(path);
		}
		if let Some(port) = patch.server_port {
			self.server_port = port;
		}
		if let Some(wait) = patch.wait_time_ms {
			self.wait_time_ms = wait;
		}
		if let Some(send) = patch.send_to_remote {
			self.send_to_remote = send;
		}
		if let Some(enabled) = patch.downloads_enabled {
			self.downloads_enabled = enabled;
		}
	}
}

/// Partial [`Config`]; `None` means "not present in the source document".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
	#[serde(alias = "regexPattern", skip_serializing_if = "Option::is_none")]
	pub regex_patterns: Option<Patterns>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_path: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub server_port: Option<u16>,
	#[serde(alias = "waitTime", skip_serializing_if = "Option::is_none")]
	pub wait_time_ms: Option<u64>,
	#[serde(alias = "sendToRust", skip_serializing_if = "Option::is_none")]
	pub send_to_remote: Option<bool>,
	#[serde(alias = "openDownload", skip_serializing_if = "Option::is_none")]
	pub downloads_enabled: Option<bool>,
}

/// Options a page passes with `startDownload`.
///
/// Only the per-run knobs are accepted here; port and policy come from the
/// control plane.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StartOptions {
	#[serde(alias = "regexPattern", skip_serializing_if = "Option::is_none")]
	pub regex_patterns: Option<Patterns>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub output_path: Option<String>,
	#[serde(alias = "sendToRust", skip_serializing_if = "Option::is_none")]
	pub send_to_remote: Option<bool>,
	#[serde(alias = "waitTime", skip_serializing_if = "Option::is_none")]
	pub wait_time_ms: Option<u64>,
}

impl StartOptions {
	/// Fills every unset field of `self` from `defaults`.
	pub fn or(self, defaults: &StartOptions) -> StartOptions {
		StartOptions {
			regex_patterns: self.regex_patterns.or_else(|| defaults.regex_patterns.clone()),
			output_path: self.output_path.or_else(|| defaults.output_path.clone()),
			send_to_remote: self.send_to_remote.or(defaults.send_to_remote),
			wait_time_ms: self.wait_time_ms.or(defaults.wait_time_ms),
		}
	}

	pub fn into_patch(self) -> ConfigPatch {
		ConfigPatch {
			regex_patterns: self.regex_patterns,
			output_path: self.output_path,
			send_to_remote: self.send_to_remote,
			wait_time_ms: self.wait_time_ms,
			..ConfigPatch::default()
		}
	}
}

/// Raw filter pattern list.
///
/// Deserializes from a single string, an array, or nested arrays, which are
/// flattened. Members are kept as raw JSON so that non-string entries can be
/// reported and skipped when the filter is compiled instead of failing the
/// whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Patterns(Vec<Value>);

impl Patterns {
	pub fn new<I, S>(patterns: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		Self(patterns.into_iter().map(|p| Value::String(p.into())).collect())
	}

	/// Flattens `value` into a pattern list. `null` and a lone blank string
	/// both mean "no filter".
	pub fn from_value(value: Value) -> Self {
		let mut out = Vec::new();
		match value {
			Value::Null => {}
			Value::String(s) if s.trim().is_empty() => {}
			other => flatten_into(other, &mut out),
		}
		Self(out)
	}

	pub fn iter(&self) -> impl Iterator<Item = &Value> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

fn flatten_into(value: Value, out: &mut Vec<Value>) {
	match value {
		Value::Array(items) => {
			for item in items {
				flatten_into(item, out);
			}
		}
		other => out.push(other),
	}
}

impl<'de> Deserialize<'de> for Patterns {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		Value::deserialize(deserializer).map(Self::from_value)
	}
}
