//! URL filter built from the configured pattern list.

use std::sync::Arc;

use lid_protocol::Patterns;
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;

use crate::error::Error;

/// Compiled form of [`Patterns`].
///
/// - no patterns at all: every URL passes
/// - otherwise a URL passes when any valid pattern matches it
///
/// Non-string, blank and malformed entries are skipped with a warning. A list
/// made only of such entries therefore admits nothing.
#[derive(Debug, Clone)]
pub struct PatternFilter {
	regexes: Vec<Regex>,
	unrestricted: bool,
	skipped: usize,
}

impl PatternFilter {
	pub fn compile(patterns: &Patterns) -> Self {
		let mut regexes = Vec::new();
		let mut skipped = 0;

		for raw in patterns.iter() {
			match compile_one(raw) {
				Ok(Some(regex)) => regexes.push(regex),
				Ok(None) => skipped += 1,
				Err(err) => {
					tracing::warn!(target = "lid", error = %err, "skipping filter pattern");
					skipped += 1;
				}
			}
		}

		Self {
			regexes,
			unrestricted: patterns.is_empty(),
			skipped,
		}
	}

	pub fn matches(&self, url: &str) -> bool {
		self.unrestricted || self.regexes.iter().any(|re| re.is_match(url))
	}

	/// Entries that were given but could not be used.
	pub fn skipped(&self) -> usize {
		self.skipped
	}
}

/// Last compiled filter, reused while the pattern list stays the same.
#[derive(Debug, Default)]
pub struct FilterCache {
	cached: Mutex<Option<(Patterns, Arc<PatternFilter>)>>,
}

impl FilterCache {
	/// Returns the filter for `patterns`, compiling only when they changed.
	pub fn get(&self, patterns: &Patterns) -> Arc<PatternFilter> {
		let mut cached = self.cached.lock();
		if let Some((source, filter)) = cached.as_ref() {
			if source == patterns {
				return Arc::clone(filter);
			}
		}
		let filter = Arc::new(PatternFilter::compile(patterns));
		*cached = Some((patterns.clone(), Arc::clone(&filter)));
		filter
	}
}

/// `Ok(None)` for blank strings, which are skipped silently.
fn compile_one(raw: &Value) -> Result<Option<Regex>, Error> {
	let Value::String(pattern) = raw else {
		return Err(Error::InvalidPattern {
			pattern: raw.to_string(),
			message: "not a string".into(),
		});
	};
	let pattern = pattern.trim();
	if pattern.is_empty() {
		return Ok(None);
	}
	Regex::new(pattern)
		.map(Some)
		.map_err(|e| Error::InvalidPattern {
			pattern: pattern.to_string(),
			message: e.to_string(),
		})
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	fn filter(value: Value) -> PatternFilter {
		PatternFilter::compile(&Patterns::from_value(value))
	}

	#[test]
	fn empty_list_admits_everything() {
		let f = filter(json!([]));
		assert!(f.matches("https://example.com/a.gif"));
		let f = filter(json!([[], [[]]]));
		assert!(f.matches("https://example.com/a.gif"));
	}

	#[test]
	fn any_pattern_may_match() {
		let f = filter(json!(["\\.png$", "cdn\\.example"]));
		assert!(f.matches("https://x.test/a.png"));
		assert!(f.matches("https://cdn.example/a.gif"));
		assert!(!f.matches("https://x.test/a.gif"));
	}

	#[test]
	fn patterns_are_trimmed() {
		let f = filter(json!(["  \\.png$  "]));
		assert!(f.matches("https://x.test/a.png"));
	}

	#[test]
	fn invalid_entries_are_skipped() {
		let f = filter(json!(["(", 42, null, "", "\\.jpg$"]));
		assert_eq!(f.skipped(), 4);
		assert!(f.matches("https://x.test/a.jpg"));
		assert!(!f.matches("https://x.test/a.png"));
	}

	#[test]
	fn cache_recompiles_only_on_change() {
		let cache = FilterCache::default();
		let png = Patterns::new(["\\.png$"]);

		let first = cache.get(&png);
		let again = cache.get(&png.clone());
		assert!(Arc::ptr_eq(&first, &again));

		let changed = cache.get(&Patterns::new(["\\.jpg$"]));
		assert!(!Arc::ptr_eq(&first, &changed));
		assert!(changed.matches("https://x.test/a.jpg"));
		assert!(!changed.matches("https://x.test/a.png"));
	}

	#[test]
	fn only_invalid_entries_admit_nothing() {
		let f = filter(json!(["(", ["  "]]));
		assert!(!f.matches("https://x.test/a.png"));
	}
}
