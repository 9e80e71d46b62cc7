//! File name inference for downloaded resources.

use percent_encoding::percent_decode_str;

/// MIME types whose subtype is not the customary extension.
const MIME_EXTENSIONS: &[(&str, &str)] = &[
	("image/jpeg", "jpg"),
	("application/x-javascript", "js"),
	("application/atom+xml", "atom"),
	("application/rss+xml", "rss"),
	("text/plain", "txt"),
	("text/javascript", "js"),
	("image/x-icon", "ico"),
	("image/x-ms-bmp", "bmp"),
	("image/svg+xml", "svg"),
	("application/java-archive", "jar"),
	("application/msword", "doc"),
	("application/postscript", "ps"),
	("application/vnd.ms-excel", "xls"),
	("application/vnd.ms-powerpoint", "ppt"),
	("application/vnd.apple.mpegurl", "m3u8"),
	("application/dash+xml", "mpd"),
	("application/x-mpegURL", "m3u8"),
	("application/x-7z-compressed", "7z"),
	("application/x-rar-compressed", "rar"),
	("application/x-shockwave-flash", "swf"),
	("application/x-xpinstall", "xpi"),
	("application/xhtml+xml", "xhtml"),
	("application/octet-stream", "bin"),
	("application/binary", "exe"),
	("audio/mpeg", "mp3"),
	("audio/mpegurl", "m3u8"),
	("audio/x-mpegurl", "m3u8"),
	("video/3gpp", "3gp"),
	("video/mpeg", "mpg"),
	("video/quicktime", "mov"),
	("video/x-flv", "flv"),
	("video/x-mng", "mng"),
	("video/x-ms-asf", "asf"),
	("video/x-ms-wmv", "wmv"),
	("video/x-msvideo", "avi"),
];

const MAX_SEGMENT_CHARS: usize = 100;
const MAX_EXT_CHARS: usize = 15;
const MAX_TRAILING_EXT_CHARS: usize = 6;

/// Characters that may not appear in a saved file name.
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Inferred name parts of a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
	pub name: String,
	pub ext: String,
	pub mime: String,
}

impl FileMeta {
	/// `name.ext`, or just `name` when no extension could be inferred.
	pub fn file_name(&self) -> String {
		if self.ext.is_empty() {
			self.name.clone()
		} else {
			format!("{}.{}", self.name, self.ext)
		}
	}
}

/// Extension for `mime`, from the table or the MIME subtype.
pub fn extension_for(mime: &str) -> String {
	let essence = mime.split(';').next().unwrap_or_default().trim();
	if let Some((_, ext)) = MIME_EXTENSIONS.iter().find(|(m, _)| *m == essence) {
		return (*ext).to_string();
	}
	essence
		.split_once('/')
		.map(|(_, subtype)| subtype.to_string())
		.unwrap_or_default()
}

/// Infers name, extension and MIME type.
///
/// A `Content-Disposition` file name wins over the URL. `data:` URLs are
/// named `data_url`. Otherwise the last path segment is used, `unknown` when
/// empty. A trailing `.ext` of up to six characters is split off; failing
/// that the extension comes from `content_type`.
pub fn guess(url: &str, content_type: Option<&str>, disposition: Option<&str>) -> FileMeta {
	let href = url.split('#').next().unwrap_or_default();
	let href = href.split('?').next().unwrap_or_default();

	let mut name = disposition.and_then(disposition_name).unwrap_or_default();

	if name.is_empty() {
		if let Some(rest) = href.strip_prefix("data:") {
			let mime = rest
				.split([';', ','])
				.next()
				.unwrap_or_default()
				.to_string();
			return FileMeta {
				name: "data_url".into(),
				ext: extension_for(&mime),
				mime,
			};
		}
		let segment = href.rsplit('/').next().unwrap_or_default();
		name = if segment.is_empty() {
			"unknown".to_string()
		} else {
			last_chars(segment, MAX_SEGMENT_CHARS)
		};
	}

	let mime = content_type.unwrap_or_default().to_string();
	let (stem, ext) = match split_extension(&name) {
		Some((stem, ext)) => (stem.to_string(), ext.to_string()),
		None => (name.clone(), extension_for(&mime)),
	};

	let decoded = percent_decode_str(&stem).decode_utf8_lossy().into_owned();
	FileMeta {
		name: if decoded.is_empty() { stem } else { decoded },
		ext: ext.chars().take(MAX_EXT_CHARS).collect(),
		mime,
	}
}

/// Replaces every forbidden character with `_`.
pub fn sanitize(name: &str) -> String {
	name.chars()
		.map(|c| if FORBIDDEN.contains(&c) { '_' } else { c })
		.collect()
}

fn disposition_name(disposition: &str) -> Option<String> {
	if let Some((_, rest)) = disposition.split_once("filename*=UTF-8''") {
		let value = strip_quotes(rest.split(';').next().unwrap_or_default());
		let decoded = percent_decode_str(value).decode_utf8_lossy().into_owned();
		if !decoded.is_empty() {
			return Some(decoded);
		}
	}
	let (_, rest) = disposition.split_once("filename=")?;
	let value = strip_quotes(rest.split(';').next().unwrap_or_default());
	(!value.is_empty()).then(|| value.to_string())
}

fn strip_quotes(value: &str) -> &str {
	let value = value.strip_suffix(['"', '\'']).unwrap_or(value);
	value.strip_prefix(['"', '\'']).unwrap_or(value)
}

/// Splits `stem.ext` when `ext` is 1 to 6 characters and `stem` is not empty.
fn split_extension(name: &str) -> Option<(&str, &str)> {
	let (stem, ext) = name.rsplit_once('.')?;
	let len = ext.chars().count();
	(!stem.is_empty() && (1..=MAX_TRAILING_EXT_CHARS).contains(&len)).then_some((stem, ext))
}

fn last_chars(s: &str, n: usize) -> String {
	let count = s.chars().count();
	s.chars().skip(count.saturating_sub(n)).collect()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_segment_with_extension() {
		let meta = guess("https://x.test/img/cat.png?w=10#top", Some("image/png"), None);
		assert_eq!(meta.name, "cat");
		assert_eq!(meta.ext, "png");
		assert_eq!(meta.mime, "image/png");
		assert_eq!(meta.file_name(), "cat.png");
	}

	#[test]
	fn extension_from_content_type() {
		let meta = guess("https://x.test/avatar", Some("image/jpeg"), None);
		assert_eq!(meta.file_name(), "avatar.jpg");

		let meta = guess("https://x.test/logo", Some("image/svg+xml"), None);
		assert_eq!(meta.ext, "svg");

		let meta = guess("https://x.test/pic", Some("image/webp; q=1"), None);
		assert_eq!(meta.ext, "webp");
	}

	#[test]
	fn long_trailing_part_is_not_an_extension() {
		let meta = guess("https://x.test/file.toolongext", Some("image/png"), None);
		assert_eq!(meta.name, "file.toolongext");
		assert_eq!(meta.ext, "png");
	}

	#[test]
	fn empty_segment_is_unknown() {
		let meta = guess("https://x.test/", Some("image/gif"), None);
		assert_eq!(meta.file_name(), "unknown.gif");
	}

	#[test]
	fn data_url() {
		let meta = guess("data:image/png;base64,AAAA", None, None);
		assert_eq!(meta.name, "data_url");
		assert_eq!(meta.ext, "png");
		assert_eq!(meta.mime, "image/png");

		let meta = guess("data:image/svg+xml,<svg/>", None, None);
		assert_eq!(meta.ext, "svg");
	}

	#[test]
	fn disposition_wins() {
		let meta = guess(
			"https://x.test/download?id=1",
			Some("image/png"),
			Some("attachment; filename*=UTF-8''%E5%9B%BE.png; size=3"),
		);
		assert_eq!(meta.name, "图");
		assert_eq!(meta.ext, "png");

		let meta = guess(
			"https://x.test/download",
			None,
			Some("attachment; filename=\"report.jpeg\""),
		);
		assert_eq!(meta.file_name(), "report.jpeg");
	}

	#[test]
	fn names_are_percent_decoded() {
		let meta = guess("https://x.test/my%20cat.png", None, None);
		assert_eq!(meta.name, "my cat");
	}

	#[test]
	fn segment_is_capped() {
		let long = "a".repeat(150);
		let meta = guess(&format!("https://x.test/{long}"), None, None);
		assert_eq!(meta.name.len(), 100);
		assert_eq!(meta.ext, "");
	}

	#[test]
	fn extension_is_capped() {
		let meta = guess("https://x.test/blob", Some("application/vnd.example-very-long-type"), None);
		assert_eq!(meta.ext.chars().count(), 15);
	}

	#[test]
	fn sanitize_replaces_forbidden_characters() {
		assert_eq!(sanitize(r#"a\b/c:d*e?f"g<h>i|j"#), "a_b_c_d_e_f_g_h_i_j");
		assert_eq!(sanitize("plain-name_1"), "plain-name_1");
	}
}
