//! Directory-backed local saves.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::platform::{Downloads, FilePayload};

/// Saves files under a root directory; existing names get ` (n)` appended.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
	root: PathBuf,
}

impl DirectoryStore {
	pub fn new(root: impl Into<PathBuf>) -> Self {
		Self { root: root.into() }
	}

	pub fn root(&self) -> &Path {
		&self.root
	}

	/// Writes `bytes` under `name` and returns the path actually used.
	pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
		let target = self.root.join(relative_path(name)?);
		if let Some(parent) = target.parent() {
			tokio::fs::create_dir_all(parent).await?;
		}
		let path = write_unique(&target, bytes).await?;
		tracing::debug!(target = "lid", path = %path.display(), bytes = bytes.len(), "saved");
		Ok(path)
	}
}

#[async_trait]
impl Downloads for DirectoryStore {
	async fn save(&self, filename: Option<&str>, file: &FilePayload) -> Result<()> {
		let bytes = file
			.content
			.bytes()
			.map_err(|e| Error::Storage(format!("undecodable body for {}: {e}", file.url)))?;
		self.write(filename.unwrap_or(&file.filename), &bytes).await?;
		Ok(())
	}
}

/// Writes `bytes` to `target`, or to `stem (n).ext` if taken.
async fn write_unique(target: &Path, bytes: &[u8]) -> Result<PathBuf> {
	let stem = target
		.file_stem()
		.map(|s| s.to_string_lossy().into_owned())
		.unwrap_or_default();
	let ext = target
		.extension()
		.map(|e| format!(".{}", e.to_string_lossy()))
		.unwrap_or_default();

	for n in 0u32.. {
		let candidate = if n == 0 {
			target.to_path_buf()
		} else {
			target.with_file_name(format!("{stem} ({n}){ext}"))
		};
		match tokio::fs::OpenOptions::new()
			.write(true)
			.create_new(true)
			.open(&candidate)
			.await
		{
			Ok(mut out) => {
				out.write_all(bytes).await?;
				out.flush().await?;
				return Ok(candidate);
			}
			Err(err) if err.kind() == ErrorKind::AlreadyExists => continue,
			Err(err) => return Err(err.into()),
		}
	}
	Err(Error::Storage(format!("no free name for {}", target.display())))
}

/// Accepts only plain relative paths (`a/b.png`), never `..` or absolute.
fn relative_path(name: &str) -> Result<PathBuf> {
	let path = Path::new(name);
	let mut out = PathBuf::new();
	for component in path.components() {
		match component {
			Component::Normal(part) => out.push(part),
			Component::CurDir => {}
			_ => return Err(Error::Storage(format!("refusing path {name:?}"))),
		}
	}
	if out.as_os_str().is_empty() {
		return Err(Error::Storage("empty file name".into()));
	}
	Ok(out)
}

#[cfg(test)]
mod tests {
	use lid_protocol::ResourceContent;

	use super::*;

	fn payload(name: &str) -> FilePayload {
		FilePayload {
			filename: name.into(),
			mime_type: "image/png".into(),
			url: format!("https://x.test/{name}"),
			content: ResourceContent {
				content: "aGVsbG8=".into(),
				base64_encoded: true,
			},
		}
	}

	#[tokio::test]
	async fn saves_under_output_path() {
		let dir = tempfile::tempdir().unwrap();
		let store = DirectoryStore::new(dir.path());

		store
			.save(Some("shots/cat.png"), &payload("cat.png"))
			.await
			.unwrap();

		let saved = std::fs::read(dir.path().join("shots/cat.png")).unwrap();
		assert_eq!(saved, b"hello");
	}

	#[tokio::test]
	async fn conflicting_names_are_uniquified() {
		let dir = tempfile::tempdir().unwrap();
		let store = DirectoryStore::new(dir.path());

		for _ in 0..3 {
			store.save(None, &payload("cat.png")).await.unwrap();
		}

		assert!(dir.path().join("cat.png").exists());
		assert!(dir.path().join("cat (1).png").exists());
		assert!(dir.path().join("cat (2).png").exists());
	}

	#[tokio::test]
	async fn traversal_is_refused() {
		let dir = tempfile::tempdir().unwrap();
		let store = DirectoryStore::new(dir.path());

		let err = store
			.save(Some("../escape.png"), &payload("escape.png"))
			.await
			.unwrap_err();
		assert!(matches!(err, Error::Storage(_)));
	}
}
