//! Uploads to the control plane's `/upload` endpoint.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};

use crate::error::{Error, Result};
use crate::platform::{FilePayload, Uploader};

const UPLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Multipart uploader with the fields `file`, `filename`, `url`, `mimeType`.
#[derive(Debug, Clone)]
pub struct HttpUploader {
	client: reqwest::Client,
	host: String,
}

impl HttpUploader {
	pub fn new() -> Result<Self> {
		Self::with_host("localhost")
	}

	pub fn with_host(host: impl Into<String>) -> Result<Self> {
		let client = reqwest::Client::builder().timeout(UPLOAD_TIMEOUT).build()?;
		Ok(Self {
			client,
			host: host.into(),
		})
	}

	fn form(file: &FilePayload) -> Result<Form> {
		let bytes = file
			.content
			.bytes()
			.map_err(|e| Error::UploadFailed(format!("undecodable body: {e}")))?;

		let part = Part::bytes(bytes).file_name(file.filename.clone());
		let part = match part.mime_str(&file.mime_type) {
			Ok(part) => part,
			Err(_) => Part::bytes(file.content.bytes().unwrap_or_default())
				.file_name(file.filename.clone()),
		};

		Ok(Form::new()
			.part("file", part)
			.text("filename", file.filename.clone())
			.text("url", file.url.clone())
			.text("mimeType", file.mime_type.clone()))
	}
}

#[async_trait]
impl Uploader for HttpUploader {
	async fn upload(&self, port: u16, file: &FilePayload) -> Result<()> {
		let url = format!("http://{}:{port}/upload", self.host);
		let form = Self::form(file)?;

		let response = self
			.client
			.post(&url)
			.multipart(form)
			.send()
			.await
			.map_err(|e| Error::UploadFailed(e.to_string()))?;

		let status = response.status();
		if !status.is_success() {
			return Err(Error::UploadFailed(format!(
				"HTTP error! status: {}",
				status.as_u16()
			)));
		}
		tracing::debug!(target = "lid", filename = %file.filename, "uploaded");
		Ok(())
	}
}
