//! Local control plane.
//!
//! Serves the downloader configuration and collects uploaded images:
//!
//! | Route | Purpose |
//! |---|---|
//! | `GET /config` | current [`Config`] |
//! | `POST /upload` | multipart `file`, `filename`, `url`, `mimeType` |
//! | `GET /images` | metadata of every received image, keyed by URL |
//! | `GET /image?url=` | one image, with its body as base64 |
//!
//! CORS is open so extension pages can call it directly.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{DefaultBodyLimit, Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use lid::DirectoryStore;
use lid_protocol::Config;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

/// Directory uploads are written to when the config names none.
pub const DEFAULT_OUTPUT_DIR: &str = "downloads";
/// Largest accepted upload body.
pub const MAX_UPLOAD_BYTES: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct ControlOptions {
	pub host: String,
	pub config: Config,
	/// Also write uploads to disk under the configured output path.
	pub save_to_file: bool,
}

/// A received image.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredImage {
	pub filename: String,
	pub mime_type: String,
	pub size: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub file_path: Option<PathBuf>,
	#[serde(skip)]
	pub bytes: Vec<u8>,
}

#[derive(Clone)]
pub struct ControlState {
	inner: Arc<Inner>,
}

struct Inner {
	config: RwLock<Config>,
	save_to_file: bool,
	images: RwLock<BTreeMap<String, StoredImage>>,
}

impl ControlState {
	pub fn new(config: Config, save_to_file: bool) -> Self {
		Self {
			inner: Arc::new(Inner {
				config: RwLock::new(config),
				save_to_file,
				images: RwLock::default(),
			}),
		}
	}

	pub fn config(&self) -> Config {
		self.inner.config.read().clone()
	}

	pub fn image(&self, url: &str) -> Option<StoredImage> {
		self.inner.images.read().get(url).cloned()
	}

	pub fn image_count(&self) -> usize {
		self.inner.images.read().len()
	}

	fn output_dir(&self) -> PathBuf {
		let config = self.inner.config.read();
		match config.output_path.as_deref() {
			Some(path) if !path.is_empty() => PathBuf::from(path),
			_ => PathBuf::from(DEFAULT_OUTPUT_DIR),
		}
	}
}

#[derive(Debug, Error)]
enum UploadError {
	#[error("{0}")]
	BadRequest(String),

	#[error("Error: {0}")]
	Internal(String),
}

impl IntoResponse for UploadError {
	fn into_response(self) -> Response {
		let status = match self {
			UploadError::BadRequest(_) => StatusCode::BAD_REQUEST,
			UploadError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
		};
		tracing::warn!(target = "lid", %status, error = %self, "upload rejected");
		(status, self.to_string()).into_response()
	}
}

pub fn router(state: ControlState) -> Router {
	Router::new()
		.route("/config", get(get_config))
		.route("/upload", post(upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)))
		.route("/images", get(list_images))
		.route("/image", get(get_image))
		.with_state(state)
		.layer(CorsLayer::permissive())
}

pub async fn run(options: ControlOptions) -> Result<()> {
	let port = options.config.server_port;
	let addr: SocketAddr = format!("{}:{port}", options.host)
		.parse()
		.with_context(|| format!("Invalid host/port combination: {}:{port}", options.host))?;
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind control plane to {addr}"))?;

	tracing::info!(
		target = "lid",
		%addr,
		save_to_file = options.save_to_file,
		"control plane listening"
	);

	let state = ControlState::new(options.config, options.save_to_file);
	axum::serve(listener, router(state))
		.with_graceful_shutdown(crate::host::shutdown_signal())
		.await
		.context("Control plane error")
}

async fn get_config(State(state): State<ControlState>) -> Json<Config> {
	Json(state.config())
}

#[derive(Default)]
struct UploadParts {
	file: Option<Vec<u8>>,
	filename: Option<String>,
	url: Option<String>,
	mime_type: Option<String>,
}

async fn upload(
	State(state): State<ControlState>,
	mut multipart: Multipart,
) -> Result<String, UploadError> {
	let mut parts = UploadParts::default();
	while let Some(field) = multipart
		.next_field()
		.await
		.map_err(|e| UploadError::BadRequest(format!("Failed to parse multipart data: {e}")))?
	{
		let name = field.name().unwrap_or_default().to_string();
		let read_err = |e: axum::extract::multipart::MultipartError| {
			UploadError::BadRequest(format!("Failed to read field {name}: {e}"))
		};
		match name.as_str() {
			"file" => parts.file = Some(field.bytes().await.map_err(read_err)?.to_vec()),
			"filename" => parts.filename = Some(field.text().await.map_err(read_err)?),
			"url" => parts.url = Some(field.text().await.map_err(read_err)?),
			"mimeType" => parts.mime_type = Some(field.text().await.map_err(read_err)?),
			other => tracing::debug!(target = "lid", field = other, "ignoring multipart field"),
		}
	}

	let missing = |what: &str| UploadError::BadRequest(format!("No {what} found"));
	let bytes = parts.file.ok_or_else(|| missing("file data"))?;
	let filename = parts.filename.ok_or_else(|| missing("filename"))?;
	let url = parts.url.ok_or_else(|| missing("URL"))?;
	let mime_type = parts.mime_type.ok_or_else(|| missing("MIME type"))?;

	let file_path = if state.inner.save_to_file {
		let store = DirectoryStore::new(state.output_dir());
		let path = store
			.write(&lid::sanitize(&filename), &bytes)
			.await
			.map_err(|e| UploadError::Internal(e.to_string()))?;
		Some(path)
	} else {
		None
	};

	tracing::info!(target = "lid", %url, %filename, size = bytes.len(), "image received");
	let image = StoredImage {
		size: bytes.len(),
		filename: filename.clone(),
		mime_type,
		file_path,
		bytes,
	};
	state.inner.images.write().insert(url, image);

	Ok(format!("Image processed: {filename}"))
}

async fn list_images(State(state): State<ControlState>) -> Json<BTreeMap<String, StoredImage>> {
	Json(state.inner.images.read().clone())
}

#[derive(Debug, Deserialize)]
struct ImageQuery {
	url: Option<String>,
}

async fn get_image(State(state): State<ControlState>, Query(query): Query<ImageQuery>) -> Response {
	let Some(url) = query.url else {
		return (
			StatusCode::BAD_REQUEST,
			Json(serde_json::json!({"error": "URL parameter is required"})),
		)
			.into_response();
	};
	match state.image(&url) {
		Some(image) => {
			let mut body = serde_json::to_value(&image).unwrap_or_default();
			body["base64Data"] = BASE64.encode(&image.bytes).into();
			Json(body).into_response()
		}
		None => (
			StatusCode::NOT_FOUND,
			Json(serde_json::json!({"error": format!("No image found for URL: {url}")})),
		)
			.into_response(),
	}
}
