//! Lite Image Downloader core.
//!
//! Collects the images of a page through the browser inspection API and
//! saves them locally or forwards them to a control plane, driven by
//! requests from the page.
//!
//! # Modules
//!
//! - [`service`]: answers page requests, routes toolbar and inspection events
//! - [`collector`]: per-tab attach → collect → download → finish state machine
//! - [`sync`]: control-plane config fetch and periodic refresh
//! - [`filter`] / [`naming`]: URL filtering and file name inference
//! - [`capture`]: capture gate for page-capture tools
//! - [`platform`]: traits the browser side implements
//!
//! # Example
//!
//! ```ignore
//! use lid::{ExtensionService, Platform, ConfigStore, Timing};
//!
//! let service = ExtensionService::new(platform, ConfigStore::default(), Timing::default());
//! let _refresh = service.spawn_config_refresh(cancel.clone());
//! let response = service.handle(Some(tab), request).await;
//! ```

pub mod capture;
pub mod collector;
pub mod config;
pub mod error;
pub mod filter;
pub mod naming;
pub mod pages;
pub mod platform;
pub mod service;
pub mod session;
pub mod store;
pub mod sync;
pub mod upload;

pub use capture::{CaptureGate, CaptureOptions, CaptureOutcome, prepare_capture};
pub use collector::{Collector, Timing};
pub use config::ConfigStore;
pub use error::{Error, Result};
pub use filter::PatternFilter;
pub use naming::{FileMeta, guess, sanitize};
pub use pages::PageChannels;
pub use platform::{
	Badge, ConfigSource, Downloads, EventSink, FilePayload, Indicator, Inspector, Platform,
	Uploader,
};
pub use service::ExtensionService;
pub use session::{Phase, ResourceEntry, SessionRegistry, TabSession};
pub use store::DirectoryStore;
pub use sync::{ConfigSync, HttpConfigSource};
pub use upload::HttpUploader;

pub use lid_protocol as protocol;
pub use lid_runtime as runtime;
