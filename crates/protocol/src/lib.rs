//! Wire types for the Lite Image Downloader.
//!
//! - [`envelope`]: request/response/event framing between page and extension
//! - [`events`]: typed event payloads
//! - [`config`]: downloader configuration and patches
//! - [`status`]: `getStatus` / `fetchLatestConfig` payloads
//! - [`inspect`]: inspection API resource tree and content
//! - [`link`]: extension worker ↔ native host messages

pub mod config;
pub mod envelope;
pub mod events;
pub mod inspect;
pub mod link;
pub mod status;

pub use config::{Config, ConfigPatch, Patterns, StartOptions};
pub use envelope::{
	Action, EVENT_TYPE, Envelope, Event, EventKind, REQUEST_TYPE, RESPONSE_TYPE, Request,
	RequestId, Response,
};
pub use events::DownloadEvent;
pub use inspect::{Debuggee, Frame, FrameResource, FrameTree, ResourceContent, ResourceTree, TabId};
pub use link::{BrowserCommand, ExtensionMessage, HostMessage};
pub use status::{ActiveInfo, ConfigFetched, SessionState, Status};
