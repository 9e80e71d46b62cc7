//! Envelope runtime for the Lite Image Downloader.
//!
//! - [`Endpoint`]: one side of an in-process envelope channel
//! - [`Relay`]: direction-filtering store-and-forward bridge
//! - [`Facade`]: page-side client with pending-call correlation and events
//! - [`ws::connect`]: WebSocket client producing an [`Endpoint`]

pub mod endpoint;
pub mod error;
pub mod facade;
pub mod handlers;
pub mod relay;
pub mod ws;

pub use endpoint::{Endpoint, EnvelopeRx, EnvelopeTx};
pub use error::{Error, Result};
pub use facade::{DEFAULT_ACTION_TIMEOUT, DEFAULT_STATUS_TIMEOUT, Facade, FacadeOptions};
pub use handlers::{EventRegistry, HandlerError, HandlerId, Subscription};
pub use relay::{Direction, Relay};
