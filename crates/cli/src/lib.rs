//! Native host, control plane and page client of the Lite Image Downloader.
//!
//! - [`host`]: WebSocket server the extension worker and page clients join
//! - [`control`]: HTTP control plane serving config and receiving uploads
//! - [`commands`]: `lid` subcommands

pub mod browser;
pub mod cli;
pub mod commands;
pub mod control;
pub mod host;
pub mod link;
pub mod logging;
pub mod styles;
