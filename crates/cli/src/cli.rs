use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use lid_protocol::TabId;
use lid_protocol::link::DEFAULT_HOST_PORT;

use crate::styles::cli_styles;

#[derive(Parser, Debug)]
#[command(name = "lid")]
#[command(about = "Lite Image Downloader - collect page images through the browser")]
#[command(version)]
#[command(styles = cli_styles())]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Run the native host the extension connects to
	Host(HostArgs),

	/// Run the local control plane (config and uploads)
	Control(ControlArgs),

	/// Show the download status of a tab
	Status(ClientArgs),

	/// Start downloading the images of a tab
	Start(StartArgs),

	/// Stop the download running in a tab
	Stop(ClientArgs),

	/// Make the extension pull the latest control-plane config
	Config(ClientArgs),
}

#[derive(Args, Debug)]
pub struct HostArgs {
	/// Address to bind
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// Port the extension and page clients connect to
	#[arg(short, long, default_value_t = DEFAULT_HOST_PORT)]
	pub port: u16,

	/// Port of the control plane
	#[arg(long, default_value_t = lid_protocol::config::DEFAULT_SERVER_PORT)]
	pub control_port: u16,

	/// Save images into this directory instead of the browser's downloads
	#[arg(long, value_name = "DIR")]
	pub save_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct ControlArgs {
	/// Address to bind
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// Port to listen on (overrides the config file)
	#[arg(short, long)]
	pub port: Option<u16>,

	/// Load the served config from a JSON file
	#[arg(long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// URL filter pattern (repeatable)
	#[arg(long = "pattern", value_name = "REGEX")]
	pub patterns: Vec<String>,

	/// Sub-directory for local saves, and for --save-to-file
	#[arg(long, value_name = "PATH")]
	pub output_path: Option<String>,

	/// Pause after each saved image, in milliseconds
	#[arg(long, value_name = "MS")]
	pub wait_time_ms: Option<u64>,

	/// Ask the extension to upload images here instead of saving them
	#[arg(long)]
	pub send_to_remote: bool,

	/// Refuse every download session
	#[arg(long)]
	pub disable_downloads: bool,

	/// Also write received uploads to disk
	#[arg(long)]
	pub save_to_file: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ClientArgs {
	/// Tab to act on
	#[arg(short, long)]
	pub tab: TabId,

	/// Native host address
	#[arg(long, default_value = "127.0.0.1")]
	pub host: String,

	/// Native host port
	#[arg(short, long, default_value_t = DEFAULT_HOST_PORT)]
	pub port: u16,
}

impl ClientArgs {
	pub fn url(&self) -> String {
		format!(
			"ws://{}:{}{}/{}",
			self.host,
			self.port,
			lid_protocol::link::PAGE_PATH,
			self.tab
		)
	}
}

#[derive(Args, Debug)]
pub struct StartArgs {
	#[command(flatten)]
	pub client: ClientArgs,

	/// URL filter pattern (repeatable)
	#[arg(long = "pattern", value_name = "REGEX")]
	pub patterns: Vec<String>,

	/// Sub-directory for local saves
	#[arg(long, value_name = "PATH")]
	pub output_path: Option<String>,

	/// Pause after each saved image, in milliseconds
	#[arg(long, value_name = "MS")]
	pub wait_time_ms: Option<u64>,

	/// Upload to the control plane instead of saving locally
	#[arg(long)]
	pub send_to_remote: bool,

	/// Return once started instead of following progress
	#[arg(long)]
	pub detach: bool,
}
