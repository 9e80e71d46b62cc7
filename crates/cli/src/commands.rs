//! Subcommand execution.

use std::time::Duration;

use anyhow::{Context, Result};
use lid_protocol::{Config, ConfigPatch, DownloadEvent, EventKind, Patterns, StartOptions};
use lid_runtime::{Facade, FacadeOptions};

use crate::cli::{ClientArgs, Cli, Commands, ControlArgs, StartArgs};
use crate::control::{self, ControlOptions};
use crate::host::{self, HostOptions};

/// Longest wait for a followed run to end.
const FOLLOW_TIMEOUT: Duration = Duration::from_secs(3600);

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Commands::Host(args) => {
			host::run(HostOptions {
				host: args.host,
				port: args.port,
				control_port: args.control_port,
				save_dir: args.save_dir,
			})
			.await
		}
		Commands::Control(args) => control::run(control_options(args)?).await,
		Commands::Status(args) => status(&args).await,
		Commands::Start(args) => start(args).await,
		Commands::Stop(args) => {
			let facade = connect(&args).await?;
			let message = facade.stop_download().await?;
			println!("{message}");
			Ok(())
		}
		Commands::Config(args) => {
			let facade = connect(&args).await?;
			let fetched = facade.fetch_latest_config().await?;
			println!("{}", fetched.message);
			println!("{}", serde_json::to_string_pretty(&fetched.config)?);
			Ok(())
		}
	}
}

/// Builds the served config: file first, then flags on top.
pub fn control_options(args: ControlArgs) -> Result<ControlOptions> {
	let mut config = match &args.config {
		Some(path) => {
			let raw = std::fs::read_to_string(path)
				.with_context(|| format!("Reading config file {}", path.display()))?;
			serde_json::from_str::<Config>(&raw)
				.with_context(|| format!("Parsing config file {}", path.display()))?
		}
		None => Config::default(),
	};

	config.apply(ConfigPatch {
		regex_patterns: (!args.patterns.is_empty()).then(|| Patterns::new(args.patterns)),
		output_path: args.output_path,
		server_port: args.port,
		wait_time_ms: args.wait_time_ms,
		send_to_remote: args.send_to_remote.then_some(true),
		downloads_enabled: args.disable_downloads.then_some(false),
	});

	Ok(ControlOptions {
		host: args.host,
		config,
		save_to_file: args.save_to_file,
	})
}

async fn connect(args: &ClientArgs) -> Result<Facade> {
	let url = args.url();
	let endpoint = lid_runtime::ws::connect(&url)
		.await
		.with_context(|| format!("Connecting to native host at {url}"))?;
	Ok(Facade::connect(endpoint, FacadeOptions::default()).await)
}

async fn status(args: &ClientArgs) -> Result<()> {
	let facade = connect(args).await?;
	let status = facade.get_status().await?;
	println!("{}", serde_json::to_string_pretty(&status)?);
	Ok(())
}

async fn start(args: StartArgs) -> Result<()> {
	let facade = connect(&args.client).await?;
	if !facade.is_download_enabled() {
		anyhow::bail!(lid_runtime::Error::DownloadDisabled);
	}

	let options = StartOptions {
		regex_patterns: (!args.patterns.is_empty()).then(|| Patterns::new(args.patterns)),
		output_path: args.output_path,
		send_to_remote: args.send_to_remote.then_some(true),
		wait_time_ms: args.wait_time_ms,
	};

	let _progress = facade.events().subscribe(EventKind::DownloadProgress, |data| {
		if let (Some(current), Some(total), Some(url)) = (
			data.get("current").and_then(|v| v.as_u64()),
			data.get("total").and_then(|v| v.as_u64()),
			data.get("url").and_then(|v| v.as_str()),
		) {
			eprintln!("[{current}/{total}] {url}");
		}
		Ok(())
	});
	let _errors = facade.events().subscribe(EventKind::DownloadError, |data| {
		if let Some(error) = data.get("error").and_then(|v| v.as_str()) {
			eprintln!("error: {error}");
		}
		Ok(())
	});

	let message = facade.start_download(options).await?;
	println!("{message}");
	if args.detach {
		return Ok(());
	}

	let event = facade
		.wait_for(
			&[EventKind::DownloadCompleted, EventKind::DownloadStopped],
			FOLLOW_TIMEOUT,
		)
		.await?;
	match DownloadEvent::try_from(&event) {
		Ok(DownloadEvent::DownloadCompleted { total, downloaded }) => {
			println!("Completed: {downloaded}/{total}");
		}
		_ => println!("Stopped"),
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use std::io::Write;

	use super::*;
	use crate::cli::Cli;
	use clap::Parser;

	fn control_args(args: &[&str]) -> ControlArgs {
		let mut argv = vec!["lid", "control"];
		argv.extend_from_slice(args);
		match Cli::try_parse_from(argv).unwrap().command {
			Commands::Control(args) => args,
			_ => panic!("Expected Control command"),
		}
	}

	#[test]
	fn flags_override_config_file() {
		let mut file = tempfile::NamedTempFile::new().unwrap();
		write!(
			file,
			r#"{{"regexPattern": "\\.jpg$", "outputPath": "from-file", "serverPort": 9100, "openDownload": true}}"#
		)
		.unwrap();
		let path = file.path().to_string_lossy().into_owned();

		let options = control_options(control_args(&[
			"--config",
			&path,
			"--output-path",
			"from-flag",
			"--disable-downloads",
		]))
		.unwrap();

		assert_eq!(options.config.regex_patterns, Patterns::new(["\\.jpg$"]));
		assert_eq!(options.config.output_path.as_deref(), Some("from-flag"));
		assert_eq!(options.config.server_port, 9100);
		assert!(!options.config.downloads_enabled);
	}

	#[test]
	fn defaults_without_file() {
		let options = control_options(control_args(&["-p", "9200"])).unwrap();
		assert_eq!(options.config.server_port, 9200);
		assert!(options.config.regex_patterns.is_empty());
		assert!(options.config.downloads_enabled);
		assert!(!options.save_to_file);
	}

	#[test]
	fn unreadable_config_file_is_reported() {
		let err = control_options(control_args(&["--config", "/nonexistent/lid.json"])).unwrap_err();
		assert!(err.to_string().contains("Reading config file"));
	}
}
