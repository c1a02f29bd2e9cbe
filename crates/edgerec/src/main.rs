//! `edgerec` - CLI for the unattended media recorder
//!
//! This binary wires configuration, storage, the upload coordinator, and
//! the scheduler together and runs the control loop in the foreground.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;
use tracing::info;

use edgerec::cli::{Cli, Command, ConfigCommand, RunCommand};
use edgerec::uploader::transport::HttpTransport;
use edgerec::{
    init_logging, AlwaysConnected, Config, CoordinatorSettings, FileFrameSource, MediaStore,
    Scheduler, SchedulerSettings, StorageBudget, UploadCoordinator,
};

/// Read size for chunks pulled from the frame source.
const FRAME_CHUNK_SIZE: usize = 8192;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone())?;

    // Execute the command
    match cli.command {
        Command::Run(run_cmd) => handle_run(config, run_cmd).await,
        Command::Status(status_cmd) => handle_status(&config, status_cmd.json),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

async fn handle_run(mut config: Config, cmd: RunCommand) -> anyhow::Result<()> {
    if let Some(source) = cmd.source {
        config.recording.source = Some(source);
    }
    if cmd.no_upload {
        config.upload.enabled = false;
    }
    config.validate()?;

    let source_path = config.recording.source.clone().context(
        "no recording source configured; set [recording] source in the config or pass --source",
    )?;

    let store = MediaStore::open(
        config.media_dir(),
        config.storage.file_extension.clone(),
        StorageBudget::from(&config.storage),
    )?;

    let transport = HttpTransport::new(&config.upload)?;
    let mut coordinator =
        UploadCoordinator::new(CoordinatorSettings::from(&config.upload), Box::new(transport));

    // Pick up files left behind by a previous run or a crash.
    let recovered = coordinator.populate_from_storage(&store)?;
    if recovered > 0 {
        info!(recovered, "queued files left over from a previous run");
    }

    let frames = FileFrameSource::open(&source_path, FRAME_CHUNK_SIZE)
        .await
        .with_context(|| format!("cannot open recording source {}", source_path.display()))?;

    let mut scheduler = Scheduler::new(
        store,
        coordinator,
        Box::new(frames),
        Box::new(AlwaysConnected),
        SchedulerSettings::from(&config),
    );

    tokio::select! {
        result = scheduler.run() => result.map_err(Into::into),
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            Ok(())
        }
    }
}

fn handle_status(config: &Config, json: bool) -> anyhow::Result<()> {
    let store = MediaStore::open(
        config.media_dir(),
        config.storage.file_extension.clone(),
        StorageBudget::from(&config.storage),
    )?;
    let usage = store.usage()?;

    if json {
        let status = serde_json::json!({
            "media_dir": store.dir(),
            "file_count": usage.file_count,
            "used_media_bytes": usage.used_media_bytes,
            "free_bytes": usage.free_bytes,
            "max_total_bytes": config.storage.max_total_bytes,
            "min_free_bytes": config.storage.min_free_bytes,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        println!("edgerec status");
        println!("--------------");
        println!("Media dir:    {}", store.dir().display());
        println!("Files:        {}", usage.file_count);
        println!(
            "Media bytes:  {} / {}",
            usage.used_media_bytes, config.storage.max_total_bytes
        );
        println!(
            "Free bytes:   {} (minimum {})",
            usage.free_bytes, config.storage.min_free_bytes
        );
    }
    Ok(())
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Storage]");
                println!("  Media dir:          {}", config.media_dir().display());
                println!("  Max total bytes:    {}", config.storage.max_total_bytes);
                println!("  Min free bytes:     {}", config.storage.min_free_bytes);
                println!(
                    "  Circular buffer:    {}",
                    config.storage.circular_buffer_enabled
                );
                println!("  File extension:     {}", config.storage.file_extension);
                println!();
                println!("[Upload]");
                println!("  Enabled:            {}", config.upload.enabled);
                println!("  Endpoint:           {}", config.upload.endpoint);
                println!(
                    "  API token:          {}",
                    if config.upload.api_token.is_some() {
                        "set"
                    } else {
                        "not set"
                    }
                );
                println!("  Max retries:        {}", config.upload.max_retries);
                println!(
                    "  Delete after:       {}",
                    config.upload.delete_after_upload
                );
                println!(
                    "  Guard window (s):   {}",
                    config.upload.guard_window_secs
                );
                println!();
                println!("[Recording]");
                println!("  Interval (s):       {}", config.recording.interval_secs);
                println!("  Duration (s):       {}", config.recording.duration_secs);
                println!(
                    "  Source:             {}",
                    config
                        .recording
                        .source
                        .as_ref()
                        .map_or_else(|| "not set".to_string(), |p| p.display().to_string())
                );
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
