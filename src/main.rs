use clap::Parser;
use eyre::{Context, Result};
use log::{error, info};
use std::fs;
use std::path::PathBuf;

use intake::cancel::{self, CancelFlag};
use intake::cli::Cli;
use intake::config::Config;
use intake::consumer::Consumer;
use intake::queue::SqliteQueue;
use intake::store::SqliteContactStore;
use intake::worker::Worker;

fn setup_logging(config: &Config, verbose: bool) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("intake")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("intake.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if let Some(level) = config.log_level.as_deref() {
        if let Ok(level) = level.parse() {
            builder.filter_level(level);
        }
    }
    builder.target(env_logger::Target::Pipe(target)).init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

async fn run(config: &Config) -> Result<()> {
    // Fail fast when the queue has not been provisioned
    let queue = SqliteQueue::open(&config.queue.db_path, &config.queue.name)
        .wrap_err_with(|| format!("Queue {} is not available", config.queue.name))?
        .with_poll_interval(config.queue.poll_interval());
    info!("Draining queue '{}' at {}", config.queue.name, config.queue.db_path.display());

    let store = SqliteContactStore::open(&config.store.db_path, &config.store)
        .context("Failed to open contact store")?;

    // Catch Ctrl-C so the in-flight message can finish before we stop
    let cancel = CancelFlag::new();
    let bridge = cancel::bridge_ctrl_c(cancel.clone());

    let worker = Worker::new(store, config.store.natural_key_field.as_str());
    let mut consumer = Consumer::new(queue, worker, cancel, config.run_window(), config.queue.receive_timeout());

    let reason = consumer.run().await?;
    info!("Receive loop stopped: {}", reason);

    bridge.abort();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging
    setup_logging(&config, cli.verbose).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the consumer; any escaped error is logged before the process exits
    if let Err(e) = run(&config).await {
        error!("{:#}", e);
        return Err(e);
    }

    Ok(())
}
