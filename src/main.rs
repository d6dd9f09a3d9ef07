use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, warn};
use p1_rs::{
    init_logger_with_level, log_error, log_info, parse_telegram, Collector, Config,
    SerialLineSource, ShutdownSignal, SnapshotWriter,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "p1-collector", version)]
#[command(about = "Collects P1 smart-meter telegrams into JSON snapshots")]
struct Cli {
    /// Config file; searched in ./, ~/ and /etc/p1-rs/ when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Serial port, overriding the config file
    #[arg(short, long, global = true)]
    port: Option<String>,
    /// Also write the latest register values to p1.json
    #[arg(long, global = true)]
    write_primary: bool,
    #[arg(long, global = true)]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Read the meter until SIGINT/SIGTERM (default)
    Run,
    /// Parse a captured telegram and print the reading as JSON
    Parse {
        file: PathBuf,
        /// Treat the meter as having a gas register
        #[arg(long)]
        gas: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (mut config, config_path) =
        Config::discover(cli.config.as_deref()).context("loading configuration")?;
    if let Some(port) = cli.port {
        config.serial.port = port;
    }
    if cli.write_primary {
        config.general.write_primary_values_to_file = true;
    }
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }

    init_logger_with_level(&config.general.log_level, config.general.log_dir.as_deref())
        .context("initializing logging")?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config, config_path).await,
        Commands::Parse { file, gas } => parse(file, gas),
    }
}

async fn run(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    log_info(&format!("p1-collector {} starting", env!("CARGO_PKG_VERSION")));
    match &config_path {
        Some(path) => log_info(&format!("Using configuration {}", path.display())),
        None => log_info("No configuration file found, using defaults"),
    }
    debug!("Effective configuration: {config:?}");

    let paths = config.snapshot_paths();
    paths.bootstrap().context("preparing data directories")?;
    let writer = SnapshotWriter::new(paths, config.general.write_primary_values_to_file);

    let shutdown = ShutdownSignal::new();
    spawn_signal_handler(shutdown.clone());

    let source = SerialLineSource::new(config.serial_config()?);
    let mut collector = Collector::new(source, config.collector_config(), writer, shutdown);

    match collector.run().await {
        Ok(stats) => {
            log_info(&format!(
                "Stopped after {} telegrams ({} readings)",
                stats.telegrams, stats.readings
            ));
            Ok(())
        }
        Err(e) => {
            log_error(&format!("Fatal: {e}"));
            Err(e).context("collector stopped")
        }
    }
}

fn parse(file: PathBuf, gas: bool) -> Result<()> {
    let raw = std::fs::read_to_string(&file)
        .with_context(|| format!("reading {}", file.display()))?;
    let lines: Vec<&str> = raw.lines().map(str::trim_end).collect();
    let reading = parse_telegram(&lines, gas, chrono::Local::now().naive_local())
        .with_context(|| format!("parsing {}", file.display()))?;
    println!("{}", serde_json::to_string_pretty(&reading)?);
    Ok(())
}

fn spawn_signal_handler(shutdown: ShutdownSignal) {
    tokio::spawn(async move {
        wait_for_signal().await;
        log_info("Stop signal received, finishing current stage");
        shutdown.trigger();
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!("Cannot install SIGTERM handler: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for SIGINT: {e}");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for SIGINT: {e}");
    }
}
