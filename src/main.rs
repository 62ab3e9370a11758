//! Tiltlink - serial IMU bridge
//!
//! Lists the serial ports, lets the operator pick one and a baud rate, then
//! streams decoded samples to stdout while forwarding typed lines to the
//! device.

use anyhow::Context;
use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tiltlink_core::config::{self, ConfigError};
use tiltlink_core::core::{event, runtime, transport};
use tiltlink_core::{
    AppConfig, CliResult, ExitCodes, LoggingConfig, Reading, Sample, SampleFormat, SampleObserver,
    SerialPortProvider, SessionController, StdoutConsole,
};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// CLI output format for samples
#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    /// Human-readable text
    Text,
    /// JSON lines
    Json,
}

impl From<OutputFormat> for SampleFormat {
    fn from(format: OutputFormat) -> Self {
        match format {
            OutputFormat::Text => Self::Text,
            OutputFormat::Json => Self::Json,
        }
    }
}

/// Tiltlink CLI
#[derive(Parser, Debug)]
#[command(
    name = "tiltlink",
    version,
    about = "Interactive serial bridge for IMU sensor devices",
    long_about = None
)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "TILTLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Sample output format (overrides the config file)
    #[arg(short, long, value_enum)]
    format: Option<OutputFormat>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run an interactive session (default)
    Run,
    /// List available serial ports
    ListPorts,
    /// Write the effective configuration to the default location
    SaveConfig,
}

/// Prints samples on stdout
///
/// Text output shows the accelerometer axes of every sample. JSON output is
/// one object per complete frame, gyro included.
struct ConsoleSampleObserver {
    format: SampleFormat,
}

impl SampleObserver for ConsoleSampleObserver {
    fn on_sample(&self, sample: &Sample) {
        if let SampleFormat::Text = self.format {
            println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), sample);
        }
    }

    fn on_reading(&self, reading: &Reading) {
        if let SampleFormat::Json = self.format {
            let value = serde_json::json!({
                "timestamp": Local::now().to_rfc3339(),
                "gyro": reading.gyro,
                "x": reading.accel.x,
                "y": reading.accel.y,
                "z": reading.accel.z,
            });
            println!("{value}");
        }
    }
}

fn init_logging(config: &LoggingConfig, verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { config.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match &config.file {
        Some(path) => {
            let dir = path.parent().filter(|d| !d.as_os_str().is_empty());
            let file_name = path.file_name().unwrap_or_else(|| "tiltlink.log".as_ref());
            let appender =
                tracing_appender::rolling::never(dir.unwrap_or_else(|| ".".as_ref()), file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(writer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}

fn load_config(cli: &Cli) -> Result<AppConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from(path)?,
        None => AppConfig::load()?,
    };
    if let Some(format) = cli.format {
        config.session.sample_format = format.into();
    }
    Ok(config)
}

fn list_ports() -> CliResult {
    match transport::list_ports() {
        Ok(ports) if ports.is_empty() => {
            println!("No serial ports found.");
            CliResult::success()
        }
        Ok(ports) => {
            for port in &ports {
                println!("{port}");
            }
            CliResult::success()
        }
        Err(e) => e.into(),
    }
}

fn save_config(config: &AppConfig) -> CliResult {
    match config.save() {
        Ok(()) => {
            if let Some(path) = config::default_config_path() {
                println!("Saved {}", path.display());
            }
            CliResult::success()
        }
        Err(e) => e.into(),
    }
}

async fn run_session(config: AppConfig) -> anyhow::Result<CliResult> {
    let (tx, rx) = event::channel();
    let provider = SerialPortProvider::new(config.serial.clone(), tx.clone());

    let observer = Arc::new(ConsoleSampleObserver {
        format: config.session.sample_format,
    });
    let mut controller = SessionController::new(Box::new(provider), Box::new(StdoutConsole))
        .with_split_policy(config.session.split_policy);
    controller.register_observer(&observer);

    runtime::spawn_stdin_reader(tx).context("failed to start the operator input reader")?;

    match runtime::run(controller, rx).await {
        Ok(ExitCodes::SUCCESS) => Ok(CliResult::success()),
        Ok(code) => Ok(CliResult::error(code, "Session ended with an error")),
        Err(e) => Ok(e.into()),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(ExitCodes::CONFIG_ERROR);
        }
    };

    let _guard = init_logging(&config.logging, cli.verbose);
    tracing::info!("Starting Tiltlink v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_session(config).await.unwrap_or_else(|e| {
            CliResult::error(ExitCodes::ERROR, format!("{e:#}"))
        }),
        Commands::ListPorts => list_ports(),
        Commands::SaveConfig => save_config(&config),
    };

    if let Some(msg) = result.message() {
        if result.is_success() {
            println!("{msg}");
        } else {
            eprintln!("Error: {msg}");
        }
    }
    result.to_exit_code()
}
