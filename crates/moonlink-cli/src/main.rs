//! Moonlink CLI
//!
//! Command line client for a Moonraker controller. Provides:
//! - Default: watch the printer and print state, progress and messages
//! - Subcommands for one-shot queries and printer control

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use moonlink_core::config::{Config, Directories, NotificationsConfig};
use moonlink_core::format::{format_time, status_text};
use moonlink_core::{
    EventKind, HistoryOrder, HistoryQuery, Moonraker, Notification, Printer, PrinterEvent,
};
use serde_json::{Value, json};
use tracing::{debug, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Moonlink - Moonraker controller client
#[derive(Parser)]
#[command(name = "moonlink")]
#[command(about = "Watch and control a Klipper printer through Moonraker")]
#[command(version)]
#[command(after_help = "\
Examples:
  moonlink                          Watch state, progress and messages
  moonlink -e voron.local status    Print a status summary
  moonlink gcode \"G28\"              Run a G-code script
  moonlink history --limit 5        Show the last five jobs
  moonlink last-job -o last.png     Show the last job and save its thumbnail
  moonlink print pause              Pause the current print
")]
struct Cli {
    /// Path to config file (defaults to ~/.config/moonlink/config.json)
    #[arg(short, long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Controller endpoint, overrides the config file
    #[arg(short, long, value_name = "HOST[:PORT]", global = true)]
    endpoint: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH", global = true)]
    log_file: Option<PathBuf>,

    /// Print lots of debug data
    #[arg(short, long, global = true)]
    debug: bool,

    /// Seconds to wait for the controller connection
    #[arg(long, value_name = "SECS", default_value_t = 15, global = true)]
    timeout: u64,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Report printer events until Ctrl-C
    Watch,

    /// Print a status summary
    Status,

    /// Run a G-code script
    Gcode {
        /// Script text, e.g. "G28"
        script: String,
    },

    /// List G-code files
    Files {
        /// Directory to list instead of the gcodes root
        path: Option<String>,
    },

    /// Show metadata of a G-code file
    Metadata {
        /// File name relative to the gcodes root
        file: String,
    },

    /// Show print history
    History {
        #[arg(long, default_value_t = 10)]
        limit: u32,

        #[arg(long, default_value_t = 0)]
        start: u32,

        /// asc or desc
        #[arg(long, default_value = "desc")]
        order: HistoryOrder,
    },

    /// Show the most recent job
    #[command(name = "last-job")]
    LastJob {
        /// Save the job's largest thumbnail here
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Query printer objects, e.g. `query extruder heater_bed`
    Query {
        #[arg(required = true)]
        objects: Vec<String>,
    },

    /// Print job control
    Print {
        #[command(subcommand)]
        command: PrintCommand,
    },

    /// Emergency stop
    Estop,

    /// Restart the host software
    Restart,

    /// Restart the firmware
    #[command(name = "firmware-restart")]
    FirmwareRestart,

    /// Download a thumbnail or other file from the gcodes root
    Thumbnail {
        /// Path relative to the gcodes root
        path: String,

        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

#[derive(Subcommand)]
enum PrintCommand {
    /// Start printing a file
    Start {
        /// File name relative to the gcodes root
        file: String,
    },

    /// Pause the current print
    Pause,

    /// Resume a paused print
    Resume,

    /// Cancel the current print
    Cancel,
}

/// Set up logging to stderr, or to `log_file` when given.
///
/// The returned guard flushes the file writer and must be held until exit.
fn setup_logging(debug: bool, log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let default_level = if debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("moonlink={default_level}")));

    let Some(log_file) = log_file else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
        return Ok(None);
    };

    let dir = log_file
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = log_file
        .file_name()
        .with_context(|| format!("Invalid log file path: {}", log_file.display()))?;
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

    let file_appender = tracing_appender::rolling::never(dir, name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(filter)
        .init();

    Ok(Some(guard))
}

fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| Directories::discover().config_file);

    let mut config = Config::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;
    debug!("loaded config from {}: {:?}", path.display(), config);

    if let Some(endpoint) = &cli.endpoint {
        config.moonraker.endpoint.clone_from(endpoint);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = setup_logging(cli.debug, cli.log_file.as_deref())?;

    let config = load_config(&cli)?;
    let moonraker =
        Moonraker::from_config(&config.moonraker).context("Invalid moonraker endpoint")?;
    let timeout = Duration::from_secs(cli.timeout);

    let result = match cli.command.unwrap_or(Commands::Watch) {
        Commands::Watch => run_watch(&moonraker, &config.notifications).await,
        Commands::Thumbnail { path, output } => run_thumbnail(&moonraker, &path, &output).await,
        command => match connect(&moonraker, timeout).await {
            Ok(()) => run_command(&moonraker, command).await,
            Err(e) => Err(e),
        },
    };

    moonraker.close().await;
    result
}

/// Open the session and wait until it is online.
async fn connect(moonraker: &Moonraker, timeout: Duration) -> Result<()> {
    moonraker.open().await?;

    let mut states = moonraker.state_changes();
    match tokio::time::timeout(timeout, states.wait_for(|s| s.is_online())).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(_)) => bail!("Session stopped before connecting"),
        Err(_) => bail!(
            "Could not connect to moonraker at {} within {}s",
            moonraker.endpoint(),
            timeout.as_secs()
        ),
    }
}

async fn run_watch(moonraker: &Moonraker, notifications: &NotificationsConfig) -> Result<()> {
    for kind in [EventKind::StateChanged, EventKind::ProgressChanged] {
        if notifications.is_enabled(kind) {
            info!("reporting {} events", kind);
            moonraker.add_listener(kind, |event: PrinterEvent| async move {
                println!("{}", status_text(event.snapshot()));
                anyhow::Ok(())
            });
        }
    }

    if notifications.is_enabled(EventKind::Message) {
        info!("reporting {} events", EventKind::Message);
        moonraker.add_listener(EventKind::Message, |event: PrinterEvent| async move {
            if let Some(message) = event.snapshot().message() {
                println!("printer: {message}");
            }
            anyhow::Ok(())
        });
    }

    moonraker.subscribe_raw(|notification: Notification| async move {
        if notification.method == "connected" {
            info!("controller connection established");
        }
        anyhow::Ok(())
    });

    moonraker.open().await?;
    info!("watching {}", moonraker.endpoint());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    Ok(())
}

async fn run_command(moonraker: &Moonraker, command: Commands) -> Result<()> {
    match command {
        Commands::Status => run_status(moonraker).await,
        Commands::Gcode { script } => print_json(&moonraker.gcode_script(&script).await?),
        Commands::Files { path } => run_files(moonraker, path.as_deref()).await,
        Commands::Metadata { file } => {
            let metadata = moonraker.get_file_metadata(&file).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(())
        }
        Commands::History {
            limit,
            start,
            order,
        } => run_history(moonraker, HistoryQuery { limit, start, order }).await,
        Commands::LastJob { output } => run_last_job(moonraker, output.as_deref()).await,
        Commands::Query { objects } => {
            let objects: serde_json::Map<String, Value> =
                objects.into_iter().map(|name| (name, Value::Null)).collect();
            print_json(&moonraker.objects_query(Value::Object(objects)).await?)
        }
        Commands::Print { command } => {
            let reply = match command {
                PrintCommand::Start { file } => moonraker.print_start(&file).await?,
                PrintCommand::Pause => moonraker.print_pause().await?,
                PrintCommand::Resume => moonraker.print_resume().await?,
                PrintCommand::Cancel => moonraker.print_cancel().await?,
            };
            print_json(&reply)
        }
        Commands::Estop => print_json(&moonraker.emergency_stop().await?),
        Commands::Restart => print_json(&moonraker.restart().await?),
        Commands::FirmwareRestart => print_json(&moonraker.firmware_restart().await?),
        Commands::Thumbnail { path, output } => run_thumbnail(moonraker, &path, &output).await,
        Commands::Watch => bail!("watch keeps its own connection"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    match value {
        Value::String(s) => println!("{s}"),
        other => println!("{}", serde_json::to_string_pretty(other)?),
    }
    Ok(())
}

async fn run_status(moonraker: &Moonraker) -> Result<()> {
    let reply = moonraker
        .objects_query(json!({
            "print_stats": null,
            "extruder": null,
            "heater_bed": null,
            "virtual_sdcard": null,
            "display_status": null,
        }))
        .await?;

    let mut printer = Printer::new();
    if let Some(Value::Object(status)) = reply.get("status") {
        printer.update(status);
    }
    print!("{}", status_text(printer.snapshot()));
    Ok(())
}

async fn run_files(moonraker: &Moonraker, path: Option<&str>) -> Result<()> {
    let files = match path {
        Some(path) => moonraker.get_file_dir(path).await?,
        None => moonraker.get_file_list().await?,
    };

    if files.is_empty() {
        println!("no files");
    }
    for file in files {
        println!("{:>10}  {}", file.size, file.path);
    }
    Ok(())
}

async fn run_history(moonraker: &Moonraker, query: HistoryQuery) -> Result<()> {
    let history = moonraker.history_list(query).await?;
    println!("{} jobs total", history.count);

    for job in history.jobs {
        println!(
            "{:<10} {:>10}  {}",
            job.status,
            format_time(job.print_duration),
            job.filename
        );
    }
    Ok(())
}

async fn run_last_job(moonraker: &Moonraker, output: Option<&Path>) -> Result<()> {
    let history = moonraker.history_list(HistoryQuery::latest()).await?;
    let Some(job) = history.jobs.first() else {
        println!("no jobs");
        return Ok(());
    };

    println!("filename: {}", job.filename);
    println!("status: {}", job.status);
    println!("print duration: {}", format_time(job.print_duration));

    let Some(output) = output else {
        return Ok(());
    };
    let Some(thumbnail) = job.thumbnails().last() else {
        println!("no thumbnail");
        return Ok(());
    };
    run_thumbnail(moonraker, &thumbnail.relative_path, output).await
}

async fn run_thumbnail(moonraker: &Moonraker, path: &str, output: &Path) -> Result<()> {
    let Some(bytes) = moonraker.get_thumbnail(path).await else {
        bail!("Failed to download {path}");
    };

    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    println!("saved {} bytes to {}", bytes.len(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults_to_watch() {
        let cli = Cli::try_parse_from(["moonlink"]).unwrap();
        assert!(cli.command.is_none());
        assert!(!cli.debug);
        assert_eq!(cli.timeout, 15);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["moonlink", "status", "-e", "voron.local", "--debug"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Status)));
        assert_eq!(cli.endpoint.as_deref(), Some("voron.local"));
        assert!(cli.debug);
    }

    #[test]
    fn test_cli_history_options() {
        let cli = Cli::try_parse_from(["moonlink", "history", "--limit", "3", "--order", "asc"])
            .unwrap();
        let Some(Commands::History {
            limit,
            start,
            order,
        }) = cli.command
        else {
            panic!("Expected History");
        };
        assert_eq!(limit, 3);
        assert_eq!(start, 0);
        assert_eq!(order, HistoryOrder::Asc);
    }

    #[test]
    fn test_cli_rejects_bad_order() {
        assert!(Cli::try_parse_from(["moonlink", "history", "--order", "up"]).is_err());
    }

    #[test]
    fn test_cli_print_start() {
        let cli = Cli::try_parse_from(["moonlink", "print", "start", "benchy.gcode"]).unwrap();
        let Some(Commands::Print {
            command: PrintCommand::Start { file },
        }) = cli.command
        else {
            panic!("Expected print start");
        };
        assert_eq!(file, "benchy.gcode");
    }

    #[test]
    fn test_cli_thumbnail_requires_output() {
        assert!(Cli::try_parse_from(["moonlink", "thumbnail", ".thumbs/a.png"]).is_err());
    }

    #[test]
    fn test_load_config_endpoint_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"moonraker": {"endpoint": "a.local"}}"#).unwrap();

        let cli = Cli::try_parse_from([
            "moonlink",
            "-c",
            path.to_str().unwrap(),
            "-e",
            "b.local:7130",
        ])
        .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.moonraker.endpoint, "b.local:7130");
        assert_eq!(config.moonraker.reconnect_interval_secs, 10);
    }
}
