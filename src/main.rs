use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use uptime_recorder::config::{
    AppConfig, CONFIG_FILE_NAME, ConfigError, QUEUE_FILE_NAME, beside_executable,
};
use uptime_recorder::reconcile::Reconciler;
use uptime_recorder::recorder::Recorder;
use uptime_recorder::sink::{EventSink, PostgresSink, SinkError};
use uptime_recorder::source::{LogindBackend, RawNotification, TransitionSource};
use uptime_recorder::spool::{DrainError, FallbackQueue};
use uptime_recorder::types::TransitionSignal;

/// Capacity of the channel between the transition source and the recorder.
const SIGNAL_BUFFER: usize = 64;

/// Records host uptime transitions into Postgres.
#[derive(Parser)]
#[command(name = "uptime-recorder", version, about, long_about = None)]
struct Cli {
    /// Configuration file (defaults to config.json beside the executable)
    #[arg(long, global = true, env = "UPTIME_RECORDER_CONFIG")]
    config: Option<PathBuf>,

    /// Fallback queue file (defaults to events.txt beside the executable)
    #[arg(long, global = true, env = "UPTIME_RECORDER_QUEUE")]
    queue: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Record transitions until interrupted (default)
    Run {
        /// Only record service start and stop, not OS power/session events
        #[arg(long)]
        no_os_events: bool,
    },

    /// Check that the datastore is reachable
    Check,

    /// Replay the fallback queue into the datastore once
    Flush,
}

#[derive(Debug, Error)]
enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error(transparent)]
    Drain(#[from] DrainError),

    #[error("cannot open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot install signal handlers: {0}")]
    Signals(#[source] std::io::Error),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_file.as_deref()) {
        eprintln!("uptime-recorder: {e}");
        return ExitCode::FAILURE;
    }

    let result = match cli.command.unwrap_or(Command::Run {
        no_os_events: false,
    }) {
        Command::Run { no_os_events } => run(cli.config, cli.queue, no_os_events).await,
        Command::Check => check(cli.config).await,
        Command::Flush => flush(cli.config, cli.queue).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Exiting with failure");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(log_file: Option<&Path>) -> Result<(), AppError> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| AppError::LogFile {
                    path: path.to_path_buf(),
                    source,
                })?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "uptime_recorder=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(path: Option<PathBuf>) -> Result<AppConfig, AppError> {
    let path = match path {
        Some(p) => p,
        None => beside_executable(CONFIG_FILE_NAME)?,
    };
    let config = AppConfig::load(&path)?;
    info!(path = %path.display(), config = ?config, "Configuration loaded");
    Ok(config)
}

fn queue_path(path: Option<PathBuf>) -> Result<PathBuf, AppError> {
    match path {
        Some(p) => Ok(p),
        None => Ok(beside_executable(QUEUE_FILE_NAME)?),
    }
}

async fn run(
    config: Option<PathBuf>,
    queue: Option<PathBuf>,
    no_os_events: bool,
) -> Result<(), AppError> {
    let config = load_config(config)?;
    let host = config.host_name();
    let queue = Arc::new(FallbackQueue::new(queue_path(queue)?));
    let sink = Arc::new(PostgresSink::from_config(&config));

    let reconciler_shutdown = CancellationToken::new();
    let (reconciler, reconciler_task) =
        Reconciler::new(Arc::clone(&queue), Arc::clone(&sink), host.clone())
            .spawn(reconciler_shutdown.clone());

    match queue.is_empty().await {
        Ok(true) => {}
        Ok(false) => {
            info!(queue = %queue.path().display(), "Fallback queue has a backlog");
            reconciler.arm();
        }
        Err(e) => warn!(error = %e, "Cannot inspect fallback queue"),
    }

    if let Err(e) = sink.ping().await {
        warn!(error = %e, "Datastore unreachable at startup, events will be spooled");
    }

    let (signals, rx) = mpsc::channel(SIGNAL_BUFFER);
    let recorder = Recorder::new(sink, Arc::clone(&queue), reconciler, host);
    // Never cancelled: the recorder stops once every sender is dropped.
    let recorder_task = tokio::spawn(recorder.run(rx, CancellationToken::new()));

    send_service_signal(&signals, RawNotification::ServiceStart).await;

    let source = if no_os_events {
        None
    } else {
        let source = TransitionSource::new(LogindBackend::new(), signals.clone());
        let (source, started) = tokio::task::spawn_blocking(move || {
            let started = source.start();
            (source, started)
        })
        .await?;
        match started {
            Ok(()) => Some(source),
            Err(e) => {
                warn!(error = %e, "OS notifications unavailable, recording service start/stop only");
                None
            }
        }
    };

    info!("Uptime recorder running");
    wait_for_shutdown_signal().await.map_err(AppError::Signals)?;
    info!("Shutdown requested");

    if let Some(source) = source {
        let stopped = tokio::task::spawn_blocking(move || source.stop()).await?;
        if let Err(e) = stopped {
            warn!(error = %e, "Transition source did not stop cleanly");
        }
    }

    send_service_signal(&signals, RawNotification::ServiceStop).await;
    drop(signals);
    recorder_task.await?;

    reconciler_shutdown.cancel();
    reconciler_task.await?;

    info!("Uptime recorder stopped");
    Ok(())
}

async fn send_service_signal(signals: &mpsc::Sender<TransitionSignal>, notification: RawNotification) {
    let Some(signal) = notification.signal() else {
        return;
    };
    if signals.send(signal).await.is_err() {
        error!(notification = %notification, "Recorder is gone, transition lost");
    }
}

async fn check(config: Option<PathBuf>) -> Result<(), AppError> {
    let config = load_config(config)?;
    let sink = PostgresSink::from_config(&config);
    sink.ping().await?;
    info!(host = %config.host, port = config.port, "Datastore reachable");
    Ok(())
}

async fn flush(config: Option<PathBuf>, queue: Option<PathBuf>) -> Result<(), AppError> {
    let config = load_config(config)?;
    let host = config.host_name();
    let queue = FallbackQueue::new(queue_path(queue)?);
    let sink = PostgresSink::from_config(&config);

    let (sink, host) = (&sink, &host);
    let report = queue
        .drain(move |record| sink.insert(record.at, host, record.kind))
        .await?;
    info!(
        inserted = report.inserted,
        skipped = report.skipped,
        queue = %queue.path().display(),
        "Fallback queue flushed"
    );
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
