//! Observability infrastructure: tracing subscriber and step reporting.
//!
//! Logs go to stderr (filtered by `RUST_LOG` or the verbosity flag) and are
//! mirrored into the application log file. Counters are emitted through the
//! `metrics` facade; no exporter is installed here.

use crate::error::{BenchError, Result};
use crate::paths;
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Target carrying streamed output of verbose remote commands.
pub const REMOTE_OUTPUT_TARGET: &str = "fuelbench::remote_output";

/// Default filter directive for a verbosity count (`-v`, `-vv`, ...).
///
/// Streamed remote output stays visible at the quietest level.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn,fuelbench::remote_output=info",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the global tracing subscriber.
///
/// Must be called once at startup. The file layer is skipped with a warning
/// when the log file cannot be opened.
pub fn init(verbosity: u8) -> Result<()> {
    init_with_log_file(verbosity, &paths::app_log())
}

pub fn init_with_log_file(verbosity: u8, log_file: &Path) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_level(true);

    let file = open_log(log_file);
    let file_layer = file.as_ref().ok().map(|f| {
        tracing_subscriber::fmt::layer()
            .with_writer(Arc::clone(f))
            .with_ansi(false)
            .with_target(true)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BenchError::InvalidConfig { reason: format!("tracing already initialized: {}", e) })?;

    match file {
        Ok(_) => info!(log_file = %log_file.display(), "Observability initialized"),
        Err(e) => warn!(error = %e, "Application log disabled"),
    }
    Ok(())
}

fn open_log(path: &Path) -> Result<Arc<std::fs::File>> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
    }
    let file = OpenOptions::new().create(true).append(true).open(path).map_err(|e| BenchError::io(path, e))?;
    Ok(Arc::new(file))
}

/// Outcome token printed when a pipeline step completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Ok,
    Timeout,
    Failed,
}

impl StepStatus {
    /// Timeouts surface as console errors; everything else is a plain failure.
    pub fn from_error(err: &BenchError) -> Self {
        match err {
            BenchError::FuelServer { .. } => Self::Timeout,
            _ => Self::Failed,
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Timeout => "timeout",
            Self::Failed => "failed",
        }
    }
}

/// Receives step progress from long-running site operations.
pub trait StepReporter: Send + Sync {
    fn begin(&self, step: &str);
    fn finish(&self, step: &str, status: StepStatus);
    /// Free-form operator message.
    fn note(&self, message: &str);
}

/// Reporter that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl StepReporter for LogReporter {
    fn begin(&self, step: &str) {
        info!(step = %step, "Step started");
    }

    fn finish(&self, step: &str, status: StepStatus) {
        info!(step = %step, status = status.token(), "Step finished");
    }

    fn note(&self, message: &str) {
        info!("{}", message);
    }
}
