//! Logging setup
//!
//! Everything logs through `tracing`. The binary calls [`init`] once with an
//! explicit [`Verbosity`]; `AMIDOCTOR_LOG` (or `RUST_LOG`) replaces the
//! derived filter when set. Output goes to stderr so `--json` output on
//! stdout stays machine-readable, and optionally to an append-only log file.

use crate::constants::LOG_ENV_VAR;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const MAX_LOG_BYTES: u64 = 10 * 1024 * 1024;

/// How chatty the process is
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Verbosity {
    /// Errors only
    Quiet,
    #[default]
    Normal,
    /// Step-level debug output, including probe and retry details
    Verbose,
}

impl Verbosity {
    pub fn from_flags(verbose: bool, quiet: bool) -> Self {
        match (verbose, quiet) {
            (true, _) => Verbosity::Verbose,
            (false, true) => Verbosity::Quiet,
            (false, false) => Verbosity::Normal,
        }
    }

    fn directive(self) -> &'static str {
        match self {
            Verbosity::Quiet => "error",
            Verbosity::Normal => "warn,amidoctor=info",
            Verbosity::Verbose => "info,amidoctor=debug",
        }
    }
}

/// Filter for `verbosity`, unless the environment overrides it
fn filter(verbosity: Verbosity) -> EnvFilter {
    [LOG_ENV_VAR, "RUST_LOG"]
        .iter()
        .filter_map(|var| std::env::var(var).ok())
        .find(|v| !v.trim().is_empty())
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .unwrap_or_else(|| EnvFilter::new(verbosity.directive()))
}

/// Install the global subscriber
///
/// A second call is a no-op. Failing to open `log_file` is returned; the
/// stderr layer is not installed in that case either.
pub fn init(verbosity: Verbosity, log_file: Option<&Path>) -> io::Result<()> {
    let file_layer = match log_file {
        Some(path) => Some(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(open_log_file(path)?)),
        ),
        None => None,
    };

    let _ = tracing_subscriber::registry()
        .with(filter(verbosity))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(verbosity == Verbosity::Verbose)
                .with_writer(io::stderr),
        )
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Open `path` for appending, rotating it to `<name>.bak` once too large
fn open_log_file(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    if let Ok(meta) = fs::metadata(path) {
        if meta.len() > MAX_LOG_BYTES {
            let backup = path.with_extension("log.bak");
            let _ = fs::remove_file(&backup);
            fs::rename(path, &backup)?;
        }
    }
    OpenOptions::new().create(true).append(true).open(path)
}
