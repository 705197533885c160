//! Logging bootstrap and the driver diagnostic sink.

use tracing_subscriber::EnvFilter;
use virtex_core::{Diagnostic, DiagnosticSink, Severity};

/// Install a formatted subscriber filtered by `RUST_LOG` (default `info`).
///
/// Does nothing if a global subscriber is already set.
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}

/// Forward one driver diagnostic to `tracing`.
pub fn log_diagnostic(diagnostic: &Diagnostic) {
    let Diagnostic {
        severity,
        source,
        message,
    } = diagnostic;
    match severity {
        Severity::Error | Severity::Warning => tracing::warn!("[{source}] {message}"),
        Severity::Info => tracing::info!("[{source}] {message}"),
        Severity::Verbose => tracing::debug!("[{source}] {message}"),
    }
}

/// A boxed sink around [`log_diagnostic`].
pub fn diagnostic_sink() -> DiagnosticSink {
    Box::new(log_diagnostic)
}
