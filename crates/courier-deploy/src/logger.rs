//! Build log sink.

use tracing::{debug, error, info, warn};

/// Destination for progress messages shown to whoever runs the deployment.
///
/// Formatting and escaping belong to the implementation.
pub trait BuildLogger: Send + Sync {
    /// A progress message.
    fn message(&self, text: &str);

    /// An error message.
    fn error(&self, text: &str);

    /// Diagnostic output, normally hidden.
    fn debug(&self, text: &str);

    /// A build problem that fails the build.
    ///
    /// `identity` is stable for the same problem across runs so repeated
    /// failures can be grouped.
    fn problem(&self, identity: i32, kind: &str, description: &str);
}

/// [`BuildLogger`] writing to `tracing` under the `build_log` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingBuildLogger;

impl BuildLogger for TracingBuildLogger {
    fn message(&self, text: &str) {
        info!(target: "build_log", "{text}");
    }

    fn error(&self, text: &str) {
        error!(target: "build_log", "{text}");
    }

    fn debug(&self, text: &str) {
        debug!(target: "build_log", "{text}");
    }

    fn problem(&self, identity: i32, kind: &str, description: &str) {
        warn!(target: "build_log", identity, kind, "{description}");
    }
}
