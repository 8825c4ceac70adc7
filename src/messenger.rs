//! User-facing progress reporting.

/// Sink for progress and informational text shown to the user.
pub trait Messenger: Send + Sync {
    /// Reports normal progress (e.g., "Installing kernel...").
    fn info(&self, message: &str);

    /// Reports a condition the user should notice but that does not stop the build.
    fn warn(&self, message: &str);
}

/// Messenger that forwards everything to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMessenger;

impl Messenger for TracingMessenger {
    fn info(&self, message: &str) {
        tracing::info!("{}", message);
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{}", message);
    }
}
