// Replay-safe logging for workflow code. The macros skip emission while the context
// is replaying, so each line is logged once per live execution.

use tracing_subscriber::EnvFilter;

#[macro_export]
macro_rules! workflow_info {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::info!(workflow_id = %$ctx.workflow_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_warn {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::warn!(workflow_id = %$ctx.workflow_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_error {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::error!(workflow_id = %$ctx.workflow_id(), $($arg)+);
        }
    }};
}

#[macro_export]
macro_rules! workflow_debug {
    ($ctx:expr, $($arg:tt)+) => {{
        if !$ctx.is_replaying() {
            ::tracing::debug!(workflow_id = %$ctx.workflow_id(), $($arg)+);
        }
    }};
}

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`). A subscriber that
/// is already installed wins.
pub fn init_default_subscriber() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();
}
