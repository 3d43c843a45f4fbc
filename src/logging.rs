//! Caught-error logging and optional forwarding to an error tracker.

use crate::error::ApiError;
use tracing_subscriber::EnvFilter;

/// Receives errors that were caught and folded into a response.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, err: &ApiError);
}

/// Log a caught error. With `notify`, also forward it to `reporter` when one is registered.
pub fn log_exception(err: &ApiError, notify: bool, reporter: Option<&dyn ErrorReporter>) {
    match err {
        ApiError::Request(e) => {
            tracing::info!(code = e.code(), status = e.status(), "{}", e.message());
        }
        other => {
            tracing::error!(kind = other.kind_name(), error = %other, "caught error");
        }
    }
    if notify {
        if let Some(reporter) = reporter {
            reporter.report(err);
        }
    }
}

/// Install a fmt subscriber. `RUST_LOG` wins over `default_directive`. A second call is a no-op.
pub fn init_tracing(default_directive: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
