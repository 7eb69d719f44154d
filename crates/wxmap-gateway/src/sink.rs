//! Side channel for asynchronous gateway failures.

use crate::error::GatewayError;

/// Receives every failure the gateway surfaces: fatal startup errors,
/// per-partition subscribe failures, and live delivery errors.
///
/// Called from delivery tasks, so implementations must be cheap and must not
/// block.
pub trait ErrorSink: Send + Sync {
    fn report(&self, error: &GatewayError);
}

impl<F> ErrorSink for F
where
    F: Fn(&GatewayError) + Send + Sync,
{
    fn report(&self, error: &GatewayError) {
        self(error)
    }
}

/// Default sink: logs at error level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, error: &GatewayError) {
        match error.partition() {
            Some(partition) => tracing::error!(%partition, "gateway error: {error}"),
            None => tracing::error!("gateway error: {error}"),
        }
    }
}
