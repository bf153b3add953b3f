//! Errors returned by the remote analysis service.

use thiserror::Error;

use crate::retry::IsKnownTransient;

/// Errors that can occur while talking to the analysis service.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The service answered with a non-2xx status.
    #[error("analysis service returned status {status}: {message}")]
    Http { status: u16, message: String },

    /// We couldn't talk to the service at all, or couldn't decode its reply.
    #[error("network error talking to analysis service: {0}")]
    Network(#[from] reqwest::Error),
}

impl IsKnownTransient for GatewayError {
    fn is_known_transient(&self) -> bool {
        match self {
            GatewayError::Http { status, .. } => {
                reqwest::StatusCode::from_u16(*status)
                    .map(|status| status.is_known_transient())
                    .unwrap_or(false)
            }
            GatewayError::Network(err) => err.is_known_transient(),
        }
    }
}
