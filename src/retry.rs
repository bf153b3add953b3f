//! Classifying remote errors as transient or fatal.
//!
//! We only poll a job once, but individual status requests can hit the usual
//! assortment of overloaded gateways. Those get another chance inside the
//! polling budget. Everything else ends the analysis.

use reqwest::StatusCode;

/// Is this error a known transient error?
///
/// By default, we assume errors are not transient, until they're been observed
/// in the wild, investigated and determined to be transient. This prevents us
/// from burning our whole polling budget on errors that will never resolve.
pub trait IsKnownTransient {
    /// Is this error likely to be transient?
    fn is_known_transient(&self) -> bool;
}

impl IsKnownTransient for reqwest::Error {
    fn is_known_transient(&self) -> bool {
        if let Some(status) = self.status() {
            status.is_known_transient()
        } else {
            // Connection resets and request timeouts are worth another poll.
            // Failing to decode a body is not.
            self.is_timeout() || self.is_connect()
        }
    }
}

impl IsKnownTransient for StatusCode {
    fn is_known_transient(&self) -> bool {
        let transient_failures = [
            StatusCode::TOO_MANY_REQUESTS,
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::GATEWAY_TIMEOUT,
        ];
        transient_failures.contains(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_status_codes() {
        assert!(StatusCode::TOO_MANY_REQUESTS.is_known_transient());
        assert!(StatusCode::SERVICE_UNAVAILABLE.is_known_transient());
        assert!(!StatusCode::NOT_FOUND.is_known_transient());
        assert!(!StatusCode::UNAUTHORIZED.is_known_transient());
        assert!(!StatusCode::INTERNAL_SERVER_ERROR.is_known_transient());
    }
}
