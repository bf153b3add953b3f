//! Classified failures from a single analysis.

use std::{fmt, iter, time::Duration};

use schemars::JsonSchema;
use thiserror::Error;

use super::budget::TimeoutReason;
use crate::{gateway::GatewayError, gateway::JobSnapshot, prelude::*};

/// Everything that can go wrong while analyzing a document.
///
/// If the document was staged, the staged copy has already been cleaned up
/// by the time the caller sees any of these.
#[derive(Debug, Error)]
pub enum AnalyzeError {
    /// The request was bad, and nothing was done about it.
    #[error("invalid analysis request: {0}")]
    Validation(String),

    /// We couldn't stage the document.
    #[error("failed to stage {name}")]
    Staging {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// We couldn't submit the job.
    #[error("failed to submit analysis job")]
    Submission(#[source] GatewayError),

    /// The service accepted the job but gave us nothing to track it by.
    #[error("failed to start analysis: no analysis ID was returned")]
    MissingJobId,

    /// The job was still running when we stopped waiting, or we were
    /// cancelled before it was even submitted. In that case there's no
    /// `job_id`.
    #[error(
        "analysis {} did not complete within {timeout:?} ({reason})",
        .job_id.as_deref().unwrap_or("(not submitted)")
    )]
    TimedOut {
        job_id: Option<String>,
        timeout: Duration,
        reason: TimeoutReason,
    },

    /// The job finished, but not successfully. The snapshot is exactly what
    /// the service reported.
    #[error("analysis {job_id} finished with status {status:?}")]
    RemoteFailure {
        job_id: String,
        status: String,
        snapshot: Box<JobSnapshot>,
    },

    /// Anything else, including panics.
    #[error("unexpected error analyzing document")]
    Unexpected(#[source] anyhow::Error),
}

impl AnalyzeError {
    /// What kind of failure is this?
    pub fn kind(&self) -> ErrorKind {
        match self {
            AnalyzeError::Validation(_) => ErrorKind::Validation,
            AnalyzeError::Staging { .. } => ErrorKind::Staging,
            AnalyzeError::Submission(_) | AnalyzeError::MissingJobId => {
                ErrorKind::Submission
            }
            AnalyzeError::TimedOut { .. } => ErrorKind::Timeout,
            AnalyzeError::RemoteFailure { .. } => ErrorKind::RemoteFailure,
            AnalyzeError::Unexpected(_) => ErrorKind::Unexpected,
        }
    }

    /// This error and all its causes, on one line.
    pub fn report(&self) -> String {
        iter::successors(Some(self as &dyn std::error::Error), |err| (*err).source())
            .map(|err| err.to_string())
            .collect::<Vec<_>>()
            .join(": ")
    }
}

/// Coarse classification of [`AnalyzeError`], suitable for output records.
#[derive(Clone, Copy, Debug, JsonSchema, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Staging,
    Submission,
    Timeout,
    RemoteFailure,
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Staging => "staging",
            ErrorKind::Submission => "submission",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RemoteFailure => "remote_failure",
            ErrorKind::Unexpected => "unexpected",
        };
        f.write_str(name)
    }
}
