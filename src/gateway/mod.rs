//! Remote analysis gateway.
//!
//! The orchestrator only needs two calls from the remote service: submit a
//! job, and fetch its current status. Both go through [`AnalysisGateway`], so
//! tests can swap in a fake. The analyzer catalog lives on the concrete
//! [`ContentUnderstandingClient`], because only the CLI uses it.

use serde_json::Map;

use crate::prelude::*;

pub mod client;
pub mod error;

pub use self::{client::ContentUnderstandingClient, error::GatewayError};

/// The status reported while a job is still being processed. Every other
/// status is terminal.
pub const RUNNING_STATUS: &str = "Running";

/// The terminal status reported by a successful job.
pub const SUCCEEDED_STATUS: &str = "Succeeded";

/// Is `status` the "still running" sentinel?
pub fn is_running(status: &str) -> bool {
    status.eq_ignore_ascii_case(RUNNING_STATUS)
}

/// Is `status` the terminal success status?
pub fn is_succeeded(status: &str) -> bool {
    status.eq_ignore_ascii_case(SUCCEEDED_STATUS)
}

/// Interface to the remote analysis service.
#[async_trait]
pub trait AnalysisGateway: Send + Sync + 'static {
    /// Ask `analyzer_id` to analyze the document at `locator`.
    async fn submit(
        &self,
        analyzer_id: &str,
        locator: &Url,
    ) -> Result<SubmitResponse, GatewayError>;

    /// Fetch the current state of a previously submitted job.
    async fn fetch_status(
        &self,
        job_id: &str,
        analyzer_id: &str,
    ) -> Result<JobSnapshot, GatewayError>;
}

/// Body of an analysis request.
#[derive(Debug, Serialize)]
pub struct AnalyzeRequest<'a> {
    /// Where the remote service can download the document.
    pub url: &'a str,
}

/// Response to an analysis request.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct SubmitResponse {
    /// The job identifier. Services have been seen to answer 2xx without
    /// one, so we can't rely on it.
    #[serde(default)]
    pub id: Option<String>,

    /// The initial job status.
    #[serde(default)]
    pub status: Option<String>,
}

impl SubmitResponse {
    /// The job id, if we have a non-empty one.
    pub fn job_id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }
}

/// The state of a remote job, as returned by the results endpoint.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct JobSnapshot {
    /// The job id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The job status.
    pub status: String,

    /// Analyzer-defined output. Only present once the job has succeeded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// Anything else the service sent us, such as error details. We pass
    /// these through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single analyzer definition from the remote catalog.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzerInfo {
    /// The analyzer's identifier, as passed to [`AnalysisGateway::submit`].
    pub analyzer_id: String,

    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Provisioning status of the analyzer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    /// The scenario the analyzer was built for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scenario: Option<String>,

    /// Configuration, warnings and other fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A page of analyzers from the catalog.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AnalyzerList {
    #[serde(default)]
    pub value: Vec<AnalyzerInfo>,
}
