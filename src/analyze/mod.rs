//! Analyzing a single document, end to end.
//!
//! An analysis goes through these states:
//!
//! ```text
//! Pending -> Staged -> Submitted -> Running -> Succeeded | Failed | TimedOut
//!    |
//!    +-> ValidationFailed
//! ```
//!
//! Validation happens before we touch anything remote. From the moment the
//! document is staged, the staged copy is owned by a [`StagedObject`], and it
//! gets deleted exactly once, however the analysis ends.

use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};

use futures::FutureExt as _;
use schemars::JsonSchema;
use tokio::time;
use tracing::{Span, field};

use crate::{
    cancel::CancelSignal,
    folders::AllowedFolders,
    gateway::{AnalysisGateway, JobSnapshot, is_running, is_succeeded},
    prelude::*,
    retry::IsKnownTransient as _,
    stage::{ObjectStage, StagedObject, staging_name},
};

pub mod budget;
pub mod error;

pub use self::{
    budget::{PollAttempt, PollBudget, TimeoutReason},
    error::{AnalyzeError, ErrorKind},
};

/// Default overall time limit for one analysis.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default delay between status requests.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How long, and how often, to poll a remote job.
#[derive(Clone, Debug)]
pub struct PollOpts {
    /// How long to wait for the remote job before giving up.
    pub timeout: Duration,

    /// How long to wait between status requests.
    pub poll_interval: Duration,
}

impl Default for PollOpts {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Where an [`AnalysisJob`] is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobState {
    Pending,
    ValidationFailed,
    Staged,
    Submitted,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

/// Bookkeeping for one in-flight analysis. Never shared between analyses.
#[derive(Debug)]
pub struct AnalysisJob {
    analyzer_id: String,
    source_path: PathBuf,
    staged_locator: Option<Url>,
    remote_job_id: Option<String>,
    state: JobState,
}

impl AnalysisJob {
    fn new(analyzer_id: &str, source_path: &Path) -> Self {
        Self {
            analyzer_id: analyzer_id.to_owned(),
            source_path: source_path.to_owned(),
            staged_locator: None,
            remote_job_id: None,
            state: JobState::Pending,
        }
    }

    fn transition(&mut self, state: JobState) {
        trace!(from = ?self.state, to = ?state, "Job state");
        self.state = state;
    }

    fn mark_staged(&mut self, locator: Url) {
        debug_assert_eq!(self.state, JobState::Pending);
        self.staged_locator = Some(locator);
        self.transition(JobState::Staged);
    }

    fn mark_submitted(&mut self, job_id: String) {
        debug_assert!(self.staged_locator.is_some());
        self.remote_job_id = Some(job_id);
        self.transition(JobState::Submitted);
    }

    fn mark_running(&mut self) {
        debug_assert!(self.remote_job_id.is_some());
        self.transition(JobState::Running);
    }

    fn finish(&mut self, outcome: &Result<AnalysisResult, AnalyzeError>) {
        let state = match outcome {
            Ok(_) => JobState::Succeeded,
            Err(AnalyzeError::Validation(_)) => JobState::ValidationFailed,
            Err(AnalyzeError::TimedOut { .. }) => JobState::TimedOut,
            Err(_) => JobState::Failed,
        };
        self.transition(state);
    }
}

/// The result of a successful analysis.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct AnalysisResult {
    /// The remote job ID.
    pub job_id: String,

    /// The analyzer that produced this result.
    pub analyzer_id: String,

    /// The terminal status reported by the service.
    pub status: String,

    /// Whatever the analyzer produced. We don't interpret this.
    pub result: Value,

    /// How many status requests we made.
    pub attempts: u32,

    /// How long we spent polling.
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Runs analyses against a stage and a gateway.
///
/// This holds no per-analysis state, so one orchestrator can run any number
/// of analyses at once.
#[derive(Clone)]
pub struct Orchestrator {
    stage: Arc<dyn ObjectStage>,
    gateway: Arc<dyn AnalysisGateway>,
    folders: AllowedFolders,
    opts: PollOpts,
}

impl Orchestrator {
    /// Create an orchestrator with default options and no folder
    /// restrictions.
    pub fn new(stage: Arc<dyn ObjectStage>, gateway: Arc<dyn AnalysisGateway>) -> Self {
        Self {
            stage,
            gateway,
            folders: AllowedFolders::unrestricted(),
            opts: PollOpts::default(),
        }
    }

    /// Use `opts` for timing.
    pub fn with_opts(mut self, opts: PollOpts) -> Self {
        self.opts = opts;
        self
    }

    /// Only analyze documents inside `folders`.
    pub fn with_allowed_folders(mut self, folders: AllowedFolders) -> Self {
        self.folders = folders;
        self
    }

    /// Analyze `source_path` using `analyzer_id`, with no way to cancel.
    #[cfg(test)]
    pub async fn analyze(
        &self,
        analyzer_id: &str,
        source_path: &Path,
    ) -> Result<AnalysisResult, AnalyzeError> {
        self.analyze_cancellable(analyzer_id, source_path, &CancelSignal::never())
            .await
    }

    /// Analyze `source_path` using `analyzer_id`, giving up early if `cancel`
    /// fires.
    #[instrument(
        level = "debug",
        skip(self, cancel),
        fields(path = %source_path.display(), job_id = field::Empty)
    )]
    pub async fn analyze_cancellable(
        &self,
        analyzer_id: &str,
        source_path: &Path,
        cancel: &CancelSignal,
    ) -> Result<AnalysisResult, AnalyzeError> {
        let mut job = AnalysisJob::new(analyzer_id, source_path);
        let outcome = self.run(&mut job, cancel).await;
        job.finish(&outcome);
        match &outcome {
            Ok(result) => info!(
                job_id = %result.job_id,
                attempts = result.attempts,
                elapsed_ms = result.elapsed.as_millis() as u64,
                "Analysis succeeded"
            ),
            Err(err) => error!(kind = %err.kind(), "Analysis failed: {}", err.report()),
        }
        outcome
    }

    async fn run(
        &self,
        job: &mut AnalysisJob,
        cancel: &CancelSignal,
    ) -> Result<AnalysisResult, AnalyzeError> {
        self.validate(job).await?;
        check_cancelled(cancel, self.opts.timeout)?;

        let name = staging_name(&job.source_path);
        let staged = StagedObject::put(self.stage.clone(), &name, &job.source_path)
            .await
            .map_err(|source| AnalyzeError::Staging {
                name: name.clone(),
                source,
            })?;
        job.mark_staged(staged.locator().clone());

        // From here on, `staged` must be released on every path, including
        // panics.
        let outcome = AssertUnwindSafe(self.submit_and_poll(job, staged.locator(), cancel))
            .catch_unwind()
            .await;
        staged.release().await;
        outcome.unwrap_or_else(|panic| {
            Err(AnalyzeError::Unexpected(anyhow!(
                "analysis panicked: {}",
                panic_message(panic.as_ref())
            )))
        })
    }

    /// Check our inputs before doing anything with side effects.
    async fn validate(&self, job: &AnalysisJob) -> Result<(), AnalyzeError> {
        if job.analyzer_id.trim().is_empty() {
            return Err(AnalyzeError::Validation(
                "Analyzer ID must be provided".to_owned(),
            ));
        }
        let path = &job.source_path;
        if path.as_os_str().is_empty() {
            return Err(AnalyzeError::Validation(
                "File path must be provided".to_owned(),
            ));
        }
        match tokio::fs::metadata(path).await {
            Ok(metadata) if metadata.is_file() => {}
            Ok(_) => {
                return Err(AnalyzeError::Validation(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            Err(err) => {
                return Err(AnalyzeError::Validation(format!(
                    "The document to analyze could not be found: {} ({err})",
                    path.display()
                )));
            }
        }
        match self.folders.permits(path) {
            Ok(true) => Ok(()),
            Ok(false) => Err(AnalyzeError::Validation(format!(
                "{} is outside the allowed folders",
                path.display()
            ))),
            Err(err) => Err(AnalyzeError::Validation(format!("{err:#}"))),
        }
    }

    async fn submit_and_poll(
        &self,
        job: &mut AnalysisJob,
        locator: &Url,
        cancel: &CancelSignal,
    ) -> Result<AnalysisResult, AnalyzeError> {
        check_cancelled(cancel, self.opts.timeout)?;
        let response = self
            .gateway
            .submit(&job.analyzer_id, locator)
            .await
            .map_err(AnalyzeError::Submission)?;
        let job_id = response
            .job_id()
            .ok_or(AnalyzeError::MissingJobId)?
            .to_owned();
        Span::current().record("job_id", job_id.as_str());
        job.mark_submitted(job_id.clone());

        job.mark_running();
        let (snapshot, attempts, elapsed) = self.poll(job, &job_id, cancel).await?;

        if !is_succeeded(&snapshot.status) {
            return Err(AnalyzeError::RemoteFailure {
                job_id,
                status: snapshot.status.clone(),
                snapshot: Box::new(snapshot),
            });
        }
        let result = snapshot.result.unwrap_or_else(|| {
            warn!("Job succeeded without a result payload");
            Value::Null
        });
        Ok(AnalysisResult {
            job_id,
            analyzer_id: job.analyzer_id.clone(),
            status: snapshot.status,
            result,
            attempts,
            elapsed,
        })
    }

    /// Poll until the job stops running, or our budget runs out.
    async fn poll(
        &self,
        job: &AnalysisJob,
        job_id: &str,
        cancel: &CancelSignal,
    ) -> Result<(JobSnapshot, u32, Duration), AnalyzeError> {
        let budget = PollBudget::start(self.opts.timeout, self.opts.poll_interval);
        let timed_out = |reason| AnalyzeError::TimedOut {
            job_id: Some(job_id.to_owned()),
            timeout: self.opts.timeout,
            reason,
        };
        debug!(max_attempts = budget.max_attempts(), "Polling job");

        let mut attempts = 0;
        loop {
            let wait = budget.next_wait(attempts).map_err(timed_out)?;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(timed_out(TimeoutReason::Cancelled)),
                _ = time::sleep(wait) => {}
            }

            attempts += 1;
            // A hung status request must not carry us past the deadline.
            let cutoff = budget.fetch_cutoff();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(timed_out(TimeoutReason::Cancelled)),
                fetched = self.gateway.fetch_status(job_id, &job.analyzer_id) => fetched,
                _ = time::sleep_until(cutoff) => return Err(timed_out(TimeoutReason::Deadline)),
            };
            let snapshot = match fetched {
                Ok(snapshot) => Some(snapshot),
                Err(err) if err.is_known_transient() => {
                    warn!(attempt = attempts, "Transient error polling job: {err}");
                    None
                }
                Err(err) => {
                    return Err(AnalyzeError::Unexpected(
                        anyhow::Error::new(err)
                            .context(format!("failed to fetch status of {job_id}")),
                    ));
                }
            };

            let attempt = PollAttempt {
                index: attempts,
                elapsed: budget.elapsed(),
                status: snapshot.as_ref().map(|s| s.status.clone()),
            };
            debug!(
                attempt = attempt.index,
                elapsed_ms = attempt.elapsed.as_millis() as u64,
                status = attempt.status.as_deref().unwrap_or("<error>"),
                "Polled job"
            );

            match snapshot {
                Some(snapshot) if !is_running(&snapshot.status) => {
                    return Ok((snapshot, attempts, attempt.elapsed));
                }
                _ => {}
            }
        }
    }
}

/// Fail if `cancel` has fired before we've submitted anything.
fn check_cancelled(cancel: &CancelSignal, timeout: Duration) -> Result<(), AnalyzeError> {
    if cancel.is_cancelled() {
        Err(AnalyzeError::TimedOut {
            job_id: None,
            timeout,
            reason: TimeoutReason::Cancelled,
        })
    } else {
        Ok(())
    }
}

/// Extract a printable message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg
    } else {
        "unknown panic"
    }
}
