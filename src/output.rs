//! Output records, one JSON line per analyzed document.

use futures::{Stream, StreamExt as _, pin_mut};
use schemars::JsonSchema;
use tokio::{
    fs::File,
    io::{self, AsyncWrite, AsyncWriteExt as _, BufWriter},
};

use crate::{
    analyze::{AnalysisResult, AnalyzeError, ErrorKind},
    prelude::*,
    ui::Ui,
};

/// How the analysis of one document ended.
#[derive(Clone, Copy, Debug, JsonSchema, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// The analyzer succeeded.
    Ok,
    /// The job was still running when we gave up on it.
    TimedOut,
    /// Anything else went wrong.
    Failed,
}

/// Output record for a single document.
#[derive(Clone, Debug, JsonSchema, Serialize)]
pub struct AnalysisRecord {
    /// The document we analyzed.
    pub path: PathBuf,

    /// How did it go?
    pub status: RecordStatus,

    /// What kind of error occurred, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// The remote job ID, if we got that far.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,

    /// Any errors that occurred.
    pub errors: Vec<String>,

    /// The analyzer's output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// For jobs which finished unsuccessfully, everything the remote service
    /// told us about the job.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<Value>,
}

impl AnalysisRecord {
    /// Build a record from the outcome of analyzing `path`.
    pub fn from_outcome(path: &Path, outcome: Result<AnalysisResult, AnalyzeError>) -> Self {
        match outcome {
            Ok(result) => Self {
                path: path.to_owned(),
                status: RecordStatus::Ok,
                error_kind: None,
                job_id: Some(result.job_id),
                errors: vec![],
                result: Some(result.result),
                remote: None,
            },
            Err(err) => {
                let kind = err.kind();
                let errors = vec![err.report()];
                let (job_id, remote) = match err {
                    AnalyzeError::TimedOut { job_id, .. } => (job_id, None),
                    AnalyzeError::RemoteFailure {
                        job_id, snapshot, ..
                    } => (Some(job_id), serde_json::to_value(*snapshot).ok()),
                    _ => (None, None),
                };
                Self {
                    path: path.to_owned(),
                    status: if kind == ErrorKind::Timeout {
                        RecordStatus::TimedOut
                    } else {
                        RecordStatus::Failed
                    },
                    error_kind: Some(kind),
                    job_id,
                    errors,
                    result: None,
                    remote,
                }
            }
        }
    }
}

/// Counts of what we wrote.
#[derive(Clone, Debug, Default)]
pub struct RecordCounters {
    /// How many records did we write?
    pub total: usize,
    /// How many of them timed out?
    pub timed_out: usize,
    /// How many of them failed for other reasons?
    pub failed: usize,
}

impl RecordCounters {
    fn update(&mut self, record: &AnalysisRecord) {
        self.total += 1;
        match record.status {
            RecordStatus::Ok => {}
            RecordStatus::TimedOut => self.timed_out += 1,
            RecordStatus::Failed => self.failed += 1,
        }
    }

    /// Report our counts, and fail if too many records failed.
    pub fn finish(&self, ui: &Ui, allowed_failure_rate: f32) -> Result<()> {
        let failures = self.timed_out + self.failed;
        if self.timed_out > 0 {
            ui.display_message("⏳", &format!("{} analyses timed out", self.timed_out));
        }
        if failures == 0 {
            return Ok(());
        }
        ui.display_message(
            "❌",
            &format!("{} of {} analyses failed", failures, self.total),
        );
        let failure_rate = failures as f32 / self.total as f32;
        if failure_rate > allowed_failure_rate {
            Err(anyhow!(
                "Failure rate {:.1}% exceeds allowed {:.1}%",
                failure_rate * 100.0,
                allowed_failure_rate * 100.0,
            ))
        } else {
            Ok(())
        }
    }
}

/// Create a writer for `path`, or for standard output.
pub async fn create_writer(
    path: Option<&Path>,
) -> Result<Box<dyn AsyncWrite + Unpin + Send + 'static>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .await
                .with_context(|| format!("Failed to create {}", path.display()))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

/// Write `records` as JSON Lines.
pub async fn write_records(
    path: Option<&Path>,
    records: impl Stream<Item = AnalysisRecord>,
) -> Result<RecordCounters> {
    let mut writer = BufWriter::new(create_writer(path).await?);
    let mut counters = RecordCounters::default();
    pin_mut!(records);
    while let Some(record) = records.next().await {
        counters.update(&record);
        let json = serde_json::to_string(&record)
            .with_context(|| format!("Failed to serialize record for {:?}", record.path))?;
        writer
            .write_all(json.as_bytes())
            .await
            .context("Failed to write JSON to output")?;
        writer
            .write_all(b"\n")
            .await
            .context("Failed to write newline to output")?;
        // Records arrive slowly, so don't keep finished ones in a buffer.
        writer.flush().await.context("Failed to flush output")?;
    }
    writer.flush().await.context("Failed to flush output")?;
    Ok(counters)
}
