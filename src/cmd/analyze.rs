//! The `analyze` subcommand.

use std::{process, sync::Arc, time::Duration};

use clap::Args;
use futures::{Stream, StreamExt as _, future, stream};

use crate::{
    analyze::{DEFAULT_TIMEOUT, Orchestrator, PollOpts},
    cancel::{CancelHandle, CancelSignal},
    config::{FolderOpts, ServiceOpts, StageOpts},
    output::{AnalysisRecord, write_records},
    prelude::*,
    ui::{ProgressConfig, Ui},
};

/// Analyze command line arguments.
#[derive(Debug, Args)]
pub struct AnalyzeOpts {
    /// The analyzer to run.
    #[clap(short = 'a', long)]
    pub analyzer: String,

    /// Documents to analyze.
    #[clap(required = true, value_name = "FILE")]
    pub paths: Vec<PathBuf>,

    /// Give up on a document after this many seconds.
    #[clap(long, default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout: u64,

    /// Seconds to wait between status requests.
    #[clap(long, default_value = "1.0")]
    pub poll_interval: f64,

    /// Number of documents to analyze at once.
    #[clap(short = 'j', long = "jobs", default_value = "4")]
    pub job_count: usize,

    /// What fraction of documents may fail before we report an error?
    #[clap(long, default_value = "0.0")]
    pub allowed_failure_rate: f32,

    /// Output location, as JSON Lines. Defaults to standard output.
    #[clap(short = 'o', long = "out")]
    pub output_path: Option<PathBuf>,

    #[clap(flatten)]
    pub service: ServiceOpts,

    #[clap(flatten)]
    pub stage: StageOpts,

    #[clap(flatten)]
    pub folders: FolderOpts,
}

impl AnalyzeOpts {
    fn poll_opts(&self) -> Result<PollOpts> {
        let poll_interval = Duration::try_from_secs_f64(self.poll_interval)
            .with_context(|| format!("Invalid poll interval: {}", self.poll_interval))?;
        if poll_interval.is_zero() {
            bail!("Poll interval must be greater than zero");
        }
        Ok(PollOpts {
            timeout: Duration::from_secs(self.timeout),
            poll_interval,
        })
    }
}

/// The `analyze` subcommand.
#[instrument(level = "debug", skip_all, fields(analyzer = %opts.analyzer))]
pub async fn cmd_analyze(ui: Ui, opts: &AnalyzeOpts) -> Result<()> {
    if opts.job_count == 0 {
        bail!("--jobs must be at least 1");
    }

    let orchestrator = Orchestrator::new(
        Arc::new(opts.stage.stage()?),
        Arc::new(opts.service.client()?),
    )
    .with_opts(opts.poll_opts()?)
    .with_allowed_folders(opts.folders.allowed_folders()?);

    // Stop waiting on remote jobs when the user hits Ctrl-C. Each analysis
    // still cleans up its staged copy before finishing. A second Ctrl-C exits
    // immediately.
    let cancel = Arc::new(CancelHandle::new());
    let ctrl_c = tokio::spawn({
        let cancel = cancel.clone();
        let ui = ui.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
            ui.display_message("🛑", "Interrupted, cleaning up (Ctrl-C again to quit)");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                ui.display_message("🛑", "Quitting without cleaning up");
                process::exit(130);
            }
        }
    });

    let pb = ui.new_progress_bar(
        &ProgressConfig {
            emoji: "🔎",
            msg: "Analyzing documents",
            done_msg: "Analyzed documents",
        },
        opts.paths.len() as u64,
    );

    let records = analyze_paths(
        &orchestrator,
        &opts.analyzer,
        &opts.paths,
        opts.job_count,
        cancel.signal(),
    );
    let counters = write_records(opts.output_path.as_deref(), pb.wrap_stream(records)).await;
    ctrl_c.abort();

    let counters = counters?;
    let skipped = opts.paths.len() - counters.total;
    if skipped > 0 {
        ui.display_message("⏭️", &format!("Skipped {skipped} documents after Ctrl-C"));
    }
    counters.finish(&ui, opts.allowed_failure_rate)
}

/// Analyze `paths`, up to `job_count` at a time, yielding records as they
/// finish. Once `cancel` fires, no more documents are started.
fn analyze_paths<'a>(
    orchestrator: &'a Orchestrator,
    analyzer_id: &'a str,
    paths: &'a [PathBuf],
    job_count: usize,
    cancel: CancelSignal,
) -> impl Stream<Item = AnalysisRecord> + 'a {
    let not_cancelled = cancel.clone();
    stream::iter(paths)
        .take_while(move |_| future::ready(!not_cancelled.is_cancelled()))
        .map(move |path| {
            let cancel = cancel.clone();
            async move {
                let outcome = orchestrator
                    .analyze_cancellable(analyzer_id, path, &cancel)
                    .await;
                AnalysisRecord::from_outcome(path, outcome)
            }
        })
        .buffer_unordered(job_count)
}
