use std::str::FromStr;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::Directive, fmt::format::FmtSpan, layer::SubscriberExt,
    util::SubscriberInitExt as _,
};

use self::{prelude::*, ui::Ui};

mod analyze;
mod cancel;
mod cmd;
mod config;
mod folders;
mod gateway;
mod output;
mod prelude;
mod retry;
mod stage;
#[cfg(test)]
mod test_utils;
mod ui;

/// Analyze documents with a remote content-analysis service.
#[derive(Debug, Parser)]
#[clap(
    version,
    author,
    after_help = r#"
Environment Variables:
  - STORAGE_CONTAINER_URL: Blob container URL, with a SAS token, used to
    stage documents.
  - ENDPOINT: Base URL of the analysis service.
  - API_KEY: Key for the analysis service.
  - API_VERSION (optional): Analysis service API version.
  - ALLOWED_FOLDERS (optional): Comma-separated folders documents may be
    read from.

  These variables may be set in a standard `.env` file.
"#
)]
struct Opts {
    #[clap(subcommand)]
    subcmd: Cmd,
}

/// The subcommands we support.
#[derive(Debug, Subcommand)]
enum Cmd {
    /// Analyze documents, writing one JSON line per document.
    Analyze(cmd::analyze::AnalyzeOpts),
    /// List or create analyzers.
    Analyzers(cmd::analyzers::AnalyzersOpts),
    /// Show which folders documents may be read from.
    Folders(cmd::folders::FoldersOpts),
    /// Print schemas for output formats.
    Schema(cmd::schema::SchemaOpts),
}

impl Cmd {
    /// Are we using stdout for output?
    fn using_stdout_for_output(&self) -> bool {
        match self {
            Cmd::Analyze(opts) => opts.output_path.is_none(),
            Cmd::Analyzers(_) | Cmd::Folders(_) => true,
            Cmd::Schema(opts) => opts.output_path.is_none(),
        }
    }
}

/// Our entry point, which can return an error. [`anyhow::Result`] will
/// automatically print a nice error message with optional backtrace.
#[tokio::main]
async fn main() -> Result<()> {
    let ui = Ui::init();

    // Initialize tracing.
    let directive =
        Directive::from_str("info").expect("built-in directive should be valid");
    let env_filter = EnvFilter::builder()
        .with_default_directive(directive)
        .from_env_lossy();

    let subscriber = tracing_subscriber::fmt::layer()
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
        .with_writer(ui.get_stderr_writer())
        .with_filter(env_filter);

    tracing_subscriber::registry().with(subscriber).init();

    real_main(ui).await
}

/// Our real entry point.
#[instrument(level = "debug", name = "main", skip_all)]
async fn real_main(ui: Ui) -> Result<()> {
    // Load environment variables from a `.env` file, if it exists.
    dotenvy::dotenv().ok();

    let opts = Opts::parse();
    debug!("Parsed options: {:?}", opts);

    // Hide the progress bar if we're using stdout for output.
    if opts.subcmd.using_stdout_for_output() {
        ui.hide_progress_bars();
    }

    match &opts.subcmd {
        Cmd::Analyze(analyze_opts) => {
            cmd::analyze::cmd_analyze(ui, analyze_opts).await?;
        }
        Cmd::Analyzers(analyzers_opts) => {
            cmd::analyzers::cmd_analyzers(analyzers_opts).await?;
        }
        Cmd::Folders(folders_opts) => {
            cmd::folders::cmd_folders(folders_opts).await?;
        }
        Cmd::Schema(schema_opts) => {
            cmd::schema::cmd_schema(schema_opts).await?;
        }
    }
    Ok(())
}
