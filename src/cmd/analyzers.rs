//! The `analyzers` subcommand, for managing the remote analyzer catalog.

use clap::{Args, Subcommand};

use crate::{config::ServiceOpts, gateway::AnalyzerInfo, prelude::*};

/// Analyzer catalog command line arguments.
#[derive(Debug, Args)]
pub struct AnalyzersOpts {
    #[clap(subcommand)]
    pub action: AnalyzersCmd,

    #[clap(flatten)]
    pub service: ServiceOpts,
}

/// What to do with the catalog.
#[derive(Debug, Subcommand)]
pub enum AnalyzersCmd {
    /// List the available analyzers.
    List,
    /// Create or replace an analyzer.
    Create {
        /// The analyzer ID to create.
        analyzer_id: String,

        /// A JSON file containing the analyzer definition.
        #[clap(long = "schema", value_name = "FILE.json")]
        schema_path: PathBuf,
    },
}

/// The `analyzers` subcommand.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_analyzers(opts: &AnalyzersOpts) -> Result<()> {
    let client = opts.service.client()?;
    match &opts.action {
        AnalyzersCmd::List => {
            let analyzers = client
                .list_analyzers()
                .await
                .context("Failed to list analyzers")?;
            for analyzer in &analyzers.value {
                println!("{}", describe(analyzer));
            }
        }
        AnalyzersCmd::Create {
            analyzer_id,
            schema_path,
        } => {
            let definition = read_definition(schema_path).await?;
            client
                .create_analyzer(analyzer_id, &definition)
                .await
                .with_context(|| format!("Failed to create analyzer {analyzer_id}"))?;
            info!(analyzer_id, "Created analyzer");
        }
    }
    Ok(())
}

fn describe(analyzer: &AnalyzerInfo) -> String {
    format!(
        "Analyzer Name: {} with description: {}",
        analyzer.analyzer_id,
        analyzer.description.as_deref().unwrap_or("")
    )
}

/// Read an analyzer definition, which must be a JSON object.
async fn read_definition(path: &Path) -> Result<Value> {
    let data = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let definition = serde_json::from_str::<Value>(&data)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    if !definition.is_object() {
        bail!("{} must contain a JSON object", path.display());
    }
    Ok(definition)
}
