//! The `folders` subcommand.

use clap::Args;

use crate::{config::FolderOpts, prelude::*};

/// Folders command line arguments.
#[derive(Debug, Args)]
pub struct FoldersOpts {
    #[clap(flatten)]
    pub folders: FolderOpts,
}

/// Print the folders documents may be read from.
#[instrument(level = "debug", skip_all)]
pub async fn cmd_folders(opts: &FoldersOpts) -> Result<()> {
    let folders = opts.folders.allowed_folders()?;
    if folders.folders().is_empty() {
        println!("All folders are allowed.");
    }
    for folder in folders.folders() {
        println!("{}", folder.display());
    }
    Ok(())
}
