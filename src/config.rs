//! Service configuration.
//!
//! Everything can be passed on the command line, but normally comes from the
//! environment or a `.env` file.

use std::fmt;

use clap::Args;

use crate::{
    folders::AllowedFolders, gateway::ContentUnderstandingClient, prelude::*,
    stage::BlobContainerStage,
};

/// The API version we've tested against.
pub const DEFAULT_API_VERSION: &str = "2024-12-01-preview";

/// Fail unless `value` is present and non-empty.
pub fn require<'a>(value: Option<&'a str>, name: &str) -> Result<&'a str> {
    match value {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(anyhow!("Value for '{}' is missing or empty.", name)),
    }
}

/// Parse a required URL setting.
fn require_url(value: Option<&str>, name: &str) -> Result<Url> {
    let value = require(value, name)?;
    Url::parse(value).with_context(|| format!("Value for '{}' is not a valid URL", name))
}

/// How to reach the analysis service.
#[derive(Args, Clone)]
pub struct ServiceOpts {
    /// Base URL of the analysis service.
    #[clap(long, env = "ENDPOINT")]
    pub endpoint: Option<String>,

    /// API key for the analysis service.
    #[clap(long, env = "API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Analysis service API version.
    #[clap(long, env = "API_VERSION", default_value = DEFAULT_API_VERSION)]
    pub api_version: String,
}

// Options get logged, so keep secrets out of `Debug`.
impl fmt::Debug for ServiceOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceOpts")
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version)
            .finish()
    }
}

impl ServiceOpts {
    /// Build a client for the analysis service.
    pub fn client(&self) -> Result<ContentUnderstandingClient> {
        let endpoint = require_url(self.endpoint.as_deref(), "ENDPOINT")?;
        let api_key = require(self.api_key.as_deref(), "API_KEY")?;
        let api_version = require(Some(self.api_version.as_str()), "API_VERSION")?;
        ContentUnderstandingClient::new(endpoint, api_key.to_owned(), api_version.to_owned())
    }
}

/// Where to stage documents.
#[derive(Args, Clone)]
pub struct StageOpts {
    /// URL of a blob container, including a SAS token with create, read and
    /// delete permissions.
    #[clap(long, env = "STORAGE_CONTAINER_URL", hide_env_values = true)]
    pub storage_container_url: Option<String>,
}

impl fmt::Debug for StageOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageOpts")
            .field(
                "storage_container_url",
                &self.storage_container_url.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

impl StageOpts {
    /// Build our staging area.
    pub fn stage(&self) -> Result<BlobContainerStage> {
        let url = require_url(
            self.storage_container_url.as_deref(),
            "STORAGE_CONTAINER_URL",
        )?;
        BlobContainerStage::new(url)
    }
}

/// Which local folders documents may come from.
#[derive(Args, Clone, Debug)]
pub struct FolderOpts {
    /// Only read documents from inside these folders. May be repeated, or
    /// given as a comma-separated list. Defaults to allowing any folder.
    #[clap(long = "allowed-folder", env = "ALLOWED_FOLDERS", value_delimiter = ',')]
    pub allowed_folders: Vec<String>,
}

impl FolderOpts {
    /// Build our folder restrictions.
    pub fn allowed_folders(&self) -> Result<AllowedFolders> {
        AllowedFolders::new(
            self.allowed_folders
                .iter()
                .map(|folder| folder.trim())
                .filter(|folder| !folder.is_empty()),
        )
    }
}
