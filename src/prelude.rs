//! Standard APIs we use everywhere.

pub use std::path::{Path, PathBuf};

#[allow(unused_imports)]
pub use anyhow::{Context as _, Result, anyhow, bail};
pub use async_trait::async_trait;
pub use reqwest::Url;
pub use serde::{Deserialize, Serialize};
pub use serde_json::Value;
#[allow(unused_imports)]
pub use tracing::{debug, error, info, instrument, trace, warn};
