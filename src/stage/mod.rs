//! Transient staging of documents where the remote service can reach them.
//!
//! The analysis service downloads documents by URL, so before we can submit
//! a job we need to put the document somewhere URL-addressable. Once the job
//! is over, the staged copy must go away again, no matter how the job ended.
//! [`StagedObject`] owns that obligation.

use std::{ffi::OsStr, sync::Arc};

use uuid::Uuid;

use crate::prelude::*;

pub mod blob;

pub use self::blob::BlobContainerStage;

/// A URL-addressable store for short-lived objects.
#[async_trait]
pub trait ObjectStage: Send + Sync + 'static {
    /// Store `content` under `name`, and return a URL the remote service can
    /// read it from. A failed upload must not leave a readable object behind.
    async fn put(&self, name: &str, content: Vec<u8>) -> Result<Url>;

    /// Delete the object at `locator`. Deleting an object that does not exist
    /// is not an error.
    async fn delete(&self, locator: &Url) -> Result<()>;
}

/// Build a staging name for `source_path` which won't collide with any other
/// job, including other jobs for the same file.
///
/// `reports/invoice.pdf` becomes something like
/// `invoice-9f1c54f6d1a44bd6a3f6b1b2d04bc6d7.pdf`.
pub fn staging_name(source_path: &Path) -> String {
    let stem = source_path
        .file_stem()
        .and_then(OsStr::to_str)
        .filter(|stem| !stem.is_empty())
        .unwrap_or("document");
    let token = Uuid::new_v4().simple();
    match source_path.extension().and_then(OsStr::to_str) {
        Some(ext) => format!("{stem}-{token}.{ext}"),
        None => format!("{stem}-{token}"),
    }
}

/// A document which has been staged, and which we're responsible for
/// deleting.
///
/// Call [`StagedObject::release`] to delete it. If the guard is dropped
/// without being released (because the future holding it was cancelled, for
/// example), the delete is spawned onto the current Tokio runtime instead.
/// Either way, the object is deleted exactly once.
pub struct StagedObject {
    stage: Arc<dyn ObjectStage>,
    name: String,
    locator: Url,
    released: bool,
}

impl StagedObject {
    /// Upload `source_path` to `stage` under `name`.
    #[instrument(level = "debug", skip(stage))]
    pub async fn put(
        stage: Arc<dyn ObjectStage>,
        name: &str,
        source_path: &Path,
    ) -> Result<Self> {
        let content = tokio::fs::read(source_path)
            .await
            .with_context(|| format!("Failed to read {}", source_path.display()))?;
        let locator = stage.put(name, content).await?;
        debug!(%name, "Staged document");
        Ok(Self {
            stage,
            name: name.to_owned(),
            locator,
            released: false,
        })
    }

    /// Where the remote service can find this object.
    pub fn locator(&self) -> &Url {
        &self.locator
    }

    /// Delete the staged object. Failures are logged, never returned, because
    /// whatever happened to the job itself is more important.
    ///
    /// If this future is dropped before the delete finishes, `Drop` starts
    /// another one.
    pub async fn release(mut self) {
        delete_quietly(self.stage.as_ref(), &self.name, &self.locator).await;
        self.released = true;
    }
}

impl Drop for StagedObject {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let stage = self.stage.clone();
        let name = self.name.clone();
        let locator = self.locator.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!(%name, "Staged object dropped without release, deleting in background");
                handle.spawn(async move {
                    delete_quietly(stage.as_ref(), &name, &locator).await;
                });
            }
            Err(_) => {
                warn!(%name, "No runtime available to delete staged object");
            }
        }
    }
}

/// Delete `locator`, logging any failure.
async fn delete_quietly(stage: &dyn ObjectStage, name: &str, locator: &Url) {
    match stage.delete(locator).await {
        Ok(()) => debug!(%name, "Deleted staged document"),
        Err(err) => warn!(%name, "Failed to delete staged document: {err:?}"),
    }
}
