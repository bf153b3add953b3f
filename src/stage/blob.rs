//! Staging documents in a blob storage container.
//!
//! We address the container with a URL that carries its own SAS token in the
//! query string. The same token is carried over to each blob URL, which is
//! what lets the remote analysis service download the blob.

use std::time::Duration;

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};

use super::ObjectStage;
use crate::prelude::*;

/// Storage REST API version we speak.
const STORAGE_API_VERSION: &str = "2023-11-03";

/// An [`ObjectStage`] backed by a blob storage container.
#[derive(Clone, Debug)]
pub struct BlobContainerStage {
    client: Client,
    container_url: Url,
}

impl BlobContainerStage {
    /// Create a stage for the container at `container_url`.
    pub fn new(container_url: Url) -> Result<Self> {
        if container_url.cannot_be_a_base() {
            bail!("Invalid storage container URL: {}", container_url);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(300))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            container_url,
        })
    }

    /// The URL of the blob called `name`, including the container's query
    /// string.
    fn blob_url(&self, name: &str) -> Url {
        let mut url = self.container_url.clone();
        // We checked `cannot_be_a_base` in `new`, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(name);
        }
        url
    }
}

#[async_trait]
impl ObjectStage for BlobContainerStage {
    #[instrument(level = "debug", skip(self, content), fields(bytes = content.len()))]
    async fn put(&self, name: &str, content: Vec<u8>) -> Result<Url> {
        let url = self.blob_url(name);
        let content_type = mime_guess::from_path(name).first_or_octet_stream();

        // A single "Put Blob" call either creates the whole blob or nothing.
        let response = self
            .client
            .put(url.clone())
            .header("x-ms-blob-type", "BlockBlob")
            .header("x-ms-version", STORAGE_API_VERSION)
            .header(CONTENT_TYPE, content_type.essence_str())
            .body(content)
            .send()
            .await
            .with_context(|| format!("Failed to upload {name}"))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            bail!("Upload of {name} failed with status {status}: {message}");
        }
        Ok(url)
    }

    #[instrument(level = "debug", skip_all, fields(path = %locator.path()))]
    async fn delete(&self, locator: &Url) -> Result<()> {
        let response = self
            .client
            .delete(locator.clone())
            .header("x-ms-version", STORAGE_API_VERSION)
            .send()
            .await
            .context("Failed to delete staged blob")?;
        let status = response.status();
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            let message = response.text().await.unwrap_or_default();
            Err(anyhow!(
                "Delete of {} failed with status {status}: {message}",
                locator.path()
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_bytes, header, method, path, query_param},
    };

    use super::*;

    fn stage_for(server: &MockServer) -> BlobContainerStage {
        let url = Url::parse(&format!("{}/docs?sv=2023&sig=secret", server.uri())).unwrap();
        BlobContainerStage::new(url).unwrap()
    }

    #[test]
    fn test_blob_url_keeps_sas_token() {
        let stage = BlobContainerStage::new(
            Url::parse("https://acct.blob.example/docs?sv=2023&sig=abc").unwrap(),
        )
        .unwrap();
        assert_eq!(
            stage.blob_url("invoice-1.pdf").as_str(),
            "https://acct.blob.example/docs/invoice-1.pdf?sv=2023&sig=abc"
        );
    }

    #[tokio::test]
    async fn test_put_uploads_block_blob() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/docs/invoice-1.pdf"))
            .and(query_param("sig", "secret"))
            .and(header("x-ms-blob-type", "BlockBlob"))
            .and(header("content-type", "application/pdf"))
            .and(body_bytes(b"%PDF-1.7".to_vec()))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let locator = stage_for(&server)
            .put("invoice-1.pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap();
        assert_eq!(locator.path(), "/docs/invoice-1.pdf");
        assert_eq!(locator.query(), Some("sv=2023&sig=secret"));
    }

    #[tokio::test]
    async fn test_put_reports_failures() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string("AuthenticationFailed"))
            .mount(&server)
            .await;

        let err = stage_for(&server)
            .put("invoice-1.pdf", b"%PDF-1.7".to_vec())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("AuthenticationFailed"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/docs/invoice-1.pdf"))
            .respond_with(ResponseTemplate::new(202))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/docs/invoice-1.pdf"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let stage = stage_for(&server);
        let locator = stage.blob_url("invoice-1.pdf");
        stage.delete(&locator).await.unwrap();
        stage.delete(&locator).await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_reports_other_failures() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let stage = stage_for(&server);
        let locator = stage.blob_url("invoice-1.pdf");
        assert!(stage.delete(&locator).await.is_err());
    }
}
