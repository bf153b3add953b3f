//! HTTP client for the Content Understanding REST API.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};

use super::{
    AnalysisGateway, AnalyzeRequest, AnalyzerList, GatewayError, JobSnapshot,
    SubmitResponse,
};
use crate::prelude::*;

/// All of the service's routes live under this path.
const API_ROOT: &str = "contentunderstanding";

/// Client for the content analysis service.
///
/// This holds no per-job state, so a single instance can be shared by any
/// number of concurrent analyses.
#[derive(Clone, Debug)]
pub struct ContentUnderstandingClient {
    client: Client,
    endpoint: Url,
    api_key: String,
    api_version: String,
}

impl ContentUnderstandingClient {
    /// Create a new client for the service at `endpoint`.
    pub fn new(endpoint: Url, api_key: String, api_version: String) -> Result<Self> {
        if endpoint.cannot_be_a_base() {
            bail!("Invalid analysis service endpoint: {}", endpoint);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(60))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint,
            api_key,
            api_version,
        })
    }

    /// Build a URL below our API root.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.endpoint.clone();
        // We checked `cannot_be_a_base` in `new`, so this always succeeds.
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(API_ROOT).extend(segments);
        }
        url
    }

    /// Add authentication and the API version to a request.
    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        req.bearer_auth(&self.api_key)
            .query(&[("api-version", self.api_version.as_str())])
    }

    /// List the analyzers known to the service.
    #[instrument(level = "debug", skip(self))]
    pub async fn list_analyzers(&self) -> Result<AnalyzerList, GatewayError> {
        let req = self.authorize(self.client.get(self.url(&["analyzers"])));
        let response = check_status(req.send().await?).await?;
        Ok(response.json::<AnalyzerList>().await?)
    }

    /// Create or replace an analyzer from a JSON definition.
    #[instrument(level = "debug", skip(self, definition))]
    pub async fn create_analyzer(
        &self,
        analyzer_id: &str,
        definition: &Value,
    ) -> Result<(), GatewayError> {
        let req = self
            .authorize(self.client.put(self.url(&["analyzers", analyzer_id])))
            .json(definition);
        check_status(req.send().await?).await?;
        Ok(())
    }
}

#[async_trait]
impl AnalysisGateway for ContentUnderstandingClient {
    #[instrument(level = "debug", skip(self, locator))]
    async fn submit(
        &self,
        analyzer_id: &str,
        locator: &Url,
    ) -> Result<SubmitResponse, GatewayError> {
        let action = format!("{analyzer_id}:analyze");
        let req = self
            .authorize(self.client.post(self.url(&["analyzers", &action])))
            .json(&AnalyzeRequest {
                url: locator.as_str(),
            });
        let response = check_status(req.send().await?).await?;
        let body = response.json::<SubmitResponse>().await?;
        debug!(?body, "Submit response");
        Ok(body)
    }

    #[instrument(level = "trace", skip(self))]
    async fn fetch_status(
        &self,
        job_id: &str,
        analyzer_id: &str,
    ) -> Result<JobSnapshot, GatewayError> {
        let url = self.url(&["analyzers", analyzer_id, "results", job_id]);
        let req = self.authorize(self.client.get(url));
        let response = check_status(req.send().await?).await?;
        Ok(response.json::<JobSnapshot>().await?)
    }
}

/// Turn non-2xx responses into [`GatewayError::Http`].
async fn check_status(response: Response) -> Result<Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_owned());
    Err(GatewayError::Http {
        status: status.as_u16(),
        message,
    })
}
