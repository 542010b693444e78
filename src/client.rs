//! HTTP clients for the analysis job API and the content-addressed storage gateway.

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

use crate::acquirer::JobSource;
use crate::error::FetchError;
use crate::pipeline::ContentSource;

/// Client for the dataset analysis backend.
#[derive(Clone)]
pub struct AnalysisApiClient {
    client: Client,
    base_url: String,
}

impl AnalysisApiClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Upload a dataset file and return the id of the analysis job it started.
    pub async fn upload(&self, file_name: &str, data: Vec<u8>, is_public: bool) -> Result<String, FetchError> {
        if file_name.trim().is_empty() {
            return Err(FetchError::InvalidRequest("file name is empty".to_string()));
        }

        let size = data.len();
        let part = Part::bytes(data).file_name(file_name.to_string());
        let form = Form::new()
            .part("file", part)
            .text("is_public", if is_public { "true" } else { "false" });

        info!("Uploading {} ({} bytes) to {}", file_name, size, self.base_url);
        let response = self
            .client
            .post(format!("{}/upload/", self.base_url))
            .multipart(form)
            .send()
            .await?;

        let body = read_json(response).await?;
        let analysis_id = match body.get("analysis_id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.trim().to_string(),
            Some(Value::Number(n)) => n.to_string(),
            _ => {
                return Err(FetchError::Decode(format!(
                    "upload response has no analysis_id: {}",
                    body
                )))
            }
        };

        info!("Upload accepted, analysis id {}", analysis_id);
        Ok(analysis_id)
    }

    /// Fetch the current status payload of an analysis job.
    pub async fn fetch_status(&self, job_id: &str) -> Result<Value, FetchError> {
        let job_id = validate_id("analysis id", job_id)?;
        let url = format!("{}/analysis/{}/", self.base_url, job_id);

        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        let payload = read_json(response).await?;
        Ok(lift_metadata(payload))
    }
}

#[async_trait]
impl JobSource for AnalysisApiClient {
    fn name(&self) -> &str {
        "analysis-api"
    }

    async fn fetch_status(&self, job_id: &str) -> Result<Value, FetchError> {
        AnalysisApiClient::fetch_status(self, job_id).await
    }
}

/// The status endpoint puts job metadata beside `results` rather than inside it.
/// Move it in so the payload classifies as structured results.
fn lift_metadata(mut payload: Value) -> Value {
    let Some(root) = payload.as_object_mut() else {
        return payload;
    };
    let needs_lift = root
        .get("results")
        .and_then(Value::as_object)
        .map(|r| !r.is_empty() && r.get("metadata").map_or(true, Value::is_null))
        .unwrap_or(false);

    if needs_lift {
        if let Some(metadata) = root.get("metadata").cloned() {
            if let Some(results) = root.get_mut("results").and_then(Value::as_object_mut) {
                results.insert("metadata".to_string(), metadata);
            }
        }
    }
    payload
}

/// Client for an IPFS-style gateway serving JSON by content identifier.
#[derive(Clone)]
pub struct GatewayClient {
    client: Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub async fn fetch(&self, cid: &str) -> Result<Value, FetchError> {
        let cid = validate_id("content id", cid)?;
        let url = format!("{}/{}", self.base_url, cid);

        debug!("GET {}", url);
        let response = self.client.get(&url).send().await?;
        read_json(response).await
    }
}

#[async_trait]
impl ContentSource for GatewayClient {
    fn name(&self) -> &str {
        "gateway"
    }

    async fn fetch(&self, cid: &str) -> Result<Value, FetchError> {
        GatewayClient::fetch(self, cid).await
    }
}

fn validate_id<'a>(what: &str, id: &'a str) -> Result<&'a str, FetchError> {
    let id = id.trim();
    if id.is_empty() {
        return Err(FetchError::InvalidRequest(format!("{} is empty", what)));
    }
    if id.contains('/') {
        return Err(FetchError::InvalidRequest(format!("{} contains '/': {}", what, id)));
    }
    Ok(id)
}

async fn read_json(response: reqwest::Response) -> Result<Value, FetchError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(FetchError::Status {
            status: status.as_u16(),
            body,
        });
    }
    Ok(response.json::<Value>().await?)
}
