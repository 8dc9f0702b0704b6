//! HTTP client for the generation backend

use std::future::Future;

use forge3d_protocol::api::{
    BackendUrlResponse, ErrorDetail, JobStatusResponse, SubmitJobResponse, TextJobRequest,
    IMAGE_FIELD,
};
use forge3d_protocol::TUNNEL_BYPASS_HEADER;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;
use validator::Validate;

use crate::config::{join_url, ClientConfig};
use crate::error::{ForgeError, Result};
use crate::job::{JobId, JobRequest};

/// Operations the generation pipeline needs from the outside world.
///
/// Implemented over HTTP by [`HttpGenerationClient`] and by scripted doubles
/// in tests.
pub trait GenerationApi: Send + Sync + 'static {
    /// Current base URL of the generation backend
    fn resolve_backend(&self) -> impl Future<Output = Result<String>> + Send;

    /// Submit a job and return the server-assigned id
    fn submit(
        &self,
        backend: &str,
        request: &JobRequest,
    ) -> impl Future<Output = Result<SubmitJobResponse>> + Send;

    fn job_status(
        &self,
        backend: &str,
        job_id: &JobId,
    ) -> impl Future<Output = Result<JobStatusResponse>> + Send;

    /// Fetch the binary model from a server-provided download path
    fn download(
        &self,
        backend: &str,
        download_path: &str,
    ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// Base HTTP client with timeout and proxy policy applied
#[derive(Debug, Clone)]
pub struct BaseClient {
    pub(crate) client: Client,
    config: ClientConfig,
}

impl BaseClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let mut client_builder = Client::builder().timeout(config.timeout());

        if !config.use_proxy {
            client_builder = client_builder.no_proxy();
        }

        let client = client_builder.build()?;

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn backend_get(&self, url: &str) -> RequestBuilder {
        self.client.get(url).header(TUNNEL_BYPASS_HEADER, "true")
    }

    fn backend_post(&self, url: &str) -> RequestBuilder {
        self.client.post(url).header(TUNNEL_BYPASS_HEADER, "true")
    }
}

/// Read a JSON body, mapping non-2xx responses to API errors using `detail`
async fn parse_json_response<R: DeserializeOwned>(response: Response, fallback: &str) -> Result<R> {
    let status = response.status();
    let response_text = response.text().await?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorDetail>(&response_text)
            .map(|e| e.detail)
            .unwrap_or_else(|_| format!("{} (status {})", fallback, status.as_u16()));
        return Err(ForgeError::api(status.as_u16(), message));
    }

    serde_json::from_str::<R>(&response_text)
        .map_err(|_| ForgeError::invalid_response(format!("Invalid API response: {}", response_text)))
}

#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    base_client: BaseClient,
}

impl HttpGenerationClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        Ok(Self {
            base_client: BaseClient::new(config)?,
        })
    }

    pub fn config(&self) -> &ClientConfig {
        self.base_client.config()
    }

    async fn discover(&self) -> Result<String> {
        let endpoint = self.config().discovery_endpoint();
        debug!(%endpoint, "resolving backend address");

        let response = self.base_client.client.get(&endpoint).send().await?;
        let status = response.status();
        let response_text = response.text().await?;
        let body = serde_json::from_str::<BackendUrlResponse>(&response_text).unwrap_or_default();

        if !status.is_success() {
            return Err(ForgeError::discovery(
                body.error
                    .unwrap_or_else(|| "Failed to fetch backend URL".to_string()),
            ));
        }

        match body.url {
            Some(url) if !url.trim().is_empty() => Ok(url.trim().trim_end_matches('/').to_string()),
            _ => Err(ForgeError::discovery(format!(
                "Discovery response has no url: {}",
                response_text
            ))),
        }
    }

    async fn submit_text(&self, backend: &str, caption: &str) -> Result<SubmitJobResponse> {
        let payload = TextJobRequest {
            caption: caption.to_string(),
        };
        payload.validate()?;

        let url = join_url(backend, "/jobs/text-to-3d");
        let response = self.base_client.backend_post(&url).json(&payload).send().await?;
        parse_json_response(response, "Job submission failed").await
    }

    async fn submit_image(
        &self,
        backend: &str,
        filename: &str,
        mime: &str,
        bytes: Vec<u8>,
    ) -> Result<SubmitJobResponse> {
        let part = Part::bytes(bytes)
            .file_name(filename.to_string())
            .mime_str(mime)?;
        let form = Form::new().part(IMAGE_FIELD, part);

        let url = join_url(backend, "/jobs/image-to-3d");
        let response = self
            .base_client
            .backend_post(&url)
            .multipart(form)
            .send()
            .await?;
        parse_json_response(response, "Job submission failed").await
    }
}

impl GenerationApi for HttpGenerationClient {
    async fn resolve_backend(&self) -> Result<String> {
        if let Some(url) = &self.config().backend_url {
            return Ok(url.trim_end_matches('/').to_string());
        }
        self.discover().await
    }

    async fn submit(&self, backend: &str, request: &JobRequest) -> Result<SubmitJobResponse> {
        request.validate()?;
        match request {
            JobRequest::Text { caption } => self.submit_text(backend, caption).await,
            JobRequest::Image(upload) => {
                self.submit_image(backend, &upload.filename, &upload.mime, upload.bytes.clone())
                    .await
            }
        }
    }

    async fn job_status(&self, backend: &str, job_id: &JobId) -> Result<JobStatusResponse> {
        let url = join_url(backend, &format!("/jobs/{}/status", job_id));
        let response = self.base_client.backend_get(&url).send().await?;
        parse_json_response(response, "Status check failed").await
    }

    async fn download(&self, backend: &str, download_path: &str) -> Result<Vec<u8>> {
        let url = if download_path.starts_with("http://") || download_path.starts_with("https://")
        {
            download_path.to_string()
        } else {
            join_url(backend, download_path)
        };

        let response = self
            .base_client
            .backend_get(&url)
            .send()
            .await
            .map_err(|e| ForgeError::download(format!("Failed to download model: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForgeError::download(format!(
                "Failed to download GLB file. Status: {}",
                status.as_u16()
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ForgeError::download(format!("Failed to read model payload: {}", e)))?;
        if bytes.is_empty() {
            return Err(ForgeError::download("Downloaded model is empty"));
        }
        Ok(bytes.to_vec())
    }
}
