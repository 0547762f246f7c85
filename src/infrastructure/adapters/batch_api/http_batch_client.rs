//! HTTP Batch Client - 调用 Gemini Batch API
//!
//! 实现 BatchApiPort trait:
//! - 文件上传: POST {base}/upload/{version}/files（resumable，两步）
//! - 文件/任务查询: GET {base}/{version}/{name}
//! - 创建任务: POST {base}/{version}/models/{model}:batchGenerateContent
//! - 取消任务: POST {base}/{version}/{name}:cancel
//! - 下载结果: GET {base}/download/{version}/{file}:download?alt=media

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

use super::dto::{
    BatchSpec, CreateBatchRequest, FileDto, InputConfig, OperationDto, StartUploadRequest,
    UploadFileMetadata, UploadResponse,
};
use crate::application::ports::{
    BatchApiError, BatchApiPort, BatchApiProvider, RemoteFile, RemoteJob,
};

const API_KEY_HEADER: &str = "x-goog-api-key";
const UPLOAD_URL_HEADER: &str = "x-goog-upload-url";

/// HTTP Batch 客户端配置
#[derive(Debug, Clone)]
pub struct HttpBatchClientConfig {
    /// API 基础 URL
    pub base_url: String,
    /// API 版本路径段
    pub api_version: String,
    /// 普通请求超时时间（秒）
    pub timeout_secs: u64,
    /// 上传请求超时时间（秒）
    pub upload_timeout_secs: u64,
}

impl Default for HttpBatchClientConfig {
    fn default() -> Self {
        Self {
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            api_version: "v1beta".to_string(),
            timeout_secs: 120,
            upload_timeout_secs: 600,
        }
    }
}

impl HttpBatchClientConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    fn resource_url(&self, name: &str) -> String {
        format!("{}/{}/{}", self.base(), self.api_version, name)
    }

    fn upload_url(&self) -> String {
        format!("{}/upload/{}/files", self.base(), self.api_version)
    }

    fn create_batch_url(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!(
            "{}/{}/models/{}:batchGenerateContent",
            self.base(),
            self.api_version,
            model
        )
    }

    fn download_url(&self, file_name: &str) -> String {
        format!(
            "{}/download/{}/{}:download?alt=media",
            self.base(),
            self.api_version,
            file_name
        )
    }
}

/// HTTP Batch 客户端
///
/// 单个 API Key 的客户端；不做重试
pub struct HttpBatchClient {
    client: Client,
    config: HttpBatchClientConfig,
    api_key: String,
}

impl HttpBatchClient {
    pub fn new(config: HttpBatchClientConfig, api_key: impl Into<String>) -> Result<Self, BatchApiError> {
        Ok(Self::with_client(build_client(&config)?, config, api_key))
    }

    fn with_client(client: Client, config: HttpBatchClientConfig, api_key: impl Into<String>) -> Self {
        Self {
            client,
            config,
            api_key: api_key.into(),
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.api_key)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, BatchApiError> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(BatchApiError::Http {
                status: status.as_u16(),
                message,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, BatchApiError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| BatchApiError::Decode(e.to_string()))
    }

    async fn get_operation(&self, name: &str) -> Result<OperationDto, BatchApiError> {
        self.send_json(self.client.get(self.config.resource_url(name)))
            .await
    }
}

fn build_client(config: &HttpBatchClientConfig) -> Result<Client, BatchApiError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| BatchApiError::Transport(e.to_string()))
}

fn map_transport_error(e: reqwest::Error) -> BatchApiError {
    if e.is_timeout() {
        BatchApiError::Timeout
    } else if e.is_connect() {
        BatchApiError::Transport(format!("Cannot connect to batch API: {}", e))
    } else {
        BatchApiError::Transport(e.to_string())
    }
}

#[async_trait]
impl BatchApiPort for HttpBatchClient {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, BatchApiError> {
        let upload_timeout = Duration::from_secs(self.config.upload_timeout_secs);

        tracing::debug!(
            url = %self.config.upload_url(),
            size = bytes.len(),
            display_name = %display_name,
            "Starting resumable upload"
        );

        let start = self
            .client
            .post(self.config.upload_url())
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&StartUploadRequest {
                file: UploadFileMetadata { display_name },
            });
        let response = self.send(start).await?;
        let session_url = response
            .headers()
            .get(UPLOAD_URL_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(BatchApiError::MissingField(UPLOAD_URL_HEADER))?;

        let finalize = self
            .client
            .post(session_url)
            .timeout(upload_timeout)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes);
        let uploaded: UploadResponse = self.send_json(finalize).await?;
        let file = RemoteFile::try_from(
            uploaded
                .file
                .ok_or(BatchApiError::MissingField("file"))?,
        )?;

        tracing::info!(name = %file.name, state = ?file.state, "File uploaded");
        Ok(file)
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, BatchApiError> {
        let dto: FileDto = self
            .send_json(self.client.get(self.config.resource_url(name)))
            .await?;
        RemoteFile::try_from(dto)
    }

    async fn create_batch_job(
        &self,
        file_name: &str,
        display_name: &str,
        model: &str,
    ) -> Result<RemoteJob, BatchApiError> {
        let body = CreateBatchRequest {
            batch: BatchSpec {
                display_name,
                input_config: InputConfig { file_name },
            },
        };
        let operation: OperationDto = self
            .send_json(self.client.post(self.config.create_batch_url(model)).json(&body))
            .await?;
        let job = RemoteJob::try_from(operation)?;

        tracing::info!(name = %job.name, state = ?job.state, model = %model, "Batch job created");
        Ok(job)
    }

    async fn get_batch_job(&self, name: &str) -> Result<RemoteJob, BatchApiError> {
        RemoteJob::try_from(self.get_operation(name).await?)
    }

    async fn cancel_batch_job(&self, name: &str) -> Result<(), BatchApiError> {
        let url = format!("{}:cancel", self.config.resource_url(name));
        self.send(self.client.post(url)).await?;
        tracing::info!(name = %name, "Remote batch job cancelled");
        Ok(())
    }

    async fn download_results(&self, job_name: &str) -> Result<Vec<u8>, BatchApiError> {
        let operation = self.get_operation(job_name).await?;
        let responses_file = operation
            .responses_file()
            .ok_or(BatchApiError::MissingField("responsesFile"))?
            .to_string();

        let response = self
            .send(
                self.client
                    .get(self.config.download_url(&responses_file))
                    .timeout(Duration::from_secs(self.config.upload_timeout_secs)),
            )
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| BatchApiError::Decode(format!("Failed to read results: {}", e)))?
            .to_vec();

        tracing::info!(job = %job_name, file = %responses_file, size = bytes.len(), "Results downloaded");
        Ok(bytes)
    }
}

/// 按 API Key 创建 [`HttpBatchClient`]，共享底层连接池
pub struct HttpBatchClientProvider {
    client: Client,
    config: HttpBatchClientConfig,
}

impl HttpBatchClientProvider {
    pub fn new(config: HttpBatchClientConfig) -> Result<Self, BatchApiError> {
        Ok(Self {
            client: build_client(&config)?,
            config,
        })
    }
}

impl BatchApiProvider for HttpBatchClientProvider {
    fn client(&self, api_key: &str) -> Result<Arc<dyn BatchApiPort>, BatchApiError> {
        if api_key.trim().is_empty() {
            return Err(BatchApiError::MissingField("api_key"));
        }
        Ok(Arc::new(HttpBatchClient::with_client(
            self.client.clone(),
            self.config.clone(),
            api_key,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = HttpBatchClientConfig::default();
        assert_eq!(config.base_url, "https://generativelanguage.googleapis.com");
        assert_eq!(config.api_version, "v1beta");
        assert_eq!(config.timeout_secs, 120);
    }

    #[test]
    fn test_endpoint_urls() {
        let config = HttpBatchClientConfig::new("http://localhost:9000/").with_timeout(5);
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.upload_url(), "http://localhost:9000/upload/v1beta/files");
        assert_eq!(
            config.resource_url("batches/xyz"),
            "http://localhost:9000/v1beta/batches/xyz"
        );
        assert_eq!(
            config.create_batch_url("models/gemini-2.5-flash"),
            "http://localhost:9000/v1beta/models/gemini-2.5-flash:batchGenerateContent"
        );
        assert_eq!(
            config.download_url("files/out"),
            "http://localhost:9000/download/v1beta/files/out:download?alt=media"
        );
    }

    #[test]
    fn test_provider_rejects_blank_key() {
        let provider = HttpBatchClientProvider::new(HttpBatchClientConfig::default()).unwrap();
        assert!(provider.client("  ").is_err());
        assert!(provider.client("secret").is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        let config = HttpBatchClientConfig::new("http://127.0.0.1:1").with_timeout(2);
        let client = HttpBatchClient::new(config, "secret").unwrap();
        let err = client.get_batch_job("batches/xyz").await.unwrap_err();
        assert!(err.is_transient());
    }
}
