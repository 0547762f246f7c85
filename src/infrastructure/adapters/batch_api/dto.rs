//! Batch API wire types
//!
//! 只解码 JobRunner 需要的字段，其余字段忽略

use serde::{Deserialize, Serialize};

use crate::application::ports::{BatchApiError, RemoteFile, RemoteJob};

/// 上传开始请求体
#[derive(Debug, Serialize)]
pub(super) struct StartUploadRequest<'a> {
    pub file: UploadFileMetadata<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct UploadFileMetadata<'a> {
    pub display_name: &'a str,
}

/// 创建任务请求体
#[derive(Debug, Serialize)]
pub(super) struct CreateBatchRequest<'a> {
    pub batch: BatchSpec<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct BatchSpec<'a> {
    pub display_name: &'a str,
    pub input_config: InputConfig<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct InputConfig<'a> {
    pub file_name: &'a str,
}

/// 远端文件
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct FileDto {
    pub name: Option<String>,
    pub uri: Option<String>,
    pub state: Option<String>,
    pub create_time: Option<String>,
    pub expiration_time: Option<String>,
}

/// 上传完成响应：`{"file": {...}}`
#[derive(Debug, Deserialize)]
pub(super) struct UploadResponse {
    pub file: Option<FileDto>,
}

impl TryFrom<FileDto> for RemoteFile {
    type Error = BatchApiError;

    fn try_from(dto: FileDto) -> Result<Self, Self::Error> {
        Ok(RemoteFile {
            name: dto.name.ok_or(BatchApiError::MissingField("file.name"))?,
            uri: dto.uri.ok_or(BatchApiError::MissingField("file.uri"))?,
            state: dto.state,
            create_time: dto.create_time,
            expiration_time: dto.expiration_time,
        })
    }
}

/// 批处理长任务（Operation）
#[derive(Debug, Deserialize)]
pub(super) struct OperationDto {
    pub name: Option<String>,
    pub metadata: Option<BatchMetadataDto>,
    pub response: Option<BatchResponseDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BatchMetadataDto {
    pub name: Option<String>,
    pub state: Option<String>,
    pub create_time: Option<String>,
    pub output: Option<BatchResponseDto>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct BatchResponseDto {
    pub responses_file: Option<String>,
}

impl OperationDto {
    /// 结果文件名，`metadata.output` 优先
    pub fn responses_file(&self) -> Option<&str> {
        self.metadata
            .as_ref()
            .and_then(|m| m.output.as_ref())
            .and_then(|o| o.responses_file.as_deref())
            .or_else(|| {
                self.response
                    .as_ref()
                    .and_then(|r| r.responses_file.as_deref())
            })
    }
}

impl TryFrom<OperationDto> for RemoteJob {
    type Error = BatchApiError;

    fn try_from(dto: OperationDto) -> Result<Self, Self::Error> {
        let metadata = dto.metadata;
        let name = metadata
            .as_ref()
            .and_then(|m| m.name.clone())
            .or(dto.name)
            .ok_or(BatchApiError::MissingField("batch.name"))?;

        Ok(RemoteJob {
            name,
            state: metadata.as_ref().and_then(|m| m.state.clone()),
            create_time: metadata.and_then(|m| m.create_time),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_upload_response() {
        let json = r#"{
            "file": {
                "name": "files/abc123",
                "displayName": "input.jsonl",
                "mimeType": "application/jsonl",
                "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123",
                "state": "PROCESSING",
                "createTime": "2025-01-01T10:00:00.123456Z",
                "expirationTime": "2025-01-03T10:00:00.123456Z"
            }
        }"#;
        let response: UploadResponse = serde_json::from_str(json).unwrap();
        let file = RemoteFile::try_from(response.file.unwrap()).unwrap();
        assert_eq!(file.name, "files/abc123");
        assert_eq!(file.state.as_deref(), Some("PROCESSING"));
        assert_eq!(file.create_time.as_deref(), Some("2025-01-01T10:00:00.123456Z"));
    }

    #[test]
    fn test_file_without_uri_is_missing_field() {
        let dto: FileDto = serde_json::from_str(r#"{"name": "files/x"}"#).unwrap();
        assert!(matches!(
            RemoteFile::try_from(dto),
            Err(BatchApiError::MissingField("file.uri"))
        ));
    }

    #[test]
    fn test_decode_batch_operation() {
        let json = r#"{
            "name": "batches/xyz789",
            "metadata": {
                "@type": "type.googleapis.com/google.ai.generativelanguage.v1main.GenerateContentBatch",
                "name": "batches/xyz789",
                "state": "BATCH_STATE_SUCCEEDED",
                "createTime": "2025-01-01T10:05:00.000001Z",
                "output": {"responsesFile": "files/batch-xyz789-results"}
            },
            "done": true
        }"#;
        let operation: OperationDto = serde_json::from_str(json).unwrap();
        assert_eq!(operation.responses_file(), Some("files/batch-xyz789-results"));

        let job = RemoteJob::try_from(operation).unwrap();
        assert_eq!(job.name, "batches/xyz789");
        assert_eq!(job.state.as_deref(), Some("BATCH_STATE_SUCCEEDED"));
    }

    #[test]
    fn test_responses_file_falls_back_to_response() {
        let json = r#"{
            "name": "batches/xyz789",
            "response": {"responsesFile": "files/out"}
        }"#;
        let operation: OperationDto = serde_json::from_str(json).unwrap();
        assert_eq!(operation.responses_file(), Some("files/out"));
    }

    #[test]
    fn test_create_request_shape() {
        let body = CreateBatchRequest {
            batch: BatchSpec {
                display_name: "batch-1",
                input_config: InputConfig {
                    file_name: "files/abc",
                },
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["batch"]["input_config"]["file_name"], "files/abc");
        assert_eq!(json["batch"]["display_name"], "batch-1");
    }
}
