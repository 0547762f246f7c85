//! Fake Batch Client - 用于测试的 Batch API 客户端
//!
//! 按脚本返回远端状态，不发起任何网络请求

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::application::ports::{
    BatchApiError, BatchApiPort, BatchApiProvider, RemoteFile, RemoteJob,
};
use crate::domain::batch::state_machine::REMOTE_TIMESTAMP_FORMAT;

/// 脚本化的远端行为
#[derive(Debug, Clone)]
pub struct FakeBatchScript {
    /// 上传失败时返回的 HTTP 状态码
    pub upload_failure: Option<u16>,
    /// 上传响应中的文件状态
    pub upload_state: String,
    /// `get_file` 依次返回的状态，最后一个重复
    pub file_states: Vec<String>,
    pub create_failure: Option<u16>,
    pub create_state: String,
    /// 创建请求返回前的延迟，模拟慢速网络
    pub create_delay: Option<Duration>,
    /// `get_batch_job` 依次返回的状态，最后一个重复
    pub job_states: Vec<String>,
    pub poll_failure: Option<u16>,
    pub cancel_failure: Option<u16>,
    pub results: Vec<u8>,
    /// 固定的远端创建时间；为空时使用当前时间
    pub create_time: Option<String>,
}

impl Default for FakeBatchScript {
    fn default() -> Self {
        Self {
            upload_failure: None,
            upload_state: "ACTIVE".to_string(),
            file_states: vec!["ACTIVE".to_string()],
            create_failure: None,
            create_state: "BATCH_STATE_PENDING".to_string(),
            create_delay: None,
            job_states: vec![
                "BATCH_STATE_RUNNING".to_string(),
                "BATCH_STATE_SUCCEEDED".to_string(),
            ],
            poll_failure: None,
            cancel_failure: None,
            results: Vec::new(),
            create_time: None,
        }
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    upload: AtomicUsize,
    get_file: AtomicUsize,
    create: AtomicUsize,
    poll: AtomicUsize,
    cancel: AtomicUsize,
    download: AtomicUsize,
}

/// Fake Batch Client
pub struct FakeBatchClient {
    script: FakeBatchScript,
    file_states: Mutex<VecDeque<String>>,
    job_states: Mutex<VecDeque<String>>,
    calls: CallCounters,
    last_create: Mutex<Option<(String, String, String)>>,
    cancelled: Mutex<Vec<String>>,
}

impl FakeBatchClient {
    pub fn new(script: FakeBatchScript) -> Self {
        Self {
            file_states: Mutex::new(script.file_states.iter().cloned().collect()),
            job_states: Mutex::new(script.job_states.iter().cloned().collect()),
            script,
            calls: CallCounters::default(),
            last_create: Mutex::new(None),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// 默认脚本：上传成功，Pending → Running → Succeeded
    pub fn succeeding() -> Self {
        Self::new(FakeBatchScript::default())
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn upload_calls(&self) -> usize {
        self.calls.upload.load(Ordering::SeqCst)
    }

    pub fn get_file_calls(&self) -> usize {
        self.calls.get_file.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.calls.create.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.calls.poll.load(Ordering::SeqCst)
    }

    pub fn cancel_calls(&self) -> usize {
        self.calls.cancel.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.calls.download.load(Ordering::SeqCst)
    }

    /// 收到取消请求的远端任务名
    pub fn cancelled_jobs(&self) -> Vec<String> {
        lock(&self.cancelled).clone()
    }

    /// 最近一次创建任务的参数 (file_name, display_name, model)
    pub fn last_create(&self) -> Option<(String, String, String)> {
        lock(&self.last_create).clone()
    }

    fn now_timestamp(&self) -> String {
        self.script
            .create_time
            .clone()
            .unwrap_or_else(|| Utc::now().format(REMOTE_TIMESTAMP_FORMAT).to_string())
    }

    fn fail(status: Option<u16>) -> Result<(), BatchApiError> {
        match status {
            Some(status) => Err(BatchApiError::Http {
                status,
                message: "scripted failure".to_string(),
            }),
            None => Ok(()),
        }
    }

    fn file(&self, name: &str, state: String) -> RemoteFile {
        RemoteFile {
            name: name.to_string(),
            uri: format!("https://fake.test/v1beta/{}", name),
            state: Some(state),
            create_time: Some(self.now_timestamp()),
            expiration_time: None,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// 取队首；只剩一个时重复返回它
fn next_scripted(queue: &Mutex<VecDeque<String>>, fallback: &str) -> String {
    let mut queue = lock(queue);
    if queue.len() > 1 {
        queue.pop_front().unwrap_or_else(|| fallback.to_string())
    } else {
        queue.front().cloned().unwrap_or_else(|| fallback.to_string())
    }
}

#[async_trait]
impl BatchApiPort for FakeBatchClient {
    async fn upload_file(
        &self,
        bytes: Vec<u8>,
        _mime_type: &str,
        display_name: &str,
    ) -> Result<RemoteFile, BatchApiError> {
        let n = self.calls.upload.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(size = bytes.len(), display_name = %display_name, "FakeBatchClient: upload");
        Self::fail(self.script.upload_failure)?;
        Ok(self.file(&format!("files/fake-{}", n), self.script.upload_state.clone()))
    }

    async fn get_file(&self, name: &str) -> Result<RemoteFile, BatchApiError> {
        self.calls.get_file.fetch_add(1, Ordering::SeqCst);
        let state = next_scripted(&self.file_states, "ACTIVE");
        Ok(self.file(name, state))
    }

    async fn create_batch_job(
        &self,
        file_name: &str,
        display_name: &str,
        model: &str,
    ) -> Result<RemoteJob, BatchApiError> {
        let n = self.calls.create.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(delay) = self.script.create_delay {
            tokio::time::sleep(delay).await;
        }
        *lock(&self.last_create) = Some((
            file_name.to_string(),
            display_name.to_string(),
            model.to_string(),
        ));
        Self::fail(self.script.create_failure)?;
        Ok(RemoteJob {
            name: format!("batches/fake-{}", n),
            state: Some(self.script.create_state.clone()),
            create_time: Some(self.now_timestamp()),
        })
    }

    async fn get_batch_job(&self, name: &str) -> Result<RemoteJob, BatchApiError> {
        self.calls.poll.fetch_add(1, Ordering::SeqCst);
        Self::fail(self.script.poll_failure)?;
        Ok(RemoteJob {
            name: name.to_string(),
            state: Some(next_scripted(&self.job_states, "BATCH_STATE_SUCCEEDED")),
            create_time: Some(self.now_timestamp()),
        })
    }

    async fn cancel_batch_job(&self, name: &str) -> Result<(), BatchApiError> {
        self.calls.cancel.fetch_add(1, Ordering::SeqCst);
        lock(&self.cancelled).push(name.to_string());
        Self::fail(self.script.cancel_failure)
    }

    async fn download_results(&self, _job_name: &str) -> Result<Vec<u8>, BatchApiError> {
        self.calls.download.fetch_add(1, Ordering::SeqCst);
        Ok(self.script.results.clone())
    }
}

/// 无论 API Key 为何都返回同一个 Fake 客户端
pub struct FakeBatchProvider {
    client: Arc<FakeBatchClient>,
    keys: Mutex<Vec<String>>,
}

impl FakeBatchProvider {
    pub fn new(client: Arc<FakeBatchClient>) -> Self {
        Self {
            client,
            keys: Mutex::new(Vec::new()),
        }
    }

    /// 被请求过的 API Key
    pub fn requested_keys(&self) -> Vec<String> {
        lock(&self.keys).clone()
    }
}

impl BatchApiProvider for FakeBatchProvider {
    fn client(&self, api_key: &str) -> Result<Arc<dyn BatchApiPort>, BatchApiError> {
        lock(&self.keys).push(api_key.to_string());
        Ok(self.client.clone() as Arc<dyn BatchApiPort>)
    }
}
