//! Event Publisher Implementation
//!
//! 任务生命周期事件推送（全局广播 + 按任务订阅）

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::batch::{BatchJob, BatchJobStatus, MessageSeverity};

/// 任务事件类型
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data")]
pub enum JobNotification {
    /// 状态变更
    StatusChanged {
        job_id: Uuid,
        file_id: Uuid,
        from: BatchJobStatus,
        to: BatchJobStatus,
    },
    /// 追加状态消息
    MessageAppended {
        job_id: Uuid,
        text: String,
        severity: MessageSeverity,
    },
    /// Runner 正常结束
    RunFinished {
        job_id: Uuid,
        status: BatchJobStatus,
    },
    /// Runner 出错退出
    RunFailed {
        job_id: Uuid,
        error: String,
    },
    /// 结果文件已下载
    ResultsDownloaded {
        job_id: Uuid,
        result_file_name: String,
    },
}

impl JobNotification {
    pub fn job_id(&self) -> Uuid {
        match self {
            Self::StatusChanged { job_id, .. }
            | Self::MessageAppended { job_id, .. }
            | Self::RunFinished { job_id, .. }
            | Self::RunFailed { job_id, .. }
            | Self::ResultsDownloaded { job_id, .. } => *job_id,
        }
    }
}

/// 事件发布器
pub struct EventPublisher {
    /// job_id -> broadcast sender
    job_channels: DashMap<Uuid, broadcast::Sender<JobNotification>>,
    /// 所有任务的事件
    global_channel: broadcast::Sender<JobNotification>,
}

impl EventPublisher {
    pub fn new() -> Self {
        let (global_tx, _) = broadcast::channel(256);
        Self {
            job_channels: DashMap::new(),
            global_channel: global_tx,
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// 订阅全局事件
    pub fn subscribe_global(&self) -> broadcast::Receiver<JobNotification> {
        self.global_channel.subscribe()
    }

    /// 订阅单个任务的事件
    pub fn subscribe_job(&self, job_id: Uuid) -> broadcast::Receiver<JobNotification> {
        self.job_channels
            .entry(job_id)
            .or_insert_with(|| broadcast::channel(64).0)
            .subscribe()
    }

    /// 取消任务的事件通道
    pub fn unregister_job(&self, job_id: Uuid) {
        self.job_channels.remove(&job_id);
    }

    /// 比较提交前后的任务，发布状态变更与新增消息
    pub fn publish_job_update(&self, before: &BatchJob, after: &BatchJob) {
        if before.status != after.status {
            self.publish(JobNotification::StatusChanged {
                job_id: after.id,
                file_id: after.file_id,
                from: before.status,
                to: after.status,
            });
        }
        for message in after.messages.iter().skip(before.messages.len()) {
            self.publish(JobNotification::MessageAppended {
                job_id: after.id,
                text: message.text.clone(),
                severity: message.severity,
            });
        }
    }

    pub fn publish_run_finished(&self, job_id: Uuid, status: BatchJobStatus) {
        self.publish(JobNotification::RunFinished { job_id, status });
    }

    pub fn publish_run_failed(&self, job_id: Uuid, error: &str) {
        self.publish(JobNotification::RunFailed {
            job_id,
            error: error.to_string(),
        });
    }

    pub fn publish_results_downloaded(&self, job_id: Uuid, result_file_name: &str) {
        self.publish(JobNotification::ResultsDownloaded {
            job_id,
            result_file_name: result_file_name.to_string(),
        });
    }

    /// 发布到全局通道与任务通道
    fn publish(&self, event: JobNotification) {
        let job_id = event.job_id();
        if let Some(sender) = self.job_channels.get(&job_id) {
            if let Err(e) = sender.send(event.clone()) {
                tracing::debug!(
                    job_id = %job_id,
                    error = %e,
                    "Failed to publish job event (no receivers)"
                );
            }
        }
        if let Err(e) = self.global_channel.send(event) {
            tracing::trace!(
                job_id = %job_id,
                error = %e,
                "Failed to publish global event (no receivers)"
            );
        }
    }
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new()
    }
}
