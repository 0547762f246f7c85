//! Batch Context - Batch Job Aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::state_machine::{transition, JobEvent};
use super::{BatchDomainError, BatchJobStatus};

/// 状态消息级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSeverity {
    Success,
    Error,
    Pending,
}

impl MessageSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageSeverity::Success => "success",
            MessageSeverity::Error => "error",
            MessageSeverity::Pending => "pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(MessageSeverity::Success),
            "error" => Some(MessageSeverity::Error),
            "pending" => Some(MessageSeverity::Pending),
            _ => None,
        }
    }
}

/// 任务状态消息（只追加）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusMessage {
    pub text: String,
    pub severity: MessageSeverity,
    pub created_at: DateTime<Utc>,
}

/// Token 用量统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub total: Option<i64>,
    pub thoughts: Option<i64>,
    pub prompt: Option<i64>,
    pub candidates: Option<i64>,
}

impl TokenUsage {
    /// 汇总结果 JSONL 中每一行的 `usageMetadata`
    ///
    /// 无法解析的行被跳过；没有任何行提供某项计数时该项保持 `None`。
    pub fn from_results_jsonl(bytes: &[u8]) -> Self {
        let mut usage = TokenUsage::default();
        let text = String::from_utf8_lossy(bytes);

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let Ok(value) = serde_json::from_str::<serde_json::Value>(line) else {
                continue;
            };
            let Some(metadata) = value
                .pointer("/response/usageMetadata")
                .or_else(|| value.get("usageMetadata"))
            else {
                continue;
            };

            let count = |key: &str| metadata.get(key).and_then(|v| v.as_i64());
            accumulate(&mut usage.total, count("totalTokenCount"));
            accumulate(&mut usage.thoughts, count("thoughtsTokenCount"));
            accumulate(&mut usage.prompt, count("promptTokenCount"));
            accumulate(&mut usage.candidates, count("candidatesTokenCount"));
        }

        usage
    }
}

fn accumulate(slot: &mut Option<i64>, value: Option<i64>) {
    if let Some(v) = value {
        *slot = Some(slot.unwrap_or(0) + v);
    }
}

/// 批处理任务聚合根
///
/// 不变量:
/// - 与 BatchInputFile 一一对应
/// - 状态只能沿状态机前进（重试会替换为新任务）
/// - 消息列表只追加
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: Uuid,
    pub file_id: Uuid,
    pub remote_name: Option<String>,
    pub display_name: String,
    pub status: BatchJobStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub result_file_name: Option<String>,
    pub token_usage: TokenUsage,
    pub messages: Vec<StatusMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BatchJob {
    /// 为输入文件创建新任务
    pub fn new(file_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_id,
            remote_name: None,
            display_name: Self::display_name_for(file_id),
            status: BatchJobStatus::NotStarted,
            started_at: None,
            result_file_name: None,
            token_usage: TokenUsage::default(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// 远端显示名由文件 ID 派生
    pub fn display_name_for(file_id: Uuid) -> String {
        format!("batch-{}", file_id)
    }

    /// 应用一个事件，返回状态是否发生变化
    pub fn apply(&mut self, event: JobEvent, now: DateTime<Utc>) -> Result<bool, BatchDomainError> {
        let next = transition(self.status, &event)?;

        match event {
            JobEvent::JobCreated {
                remote_name,
                started_at,
                ..
            } => {
                self.remote_name = Some(remote_name);
                self.started_at = Some(started_at);
            }
            JobEvent::ResultsDownloaded {
                result_file_name,
                usage,
            } => {
                self.result_file_name = Some(result_file_name);
                self.token_usage = usage;
            }
            _ => {}
        }

        let changed = next != self.status;
        self.status = next;
        self.updated_at = now;
        Ok(changed)
    }

    /// 追加一条状态消息
    pub fn push_message(
        &mut self,
        text: impl Into<String>,
        severity: MessageSeverity,
        now: DateTime<Utc>,
    ) {
        self.messages.push(StatusMessage {
            text: text.into(),
            severity,
            created_at: now,
        });
        self.updated_at = now;
    }

    pub fn last_message(&self) -> Option<&StatusMessage> {
        self.messages.last()
    }
}
