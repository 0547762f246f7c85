//! Batch Context - Job State Machine
//!
//! 纯函数：给定当前状态和事件计算下一个状态，不做任何 I/O。

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use super::{
    BatchDomainError, BatchInputFile, BatchJob, BatchJobStatus, RemoteFileStatus, TokenUsage,
};

/// 远端文件与远端任务的本地有效期（小时）
pub const REMOTE_TTL_HOURS: i64 = 48;

/// 远端时间戳格式（RFC 3339，微秒精度）
pub const REMOTE_TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

pub fn remote_ttl() -> Duration {
    Duration::hours(REMOTE_TTL_HOURS)
}

/// 状态机事件
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// 开始上传输入文件
    UploadStarted,
    /// 输入文件已在远端可用
    FileUploaded,
    /// 远端任务创建成功
    JobCreated {
        remote_name: String,
        status: BatchJobStatus,
        started_at: DateTime<Utc>,
    },
    /// 轮询到远端状态
    Polled(BatchJobStatus),
    /// 超过 48 小时上限
    ExpirationReached,
    /// 用户取消
    CancelRequested,
    /// 结果已下载
    ResultsDownloaded {
        result_file_name: String,
        usage: TokenUsage,
    },
}

impl JobEvent {
    pub fn name(&self) -> &'static str {
        match self {
            JobEvent::UploadStarted => "upload_started",
            JobEvent::FileUploaded => "file_uploaded",
            JobEvent::JobCreated { .. } => "job_created",
            JobEvent::Polled(_) => "polled",
            JobEvent::ExpirationReached => "expiration_reached",
            JobEvent::CancelRequested => "cancel_requested",
            JobEvent::ResultsDownloaded { .. } => "results_downloaded",
        }
    }
}

/// 计算下一个状态
///
/// 结果在偏序中永远不会落后于当前状态；轮询到的较早状态会被忽略。
pub fn transition(
    current: BatchJobStatus,
    event: &JobEvent,
) -> Result<BatchJobStatus, BatchDomainError> {
    use BatchJobStatus::*;

    let next = match (current, event) {
        (NotStarted | Started, JobEvent::UploadStarted) => Some(Started),
        (FileUploaded, JobEvent::UploadStarted) => Some(FileUploaded),

        (Started | FileUploaded, JobEvent::FileUploaded) => Some(FileUploaded),

        (FileUploaded, JobEvent::JobCreated { status, .. })
            if status.rank() >= Pending.rank() && *status != JobFileDownloaded =>
        {
            Some(*status)
        }

        (Pending | Running, JobEvent::Polled(remote)) => {
            if remote.rank() < current.rank() {
                Some(current)
            } else {
                Some(*remote)
            }
        }
        (Succeeded, JobEvent::Polled(Expired)) => Some(Expired),
        (Succeeded, JobEvent::Polled(_)) => Some(Succeeded),

        (Pending | Running | Succeeded | Unspecified | Expired, JobEvent::ExpirationReached) => {
            Some(Expired)
        }

        (status, JobEvent::CancelRequested) if status.can_cancel() => Some(Cancelled),

        (Succeeded, JobEvent::ResultsDownloaded { .. }) => Some(JobFileDownloaded),

        _ => None,
    };

    next.ok_or(BatchDomainError::InvalidTransition {
        from: current,
        event: event.name(),
    })
}

/// 任务是否已超过本地 48 小时上限（与远端状态无关）
pub fn is_job_expired(job: &BatchJob, now: DateTime<Utc>) -> bool {
    match job.status {
        BatchJobStatus::Expired => true,
        BatchJobStatus::Pending
        | BatchJobStatus::Running
        | BatchJobStatus::Succeeded
        | BatchJobStatus::Unspecified => job
            .started_at
            .map_or(false, |started_at| now > started_at + remote_ttl()),
        _ => false,
    }
}

/// 对外报告的状态：超过上限的任务报告为 `Expired`
pub fn effective_status(job: &BatchJob, now: DateTime<Utc>) -> BatchJobStatus {
    if is_job_expired(job, now) {
        BatchJobStatus::Expired
    } else {
        job.status
    }
}

/// Runner 的下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    /// 上传（或重新上传）输入文件
    Upload,
    /// 复用仍然有效的远端文件
    ReuseUpload,
    /// 远端文件尚未就绪，继续等待处理完成
    WaitForFile,
    /// 创建远端任务
    CreateJob,
    /// 轮询远端任务
    Poll,
    /// 记录过期
    Expire,
    /// 无需继续
    Finished(BatchJobStatus),
}

/// 根据持久化状态决定下一步，已满足的步骤会被跳过
pub fn next_step(job: &BatchJob, file: &BatchInputFile, now: DateTime<Utc>) -> RunStep {
    match job.status {
        BatchJobStatus::NotStarted | BatchJobStatus::Started | BatchJobStatus::FileUploaded => {
            if file.needs_upload(now) {
                RunStep::Upload
            } else if file.remote_status != Some(RemoteFileStatus::Active) {
                RunStep::WaitForFile
            } else if job.status == BatchJobStatus::FileUploaded {
                RunStep::CreateJob
            } else {
                RunStep::ReuseUpload
            }
        }
        BatchJobStatus::Pending | BatchJobStatus::Running | BatchJobStatus::Succeeded => {
            if is_job_expired(job, now) {
                RunStep::Expire
            } else {
                RunStep::Poll
            }
        }
        other => RunStep::Finished(other),
    }
}

/// 解析远端时间戳，格式不符时返回 `None`
pub fn parse_remote_timestamp(value: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(value.trim(), REMOTE_TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

/// 创建时间：解析失败时使用当前时间
pub fn created_or_now(value: Option<&str>, now: DateTime<Utc>) -> DateTime<Utc> {
    value.and_then(parse_remote_timestamp).unwrap_or(now)
}

/// 过期时间：解析失败时使用创建时间 + 48 小时
pub fn expiration_or_default(value: Option<&str>, created_at: DateTime<Utc>) -> DateTime<Utc> {
    value
        .and_then(parse_remote_timestamp)
        .unwrap_or(created_at + remote_ttl())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::PathBuf;
    use uuid::Uuid;
    use BatchJobStatus::*;

    const ALL: [BatchJobStatus; 11] = [
        NotStarted,
        Started,
        FileUploaded,
        Unspecified,
        Pending,
        Running,
        Succeeded,
        Failed,
        Cancelled,
        Expired,
        JobFileDownloaded,
    ];

    fn all_events(now: DateTime<Utc>) -> Vec<JobEvent> {
        let mut events = vec![
            JobEvent::UploadStarted,
            JobEvent::FileUploaded,
            JobEvent::ExpirationReached,
            JobEvent::CancelRequested,
            JobEvent::ResultsDownloaded {
                result_file_name: "r.jsonl".to_string(),
                usage: TokenUsage::default(),
            },
        ];
        for status in ALL {
            events.push(JobEvent::Polled(status));
            events.push(JobEvent::JobCreated {
                remote_name: "batches/1".to_string(),
                status,
                started_at: now,
            });
        }
        events
    }

    fn job_with(status: BatchJobStatus, started_at: Option<DateTime<Utc>>) -> BatchJob {
        let mut job = BatchJob::new(Uuid::new_v4());
        job.status = status;
        job.started_at = started_at;
        job.remote_name = Some("batches/1".to_string());
        job
    }

    fn active_file(now: DateTime<Utc>) -> BatchInputFile {
        let mut file =
            BatchInputFile::new(Uuid::new_v4(), "in.jsonl", PathBuf::from("in.jsonl"), 10);
        file.record_upload(
            "files/1".to_string(),
            "https://example.com/files/1".to_string(),
            RemoteFileStatus::Active,
            now,
            now + remote_ttl(),
        );
        file
    }

    #[test]
    fn test_happy_path_sequence() {
        let now = Utc::now();
        let mut status = NotStarted;
        let mut seen = Vec::new();
        for event in [
            JobEvent::UploadStarted,
            JobEvent::FileUploaded,
            JobEvent::JobCreated {
                remote_name: "batches/1".to_string(),
                status: Pending,
                started_at: now,
            },
            JobEvent::Polled(Succeeded),
        ] {
            status = transition(status, &event).unwrap();
            seen.push(status);
        }
        assert_eq!(seen, vec![Started, FileUploaded, Pending, Succeeded]);
        assert_eq!(
            transition(
                Succeeded,
                &JobEvent::ResultsDownloaded {
                    result_file_name: "r".to_string(),
                    usage: TokenUsage::default()
                }
            )
            .unwrap(),
            JobFileDownloaded
        );
    }

    #[test]
    fn test_transitions_never_move_backwards() {
        let now = Utc::now();
        for current in ALL {
            for event in all_events(now) {
                if let Ok(next) = transition(current, &event) {
                    assert!(
                        next.rank() >= current.rank(),
                        "{:?} --{}--> {:?} moved backwards",
                        current,
                        event.name(),
                        next
                    );
                }
            }
        }
    }

    #[test]
    fn test_polled_earlier_state_is_ignored() {
        assert_eq!(transition(Running, &JobEvent::Polled(Pending)).unwrap(), Running);
        assert_eq!(transition(Pending, &JobEvent::Polled(Running)).unwrap(), Running);
        assert_eq!(transition(Running, &JobEvent::Polled(Failed)).unwrap(), Failed);
    }

    #[test]
    fn test_succeeded_poll_is_idempotent() {
        assert_eq!(transition(Succeeded, &JobEvent::Polled(Succeeded)).unwrap(), Succeeded);
        assert_eq!(transition(Succeeded, &JobEvent::Polled(Running)).unwrap(), Succeeded);
        assert_eq!(transition(Succeeded, &JobEvent::Polled(Expired)).unwrap(), Expired);
    }

    #[test]
    fn test_cancel_only_from_non_terminal() {
        for status in [NotStarted, Started, FileUploaded, Pending, Running] {
            assert_eq!(transition(status, &JobEvent::CancelRequested).unwrap(), Cancelled);
        }
        for status in [Succeeded, Failed, Cancelled, Expired, JobFileDownloaded, Unspecified] {
            assert!(transition(status, &JobEvent::CancelRequested).is_err());
        }
    }

    #[test]
    fn test_downloaded_is_final() {
        let now = Utc::now();
        for event in all_events(now) {
            assert!(transition(JobFileDownloaded, &event).is_err());
        }
    }

    #[test]
    fn test_expiration_is_idempotent() {
        let now = Utc::now();
        let job = job_with(Succeeded, Some(now - Duration::hours(49)));
        for _ in 0..3 {
            assert!(is_job_expired(&job, now));
            assert_eq!(effective_status(&job, now), Expired);
        }

        let mut expired = job.clone();
        expired.apply(JobEvent::ExpirationReached, now).unwrap();
        expired.apply(JobEvent::ExpirationReached, now).unwrap();
        assert_eq!(expired.status, Expired);
        assert_eq!(effective_status(&expired, now), Expired);
    }

    #[test]
    fn test_recent_job_is_not_expired() {
        let now = Utc::now();
        let job = job_with(Running, Some(now - Duration::hours(47)));
        assert!(!is_job_expired(&job, now));
        assert_eq!(effective_status(&job, now), Running);

        let downloaded = job_with(JobFileDownloaded, Some(now - Duration::hours(100)));
        assert_eq!(effective_status(&downloaded, now), JobFileDownloaded);
    }

    #[test]
    fn test_next_step_requires_upload_for_stale_file() {
        let now = Utc::now();
        let job = job_with(FileUploaded, None);

        let missing = BatchInputFile::new(Uuid::new_v4(), "a.jsonl", PathBuf::from("a"), 1);
        assert_eq!(next_step(&job, &missing, now), RunStep::Upload);

        let mut failed = active_file(now);
        failed.remote_status = Some(RemoteFileStatus::Failed);
        assert_eq!(next_step(&job, &failed, now), RunStep::Upload);

        let expired = active_file(now - Duration::hours(49));
        assert_eq!(next_step(&job, &expired, now), RunStep::Upload);

        assert_eq!(next_step(&job, &active_file(now), now), RunStep::CreateJob);
    }

    #[test]
    fn test_next_step_for_remote_states() {
        let now = Utc::now();
        let file = active_file(now);
        assert_eq!(next_step(&job_with(NotStarted, None), &file, now), RunStep::ReuseUpload);
        assert_eq!(next_step(&job_with(Pending, Some(now)), &file, now), RunStep::Poll);
        assert_eq!(next_step(&job_with(Succeeded, Some(now)), &file, now), RunStep::Poll);
        assert_eq!(
            next_step(&job_with(Running, Some(now - Duration::hours(49))), &file, now),
            RunStep::Expire
        );
        assert_eq!(
            next_step(&job_with(Failed, Some(now)), &file, now),
            RunStep::Finished(Failed)
        );
    }

    #[test]
    fn test_next_step_waits_for_processing_upload() {
        let now = Utc::now();
        let mut processing = active_file(now);
        processing.remote_status = Some(RemoteFileStatus::Processing);

        for status in [NotStarted, Started, FileUploaded] {
            assert_eq!(
                next_step(&job_with(status, None), &processing, now),
                RunStep::WaitForFile
            );
        }

        processing.remote_status = None;
        assert_eq!(
            next_step(&job_with(Started, None), &processing, now),
            RunStep::WaitForFile
        );
    }

    #[test]
    fn test_parse_remote_timestamp() {
        let parsed = parse_remote_timestamp("2025-03-04T05:06:07.123456Z").unwrap();
        assert_eq!(
            parsed,
            Utc.with_ymd_and_hms(2025, 3, 4, 5, 6, 7).unwrap() + Duration::microseconds(123456)
        );
        assert!(parse_remote_timestamp("2025-03-04T05:06:07Z").is_none());
        assert!(parse_remote_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_timestamp_fallbacks() {
        let now = Utc::now();
        assert_eq!(created_or_now(Some("garbage"), now), now);
        assert_eq!(created_or_now(None, now), now);
        assert_eq!(expiration_or_default(Some("garbage"), now), now + remote_ttl());
    }
}
