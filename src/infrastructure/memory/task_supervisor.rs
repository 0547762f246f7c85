//! In-Memory Task Supervisor Implementation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::application::ports::{SupervisedTask, TaskSupervisorPort};

struct TaskEntry {
    /// 区分同一任务 ID 的先后注册
    generation: u64,
    token: CancellationToken,
    /// 任务退出（包括 panic）后触发
    finished: CancellationToken,
}

impl TaskEntry {
    fn is_done(&self) -> bool {
        self.finished.is_cancelled() || self.token.is_cancelled()
    }
}

/// 内存任务注册表
///
/// 被取消的任务在真正退出前保留注册项，同 ID 的新任务会等待它退出
pub struct InMemoryTaskSupervisor {
    /// job_id -> 最近一次注册的 Runner
    tasks: Arc<DashMap<Uuid, TaskEntry>>,
    next_generation: AtomicU64,
}

impl InMemoryTaskSupervisor {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    pub fn arc(self) -> Arc<Self> {
        Arc::new(self)
    }
}

impl Default for InMemoryTaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskSupervisorPort for InMemoryTaskSupervisor {
    fn start(&self, job_id: Uuid, task: SupervisedTask) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let finished = CancellationToken::new();
        let (previous_tx, previous_rx) = oneshot::channel::<Option<CancellationToken>>();

        let registry = Arc::clone(&self.tasks);
        let task_token = token.clone();
        let done = finished.clone();
        tokio::spawn(async move {
            let _finished = done.drop_guard();
            // 旧任务退出前不执行，避免两个 Runner 同时写同一条记录
            if let Ok(Some(previous)) = previous_rx.await {
                previous.cancelled().await;
            }
            if !task_token.is_cancelled() {
                task(task_token).await;
            }
            registry.remove_if(&job_id, |_, entry| entry.generation == generation);
            tracing::debug!(job_id = %job_id, generation, "Supervised task finished");
        });

        let fresh = TaskEntry {
            generation,
            token,
            finished,
        };
        let previous = match self.tasks.entry(job_id) {
            Entry::Occupied(mut occupied) => Some(occupied.insert(fresh)),
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                None
            }
        };

        let previous_finished = previous.map(|previous| {
            if !previous.token.is_cancelled() {
                tracing::info!(job_id = %job_id, "Superseded running task");
            }
            previous.token.cancel();
            previous.finished
        });
        // 接收端只在任务被 runtime 丢弃时关闭
        let _ = previous_tx.send(previous_finished);
        tracing::debug!(job_id = %job_id, generation, "Supervised task started");
    }

    fn cancel(&self, job_id: Uuid) -> bool {
        match self.tasks.get(&job_id) {
            Some(entry) if !entry.is_done() => {
                entry.token.cancel();
                tracing::info!(job_id = %job_id, "Task cancellation requested");
                true
            }
            _ => false,
        }
    }

    fn is_running(&self, job_id: Uuid) -> bool {
        self.tasks
            .get(&job_id)
            .map_or(false, |entry| !entry.is_done())
    }

    fn cancel_all(&self) -> usize {
        let job_ids: Vec<Uuid> = self.tasks.iter().map(|entry| *entry.key()).collect();
        let cancelled = job_ids
            .into_iter()
            .filter(|job_id| self.cancel(*job_id))
            .count();

        tracing::info!(cancelled, "All supervised tasks cancelled");
        cancelled
    }

    fn running_jobs(&self) -> Vec<Uuid> {
        self.tasks
            .iter()
            .filter(|entry| !entry.value().is_done())
            .map(|entry| *entry.key())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::time::Duration;

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    fn wait_for_cancel(flag: Arc<AtomicBool>) -> SupervisedTask {
        Box::new(move |token: CancellationToken| {
            async move {
                token.cancelled().await;
                flag.store(true, Ordering::SeqCst);
            }
            .boxed()
        })
    }

    /// 模拟正在进行网络调用的 Runner：忽略取消，直到调用返回
    #[derive(Clone, Default)]
    struct Overlap {
        active: Arc<AtomicUsize>,
        completed: Arc<AtomicUsize>,
        overlapped: Arc<AtomicBool>,
    }

    impl Overlap {
        fn task(&self) -> SupervisedTask {
            let counters = self.clone();
            Box::new(move |_token: CancellationToken| {
                async move {
                    if counters.active.fetch_add(1, Ordering::SeqCst) > 0 {
                        counters.overlapped.store(true, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counters.active.fetch_sub(1, Ordering::SeqCst);
                    counters.completed.fetch_add(1, Ordering::SeqCst);
                }
                .boxed()
            })
        }
    }

    #[tokio::test]
    async fn test_superseding_task_waits_for_previous_to_exit() {
        let supervisor = InMemoryTaskSupervisor::new();
        let job_id = Uuid::new_v4();
        let overlap = Overlap::default();

        supervisor.start(job_id, overlap.task());
        wait_until(|| overlap.active.load(Ordering::SeqCst) == 1).await;
        supervisor.start(job_id, overlap.task());

        wait_until(|| overlap.completed.load(Ordering::SeqCst) == 2).await;
        assert!(!overlap.overlapped.load(Ordering::SeqCst));
        wait_until(|| !supervisor.is_running(job_id)).await;
    }

    #[tokio::test]
    async fn test_restart_after_cancel_waits_for_cancelled_task() {
        let supervisor = InMemoryTaskSupervisor::new();
        let job_id = Uuid::new_v4();
        let overlap = Overlap::default();

        supervisor.start(job_id, overlap.task());
        wait_until(|| overlap.active.load(Ordering::SeqCst) == 1).await;
        assert!(supervisor.cancel(job_id));
        assert!(!supervisor.is_running(job_id));

        supervisor.start(job_id, overlap.task());
        assert!(supervisor.is_running(job_id));

        wait_until(|| overlap.completed.load(Ordering::SeqCst) == 2).await;
        assert!(!overlap.overlapped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_start_supersedes_previous_task() {
        let supervisor = InMemoryTaskSupervisor::new();
        let job_id = Uuid::new_v4();
        let first = Arc::new(AtomicBool::new(false));
        let second = Arc::new(AtomicBool::new(false));

        supervisor.start(job_id, wait_for_cancel(first.clone()));
        supervisor.start(job_id, wait_for_cancel(second.clone()));

        wait_until(|| first.load(Ordering::SeqCst)).await;
        // 旧任务结束不能移除新注册
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(supervisor.is_running(job_id));
        assert!(!second.load(Ordering::SeqCst));
        assert_eq!(supervisor.running_jobs(), vec![job_id]);
    }

    #[tokio::test]
    async fn test_finished_task_is_removed() {
        let supervisor = InMemoryTaskSupervisor::new();
        let job_id = Uuid::new_v4();

        supervisor.start(job_id, Box::new(|_token: CancellationToken| async {}.boxed()));

        wait_until(|| !supervisor.is_running(job_id)).await;
        assert!(supervisor.running_jobs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_signals_task() {
        let supervisor = InMemoryTaskSupervisor::new();
        let job_id = Uuid::new_v4();
        let observed = Arc::new(AtomicBool::new(false));

        supervisor.start(job_id, wait_for_cancel(observed.clone()));
        assert!(supervisor.is_running(job_id));

        assert!(supervisor.cancel(job_id));
        assert!(!supervisor.is_running(job_id));
        assert!(!supervisor.cancel(job_id));
        wait_until(|| observed.load(Ordering::SeqCst)).await;
    }

    #[tokio::test]
    async fn test_cancel_unknown_job_is_noop() {
        let supervisor = InMemoryTaskSupervisor::new();
        assert!(!supervisor.cancel(Uuid::new_v4()));
        assert!(!supervisor.is_running(Uuid::new_v4()));
    }

    #[tokio::test]
    async fn test_cancel_all() {
        let supervisor = InMemoryTaskSupervisor::new();
        let flags: Vec<_> = (0..3).map(|_| Arc::new(AtomicBool::new(false))).collect();
        for flag in &flags {
            supervisor.start(Uuid::new_v4(), wait_for_cancel(flag.clone()));
        }

        assert_eq!(supervisor.cancel_all(), 3);
        assert!(supervisor.running_jobs().is_empty());
        for flag in flags {
            wait_until(|| flag.load(Ordering::SeqCst)).await;
        }
    }
}
