//! Task Supervisor Port - 任务运行注册表
//!
//! 定义按任务 ID 的单飞（single-flight）注册表，具体实现在 infrastructure/memory 层

use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// 被监管的任务：接收取消令牌，返回要执行的 future
pub type SupervisedTask = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, ()> + Send>;

/// Task Supervisor Port
///
/// 保证同一个任务 ID 同时最多只有一个 Runner 在执行
pub trait TaskSupervisorPort: Send + Sync {
    /// 启动任务；已有同 ID 的任务时先取消旧任务，新任务在旧任务退出后才开始执行。
    /// 任务结束（成功、失败或取消）后自动移除。
    fn start(&self, job_id: Uuid, task: SupervisedTask);

    /// 请求协作式取消，不等待任务真正退出。
    /// 返回之前是否存在未取消的任务。
    fn cancel(&self, job_id: Uuid) -> bool;

    /// 是否有未取消且未结束的任务
    fn is_running(&self, job_id: Uuid) -> bool;

    /// 取消所有任务（应用退出时调用），返回取消数量
    fn cancel_all(&self) -> usize;

    /// 当前注册的任务 ID
    fn running_jobs(&self) -> Vec<Uuid>;
}
