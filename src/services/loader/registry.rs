// 在途下载注册表 - 同一缓存键同时只允许一个下载
//
// 第一个请求成为 Leader 负责下载，之后的并发请求成为 Follower，
// 等待 Leader 发布的最终结果。检查与插入在同一把锁内完成。

use crate::services::loader::key::CacheKey;
use crate::services::loader::store::Payload;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use url::Url;

/// 下载状态机
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchState {
    Idle,
    Requesting,
    Retrying,
    Succeeded,
    Failed,
}

/// Leader 发布给 Follower 的最终结果
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// 下载成功，缓存写入已尝试（写入失败时 Follower 使用携带的字节）
    Stored(Payload),
    /// 下载失败，携带错误信息
    Failed(String),
    /// Leader 的调用方取消或任务中断，Follower 需要重新竞争
    Abandoned,
}

/// 一次在途下载
#[derive(Debug)]
pub struct FetchJob {
    key: CacheKey,
    url: Url,
    attempts: AtomicU32,
    progress: AtomicU8,
    followers: AtomicUsize,
    state: Mutex<FetchState>,
    cancel: CancellationToken,
    outcome: watch::Sender<Option<JobOutcome>>,
}

impl FetchJob {
    fn new(key: CacheKey, url: Url) -> Self {
        let (outcome, _) = watch::channel(None);
        Self {
            key,
            url,
            attempts: AtomicU32::new(0),
            progress: AtomicU8::new(0),
            followers: AtomicUsize::new(0),
            state: Mutex::new(FetchState::Idle),
            cancel: CancellationToken::new(),
            outcome,
        }
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// 已开始的尝试次数
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// 当前进度（0-100）
    pub fn progress(&self) -> u8 {
        self.progress.load(Ordering::SeqCst)
    }

    /// 仍在等待的 Follower 数量
    pub fn followers(&self) -> usize {
        self.followers.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> FetchState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 取消整个下载，所有挂载的请求都会收到失败
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// 记录进度，只有比已记录的值更大时返回 true
    pub(crate) fn advance_progress(&self, progress: u8) -> bool {
        let previous = self.progress.fetch_max(progress, Ordering::SeqCst);
        progress > previous
    }

    pub(crate) fn set_state(&self, state: FetchState) {
        let mut current = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        debug!("下载状态变化: {} {:?} -> {:?}", self.key, *current, state);
        *current = state;
    }

    fn publish(&self, outcome: JobOutcome) {
        self.outcome.send_replace(Some(outcome));
    }
}

/// `try_start` 的结果
#[derive(Debug)]
pub enum Slot {
    /// 当前调用方负责下载
    Leader(LeaderGuard),
    /// 已有下载进行中，等待其结果
    Follower(Follower),
}

/// 在途下载注册表
///
/// 由调用方显式创建并传给加载器，生命周期跟随应用
#[derive(Debug, Default)]
pub struct InFlightRegistry {
    jobs: Mutex<HashMap<CacheKey, Arc<FetchJob>>>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, Arc<FetchJob>>> {
        self.jobs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 原子地检查并登记下载
    ///
    /// 同一缓存键只有一个调用方拿到 Leader
    pub fn try_start(self: &Arc<Self>, key: &CacheKey, url: &Url) -> Slot {
        let mut jobs = self.lock();

        if let Some(job) = jobs.get(key) {
            debug!("下载已在进行中，挂载为 Follower: {}", key);
            return Slot::Follower(Self::attach(job));
        }

        let job = Arc::new(FetchJob::new(key.clone(), url.clone()));
        jobs.insert(key.clone(), Arc::clone(&job));
        debug!("登记新下载: {} -> {}", key, url);

        Slot::Leader(LeaderGuard {
            registry: Arc::clone(self),
            job,
            finished: false,
        })
    }

    /// 挂载到已有下载上
    pub fn attach(job: &Arc<FetchJob>) -> Follower {
        job.followers.fetch_add(1, Ordering::SeqCst);
        Follower {
            job: Arc::clone(job),
            outcome: job.outcome.subscribe(),
        }
    }

    /// 获取在途下载
    pub fn job(&self, key: &CacheKey) -> Option<Arc<FetchJob>> {
        self.lock().get(key).cloned()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// 取消在途下载，返回是否找到
    pub fn cancel(&self, key: &CacheKey) -> bool {
        match self.job(key) {
            Some(job) => {
                job.cancel();
                true
            }
            None => false,
        }
    }

    /// 移除登记（只移除同一个 job，避免误删后来者）
    fn remove(&self, job: &Arc<FetchJob>) {
        let mut jobs = self.lock();
        if jobs
            .get(&job.key)
            .map_or(false, |current| Arc::ptr_eq(current, job))
        {
            jobs.remove(&job.key);
            debug!("注销下载: {}", job.key);
        }
    }
}

/// Leader 持有的登记凭证
///
/// `finish` 恰好调用一次；未调用就被丢弃时（panic、任务中止）
/// 自动注销并发布 `Abandoned`，Follower 不会永久等待。
#[derive(Debug)]
pub struct LeaderGuard {
    registry: Arc<InFlightRegistry>,
    job: Arc<FetchJob>,
    finished: bool,
}

impl LeaderGuard {
    pub fn job(&self) -> &Arc<FetchJob> {
        &self.job
    }

    /// 注销并发布最终结果
    ///
    /// 先注销再发布：新的请求要么挂到能收到结果的 job 上，要么看到已写入的缓存
    pub fn finish(mut self, outcome: JobOutcome) {
        self.release(outcome);
    }

    fn release(&mut self, outcome: JobOutcome) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.registry.remove(&self.job);
        self.job.publish(outcome);
    }
}

impl Drop for LeaderGuard {
    fn drop(&mut self) {
        self.release(JobOutcome::Abandoned);
    }
}

/// 等待 Leader 结果的 Follower
#[derive(Debug)]
pub struct Follower {
    job: Arc<FetchJob>,
    outcome: watch::Receiver<Option<JobOutcome>>,
}

impl Follower {
    pub fn job(&self) -> &Arc<FetchJob> {
        &self.job
    }

    /// 等待 Leader 的最终结果
    pub async fn wait(mut self) -> JobOutcome {
        match self.outcome.wait_for(Option::is_some).await {
            Ok(outcome) => Option::clone(&outcome).unwrap_or(JobOutcome::Abandoned),
            // 发送端已释放却没有结果，按放弃处理
            Err(_) => JobOutcome::Abandoned,
        }
    }
}

impl Drop for Follower {
    fn drop(&mut self) {
        self.job.followers.fetch_sub(1, Ordering::SeqCst);
    }
}
