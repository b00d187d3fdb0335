// 图片加载器 - 协调缓存、在途注册表和下载器
//
// 本模块是加载功能的入口，负责：
// - 校验 URL 与渲染端
// - 缓存命中时直接交付
// - 同一 URL 的并发请求只下载一次
// - 按顺序发出生命周期事件，并在最后执行结束流程

use crate::services::loader::config::{LoaderSettings, RequestConfig};
use crate::services::loader::error::LoaderError;
use crate::services::loader::events::{LifecycleCallbacks, LoadEvent};
use crate::services::loader::fetcher::{FetchPolicy, Fetcher};
use crate::services::loader::key::CacheKey;
use crate::services::loader::registry::{InFlightRegistry, JobOutcome, LeaderGuard, Slot};
use crate::services::loader::render::{Delivery, PayloadHandle, PayloadSource, RenderTarget};
use crate::services::loader::store::{CacheStats, CacheStore, Payload};
use crate::services::loader::transport::HttpTransport;
use crate::services::loader::url_normalizer::UrlNormalizer;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};
use url::Url;
use uuid::Uuid;

/// 请求的最终结果
#[derive(Debug)]
pub enum LoadOutcome {
    /// 图片已交给渲染端
    Loaded {
        key: CacheKey,
        source: PayloadSource,
        handle: PayloadHandle,
    },
    /// 失败，但错误占位图已交给渲染端
    Placeholder {
        key: CacheKey,
        error: LoaderError,
        handle: PayloadHandle,
    },
    /// 失败，未交付任何内容
    Failed {
        key: Option<CacheKey>,
        error: LoaderError,
    },
}

impl LoadOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, LoadOutcome::Loaded { .. })
    }

    pub fn error(&self) -> Option<&LoaderError> {
        match self {
            LoadOutcome::Loaded { .. } => None,
            LoadOutcome::Placeholder { error, .. } | LoadOutcome::Failed { error, .. } => {
                Some(error)
            }
        }
    }

    pub fn handle(&self) -> Option<&PayloadHandle> {
        match self {
            LoadOutcome::Loaded { handle, .. } | LoadOutcome::Placeholder { handle, .. } => {
                Some(handle)
            }
            LoadOutcome::Failed { .. } => None,
        }
    }

    pub fn source(&self) -> Option<PayloadSource> {
        match self {
            LoadOutcome::Loaded { source, .. } => Some(*source),
            LoadOutcome::Placeholder { .. } => Some(PayloadSource::ErrorPlaceholder),
            LoadOutcome::Failed { .. } => None,
        }
    }
}

/// 后台请求句柄
#[derive(Debug)]
pub struct RequestHandle {
    id: Uuid,
    cancel: CancellationToken,
    task: JoinHandle<LoadOutcome>,
}

impl RequestHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 取消本请求
    ///
    /// 如果本请求是 Leader，挂在它上面的请求会重新竞争下载
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// 等待请求结束
    pub async fn outcome(self) -> Result<LoadOutcome, LoaderError> {
        self.task
            .await
            .map_err(|e| LoaderError::Task(format!("请求任务执行失败: {}", e)))
    }
}

/// 已拿到的图片字节
struct Acquired {
    payload: Payload,
    source: PayloadSource,
    /// 下载成功但写缓存失败
    store_error: Option<LoaderError>,
}

impl Acquired {
    fn new(payload: Payload, source: PayloadSource) -> Self {
        Self {
            payload,
            source,
            store_error: None,
        }
    }
}

/// 图片加载器
///
/// 克隆开销很小，所有克隆共享同一个缓存存储和在途注册表
#[derive(Clone)]
pub struct PicLoader {
    /// 缓存存储
    store: Arc<CacheStore>,

    /// 在途下载注册表
    registry: Arc<InFlightRegistry>,

    /// 下载器
    fetcher: Arc<Fetcher>,
}

impl PicLoader {
    pub fn new(store: CacheStore, registry: Arc<InFlightRegistry>, fetcher: Fetcher) -> Self {
        Self {
            store: Arc::new(store),
            registry,
            fetcher: Arc::new(fetcher),
        }
    }

    /// 根据设置创建使用 HTTP 传输的加载器
    pub fn from_settings(
        settings: &LoaderSettings,
        registry: Arc<InFlightRegistry>,
    ) -> Result<Self, LoaderError> {
        let transport = HttpTransport::new()?;
        Ok(Self::new(
            CacheStore::new(settings.cache_dir.clone()),
            registry,
            Fetcher::new(Arc::new(transport)),
        ))
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<InFlightRegistry> {
        &self.registry
    }

    /// 在后台发起请求
    ///
    /// 结果通过回调送达，也可以通过返回的句柄等待。
    ///
    /// # 参数
    /// - `url`: 图片 URL
    /// - `config`: 请求配置快照
    /// - `target`: 渲染端，为 None 时请求被拒绝
    /// - `callbacks`: 生命周期回调
    pub fn request(
        &self,
        url: &str,
        config: RequestConfig,
        target: Option<Arc<dyn RenderTarget>>,
        callbacks: LifecycleCallbacks,
    ) -> RequestHandle {
        let id = Uuid::new_v4();
        let cancel = CancellationToken::new();
        let loader = self.clone();
        let url = url.to_string();
        let token = cancel.clone();

        let span = tracing::info_span!("pic_request", id = %id);
        let task = tokio::spawn(
            async move {
                loader
                    .load_with_cancel(&url, &config, target, &callbacks, &token)
                    .await
            }
            .instrument(span),
        );

        RequestHandle { id, cancel, task }
    }

    /// 在当前任务中执行请求并返回结果
    pub async fn load(
        &self,
        url: &str,
        config: &RequestConfig,
        target: Option<Arc<dyn RenderTarget>>,
        callbacks: &LifecycleCallbacks,
    ) -> LoadOutcome {
        self.load_with_cancel(url, config, target, callbacks, &CancellationToken::new())
            .await
    }

    /// 执行请求，`cancel` 被触发时尽快以失败结束
    pub async fn load_with_cancel(
        &self,
        raw_url: &str,
        config: &RequestConfig,
        target: Option<Arc<dyn RenderTarget>>,
        callbacks: &LifecycleCallbacks,
        cancel: &CancellationToken,
    ) -> LoadOutcome {
        // 1. 校验，失败时只回报错误，不再触发其他回调
        let url = match UrlNormalizer::normalize(raw_url) {
            Ok(url) => url,
            Err(e) => return Self::reject(e, callbacks),
        };
        let Some(target) = target else {
            return Self::reject(LoaderError::NoTarget, callbacks);
        };

        let key = CacheKey::from_url(&url);
        debug!("开始处理图片请求: {} ({})", url, key);

        // 2. 加载中占位图
        if let Some(placeholder) = &config.loading_placeholder {
            if let Err(e) = target.show_loading(placeholder.clone()).await {
                warn!("显示加载占位图失败: {} - {:?}", key, e);
            }
        }

        callbacks.emit(LoadEvent::Start);

        // 3. 获取字节并交付
        let outcome = match self.acquire(&key, &url, config, callbacks, cancel).await {
            Ok(acquired) => {
                callbacks.emit(LoadEvent::Downloaded);
                if let Some(e) = &acquired.store_error {
                    // 缓存写入失败不影响本次交付
                    callbacks.emit(LoadEvent::Error(e.to_string()));
                }
                self.deliver(
                    &key,
                    acquired.payload,
                    acquired.source,
                    config,
                    target.as_ref(),
                    callbacks,
                )
                .await
            }
            Err(e) => {
                warn!("图片获取失败: {} - {}", url, e);
                callbacks.emit(LoadEvent::Error(e.to_string()));
                self.deliver_error_placeholder(&key, e, config, target.as_ref(), callbacks)
                    .await
            }
        };

        // 4. 结束流程
        self.end_sequence(&key, config, callbacks).await;

        outcome
    }

    /// 获取图片字节：缓存、Follower 或 Leader
    async fn acquire(
        &self,
        key: &CacheKey,
        url: &Url,
        config: &RequestConfig,
        callbacks: &LifecycleCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Acquired, LoaderError> {
        loop {
            if !config.force_refresh {
                match self.store.read(key).await {
                    Ok(payload) => {
                        debug!("缓存命中: {}", key);
                        return Ok(Acquired::new(payload, PayloadSource::Cache));
                    }
                    Err(LoaderError::CacheMiss) => {}
                    Err(e) => warn!("读取缓存失败，重新下载: {} - {}", key, e),
                }
            }

            let follower = match self.registry.try_start(key, url) {
                Slot::Leader(guard) => {
                    return self.lead(guard, key, config, callbacks, cancel).await;
                }
                Slot::Follower(follower) => follower,
            };

            let outcome = tokio::select! {
                outcome = follower.wait() => outcome,
                _ = cancel.cancelled() => return Err(LoaderError::Cancelled),
            };

            match outcome {
                JobOutcome::Stored(payload) => {
                    // 优先读取 Leader 写入的缓存；已被删除或写入失败时使用 Leader 的字节
                    let payload = match self.store.read(key).await {
                        Ok(cached) => cached,
                        Err(e) => {
                            debug!("Follower 读取缓存失败，使用 Leader 的数据: {} - {}", key, e);
                            payload
                        }
                    };
                    return Ok(Acquired::new(payload, PayloadSource::Leader));
                }
                JobOutcome::Failed(message) => return Err(LoaderError::Upstream(message)),
                JobOutcome::Abandoned => {
                    debug!("Leader 已放弃下载，重新竞争: {}", key);
                }
            }
        }
    }

    /// 作为 Leader 下载并写入缓存
    async fn lead(
        &self,
        guard: LeaderGuard,
        key: &CacheKey,
        config: &RequestConfig,
        callbacks: &LifecycleCallbacks,
        cancel: &CancellationToken,
    ) -> Result<Acquired, LoaderError> {
        // 检查缓存与登记之间，上一个 Leader 可能刚好完成写入
        if !config.force_refresh && self.store.exists(key).await {
            if let Ok(payload) = self.store.read(key).await {
                guard.finish(JobOutcome::Stored(payload.clone()));
                return Ok(Acquired::new(payload, PayloadSource::Cache));
            }
        }

        let job = Arc::clone(guard.job());
        let policy = FetchPolicy::from_config(config);
        let on_progress = |progress: u8| callbacks.emit(LoadEvent::Progress(progress));

        match self.fetcher.fetch(&job, &policy, cancel, &on_progress).await {
            Ok(body) => {
                let payload = Payload::from(body);

                // 写入缓存属于 job 的一部分，写完才注销
                let store_error = match self.store.write(key, &payload).await {
                    Ok(()) => None,
                    Err(e) => {
                        error!("写入缓存失败: {} - {}", key, e);
                        Some(e)
                    }
                };
                guard.finish(JobOutcome::Stored(payload.clone()));

                Ok(Acquired {
                    payload,
                    source: PayloadSource::Network,
                    store_error,
                })
            }
            Err(e) => {
                if cancel.is_cancelled() && !job.cancellation().is_cancelled() {
                    // 只是本请求被取消，其他请求重新竞争
                    guard.finish(JobOutcome::Abandoned);
                } else {
                    guard.finish(JobOutcome::Failed(e.to_string()));
                }
                Err(e)
            }
        }
    }

    /// 交给渲染端
    async fn deliver(
        &self,
        key: &CacheKey,
        payload: Payload,
        source: PayloadSource,
        config: &RequestConfig,
        target: &dyn RenderTarget,
        callbacks: &LifecycleCallbacks,
    ) -> LoadOutcome {
        let delivery = Delivery {
            key: key.clone(),
            payload,
            source,
            fade_time: config.fade_time,
        };

        match target.on_payload_ready(delivery).await {
            Ok(handle) => {
                callbacks.emit(LoadEvent::Loaded);
                info!("图片已加载: {} ({:?}, {} 字节)", key, source, handle.len);
                LoadOutcome::Loaded {
                    key: key.clone(),
                    source,
                    handle,
                }
            }
            Err(e) => {
                warn!("图片交付失败: {} - {:?}", key, e);
                callbacks.emit(LoadEvent::Error(e.to_string()));
                self.deliver_error_placeholder(key, e, config, target, callbacks)
                    .await
            }
        }
    }

    /// 失败后交付错误占位图（如果配置了）
    async fn deliver_error_placeholder(
        &self,
        key: &CacheKey,
        error: LoaderError,
        config: &RequestConfig,
        target: &dyn RenderTarget,
        callbacks: &LifecycleCallbacks,
    ) -> LoadOutcome {
        let Some(placeholder) = &config.error_placeholder else {
            return LoadOutcome::Failed {
                key: Some(key.clone()),
                error,
            };
        };

        let delivery = Delivery {
            key: key.clone(),
            payload: placeholder.clone(),
            source: PayloadSource::ErrorPlaceholder,
            fade_time: config.fade_time,
        };

        match target.on_payload_ready(delivery).await {
            Ok(handle) => {
                callbacks.emit(LoadEvent::Loaded);
                LoadOutcome::Placeholder {
                    key: key.clone(),
                    error,
                    handle,
                }
            }
            Err(e) => {
                warn!("错误占位图交付失败: {} - {:?}", key, e);
                LoadOutcome::Failed {
                    key: Some(key.clone()),
                    error,
                }
            }
        }
    }

    /// 结束流程：不保留缓存时删除条目，然后通知结束
    async fn end_sequence(
        &self,
        key: &CacheKey,
        config: &RequestConfig,
        callbacks: &LifecycleCallbacks,
    ) {
        if !config.cached {
            if let Err(e) = self.store.delete(key).await {
                warn!("删除缓存文件失败: {} - {}", key, e);
            }
        }

        callbacks.emit(LoadEvent::End);
        debug!("请求结束: {}", key);
    }

    fn reject(error: LoaderError, callbacks: &LifecycleCallbacks) -> LoadOutcome {
        warn!("请求被拒绝: {:?}", error);
        callbacks.emit(LoadEvent::Error(error.to_string()));
        LoadOutcome::Failed { key: None, error }
    }

    /// URL 是否已缓存
    pub async fn is_cached(&self, url: &str) -> bool {
        match CacheKey::for_url(url) {
            Ok(key) => self.store.exists(&key).await,
            Err(_) => false,
        }
    }

    /// 取消某个 URL 的在途下载，所有挂载的请求都会失败
    pub fn cancel(&self, url: &str) -> bool {
        match CacheKey::for_url(url) {
            Ok(key) => self.registry.cancel(&key),
            Err(_) => false,
        }
    }

    /// 清除单个缓存文件（只记录日志，不向调用方报错）
    pub async fn clear_cache(&self, url: &str) {
        let key = match CacheKey::for_url(url) {
            Ok(key) => key,
            Err(e) => {
                warn!("无法清除缓存，URL 无效: {} - {}", url, e);
                return;
            }
        };

        match self.store.delete(&key).await {
            Ok(()) => info!("已清除缓存文件: {}", url),
            Err(e) => error!("删除缓存文件失败: {} - {}", url, e),
        }
    }

    /// 清除所有缓存文件（只记录日志，不向调用方报错）
    pub async fn clear_all_cached_files(&self) {
        match self.store.delete_all().await {
            Ok(()) => info!("所有缓存文件已清除: {:?}", self.store.root()),
            Err(e) => error!("清除缓存目录失败: {:?} - {}", self.store.root(), e),
        }
    }

    /// 获取缓存统计
    pub async fn cache_stats(&self) -> Result<CacheStats, LoaderError> {
        self.store.stats().await
    }
}
