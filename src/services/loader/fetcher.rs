// 下载器 - 单个下载任务的超时、重试与进度
//
// 本模块负责一次 FetchJob 的网络获取，包括：
// - 单次尝试超时控制
// - 有上限的顺序重试
// - 单调不减的进度回报
// - 取消

use crate::services::loader::config::RequestConfig;
use crate::services::loader::error::{DownloadError, LoaderError};
use crate::services::loader::registry::{FetchJob, FetchState};
use crate::services::loader::transport::Transport;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 下载策略
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    /// 单次尝试超时，零表示不限时
    pub timeout: Duration,
    /// 最大尝试次数
    pub max_attempts: u32,
    /// 两次尝试之间的等待时间
    pub retry_delay: Duration,
}

impl FetchPolicy {
    pub fn from_config(config: &RequestConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_attempts: config.max_attempts.max(1),
            retry_delay: config.retry_delay,
        }
    }
}

/// 下载器
#[derive(Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
}

impl Fetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// 执行下载
    ///
    /// 进度通过 `on_progress` 回报，保证单调不减，成功时恰好回报一次 100。
    ///
    /// # 参数
    /// - `job`: 在途下载（记录尝试次数、进度和状态）
    /// - `policy`: 超时与重试策略
    /// - `cancel`: 请求级取消令牌；job 自身的取消令牌同样生效
    /// - `on_progress`: 进度回调
    ///
    /// # 返回
    /// - `Ok(Vec<u8>)`: 完整响应体
    /// - `Err(LoaderError::Download)`: 重试耗尽、不可重试的错误或已取消
    pub async fn fetch(
        &self,
        job: &FetchJob,
        policy: &FetchPolicy,
        cancel: &CancellationToken,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Vec<u8>, LoaderError> {
        let url = job.url();
        debug!("开始下载图片: {} ({})", url, job.key());

        loop {
            let attempt = job.begin_attempt();
            job.set_state(if attempt == 1 {
                FetchState::Requesting
            } else {
                FetchState::Retrying
            });

            let result = tokio::select! {
                _ = cancel.cancelled() => Err(DownloadError::Cancelled),
                _ = job.cancellation().cancelled() => Err(DownloadError::Cancelled),
                result = self.attempt(job, policy.timeout, on_progress) => result,
            };

            let err = match result {
                Ok(body) => {
                    job.set_state(FetchState::Succeeded);
                    if job.advance_progress(100) {
                        on_progress(100);
                    }
                    info!(
                        "图片下载成功: {} ({} 字节, 尝试 {}/{})",
                        url,
                        body.len(),
                        attempt,
                        policy.max_attempts
                    );
                    return Ok(body);
                }
                Err(e) => e,
            };

            if attempt >= policy.max_attempts || !err.is_retryable() {
                job.set_state(FetchState::Failed);
                error!(
                    "图片下载失败，共尝试 {} 次: {} - 错误: {}",
                    attempt, url, err
                );
                return Err(LoaderError::Download {
                    attempts: attempt,
                    source: err,
                });
            }

            warn!(
                "图片下载失败 (尝试 {}/{}): {} - 错误: {}，准备重试",
                attempt, policy.max_attempts, url, err
            );

            if !policy.retry_delay.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = job.cancellation().cancelled() => {}
                    _ = tokio::time::sleep(policy.retry_delay) => {}
                }
            }

            if cancel.is_cancelled() || job.cancellation().is_cancelled() {
                job.set_state(FetchState::Failed);
                return Err(LoaderError::Download {
                    attempts: attempt,
                    source: DownloadError::Cancelled,
                });
            }
        }
    }

    /// 执行一次尝试（超时为零时不限时）
    async fn attempt(
        &self,
        job: &FetchJob,
        timeout_duration: Duration,
        on_progress: &(dyn Fn(u8) + Send + Sync),
    ) -> Result<Vec<u8>, DownloadError> {
        let mut report = |received: u64, total: Option<u64>| {
            // 内容长度未知时进度保持不变，直到完成
            let Some(total) = total.filter(|t| *t > 0) else {
                return;
            };
            // 100 只在成功时回报
            let percent = (received.saturating_mul(100) / total).min(99) as u8;
            if job.advance_progress(percent) {
                on_progress(percent);
            }
        };

        let request = self.transport.get(job.url(), &mut report);
        if timeout_duration.is_zero() {
            return request.await;
        }

        match timeout(timeout_duration, request).await {
            Ok(result) => result,
            Err(_) => Err(DownloadError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::loader::key::CacheKey;
    use crate::services::loader::registry::{InFlightRegistry, LeaderGuard, Slot};
    use crate::services::loader::transport::ProgressReport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use url::Url;

    /// 前 `failures` 次失败，之后分 4 块返回 `body`
    struct FlakyTransport {
        calls: AtomicU32,
        failures: u32,
        error: DownloadError,
        body: Vec<u8>,
        delay: Duration,
    }

    impl FlakyTransport {
        fn new(failures: u32, body: &[u8]) -> Self {
            Self {
                calls: AtomicU32::new(0),
                failures,
                error: DownloadError::NetworkError("connection reset".into()),
                body: body.to_vec(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn get(
            &self,
            _url: &Url,
            progress: ProgressReport<'_>,
        ) -> Result<Vec<u8>, DownloadError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if call <= self.failures {
                return Err(self.error.clone());
            }

            let total = self.body.len() as u64;
            let chunk = (self.body.len() / 4).max(1);
            let mut received = 0usize;
            while received < self.body.len() {
                received = (received + chunk).min(self.body.len());
                progress(received as u64, Some(total));
            }
            Ok(self.body.clone())
        }
    }

    fn leader(registry: &Arc<InFlightRegistry>) -> LeaderGuard {
        let url = Url::parse("https://example.com/poster.jpg").unwrap();
        match registry.try_start(&CacheKey::from_url(&url), &url) {
            Slot::Leader(guard) => guard,
            Slot::Follower(_) => panic!("期望成为 Leader"),
        }
    }

    fn policy(max_attempts: u32) -> FetchPolicy {
        FetchPolicy {
            timeout: Duration::from_secs(5),
            max_attempts,
            retry_delay: Duration::ZERO,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<u8>>>, impl Fn(u8) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |p| seen.lock().unwrap().push(p)
        };
        (seen, sink)
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let fetcher = Fetcher::new(Arc::new(FlakyTransport::new(0, &[7u8; 400])));
        let (seen, sink) = recorder();

        let body = fetcher
            .fetch(&job, &policy(3), &CancellationToken::new(), &sink)
            .await
            .unwrap();

        assert_eq!(body.len(), 400);
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.state(), FetchState::Succeeded);
        assert_eq!(*seen.lock().unwrap(), vec![25, 50, 75, 99, 100]);
    }

    #[tokio::test]
    async fn test_retry_then_success() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport::new(2, b"image-bytes"));
        let fetcher = Fetcher::new(transport.clone());
        let (seen, sink) = recorder();

        let body = fetcher
            .fetch(&job, &policy(3), &CancellationToken::new(), &sink)
            .await
            .unwrap();

        assert_eq!(body, b"image-bytes");
        assert_eq!(job.attempts(), 3);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|p| **p == 100).count(), 1);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport::new(u32::MAX, b""));
        let fetcher = Fetcher::new(transport.clone());
        let (seen, sink) = recorder();

        let err = fetcher
            .fetch(&job, &policy(2), &CancellationToken::new(), &sink)
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(2));
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
        assert_eq!(job.state(), FetchState::Failed);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport {
            error: DownloadError::HttpError(404),
            ..FlakyTransport::new(u32::MAX, b"")
        });
        let fetcher = Fetcher::new(transport.clone());
        let (_seen, sink) = recorder();

        let err = fetcher
            .fetch(&job, &policy(3), &CancellationToken::new(), &sink)
            .await
            .unwrap_err();

        assert_eq!(err.attempts(), Some(1));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_is_retried() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport {
            delay: Duration::from_secs(5),
            ..FlakyTransport::new(0, b"slow")
        });
        let fetcher = Fetcher::new(transport.clone());
        let (_seen, sink) = recorder();

        let policy = FetchPolicy {
            timeout: Duration::from_millis(20),
            max_attempts: 2,
            retry_delay: Duration::ZERO,
        };
        let err = fetcher
            .fetch(&job, &policy, &CancellationToken::new(), &sink)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            LoaderError::Download {
                attempts: 2,
                source: DownloadError::Timeout
            }
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_waits_for_slow_transport() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport {
            delay: Duration::from_millis(30),
            ..FlakyTransport::new(0, b"slow")
        });
        let fetcher = Fetcher::new(transport.clone());
        let (seen, sink) = recorder();

        let policy = FetchPolicy {
            timeout: Duration::ZERO,
            max_attempts: 1,
            retry_delay: Duration::ZERO,
        };
        let body = fetcher
            .fetch(&job, &policy, &CancellationToken::new(), &sink)
            .await
            .unwrap();

        assert_eq!(body, b"slow");
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
    }

    #[tokio::test]
    async fn test_cancel_during_attempt() {
        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let transport = Arc::new(FlakyTransport {
            delay: Duration::from_secs(5),
            ..FlakyTransport::new(0, b"slow")
        });
        let fetcher = Fetcher::new(transport);
        let (_seen, sink) = recorder();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                cancel.cancel();
            })
        };

        let err = fetcher
            .fetch(&job, &policy(3), &cancel, &sink)
            .await
            .unwrap_err();
        canceller.await.unwrap();

        assert!(err.is_cancelled());
        assert_eq!(job.attempts(), 1);
        assert_eq!(job.state(), FetchState::Failed);
    }

    #[tokio::test]
    async fn test_unknown_length_reports_only_completion() {
        struct NoLength;

        #[async_trait]
        impl Transport for NoLength {
            async fn get(
                &self,
                _url: &Url,
                progress: ProgressReport<'_>,
            ) -> Result<Vec<u8>, DownloadError> {
                progress(10, None);
                progress(20, None);
                Ok(vec![0; 20])
            }
        }

        let registry = InFlightRegistry::new();
        let guard = leader(&registry);
        let job = guard.job();
        let fetcher = Fetcher::new(Arc::new(NoLength));
        let (seen, sink) = recorder();

        fetcher
            .fetch(&job, &policy(1), &CancellationToken::new(), &sink)
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }
}
