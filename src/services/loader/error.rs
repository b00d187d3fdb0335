// 加载器错误类型定义
//
// 定义了图片下载、缓存和交付过程中可能出现的各种错误类型。
// 错误文本会原样通过 on_error 回调交给调用方，因此保持英文。

use thiserror::Error;

/// 加载器的统一错误类型
#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Url is not correct")]
    InvalidUrl(String),

    #[error("Target has not been set. Use 'into' to set a target component.")]
    NoTarget,

    /// 重试耗尽后的下载失败，携带已尝试次数
    #[error("Error while downloading the image : {source}")]
    Download {
        attempts: u32,
        #[source]
        source: DownloadError,
    },

    /// Leader 下载失败后转发给 Follower 的错误
    #[error("{0}")]
    Upstream(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 内部信号：缓存未命中，需要重新下载
    #[error("cache entry not found")]
    CacheMiss,

    #[error("Download has been cancelled")]
    Cancelled,

    #[error("Loading image file has been failed.")]
    Render(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Task failed: {0}")]
    Task(String),
}

impl LoaderError {
    /// 下载失败时的尝试次数，其他错误返回 None
    pub fn attempts(&self) -> Option<u32> {
        match self {
            LoaderError::Download { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            LoaderError::Cancelled
                | LoaderError::Download {
                    source: DownloadError::Cancelled,
                    ..
                }
        )
    }
}

/// 单次下载尝试的错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DownloadError {
    #[error("network error: {0}")]
    NetworkError(String),

    #[error("request timed out")]
    Timeout,

    #[error("HTTP error: status {0}")]
    HttpError(u16),

    #[error("download cancelled")]
    Cancelled,
}

impl DownloadError {
    /// 是否值得重试
    ///
    /// 网络错误和超时总是重试；HTTP 状态只有 5xx、408、429 重试，
    /// 其余状态码（如 404）重试也不会有不同结果。
    pub fn is_retryable(&self) -> bool {
        match self {
            DownloadError::NetworkError(_) | DownloadError::Timeout => true,
            DownloadError::HttpError(status) => *status >= 500 || *status == 408 || *status == 429,
            DownloadError::Cancelled => false,
        }
    }
}

// 实现从 reqwest::Error 到 DownloadError 的转换
impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DownloadError::Timeout
        } else if err.is_status() {
            if let Some(status) = err.status() {
                DownloadError::HttpError(status.as_u16())
            } else {
                DownloadError::NetworkError(err.to_string())
            }
        } else {
            DownloadError::NetworkError(err.to_string())
        }
    }
}
