// 网络传输 - 单次 HTTP GET
//
// `Transport` 是下载器与网络之间的边界，测试中可以替换为内存实现。
// 超时、重试和取消由下载器负责，这里只执行一次请求。

use crate::services::loader::error::{DownloadError, LoaderError};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use url::Url;

/// 进度回报：(已接收字节数, 内容总长度)
pub type ProgressReport<'a> = &'a mut (dyn FnMut(u64, Option<u64>) + Send);

/// 网络传输
#[async_trait]
pub trait Transport: Send + Sync {
    /// 执行一次 GET，返回完整响应体
    ///
    /// 每收到一块数据调用一次 `progress`
    async fn get(
        &self,
        url: &Url,
        progress: ProgressReport<'_>,
    ) -> Result<Vec<u8>, DownloadError>;
}

/// 基于 reqwest 的 HTTP 传输
#[derive(Clone)]
pub struct HttpTransport {
    /// HTTP 客户端（连接池复用）
    client: Client,
}

impl HttpTransport {
    /// 创建新的 HTTP 传输
    ///
    /// 客户端默认跟随重定向（最多 10 次）
    pub fn new() -> Result<Self, LoaderError> {
        let client = Client::builder()
            .pool_max_idle_per_host(10) // 每个主机最多保持 10 个空闲连接
            .pool_idle_timeout(Duration::from_secs(90)) // 空闲连接超时 90 秒
            .build()
            .map_err(|e| LoaderError::Config(format!("创建 HTTP 客户端失败: {}", e)))?;

        Ok(Self { client })
    }

    /// 使用已有客户端
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn get(
        &self,
        url: &Url,
        progress: ProgressReport<'_>,
    ) -> Result<Vec<u8>, DownloadError> {
        let mut response = self.client.get(url.clone()).send().await?;

        // 检查 HTTP 状态码
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::HttpError(status.as_u16()));
        }

        let total = response.content_length();
        let mut body = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);

        while let Some(chunk) = response.chunk().await? {
            body.extend_from_slice(&chunk);
            progress(body.len() as u64, total);
        }

        Ok(body)
    }
}
