// 缓存键 - 由规范化 URL 计算出的定长哈希
//
// 缓存键同时用作缓存文件名和在途下载注册表的键。

use crate::services::loader::error::LoaderError;
use crate::services::loader::url_normalizer::UrlNormalizer;
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

/// 缓存键
///
/// SHA-256 的前 128 位，大写十六进制（32 个字符）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// 键的字节长度（128 位）
    const DIGEST_BYTES: usize = 16;

    /// 从已规范化的 URL 计算缓存键
    pub fn from_url(url: &Url) -> Self {
        let digest = Sha256::digest(url.as_str().as_bytes());

        let hex = digest[..Self::DIGEST_BYTES]
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<String>();

        Self(hex)
    }

    /// 从原始 URL 字符串计算缓存键（先规范化）
    ///
    /// # 示例
    /// ```
    /// use pic_loader::services::loader::CacheKey;
    ///
    /// let a = CacheKey::for_url("https://Example.com/a.png").unwrap();
    /// let b = CacheKey::for_url("https://example.com/a.png").unwrap();
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str().len(), 32);
    /// ```
    pub fn for_url(raw: &str) -> Result<Self, LoaderError> {
        let url = UrlNormalizer::normalize(raw)?;
        Ok(Self::from_url(&url))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
