// URL 规范化 - 校验并规范化调用方传入的图片地址
//
// 只接受绝对的 http/https 地址。规范化后的字符串是缓存键的唯一输入，
// 因此同一图片的不同写法（大小写主机名、默认端口、空路径）会映射到同一个键。

use crate::services::loader::error::LoaderError;
use url::Url;

/// URL 规范化器
#[derive(Clone, Copy)]
pub struct UrlNormalizer;

impl UrlNormalizer {
    /// 校验并规范化 URL
    ///
    /// # 参数
    /// - `raw`: 调用方传入的 URL 字符串
    ///
    /// # 返回值
    /// - `Ok(Url)`: 规范化后的绝对 URL
    /// - `Err(LoaderError::InvalidUrl)`: 为空、不是绝对地址或协议不受支持
    ///
    /// # 示例
    /// ```
    /// use pic_loader::services::loader::UrlNormalizer;
    ///
    /// let url = UrlNormalizer::normalize("HTTPS://Example.com:443").unwrap();
    /// assert_eq!(url.as_str(), "https://example.com/");
    ///
    /// assert!(UrlNormalizer::normalize("images/poster.jpg").is_err());
    /// ```
    pub fn normalize(raw: &str) -> Result<Url, LoaderError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(LoaderError::InvalidUrl(raw.to_string()));
        }

        let url = Url::parse(trimmed).map_err(|_| LoaderError::InvalidUrl(raw.to_string()))?;

        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(LoaderError::InvalidUrl(raw.to_string()));
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(LoaderError::InvalidUrl(raw.to_string()));
        }

        Ok(url)
    }

    /// 判断 URL 是否可用，不关心规范化结果
    pub fn is_valid(raw: &str) -> bool {
        Self::normalize(raw).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_plain_https() {
        let url = UrlNormalizer::normalize("https://example.com/image.jpg").unwrap();
        assert_eq!(url.as_str(), "https://example.com/image.jpg");
    }

    #[test]
    fn test_normalize_case_and_default_port() {
        let a = UrlNormalizer::normalize("HTTP://EXAMPLE.com:80/a.png").unwrap();
        let b = UrlNormalizer::normalize("http://example.com/a.png").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_normalize_trims_whitespace() {
        let url = UrlNormalizer::normalize("  https://example.com/x.jpg \n").unwrap();
        assert_eq!(url.as_str(), "https://example.com/x.jpg");
    }

    #[test]
    fn test_normalize_keeps_query() {
        let url = UrlNormalizer::normalize("https://example.com/x.jpg?w=100&h=200").unwrap();
        assert_eq!(url.query(), Some("w=100&h=200"));
    }

    #[test]
    fn test_reject_relative() {
        assert!(matches!(
            UrlNormalizer::normalize("/images/poster.jpg"),
            Err(LoaderError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_reject_empty() {
        assert!(!UrlNormalizer::is_valid(""));
        assert!(!UrlNormalizer::is_valid("   "));
    }

    #[test]
    fn test_reject_unsupported_scheme() {
        assert!(!UrlNormalizer::is_valid("ftp://example.com/a.png"));
        assert!(!UrlNormalizer::is_valid("mailto:someone@example.com"));
        assert!(!UrlNormalizer::is_valid("file:///tmp/a.png"));
    }
}
