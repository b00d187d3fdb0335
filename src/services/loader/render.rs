// 渲染交付 - 把图片字节交给渲染端
//
// 核心不解码图片，只通过 `RenderTarget` 把字节交出去。
// `ImageDecoder` 是默认实现：使用 image crate 在阻塞线程池中解码，
// 返回尺寸和格式信息。

use crate::services::loader::error::LoaderError;
use crate::services::loader::key::CacheKey;
use crate::services::loader::store::Payload;
use async_trait::async_trait;
use image::GenericImageView;
use std::time::Duration;
use tokio::task;

/// 交付字节的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSource {
    /// 缓存命中
    Cache,
    /// 本请求作为 Leader 下载
    Network,
    /// 作为 Follower 等到 Leader 的结果
    Leader,
    /// 下载或加载失败后的错误占位图
    ErrorPlaceholder,
}

/// 交给渲染端的数据
#[derive(Debug, Clone)]
pub struct Delivery {
    pub key: CacheKey,
    pub payload: Payload,
    pub source: PayloadSource,
    /// 淡入时间，由渲染端解释
    pub fade_time: Duration,
}

/// 渲染端返回的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayloadHandle {
    /// 字节数
    pub len: usize,
    /// 图片尺寸（渲染端已解码时）
    pub dimensions: Option<(u32, u32)>,
    /// 图片格式名称
    pub format: Option<String>,
}

impl PayloadHandle {
    /// 未解码的原始字节句柄
    pub fn raw(len: usize) -> Self {
        Self {
            len,
            dimensions: None,
            format: None,
        }
    }
}

/// 渲染端
#[async_trait]
pub trait RenderTarget: Send + Sync {
    /// 显示加载中占位图，默认忽略
    async fn show_loading(&self, _placeholder: Payload) -> Result<(), LoaderError> {
        Ok(())
    }

    /// 图片字节已就绪
    async fn on_payload_ready(&self, delivery: Delivery) -> Result<PayloadHandle, LoaderError>;
}

/// 默认渲染端：解码图片并返回尺寸
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageDecoder;

impl ImageDecoder {
    /// 解码图片头并返回句柄
    pub fn decode(payload: &[u8]) -> Result<PayloadHandle, LoaderError> {
        let format = image::guess_format(payload)
            .map_err(|e| LoaderError::Render(format!("无法识别图片格式: {}", e)))?;

        let img = image::load_from_memory_with_format(payload, format)
            .map_err(|e| LoaderError::Render(format!("图片解码失败: {}", e)))?;

        Ok(PayloadHandle {
            len: payload.len(),
            dimensions: Some(img.dimensions()),
            format: Some(format!("{:?}", format)),
        })
    }
}

#[async_trait]
impl RenderTarget for ImageDecoder {
    async fn on_payload_ready(&self, delivery: Delivery) -> Result<PayloadHandle, LoaderError> {
        // 将 CPU 密集型解码移到阻塞线程池
        let payload = delivery.payload;
        task::spawn_blocking(move || Self::decode(&payload))
            .await
            .map_err(|e| LoaderError::Task(format!("解码任务执行失败: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat};
    use std::io::Cursor;

    /// 创建测试用的 PNG 数据
    fn create_test_png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            width,
            height,
            image::Rgb([255, 0, 0]),
        ));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
            .unwrap();
        buffer
    }

    fn delivery(payload: Vec<u8>) -> Delivery {
        Delivery {
            key: CacheKey::for_url("https://example.com/a.png").unwrap(),
            payload: Payload::from(payload),
            source: PayloadSource::Network,
            fade_time: Duration::ZERO,
        }
    }

    #[test]
    fn test_decode_png() {
        let data = create_test_png(3, 2);
        let handle = ImageDecoder::decode(&data).unwrap();
        assert_eq!(handle.dimensions, Some((3, 2)));
        assert_eq!(handle.len, data.len());
        assert_eq!(handle.format.as_deref(), Some("Png"));
    }

    #[test]
    fn test_decode_invalid_data() {
        assert!(matches!(
            ImageDecoder::decode(b"definitely not an image"),
            Err(LoaderError::Render(_))
        ));
        assert!(ImageDecoder::decode(&[]).is_err());
    }

    #[tokio::test]
    async fn test_decoder_target() {
        let handle = ImageDecoder
            .on_payload_ready(delivery(create_test_png(4, 4)))
            .await
            .unwrap();
        assert_eq!(handle.dimensions, Some((4, 4)));
    }

    #[tokio::test]
    async fn test_default_show_loading_is_noop() {
        assert!(ImageDecoder
            .show_loading(Payload::from(&b"anything"[..]))
            .await
            .is_ok());
    }

    #[test]
    fn test_raw_handle() {
        let handle = PayloadHandle::raw(12);
        assert_eq!(handle.len, 12);
        assert!(handle.dimensions.is_none());
    }
}
