// 加载模块 - 远程图片的下载、缓存与交付
//
// 本模块提供图片加载的完整流程，包括：
// - URL 规范化与缓存键
// - 磁盘缓存（原子写入）
// - 同一 URL 的并发请求去重
// - 带超时和重试的下载
// - 生命周期事件与渲染交付

pub mod config;
pub mod config_manager;
pub mod error;
pub mod events;
pub mod fetcher;
pub mod key;
pub mod loader;
pub mod path;
pub mod registry;
pub mod render;
pub mod store;
pub mod transport;
pub mod url_normalizer;

pub use config::{LoaderSettings, RequestConfig};
pub use config_manager::SettingsManager;
pub use error::{DownloadError, LoaderError};
pub use events::{LifecycleCallbacks, LoadEvent};
pub use fetcher::{FetchPolicy, Fetcher};
pub use key::CacheKey;
pub use loader::{LoadOutcome, PicLoader, RequestHandle};
pub use path::CachePath;
pub use registry::{FetchJob, FetchState, Follower, InFlightRegistry, JobOutcome, LeaderGuard, Slot};
pub use render::{Delivery, ImageDecoder, PayloadHandle, PayloadSource, RenderTarget};
pub use store::{CacheStats, CacheStore, Payload};
pub use transport::{HttpTransport, ProgressReport, Transport};
pub use url_normalizer::UrlNormalizer;
