// 加载器配置数据结构
//
// 定义了加载器配置的核心数据结构，包括：
// - 持久化的全局设置（存储在 pic_loader.json）
// - 单次请求的不可变配置快照

use crate::services::loader::path::CachePath;
use crate::services::loader::store::Payload;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 默认单次请求超时（秒）
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// 默认最大尝试次数
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// 默认重试间隔（毫秒）
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// 默认淡入时间（秒）
pub const DEFAULT_FADE_TIME_SECS: f32 = 1.0;

/// 加载器设置（存储在 pic_loader.json）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoaderSettings {
    /// 是否保留缓存
    /// - true: 下载的图片持久保存在缓存目录
    /// - false: 使用后删除
    pub cached: bool,

    /// 淡入时间（秒），0 表示不淡入，交给渲染端解释
    pub fade_time_secs: f32,

    /// 单次尝试超时（秒），0 表示不限时
    pub timeout_secs: u64,

    /// 最大尝试次数
    pub timeout_attempts: u32,

    /// 两次尝试之间的等待时间（毫秒）
    pub retry_delay_ms: u64,

    /// 缓存根目录
    pub cache_dir: PathBuf,

    /// 加载中占位图文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading_placeholder: Option<PathBuf>,

    /// 错误占位图文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_placeholder: Option<PathBuf>,
}

impl Default for LoaderSettings {
    fn default() -> Self {
        Self {
            cached: true,
            fade_time_secs: DEFAULT_FADE_TIME_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            timeout_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY_MS,
            cache_dir: CachePath::default_root(),
            loading_placeholder: None,
            error_placeholder: None,
        }
    }
}

/// 单次请求的配置快照
///
/// 请求开始时捕获，之后不再修改。占位图和淡入参数对核心不透明，
/// 只原样交给渲染端。
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// 是否保留缓存（false 时请求结束后删除条目）
    pub cached: bool,

    /// 忽略已有缓存，强制重新下载
    pub force_refresh: bool,

    /// 单次尝试超时，`Duration::ZERO` 表示不限时
    pub timeout: Duration,

    /// 最大尝试次数（至少 1 次）
    pub max_attempts: u32,

    /// 两次尝试之间的等待时间
    pub retry_delay: Duration,

    /// 淡入时间
    pub fade_time: Duration,

    /// 加载中占位图
    pub loading_placeholder: Option<Payload>,

    /// 错误占位图
    pub error_placeholder: Option<Payload>,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            cached: true,
            force_refresh: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            fade_time: Duration::from_secs_f32(DEFAULT_FADE_TIME_SECS),
            loading_placeholder: None,
            error_placeholder: None,
        }
    }
}

impl RequestConfig {
    /// 从全局设置创建请求配置
    ///
    /// 占位图需要读取文件，由 `SettingsManager::request_config` 负责填充
    pub fn from_settings(settings: &LoaderSettings) -> Self {
        Self {
            cached: settings.cached,
            force_refresh: false,
            timeout: Duration::from_secs(settings.timeout_secs),
            max_attempts: settings.timeout_attempts.max(1),
            retry_delay: Duration::from_millis(settings.retry_delay_ms),
            fade_time: Self::fade_time(settings.fade_time_secs),
            loading_placeholder: None,
            error_placeholder: None,
        }
    }

    /// 负数视为不淡入；无法表示为 Duration 的值回退到默认值
    fn fade_time(secs: f32) -> Duration {
        if secs <= 0.0 {
            return Duration::ZERO;
        }
        Duration::try_from_secs_f32(secs).unwrap_or_else(|e| {
            tracing::warn!(
                "淡入时间无效，使用默认值 {} 秒: {} - {}",
                DEFAULT_FADE_TIME_SECS,
                secs,
                e
            );
            Duration::from_secs_f32(DEFAULT_FADE_TIME_SECS)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = LoaderSettings::default();
        assert!(settings.cached);
        assert_eq!(settings.timeout_secs, 30);
        assert_eq!(settings.timeout_attempts, 3);
        assert_eq!(settings.cache_dir, CachePath::default_root());
        assert!(settings.loading_placeholder.is_none());
    }

    #[test]
    fn test_request_config_from_settings() {
        let settings = LoaderSettings {
            cached: false,
            fade_time_secs: 0.5,
            timeout_secs: 5,
            timeout_attempts: 0,
            retry_delay_ms: 10,
            ..LoaderSettings::default()
        };

        let config = RequestConfig::from_settings(&settings);
        assert!(!config.cached);
        assert!(!config.force_refresh);
        assert_eq!(config.timeout, Duration::from_secs(5));
        // 0 次尝试没有意义，至少尝试一次
        assert_eq!(config.max_attempts, 1);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert_eq!(config.fade_time, Duration::from_millis(500));
    }

    #[test]
    fn test_out_of_range_fade_time_falls_back() {
        let settings: LoaderSettings =
            serde_json::from_str(r#"{"fade_time_secs": 1e30}"#).unwrap();
        let config = RequestConfig::from_settings(&settings);
        assert_eq!(config.fade_time, Duration::from_secs_f32(DEFAULT_FADE_TIME_SECS));

        let settings = LoaderSettings {
            fade_time_secs: f32::NAN,
            ..LoaderSettings::default()
        };
        let config = RequestConfig::from_settings(&settings);
        assert_eq!(config.fade_time, Duration::from_secs_f32(DEFAULT_FADE_TIME_SECS));

        let settings = LoaderSettings {
            fade_time_secs: -2.0,
            ..LoaderSettings::default()
        };
        assert_eq!(RequestConfig::from_settings(&settings).fade_time, Duration::ZERO);
    }

    #[test]
    fn test_zero_timeout_is_kept_as_unlimited() {
        let settings: LoaderSettings = serde_json::from_str(r#"{"timeout_secs": 0}"#).unwrap();
        let config = RequestConfig::from_settings(&settings);
        assert!(config.timeout.is_zero());
    }

    #[test]
    fn test_settings_partial_json_uses_defaults() {
        let json = r#"{ "cached": false, "timeout_secs": 10 }"#;
        let settings: LoaderSettings = serde_json::from_str(json).unwrap();
        assert!(!settings.cached);
        assert_eq!(settings.timeout_secs, 10);
        assert_eq!(settings.timeout_attempts, DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn test_settings_serialization() {
        let settings = LoaderSettings {
            error_placeholder: Some(PathBuf::from("assets/error.png")),
            ..LoaderSettings::default()
        };

        let json = serde_json::to_string(&settings).unwrap();
        assert!(json.contains("error_placeholder"));
        assert!(!json.contains("loading_placeholder"));

        let deserialized: LoaderSettings = serde_json::from_str(&json).unwrap();
        assert_eq!(deserialized, settings);
    }
}
