// 设置管理器 - 管理加载器设置的读写和更新
//
// 本模块提供加载器设置的持久化管理功能，包括：
// - 从 JSON 文件加载设置
// - 保存设置到 JSON 文件
// - 损坏文件备份
// - 生成请求配置（读取占位图）

use crate::services::loader::config::{LoaderSettings, RequestConfig};
use crate::services::loader::error::LoaderError;
use crate::services::loader::store::Payload;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::RwLock;

/// 设置管理器
///
/// 负责管理加载器设置的读写和更新，使用 Arc<RwLock> 保证线程安全
pub struct SettingsManager {
    /// 设置文件路径
    settings_path: PathBuf,

    /// 加载器设置（使用读写锁保证线程安全）
    settings: Arc<RwLock<LoaderSettings>>,
}

impl SettingsManager {
    /// 默认设置文件路径
    const DEFAULT_SETTINGS_PATH: &'static str = "pic_loader.json";

    /// 设置文件路径环境变量
    pub const SETTINGS_PATH_ENV: &'static str = "PIC_LOADER_CONFIG_PATH";

    /// 从设置文件加载设置
    ///
    /// # 参数
    /// - `settings_path`: 可选的设置文件路径，为 None 时依次使用环境变量和默认路径
    ///
    /// # 行为
    /// - 如果设置文件不存在，使用默认设置并创建文件
    /// - 如果设置文件损坏，使用默认设置并备份旧文件
    pub async fn load(settings_path: Option<PathBuf>) -> Result<Self, LoaderError> {
        let settings_path = settings_path
            .or_else(|| std::env::var(Self::SETTINGS_PATH_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_SETTINGS_PATH));

        let (settings, write_back) = Self::read_settings(&settings_path).await?;
        let manager = Self {
            settings_path,
            settings: Arc::new(RwLock::new(settings)),
        };

        if write_back {
            manager.save().await?;
        }

        Ok(manager)
    }

    /// 读取设置文件，第二项表示是否需要把默认设置写回磁盘
    async fn read_settings(path: &Path) -> Result<(LoaderSettings, bool), LoaderError> {
        let content = match fs::read_to_string(path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::info!("设置文件不存在，写入默认设置: {:?}", path);
                return Ok((LoaderSettings::default(), true));
            }
            Err(e) => {
                tracing::warn!("读取设置文件失败，本次使用默认设置: {:?} - {}", path, e);
                return Ok((LoaderSettings::default(), false));
            }
        };

        match serde_json::from_str(&content) {
            Ok(settings) => {
                tracing::info!("成功加载加载器设置: {:?}", path);
                Ok((settings, false))
            }
            Err(e) => {
                tracing::warn!("设置文件损坏，备份后使用默认设置: {}", e);
                Self::backup_corrupted_settings(path).await?;
                Ok((LoaderSettings::default(), true))
            }
        }
    }

    /// 以格式化 JSON 保存设置，按需创建父目录
    pub async fn save(&self) -> Result<(), LoaderError> {
        let json = serde_json::to_string_pretty(&*self.settings.read().await)?;

        let parent = self.settings_path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| LoaderError::Config(format!("创建设置目录失败: {}", e)))?;
        }

        fs::write(&self.settings_path, json)
            .await
            .map_err(|e| LoaderError::Config(format!("写入设置文件失败: {}", e)))?;

        tracing::debug!("设置已写入: {:?}", self.settings_path);
        Ok(())
    }

    /// 替换设置并保存
    pub async fn update(&self, new_settings: LoaderSettings) -> Result<(), LoaderError> {
        *self.settings.write().await = new_settings;
        tracing::info!("加载器设置已更新");
        self.save().await
    }

    /// 获取当前设置（克隆）
    pub async fn get_settings(&self) -> LoaderSettings {
        self.settings.read().await.clone()
    }

    /// 设置文件路径
    pub fn settings_path(&self) -> &Path {
        &self.settings_path
    }

    /// 根据当前设置生成请求配置
    ///
    /// 读取配置的占位图文件；读取失败只记录警告，不影响请求
    pub async fn request_config(&self) -> RequestConfig {
        let settings = self.get_settings().await;
        let mut config = RequestConfig::from_settings(&settings);

        if let Some(path) = &settings.loading_placeholder {
            config.loading_placeholder = Self::read_placeholder(path).await;
        }
        if let Some(path) = &settings.error_placeholder {
            config.error_placeholder = Self::read_placeholder(path).await;
        }

        config
    }

    async fn read_placeholder(path: &Path) -> Option<Payload> {
        match fs::read(path).await {
            Ok(bytes) => Some(Payload::from(bytes)),
            Err(e) => {
                tracing::warn!("读取占位图失败: {:?} - {}", path, e);
                None
            }
        }
    }

    /// 备份损坏的设置文件为 `{name}.corrupted`
    async fn backup_corrupted_settings(settings_path: &Path) -> Result<(), LoaderError> {
        let mut backup = settings_path.as_os_str().to_owned();
        backup.push(".corrupted");
        let backup_path = PathBuf::from(backup);

        fs::rename(settings_path, &backup_path)
            .await
            .map_err(|e| LoaderError::Config(format!("备份损坏的设置文件失败: {}", e)))?;

        tracing::warn!("已备份损坏的设置文件: {:?}", backup_path);
        Ok(())
    }
}
