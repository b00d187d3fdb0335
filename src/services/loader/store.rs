// 缓存存储 - 以缓存键寻址的本地文件缓存
//
// 本模块提供缓存条目的读写功能，包括：
// - 存在性检查
// - 原子写入（临时文件 + rename）
// - 幂等删除与整体清空
// - 缓存统计

use crate::services::loader::error::LoaderError;
use crate::services::loader::key::CacheKey;
use crate::services::loader::path::CachePath;
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, warn};

/// 在组件之间共享的图片字节
pub type Payload = Arc<[u8]>;

/// 缓存存储
///
/// 缓存根目录在首次写入时才创建
#[derive(Debug, Clone)]
pub struct CacheStore {
    /// 缓存根目录
    root: PathBuf,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 缓存条目的完整路径
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        CachePath::entry_path(&self.root, key)
    }

    /// 条目是否存在
    ///
    /// 只有 rename 完成后的完整文件才算存在，临时文件不可见
    pub async fn exists(&self, key: &CacheKey) -> bool {
        fs::metadata(self.path_for(key))
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    /// 读取条目
    ///
    /// # 返回
    /// - `Ok(Payload)`: 条目内容
    /// - `Err(LoaderError::CacheMiss)`: 条目不存在
    /// - `Err(LoaderError::Io)`: 其他读取错误
    pub async fn read(&self, key: &CacheKey) -> Result<Payload, LoaderError> {
        match fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Payload::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(LoaderError::CacheMiss),
            Err(e) => Err(LoaderError::Io(e)),
        }
    }

    /// 原子写入条目
    ///
    /// 先写入同目录下的临时文件，再 rename 到最终路径，
    /// 读者不会看到写了一半的文件。
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) -> Result<(), LoaderError> {
        fs::create_dir_all(&self.root).await?;

        let temp_path = CachePath::temp_path(&self.root, key);
        let final_path = self.path_for(key);

        if let Err(e) = fs::write(&temp_path, bytes).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(LoaderError::Io(e));
        }

        if let Err(e) = fs::rename(&temp_path, &final_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(LoaderError::Io(e));
        }

        debug!("缓存已写入: {:?} ({} 字节)", final_path, bytes.len());
        Ok(())
    }

    /// 删除条目（幂等，文件不存在不算错误）
    pub async fn delete(&self, key: &CacheKey) -> Result<(), LoaderError> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => {
                debug!("缓存已删除: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LoaderError::Io(e)),
        }
    }

    /// 删除整个缓存根目录（幂等）
    pub async fn delete_all(&self) -> Result<(), LoaderError> {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {
                debug!("缓存根目录已删除: {:?}", self.root);
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LoaderError::Io(e)),
        }
    }

    /// 获取缓存统计
    ///
    /// 遍历缓存根目录，统计完整条目的数量和总大小，跳过临时文件
    pub async fn stats(&self) -> Result<CacheStats, LoaderError> {
        let mut stats = CacheStats::default();

        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(stats),
            Err(e) => return Err(LoaderError::Io(e)),
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if CachePath::is_temp_file(&path) {
                continue;
            }

            match entry.metadata().await {
                Ok(meta) if meta.is_file() => {
                    stats.total_files += 1;
                    stats.total_size += meta.len();
                }
                Ok(_) => {}
                Err(e) => warn!("读取缓存文件信息失败: {:?} - {}", path, e),
            }
        }

        Ok(stats)
    }
}

/// 缓存统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// 总缓存大小（字节）
    pub total_size: u64,

    /// 总文件数
    pub total_files: usize,
}
