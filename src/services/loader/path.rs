// 缓存路径管理
//
// 提供统一的缓存文件路径生成规则：缓存根目录下每个缓存键一个平铺文件，
// 文件名即十六进制键，无子目录、无元数据文件。

use crate::services::loader::key::CacheKey;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// 缓存路径生成器
pub struct CachePath;

impl CachePath {
    /// 缓存根目录
    const CACHE_ROOT: &'static str = "cache";

    /// 加载器子目录
    const LOADER_DIR: &'static str = "PicLoader";

    /// 临时文件后缀
    const TEMP_SUFFIX: &'static str = "tmp";

    /// 默认缓存根目录：`cache/PicLoader`
    pub fn default_root() -> PathBuf {
        PathBuf::from(Self::CACHE_ROOT).join(Self::LOADER_DIR)
    }

    /// 缓存条目路径
    ///
    /// # 示例
    /// ```
    /// use std::path::Path;
    /// use pic_loader::services::loader::{CacheKey, CachePath};
    ///
    /// let key = CacheKey::for_url("https://example.com/a.png").unwrap();
    /// let path = CachePath::entry_path(Path::new("cache/PicLoader"), &key);
    /// assert_eq!(path.file_name().unwrap().to_str().unwrap(), key.as_str());
    /// ```
    pub fn entry_path(root: &Path, key: &CacheKey) -> PathBuf {
        root.join(key.as_str())
    }

    /// 原子写入用的临时路径：`{key}.{uuid}.tmp`
    ///
    /// 与条目位于同一目录，保证 rename 不跨文件系统
    pub fn temp_path(root: &Path, key: &CacheKey) -> PathBuf {
        root.join(format!(
            "{}.{}.{}",
            key.as_str(),
            Uuid::new_v4().simple(),
            Self::TEMP_SUFFIX
        ))
    }

    /// 判断文件名是否为未完成的临时文件
    pub fn is_temp_file(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext == Self::TEMP_SUFFIX)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> CacheKey {
        CacheKey::for_url("https://example.com/poster.jpg").unwrap()
    }

    #[test]
    fn test_default_root() {
        let root = CachePath::default_root();
        assert_eq!(root.file_name().unwrap(), "PicLoader");
        assert!(root.to_string_lossy().contains("cache"));
    }

    #[test]
    fn test_entry_path_is_flat() {
        let root = Path::new("/tmp/pic");
        let path = CachePath::entry_path(root, &key());
        assert_eq!(path.parent().unwrap(), root);
        assert!(path.extension().is_none());
    }

    #[test]
    fn test_temp_path_unique_and_marked() {
        let root = Path::new("/tmp/pic");
        let a = CachePath::temp_path(root, &key());
        let b = CachePath::temp_path(root, &key());
        assert_ne!(a, b);
        assert_eq!(a.parent().unwrap(), root);
        assert!(CachePath::is_temp_file(&a));
        assert!(!CachePath::is_temp_file(&CachePath::entry_path(root, &key())));
    }
}
