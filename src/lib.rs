// 图片加载库
//
// 本库提供远程图片加载的核心功能，包括：
// - 磁盘缓存
// - 并发请求去重
// - 超时与重试
// - 生命周期回调

pub mod services;
