//! 进程内本地缓存 trait 定义

use async_trait::async_trait;

/// 进程内有界缓存（容量/时间淘汰由实现负责）
///
/// 仅进程内可见，不涉及网络，因此操作不返回错误。
#[async_trait]
pub trait LocalCachePort: Send + Sync {
    /// 获取缓存值，未命中返回 None
    async fn get(&self, key: &str) -> Option<String>;

    /// 写入缓存值
    async fn insert(&self, key: &str, value: &str);

    /// 删除缓存值
    async fn invalidate(&self, key: &str);

    /// 检查键是否存在
    fn contains(&self, key: &str) -> bool;
}
