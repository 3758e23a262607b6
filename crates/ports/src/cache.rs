//! 远端缓存 trait 定义

use async_trait::async_trait;
use keel_errors::AppResult;
use std::time::Duration;

/// 远端键值缓存（跨进程共享，支持 TTL）
///
/// 值统一为字符串，结构化数据由调用方用 serde_json 序列化。
#[async_trait]
pub trait CachePort: Send + Sync {
    /// 获取缓存值
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    /// 设置缓存值，`ttl` 为 None 时不过期
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()>;

    /// 删除缓存
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 检查是否存在
    async fn exists(&self, key: &str) -> AppResult<bool>;

    /// 设置过期时间
    async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()>;
}
