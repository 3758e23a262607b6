//! 分布式计数器 trait 定义

use async_trait::async_trait;
use keel_errors::AppResult;
use std::time::Duration;

/// 带过期时间的分布式原子计数器
///
/// 登录失败限流等滑动窗口计数场景使用。
#[async_trait]
pub trait CounterPort: Send + Sync {
    /// 原子递增并返回新值。
    ///
    /// 键不存在时从 1 开始；每次调用都把过期时间重置为 `ttl`
    /// （滑动窗口语义，递增与续期在存储端一次往返内完成）。
    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<i64>;

    /// 获取当前计数，键不存在时返回 0
    async fn get(&self, key: &str) -> AppResult<i64>;

    /// 删除计数器，键不存在时不报错
    async fn delete(&self, key: &str) -> AppResult<()>;

    /// 获取剩余 TTL（秒），键不存在或无过期时间时返回 None
    async fn ttl(&self, key: &str) -> AppResult<Option<i64>>;
}
