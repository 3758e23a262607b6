//! 分布式锁 trait 定义

use async_trait::async_trait;
use keel_errors::AppResult;
use std::time::Duration;

/// 按名称互斥的分布式锁，带租约与有界等待
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 在 `wait` 时限内尝试获取锁。
    ///
    /// 成功返回 `Some(token)`，token 标识本次持有，释放时必须回传；
    /// 等待超时返回 `None`。锁最长持有 `lease`，到期由存储端自动释放，
    /// 避免持有者崩溃后死锁。
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> AppResult<Option<String>>;

    /// 释放锁。只有 token 与当前持有者匹配时才删除，
    /// 锁已过期或被他人持有时静默返回。
    async fn release(&self, key: &str, token: &str) -> AppResult<()>;
}
