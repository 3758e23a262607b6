//! keel-adapter-memory - 进程内本地缓存适配器
//!
//! 基于 Moka 的有界缓存：按写入/访问时间过期，按容量 LRU 淘汰。

use async_trait::async_trait;
use keel_ports::LocalCachePort;
use moka::future::Cache as MokaCache;
use std::time::Duration;

/// 本地缓存构建参数
#[derive(Debug, Clone)]
pub struct LocalCacheOptions {
    /// 写入后过期时间
    pub expire_after_write: Duration,
    /// 最后一次访问后过期时间
    pub expire_after_idle: Duration,
    /// 初始容量
    pub initial_capacity: usize,
    /// 最大容量，超出后按最近最少使用淘汰
    pub max_capacity: u64,
}

impl Default for LocalCacheOptions {
    fn default() -> Self {
        Self {
            expire_after_write: Duration::from_secs(1800),
            expire_after_idle: Duration::from_secs(1800),
            initial_capacity: 256,
            max_capacity: 10_000,
        }
    }
}

/// Moka 本地缓存
#[derive(Clone)]
pub struct MokaLocalCache {
    inner: MokaCache<String, String>,
}

impl MokaLocalCache {
    pub fn new(options: &LocalCacheOptions) -> Self {
        let inner = MokaCache::builder()
            .time_to_live(options.expire_after_write)
            .time_to_idle(options.expire_after_idle)
            .initial_capacity(options.initial_capacity)
            .max_capacity(options.max_capacity)
            .build();

        Self { inner }
    }

    /// 当前缓存条目数（近似值，Moka 异步维护内部统计）
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}

#[async_trait]
impl LocalCachePort for MokaLocalCache {
    async fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).await
    }

    async fn insert(&self, key: &str, value: &str) {
        self.inner.insert(key.to_string(), value.to_string()).await;
    }

    async fn invalidate(&self, key: &str) {
        self.inner.invalidate(key).await;
    }

    fn contains(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }
}
