//! 多级缓存编排器
//!
//! 三种读取策略：
//! - 仅本地：手动写入，或未命中时经 singleflight 加载一次
//! - 旁路缓存：远端未命中时直接回源，不加锁
//! - 二级缓存：本地 → 远端 → 按键分布式锁保护下回源，双写两级
//!
//! 加载结果为 None 时一律不缓存，区分"未计算"与"计算结果为空"。

use keel_errors::AppResult;
use keel_ports::{CachePort, DistributedLock, LocalCachePort};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::singleflight::SingleflightGroup;

/// 二级缓存按键锁的名称前缀
const TWO_LEVEL_LOCK_PREFIX: &str = "twoLevelCacheLock:";

/// 缓存编排配置
#[derive(Debug, Clone)]
pub struct TieredCacheConfig {
    /// 二级缓存按键锁的等待上限
    pub two_level_lock_wait: Duration,
    /// 二级缓存按键锁的租约
    pub two_level_lock_lease: Duration,
    /// 远端 TTL 随机抖动范围（秒），0 表示关闭
    pub jitter_range_secs: u64,
}

impl Default for TieredCacheConfig {
    fn default() -> Self {
        Self {
            two_level_lock_wait: Duration::from_secs(10),
            two_level_lock_lease: Duration::from_secs(5),
            jitter_range_secs: 0,
        }
    }
}

/// 多级缓存编排器
pub struct TieredCache {
    local: Arc<dyn LocalCachePort>,
    remote: Arc<dyn CachePort>,
    lock: Arc<dyn DistributedLock>,
    flights: SingleflightGroup<Option<String>>,
    config: TieredCacheConfig,
}

impl TieredCache {
    pub fn new(
        local: Arc<dyn LocalCachePort>,
        remote: Arc<dyn CachePort>,
        lock: Arc<dyn DistributedLock>,
        config: TieredCacheConfig,
    ) -> Self {
        Self {
            local,
            remote,
            lock,
            flights: SingleflightGroup::new(),
            config,
        }
    }

    /// 手动写入本地缓存，写入后对后续本地读取立即可见
    pub async fn set_local(&self, key: &str, value: &str) {
        self.local.insert(key, value).await;
    }

    /// 读取本地缓存，未命中不回源
    pub async fn get_local(&self, key: &str) -> Option<String> {
        self.local.get(key).await
    }

    /// 读取本地缓存，未命中时经 singleflight 加载。
    ///
    /// 同一个键的并发加载收敛为一次执行，等待者共享结果；
    /// 不同键的加载互不阻塞。
    pub async fn get_or_load_local<F, Fut>(&self, key: &str, loader: F) -> AppResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<String>>>,
    {
        if let Some(value) = self.local.get(key).await {
            return Ok(Some(value));
        }

        self.flights
            .run(key, || async {
                // 拿到执行权后再查一次，排队期间可能已被填充
                if let Some(value) = self.local.get(key).await {
                    return Ok(Some(value));
                }

                let value = loader().await?;
                if let Some(v) = &value {
                    self.local.insert(key, v).await;
                }
                Ok(value)
            })
            .await
    }

    /// 旁路缓存：远端未命中时直接回源并写回远端。
    ///
    /// 不加锁，并发下同一个键可能重复回源，是该策略接受的取舍。
    pub async fn get_or_load_cache_aside<F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<String>>>,
    {
        if let Some(value) = self.remote.get(key).await? {
            tracing::debug!(key = %key, "cache hit in remote");
            return Ok(Some(value));
        }

        let value = loader().await?;
        if let Some(v) = &value {
            self.remote.set(key, v, Some(self.jittered(ttl))).await?;
        }
        Ok(value)
    }

    /// 二级缓存：本地优先，远端次之，都未命中时在按键分布式锁
    /// 保护下回源并写入两级。
    ///
    /// 等锁超过上限按未命中穿透返回（降级而非错误）；
    /// 锁一旦取得，无论加载成败都会释放，加载错误在释放后上抛。
    pub async fn get_or_load_two_level<F, Fut>(
        &self,
        key: &str,
        loader: F,
        ttl: Duration,
    ) -> AppResult<Option<String>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AppResult<Option<String>>>,
    {
        if let Some(value) = self.local.get(key).await {
            return Ok(Some(value));
        }

        if let Some(value) = self.remote.get(key).await? {
            tracing::debug!(key = %key, "cache hit in remote, backfilling local");
            // 回填是幂等写入，无需加锁
            self.local.insert(key, &value).await;
            return Ok(Some(value));
        }

        let lock_key = format!("{}{}", TWO_LEVEL_LOCK_PREFIX, key);
        let token = self
            .lock
            .try_acquire(
                &lock_key,
                self.config.two_level_lock_wait,
                self.config.two_level_lock_lease,
            )
            .await?;

        let Some(token) = token else {
            tracing::debug!(key = %key, "two-level lock contended, passing through as miss");
            return Ok(None);
        };

        let result = async {
            // 持锁后再查一次远端，排队期间可能已有实例完成加载
            if let Some(value) = self.remote.get(key).await? {
                self.local.insert(key, &value).await;
                return Ok(Some(value));
            }

            let value = loader().await?;
            if let Some(v) = &value {
                self.remote.set(key, v, Some(self.jittered(ttl))).await?;
                self.local.insert(key, v).await;
            }
            Ok(value)
        }
        .await;

        if let Err(e) = self.lock.release(&lock_key, &token).await {
            tracing::warn!(key = %key, error = %e, "failed to release two-level cache lock");
        }

        result
    }

    /// 启动时把远端已有的热点数据预热到本地缓存。
    ///
    /// 远端没有的键跳过，不算错误。
    pub async fn preload_hot_keys(&self, keys: &[String]) -> AppResult<()> {
        let mut warmed = 0usize;
        for key in keys {
            if let Some(value) = self.remote.get(key).await? {
                self.local.insert(key, &value).await;
                warmed += 1;
            }
        }
        tracing::info!(total = keys.len(), warmed, "hot key preload finished");
        Ok(())
    }

    /// 为远端 TTL 添加随机抖动，防止大量缓存同时过期。
    /// 例如 TTL 300 秒、抖动范围 30 秒时，实际 TTL 在 285-315 秒之间。
    fn jittered(&self, ttl: Duration) -> Duration {
        if self.config.jitter_range_secs == 0 {
            return ttl;
        }

        let mut rng = rand::thread_rng();
        let jitter_secs = rng.gen_range(0..=self.config.jitter_range_secs);
        let half_jitter = self.config.jitter_range_secs / 2;

        let base_secs = ttl.as_secs();
        let new_secs = if jitter_secs > half_jitter {
            base_secs + (jitter_secs - half_jitter)
        } else {
            base_secs.saturating_sub(half_jitter - jitter_secs)
        };

        Duration::from_secs(new_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keel_errors::AppError;
    use std::collections::{HashMap, HashSet};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryLocal {
        entries: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl LocalCachePort for MemoryLocal {
        async fn get(&self, key: &str) -> Option<String> {
            self.entries.lock().unwrap().get(key).cloned()
        }

        async fn insert(&self, key: &str, value: &str) {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }

        async fn invalidate(&self, key: &str) {
            self.entries.lock().unwrap().remove(key);
        }

        fn contains(&self, key: &str) -> bool {
            self.entries.lock().unwrap().contains_key(key)
        }
    }

    #[derive(Default)]
    struct MemoryRemote {
        entries: Mutex<HashMap<String, (String, Option<Duration>)>>,
    }

    impl MemoryRemote {
        fn ttl_of(&self, key: &str) -> Option<Duration> {
            self.entries
                .lock()
                .unwrap()
                .get(key)
                .and_then(|(_, ttl)| *ttl)
        }
    }

    #[async_trait]
    impl CachePort for MemoryRemote {
        async fn get(&self, key: &str) -> AppResult<Option<String>> {
            Ok(self
                .entries
                .lock()
                .unwrap()
                .get(key)
                .map(|(v, _)| v.clone()))
        }

        async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> AppResult<()> {
            self.entries
                .lock()
                .unwrap()
                .insert(key.to_string(), (value.to_string(), ttl));
            Ok(())
        }

        async fn delete(&self, key: &str) -> AppResult<()> {
            self.entries.lock().unwrap().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> AppResult<bool> {
            Ok(self.entries.lock().unwrap().contains_key(key))
        }

        async fn expire(&self, key: &str, ttl: Duration) -> AppResult<()> {
            if let Some(entry) = self.entries.lock().unwrap().get_mut(key) {
                entry.1 = Some(ttl);
            }
            Ok(())
        }
    }

    /// 总能立刻拿到锁，并记录获取/释放次数
    #[derive(Default)]
    struct GrantingLock {
        acquired: AtomicUsize,
        released: AtomicUsize,
    }

    #[async_trait]
    impl DistributedLock for GrantingLock {
        async fn try_acquire(
            &self,
            _key: &str,
            _wait: Duration,
            _lease: Duration,
        ) -> AppResult<Option<String>> {
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Some("token".to_string()))
        }

        async fn release(&self, _key: &str, _token: &str) -> AppResult<()> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// 等待总是超时的锁
    struct DenyingLock;

    #[async_trait]
    impl DistributedLock for DenyingLock {
        async fn try_acquire(
            &self,
            _key: &str,
            _wait: Duration,
            _lease: Duration,
        ) -> AppResult<Option<String>> {
            Ok(None)
        }

        async fn release(&self, _key: &str, _token: &str) -> AppResult<()> {
            Ok(())
        }
    }

    /// 进程内互斥锁，模拟真实的按键争用
    #[derive(Default)]
    struct ContendedLock {
        held: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl DistributedLock for ContendedLock {
        async fn try_acquire(
            &self,
            key: &str,
            wait: Duration,
            _lease: Duration,
        ) -> AppResult<Option<String>> {
            let deadline = tokio::time::Instant::now() + wait;
            loop {
                if self.held.lock().unwrap().insert(key.to_string()) {
                    return Ok(Some("token".to_string()));
                }
                if tokio::time::Instant::now() >= deadline {
                    return Ok(None);
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        }

        async fn release(&self, key: &str, _token: &str) -> AppResult<()> {
            self.held.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn cache_with(
        local: Arc<MemoryLocal>,
        remote: Arc<MemoryRemote>,
        lock: Arc<dyn DistributedLock>,
    ) -> TieredCache {
        TieredCache::new(local, remote, lock, TieredCacheConfig::default())
    }

    fn default_cache() -> (Arc<MemoryLocal>, Arc<MemoryRemote>, TieredCache) {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = cache_with(local.clone(), remote.clone(), Arc::new(GrantingLock::default()));
        (local, remote, cache)
    }

    #[tokio::test]
    async fn test_set_local_then_get_local_roundtrip() {
        let (_, _, cache) = default_cache();

        cache.set_local("user:1", "alice").await;
        assert_eq!(cache.get_local("user:1").await, Some("alice".to_string()));
    }

    #[tokio::test]
    async fn test_get_local_absent_returns_none() {
        let (_, _, cache) = default_cache();

        assert_eq!(cache.get_local("never-loaded").await, None);
    }

    #[tokio::test]
    async fn test_cache_aside_loads_once_and_populates_remote() {
        let (_, remote, cache) = default_cache();
        let calls = AtomicUsize::new(0);

        let result = cache
            .get_or_load_cache_aside(
                "user:42",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("loaded".to_string()))
                },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(result, Some("loaded".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            remote.get("user:42").await.unwrap(),
            Some("loaded".to_string())
        );
        assert_eq!(remote.ttl_of("user:42"), Some(Duration::from_secs(60)));
    }

    #[tokio::test]
    async fn test_cache_aside_hit_skips_loader() {
        let (_, remote, cache) = default_cache();
        remote.set("user:42", "cached", None).await.unwrap();

        let result = cache
            .get_or_load_cache_aside(
                "user:42",
                || async { panic!("loader must not run on a remote hit") },
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert_eq!(result, Some("cached".to_string()));
    }

    #[tokio::test]
    async fn test_cache_aside_null_result_not_cached() {
        let (_, remote, cache) = default_cache();

        let result = cache
            .get_or_load_cache_aside("user:404", || async { Ok(None) }, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(result, None);
        assert!(!remote.exists("user:404").await.unwrap());
    }

    #[tokio::test]
    async fn test_two_level_backfills_local_from_remote() {
        let (local, remote, cache) = default_cache();
        remote.set("hot:1", "shared", None).await.unwrap();

        let result = cache
            .get_or_load_two_level(
                "hot:1",
                || async { panic!("loader must not run when remote has the value") },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(result, Some("shared".to_string()));
        assert_eq!(local.get("hot:1").await, Some("shared".to_string()));
    }

    #[tokio::test]
    async fn test_two_level_miss_loads_and_writes_both_tiers() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let lock = Arc::new(GrantingLock::default());
        let cache = cache_with(local.clone(), remote.clone(), lock.clone());

        let result = cache
            .get_or_load_two_level(
                "hot:2",
                || async { Ok(Some("fresh".to_string())) },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        assert_eq!(result, Some("fresh".to_string()));
        assert_eq!(local.get("hot:2").await, Some("fresh".to_string()));
        assert_eq!(remote.get("hot:2").await.unwrap(), Some("fresh".to_string()));
        assert_eq!(remote.ttl_of("hot:2"), Some(Duration::from_secs(30)));
        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_level_lock_timeout_degrades_to_miss() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = cache_with(local.clone(), remote.clone(), Arc::new(DenyingLock));
        let calls = AtomicUsize::new(0);

        let result = cache
            .get_or_load_two_level(
                "hot:3",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(Some("never".to_string()))
                },
                Duration::from_secs(30),
            )
            .await
            .unwrap();

        // 等锁超时按未命中返回，不回源也不报错
        assert_eq!(result, None);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!remote.exists("hot:3").await.unwrap());
    }

    #[tokio::test]
    async fn test_two_level_loader_error_releases_lock() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let lock = Arc::new(GrantingLock::default());
        let cache = cache_with(local, remote, lock.clone());

        let result = cache
            .get_or_load_two_level(
                "hot:4",
                || async { Err::<Option<String>, _>(AppError::external_service("db down")) },
                Duration::from_secs(30),
            )
            .await;

        assert!(result.is_err());
        // 加载失败也必须释放锁，错误在释放之后才上抛
        assert_eq!(lock.acquired.load(Ordering::SeqCst), 1);
        assert_eq!(lock.released.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_local_loader_null_not_cached_and_retried() {
        let (local, _, cache) = default_cache();
        let calls = AtomicUsize::new(0);

        for _ in 0..2 {
            let result = cache
                .get_or_load_local("user:404", || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(None)
                })
                .await
                .unwrap();
            assert_eq!(result, None);
        }

        // None 不落缓存，第二次调用重新回源
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(!local.contains("user:404"));
    }

    #[tokio::test]
    async fn test_local_concurrent_callers_share_one_load() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = Arc::new(cache_with(
            local,
            remote,
            Arc::new(GrantingLock::default()),
        ));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..10 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load_local("shared", || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(Some("computed".to_string()))
                    })
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result, Some("computed".to_string()));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_two_level_concurrent_callers_single_loader_write() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = Arc::new(TieredCache::new(
            local,
            remote.clone(),
            Arc::new(ContendedLock::default()),
            TieredCacheConfig {
                two_level_lock_wait: Duration::from_secs(1),
                two_level_lock_lease: Duration::from_secs(5),
                jitter_range_secs: 0,
            },
        ));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = vec![];
        for _ in 0..5 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_load_two_level(
                        "hot:5",
                        || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(Some("winner".to_string()))
                        },
                        Duration::from_secs(30),
                    )
                    .await
            }));
        }

        for handle in handles {
            let result = handle.await.unwrap().unwrap();
            // 等待充足时所有调用者都应拿到值：要么自己加载，要么持锁后复查远端命中
            assert_eq!(result, Some("winner".to_string()));
        }

        // 只有一个加载者真正回源并写入远端
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            remote.get("hot:5").await.unwrap(),
            Some("winner".to_string())
        );
    }

    #[tokio::test]
    async fn test_preload_warms_local_only_for_present_keys() {
        let (local, remote, cache) = default_cache();
        remote.set("dict:region", "north", None).await.unwrap();

        let keys = vec!["dict:region".to_string(), "dict:missing".to_string()];
        cache.preload_hot_keys(&keys).await.unwrap();

        assert_eq!(local.get("dict:region").await, Some("north".to_string()));
        assert!(!local.contains("dict:missing"));
    }

    #[test]
    fn test_jitter_stays_within_range() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = TieredCache::new(
            local,
            remote,
            Arc::new(DenyingLock),
            TieredCacheConfig {
                jitter_range_secs: 30,
                ..Default::default()
            },
        );

        let base = Duration::from_secs(300);
        let mut seen = HashSet::new();
        for _ in 0..50 {
            let jittered = cache.jittered(base);
            assert!(jittered.as_secs() >= 285 && jittered.as_secs() <= 315);
            seen.insert(jittered.as_secs());
        }
        // 抖动应产生多个不同取值
        assert!(seen.len() > 1);
    }

    #[test]
    fn test_jitter_disabled_returns_base_ttl() {
        let local = Arc::new(MemoryLocal::default());
        let remote = Arc::new(MemoryRemote::default());
        let cache = TieredCache::new(
            local,
            remote,
            Arc::new(DenyingLock),
            TieredCacheConfig::default(),
        );

        assert_eq!(
            cache.jittered(Duration::from_secs(300)),
            Duration::from_secs(300)
        );
    }
}
