//! 基础设施资源管理
//!
//! 统一装配共享的基础设施资源：Redis 连接、本地/远端缓存、
//! 分布式锁与计数器，以及其上的缓存编排器与登录限流器。

use std::sync::Arc;
use std::time::Duration;

use keel_adapter_memory::{LocalCacheOptions, MokaLocalCache};
use keel_adapter_redis::{
    RedisCache, RedisCounter, RedisDistributedLock, check_connection, create_connection_manager,
};
use keel_auth_core::{
    CodeDelivery, LoginThrottle, ThrottleConfig, VerificationCodeOptions, VerificationCodeService,
};
use keel_cache::{TieredCache, TieredCacheConfig};
use keel_config::AppConfig;
use keel_errors::AppResult;
use keel_ports::{CachePort, CounterPort, DistributedLock, LocalCachePort};
use redis::aio::ConnectionManager;
use secrecy::ExposeSecret;
use tracing::info;

use crate::retry::{RetryConfig, with_retry};

/// 基础设施资源容器
///
/// 由 bootstrap 统一初始化，业务侧通过访问器取用组件。
pub struct Infrastructure {
    /// 应用配置
    config: AppConfig,
    /// Redis 连接管理器
    redis_conn: ConnectionManager,
    /// 远端缓存（验证码等按需组装的组件复用）
    remote_cache: Arc<dyn CachePort>,
    /// 缓存编排器
    tiered_cache: Arc<TieredCache>,
    /// 登录失败限流器
    login_throttle: Arc<LoginThrottle>,
}

impl Infrastructure {
    /// 从配置创建基础设施资源（带重试）
    pub async fn from_config(config: AppConfig) -> AppResult<Self> {
        let retry_config = RetryConfig::default();

        // 1. 创建 Redis 连接（必需，带重试）
        let redis_url = config.redis.url.clone();
        let redis_conn = with_retry(&retry_config, "Redis connection", || {
            let url = redis_url.expose_secret().clone();
            async move { create_connection_manager(&url).await }
        })
        .await?;

        let mut probe = redis_conn.clone();
        check_connection(&mut probe).await?;
        info!("Redis connection created");

        // 2. 本地缓存
        let local: Arc<dyn LocalCachePort> = Arc::new(MokaLocalCache::new(&LocalCacheOptions {
            expire_after_write: Duration::from_secs(config.local_cache.expire_after_write_secs),
            expire_after_idle: Duration::from_secs(config.local_cache.expire_after_idle_secs),
            initial_capacity: config.local_cache.initial_capacity,
            max_capacity: config.local_cache.max_capacity,
        }));

        // 3. 远端缓存 / 分布式锁 / 计数器
        let mut redis_cache = RedisCache::new(redis_conn.clone());
        if let Some(prefix) = &config.redis.key_prefix {
            redis_cache = redis_cache.with_prefix(prefix.clone());
        }
        let remote_cache: Arc<dyn CachePort> = Arc::new(redis_cache);
        let lock: Arc<dyn DistributedLock> = Arc::new(RedisDistributedLock::new(redis_conn.clone()));
        let counter: Arc<dyn CounterPort> = Arc::new(RedisCounter::new(redis_conn.clone()));

        // 4. 缓存编排器
        let tiered_cache = Arc::new(TieredCache::new(
            local,
            remote_cache.clone(),
            lock,
            TieredCacheConfig {
                two_level_lock_wait: Duration::from_secs(config.cache.two_level_lock_wait_secs),
                two_level_lock_lease: Duration::from_secs(config.cache.two_level_lock_lease_secs),
                jitter_range_secs: config.cache.jitter_range_secs,
            },
        ));
        info!(
            hot_keys = config.cache.hot_keys.len(),
            jitter_range_secs = config.cache.jitter_range_secs,
            "Tiered cache created"
        );

        // 5. 登录失败限流器
        let login_throttle = Arc::new(LoginThrottle::new(
            counter,
            ThrottleConfig {
                max_failed_attempts: config.login_throttle.max_failed_attempts,
                window: Duration::from_secs(config.login_throttle.window_minutes * 60),
            },
        ));
        info!(
            max_failed_attempts = config.login_throttle.max_failed_attempts,
            window_minutes = config.login_throttle.window_minutes,
            "Login throttle created"
        );

        Ok(Self {
            config,
            redis_conn,
            remote_cache,
            tiered_cache,
            login_throttle,
        })
    }

    /// 启动时把配置的热点键预热到本地缓存，仅调用一次
    pub async fn preload_hot_cache(&self) -> AppResult<()> {
        self.tiered_cache
            .preload_hot_keys(&self.config.cache.hot_keys)
            .await
    }

    /// 用外部投递网关组装验证码服务
    pub fn verification_code_service(
        &self,
        delivery: Arc<dyn CodeDelivery>,
    ) -> VerificationCodeService {
        VerificationCodeService::new(
            self.remote_cache.clone(),
            delivery,
            VerificationCodeOptions {
                sms_expire: Duration::from_secs(self.config.verification_code.sms_expire_minutes * 60),
                email_expire: Duration::from_secs(
                    self.config.verification_code.email_expire_minutes * 60,
                ),
                code_length: self.config.verification_code.code_length,
            },
        )
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn redis_connection(&self) -> ConnectionManager {
        self.redis_conn.clone()
    }

    pub fn remote_cache(&self) -> Arc<dyn CachePort> {
        self.remote_cache.clone()
    }

    pub fn tiered_cache(&self) -> Arc<TieredCache> {
        self.tiered_cache.clone()
    }

    pub fn login_throttle(&self) -> Arc<LoginThrottle> {
        self.login_throttle.clone()
    }
}
