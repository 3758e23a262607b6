//! Redis 分布式锁实现
//!
//! SET NX PX 抢占 + token 比对释放，有界等待采用指数退避轮询。

use async_trait::async_trait;
use keel_errors::{AppError, AppResult};
use keel_ports::DistributedLock;
use redis::Script;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

/// 轮询退避参数
#[derive(Debug, Clone)]
struct PollBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    multiplier: f64,
}

impl Default for PollBackoff {
    fn default() -> Self {
        Self {
            initial_delay_ms: 20,
            max_delay_ms: 250,
            multiplier: 2.0,
        }
    }
}

impl PollBackoff {
    /// 计算第 n 次重试的延迟
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = (self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32)) as u64;
        Duration::from_millis(delay_ms.min(self.max_delay_ms))
    }
}

/// Redis 分布式锁
pub struct RedisDistributedLock {
    conn: ConnectionManager,
    lock_prefix: String,
    backoff: PollBackoff,
}

impl RedisDistributedLock {
    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            lock_prefix: "lock:".to_string(),
            backoff: PollBackoff::default(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.lock_prefix = prefix.into();
        self
    }

    fn lock_key(&self, key: &str) -> String {
        format!("{}{}", self.lock_prefix, key)
    }

    /// 单次抢占：SET NX PX，原子地写入 token 并设置租约
    async fn acquire_once(&self, lock_key: &str, token: &str, lease: Duration) -> AppResult<bool> {
        let mut conn = self.conn.clone();

        let result: Option<String> = redis::cmd("SET")
            .arg(lock_key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(lease.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis lock acquire failed: {}", e)))?;

        Ok(result.is_some())
    }
}

#[async_trait]
impl DistributedLock for RedisDistributedLock {
    async fn try_acquire(
        &self,
        key: &str,
        wait: Duration,
        lease: Duration,
    ) -> AppResult<Option<String>> {
        let lock_key = self.lock_key(key);
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + wait;
        let mut attempt: u32 = 0;

        loop {
            if self.acquire_once(&lock_key, &token, lease).await? {
                return Ok(Some(token));
            }

            let now = tokio::time::Instant::now();
            if now >= deadline {
                tracing::debug!(key = %key, wait_ms = wait.as_millis(), "lock wait timed out");
                return Ok(None);
            }

            // 退避后再试，不超过剩余等待时间
            let delay = self.backoff.delay_for_attempt(attempt).min(deadline - now);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn release(&self, key: &str, token: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        let lock_key = self.lock_key(key);

        // 只有 token 匹配时才删除，防止误删其他持有者的锁
        let script = Script::new(
            r"
            if redis.call('GET', KEYS[1]) == ARGV[1] then
                return redis.call('DEL', KEYS[1])
            else
                return 0
            end
            ",
        );

        let deleted: i64 = script
            .key(&lock_key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis lock release failed: {}", e)))?;

        if deleted == 0 {
            // 租约已到期或锁被他人持有，释放视为幂等
            tracing::debug!(key = %key, "lock already released or held by another owner");
        }

        Ok(())
    }
}
