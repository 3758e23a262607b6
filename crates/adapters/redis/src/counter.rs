//! Redis 分布式计数器实现

use async_trait::async_trait;
use keel_errors::{AppError, AppResult};
use keel_ports::CounterPort;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::time::Duration;

/// Redis 分布式计数器
pub struct RedisCounter {
    conn: ConnectionManager,
}

impl RedisCounter {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl CounterPort for RedisCounter {
    async fn increment(&self, key: &str, ttl: Duration) -> AppResult<i64> {
        let mut conn = self.conn.clone();

        // 使用 Lua 脚本确保原子性：递增的同时把过期时间重置为完整窗口。
        // 每次递增都续期（滑动窗口），不同于只在创建时设置 TTL 的固定窗口。
        let script = Script::new(
            r"
            local current = redis.call('INCR', KEYS[1])
            redis.call('EXPIRE', KEYS[1], ARGV[1])
            return current
            ",
        );

        script
            .key(key)
            .arg(ttl.as_secs())
            .invoke_async(&mut conn)
            .await
            .map_err(|e| AppError::internal(format!("Redis counter increment failed: {}", e)))
    }

    async fn get(&self, key: &str) -> AppResult<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn
            .get(key)
            .await
            .map_err(|e| AppError::internal(format!("Redis counter get failed: {}", e)))?;
        Ok(value.unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        let mut conn = self.conn.clone();
        conn.del(key)
            .await
            .map_err(|e| AppError::internal(format!("Redis counter delete failed: {}", e)))
    }

    async fn ttl(&self, key: &str) -> AppResult<Option<i64>> {
        let mut conn = self.conn.clone();
        let ttl: i64 = conn
            .ttl(key)
            .await
            .map_err(|e| AppError::internal(format!("Redis counter ttl failed: {}", e)))?;

        // -2 表示键不存在，-1 表示没有过期时间
        match ttl {
            -2 => Ok(None),
            -1 => Ok(None),
            t => Ok(Some(t)),
        }
    }
}
