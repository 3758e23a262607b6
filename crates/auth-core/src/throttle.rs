//! 登录失败限流
//!
//! 对同一身份在滑动窗口内的连续登录失败计数，达到上限后拒绝，
//! 认证成功时清除计数。计数器由跨进程共享的存储承载。

use keel_errors::{AppError, AppResult};
use keel_ports::CounterPort;
use std::sync::Arc;
use std::time::Duration;

/// 登录失败限流配置
#[derive(Debug, Clone)]
pub struct ThrottleConfig {
    /// 窗口内允许的最大失败次数
    pub max_failed_attempts: i64,
    /// 失败计数窗口
    pub window: Duration,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: 5,
            window: Duration::from_secs(600),
        }
    }
}

/// 一次已计数的登录尝试凭据，认证成功后交还以清除计数
#[derive(Debug)]
pub struct FailureCounter {
    key: String,
    /// 本次递增后的失败次数
    pub count: i64,
}

/// 登录失败限流器
pub struct LoginThrottle {
    counter: Arc<dyn CounterPort>,
    config: ThrottleConfig,
}

impl LoginThrottle {
    pub fn new(counter: Arc<dyn CounterPort>, config: ThrottleConfig) -> Self {
        Self { counter, config }
    }

    fn counter_key(identity: &str) -> String {
        format!("login:failed:{}", identity)
    }

    /// 在口令校验前调用：已达上限直接拒绝，否则把本次尝试计入。
    ///
    /// 达到上限后既不再递增也不续期（计数冻结），窗口从最后一次
    /// 被计数的失败起算。读取与递增之间不是一个原子操作，并发下
    /// 计数可能短暂越过上限；递增本身是原子的，偏差可接受。
    pub async fn check_and_increment(&self, identity: &str) -> AppResult<FailureCounter> {
        let key = Self::counter_key(identity);

        let current = self.counter.get(&key).await?;
        if current >= self.config.max_failed_attempts {
            tracing::warn!(
                identity = %identity,
                failed_attempts = current,
                "login attempts exhausted"
            );
            return Err(AppError::resource_exhausted("Too many failed login attempts"));
        }

        // 原子递增并把窗口续期到完整长度（滑动窗口）
        let count = self.counter.increment(&key, self.config.window).await?;
        tracing::debug!(identity = %identity, attempt_count = count, "login attempt recorded");

        Ok(FailureCounter { key, count })
    }

    /// 认证成功后清除计数；计数已不存在时也不报错
    pub async fn clear(&self, counter: FailureCounter) -> AppResult<()> {
        self.counter.delete(&counter.key).await?;
        tracing::info!(key = %counter.key, "login failure counter cleared");
        Ok(())
    }

    /// 按身份直接清除计数（幂等），用于没有凭据可交还的场景
    pub async fn clear_identity(&self, identity: &str) -> AppResult<()> {
        self.counter.delete(&Self::counter_key(identity)).await
    }

    /// 当前窗口内的失败次数
    pub async fn failure_count(&self, identity: &str) -> AppResult<i64> {
        self.counter.get(&Self::counter_key(identity)).await
    }

    /// 剩余可失败次数
    pub async fn remaining_attempts(&self, identity: &str) -> AppResult<i64> {
        let current = self.failure_count(identity).await?;
        Ok((self.config.max_failed_attempts - current).max(0))
    }

    /// 被拒绝后距窗口结束还需等待的秒数
    pub async fn retry_after_seconds(&self, identity: &str) -> AppResult<Option<i64>> {
        self.counter.ttl(&Self::counter_key(identity)).await
    }
}
