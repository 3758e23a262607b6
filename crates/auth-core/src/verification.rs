//! 验证码服务
//!
//! 生成、存储与校验一次性数字验证码；短信/邮件投递由外部网关实现。

use async_trait::async_trait;
use keel_errors::AppResult;
use keel_ports::CachePort;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;

/// 验证码投递通道
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeChannel {
    Sms,
    Email,
}

impl CodeChannel {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Sms => "sms",
            Self::Email => "email",
        }
    }
}

/// 验证码配置
#[derive(Debug, Clone)]
pub struct VerificationCodeOptions {
    /// 短信验证码有效期
    pub sms_expire: Duration,
    /// 邮箱验证码有效期
    pub email_expire: Duration,
    /// 验证码位数
    pub code_length: usize,
}

impl Default for VerificationCodeOptions {
    fn default() -> Self {
        Self {
            sms_expire: Duration::from_secs(2 * 60),
            email_expire: Duration::from_secs(5 * 60),
            code_length: 6,
        }
    }
}

/// 验证码投递接口（短信/邮件网关由外部实现）
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, channel: CodeChannel, identity: &str, code: &str) -> AppResult<()>;
}

/// 验证码服务
pub struct VerificationCodeService {
    cache: Arc<dyn CachePort>,
    delivery: Arc<dyn CodeDelivery>,
    options: VerificationCodeOptions,
}

impl VerificationCodeService {
    pub fn new(
        cache: Arc<dyn CachePort>,
        delivery: Arc<dyn CodeDelivery>,
        options: VerificationCodeOptions,
    ) -> Self {
        Self {
            cache,
            delivery,
            options,
        }
    }

    fn code_key(channel: CodeChannel, identity: &str) -> String {
        format!("verify:code:{}:{}", channel.as_str(), identity)
    }

    fn expire_for(&self, channel: CodeChannel) -> Duration {
        match channel {
            CodeChannel::Sms => self.options.sms_expire,
            CodeChannel::Email => self.options.email_expire,
        }
    }

    fn generate_code(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.options.code_length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }

    /// 生成验证码、写入缓存并投递，返回有效期（秒）
    pub async fn send(&self, channel: CodeChannel, identity: &str) -> AppResult<u64> {
        let code = self.generate_code();
        let ttl = self.expire_for(channel);

        self.cache
            .set(&Self::code_key(channel, identity), &code, Some(ttl))
            .await?;
        self.delivery.deliver(channel, identity, &code).await?;

        tracing::info!(
            identity = %identity,
            channel = ?channel,
            expires_secs = ttl.as_secs(),
            "verification code sent"
        );
        Ok(ttl.as_secs())
    }

    /// 校验验证码：匹配即删除（一次性使用），不匹配保留原码直至过期
    pub async fn verify(&self, channel: CodeChannel, identity: &str, code: &str) -> AppResult<bool> {
        let key = Self::code_key(channel, identity);

        match self.cache.get(&key).await? {
            Some(stored) if stored == code => {
                self.cache.delete(&key).await?;
                Ok(true)
            }
            Some(_) => {
                tracing::debug!(identity = %identity, "verification code mismatch");
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
