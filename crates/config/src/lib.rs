//! keel-config - 配置加载库

use figment::{
    Figment,
    providers::{Env, Format, Toml},
};
use secrecy::Secret;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] figment::Error),
}

/// Redis 配置
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Secret<String>,
    /// 键前缀，多应用共用一个实例时隔离命名空间
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// 本地缓存配置
#[derive(Debug, Clone, Deserialize)]
pub struct LocalCacheConfig {
    /// 写入后过期时间（秒）
    #[serde(default = "default_local_expire_secs")]
    pub expire_after_write_secs: u64,
    /// 最后一次访问后过期时间（秒）
    #[serde(default = "default_local_expire_secs")]
    pub expire_after_idle_secs: u64,
    /// 初始容量
    #[serde(default = "default_local_initial_capacity")]
    pub initial_capacity: usize,
    /// 最大容量，超出后按最近最少使用淘汰
    #[serde(default = "default_local_max_capacity")]
    pub max_capacity: u64,
}

fn default_local_expire_secs() -> u64 {
    1800
}

fn default_local_initial_capacity() -> usize {
    256
}

fn default_local_max_capacity() -> u64 {
    10_000
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            expire_after_write_secs: default_local_expire_secs(),
            expire_after_idle_secs: default_local_expire_secs(),
            initial_capacity: default_local_initial_capacity(),
            max_capacity: default_local_max_capacity(),
        }
    }
}

/// 缓存编排配置
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 远端缓存默认 TTL（秒）
    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,
    /// TTL 随机抖动范围（秒），0 表示关闭
    #[serde(default)]
    pub jitter_range_secs: u64,
    /// 二级缓存按键锁的等待上限（秒）
    #[serde(default = "default_two_level_lock_wait_secs")]
    pub two_level_lock_wait_secs: u64,
    /// 二级缓存按键锁的租约（秒）
    #[serde(default = "default_two_level_lock_lease_secs")]
    pub two_level_lock_lease_secs: u64,
    /// 启动时预热到本地缓存的热点键列表
    #[serde(default)]
    pub hot_keys: Vec<String>,
}

fn default_cache_ttl_secs() -> u64 {
    600
}

fn default_two_level_lock_wait_secs() -> u64 {
    10
}

fn default_two_level_lock_lease_secs() -> u64 {
    5
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_cache_ttl_secs(),
            jitter_range_secs: 0,
            two_level_lock_wait_secs: default_two_level_lock_wait_secs(),
            two_level_lock_lease_secs: default_two_level_lock_lease_secs(),
            hot_keys: Vec::new(),
        }
    }
}

/// 登录失败限流配置
#[derive(Debug, Clone, Deserialize)]
pub struct LoginThrottleConfig {
    /// 窗口内允许的最大失败次数
    #[serde(default = "default_max_failed_attempts")]
    pub max_failed_attempts: i64,
    /// 失败计数窗口（分钟）
    #[serde(default = "default_throttle_window_minutes")]
    pub window_minutes: u64,
}

fn default_max_failed_attempts() -> i64 {
    5
}

fn default_throttle_window_minutes() -> u64 {
    10
}

impl Default for LoginThrottleConfig {
    fn default() -> Self {
        Self {
            max_failed_attempts: default_max_failed_attempts(),
            window_minutes: default_throttle_window_minutes(),
        }
    }
}

/// 验证码配置
#[derive(Debug, Clone, Deserialize)]
pub struct VerificationCodeConfig {
    /// 短信验证码有效期（分钟）
    #[serde(default = "default_sms_code_expire_minutes")]
    pub sms_expire_minutes: u64,
    /// 邮箱验证码有效期（分钟）
    #[serde(default = "default_email_code_expire_minutes")]
    pub email_expire_minutes: u64,
    /// 验证码位数
    #[serde(default = "default_code_length")]
    pub code_length: usize,
}

fn default_sms_code_expire_minutes() -> u64 {
    2
}

fn default_email_code_expire_minutes() -> u64 {
    5
}

fn default_code_length() -> usize {
    6
}

impl Default for VerificationCodeConfig {
    fn default() -> Self {
        Self {
            sms_expire_minutes: default_sms_code_expire_minutes(),
            email_expire_minutes: default_email_code_expire_minutes(),
            code_length: default_code_length(),
        }
    }
}

/// 遥测配置
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub app_name: String,
    pub app_env: String,
    pub redis: RedisConfig,
    #[serde(default)]
    pub local_cache: LocalCacheConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub login_throttle: LoginThrottleConfig,
    #[serde(default)]
    pub verification_code: VerificationCodeConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl AppConfig {
    /// 从配置文件和环境变量加载配置
    pub fn load(config_dir: &str) -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config: Self = Figment::new()
            .merge(Toml::file(format!("{}/default.toml", config_dir)))
            .merge(Toml::file(format!("{}/{}.toml", config_dir, env)))
            .merge(Env::prefixed("").split("_"))
            .extract()?;

        Ok(config)
    }

    /// 是否为生产环境
    pub fn is_production(&self) -> bool {
        self.app_env == "production"
    }

    /// 是否为开发环境
    pub fn is_development(&self) -> bool {
        self.app_env == "development"
    }
}
