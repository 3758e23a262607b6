//! keel-auth-core - 认证核心库
//!
//! 登录失败限流与验证码校验。协作者（计数器、缓存、投递网关）
//! 全部通过构造函数注入，认证流程本身（口令校验、令牌签发）在外部。

mod throttle;
mod verification;

pub use throttle::*;
pub use verification::*;
