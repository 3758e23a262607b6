//! keel-bootstrap - 服务启动骨架
//!
//! 组合根：装配配置、遥测与缓存/限流核心组件，
//! 并承担启动期的热点数据预热。

mod infrastructure;
mod retry;
mod runtime;

pub use infrastructure::*;
pub use retry::*;
pub use runtime::*;
