//! keel-cache - 多级缓存编排
//!
//! 组合本地缓存、远端缓存与分布式锁，提供三种读取策略：
//! 仅本地（手动/自动加载）、旁路缓存、二级缓存。
//! 同一个键的并发加载通过 singleflight 或按键分布式锁收敛为一次。

mod singleflight;
mod tiered;

pub use tiered::{TieredCache, TieredCacheConfig};
