//! 基础设施层
//!
//! Redis 事件总线适配器、重试退避策略和内存消息存储。

pub mod memory_store;
pub mod redis;
pub mod retry;

pub use memory_store::InMemoryMessageStore;
pub use self::redis::{RedisError, RedisEventBus, RedisResult};
pub use retry::{retry_async, Backoff, RetryConfig};
