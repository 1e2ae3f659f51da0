//! 实时中继核心领域模型
//!
//! 包含在线名单、消息记录、领域事件、连接状态机以及 WebSocket 帧格式。

pub mod connection;
pub mod errors;
pub mod events;
pub mod frames;
pub mod message;
pub mod presence;
pub mod value_objects;

// 重新导出常用类型
pub use connection::ConnectionState;
pub use errors::*;
pub use events::*;
pub use frames::*;
pub use message::*;
pub use presence::*;
pub use value_objects::*;
