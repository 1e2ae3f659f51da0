//! 应用层实现。
//!
//! 连接表、在线跟踪、事件路由与连接生命周期，以及对外部协作方
//! （事件总线、消息存储、认证）的抽象。

pub mod auth;
pub mod bus;
pub mod clock;
pub mod cluster;
pub mod error;
pub mod hub;
pub mod lifecycle;
pub mod presence;
pub mod registry;
pub mod router;
pub mod services;
pub mod store;

pub use auth::{AuthError, Authorizer};
pub use bus::memory::{InMemoryBusHub, InMemoryEventBus};
pub use bus::{BusEnvelope, BusError, BusMessageHandler, EventBus};
pub use clock::{Clock, SystemClock};
pub use cluster::ClusterView;
pub use error::ApplicationError;
pub use hub::{RelayHub, RelaySettings};
pub use lifecycle::{ConnectionHandle, ConnectionLifecycle};
pub use presence::PresenceTracker;
pub use registry::{ConnectionRegistry, DeliveryReport, OutboundFrame, TransportError};
pub use router::EventRouter;
pub use services::{ChatService, ChatServiceDependencies};
pub use store::{MessageStore, StoreError};
