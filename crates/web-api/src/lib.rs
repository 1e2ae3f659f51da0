//! Web API 层。
//!
//! 提供 Axum 路由：WebSocket 接入中继，HTTP 接口委托给消息服务。

mod auth;
mod error;
mod routes;
mod state;
mod ws_connection;

pub use auth::{Authenticated, Claims, JwtService};
pub use config::JwtConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
