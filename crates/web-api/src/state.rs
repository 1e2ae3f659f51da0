use std::sync::Arc;
use std::time::Duration;

use application::{ChatService, RelayHub};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub relay: Arc<RelayHub>,
    pub chat_service: Arc<ChatService>,
    pub jwt_service: Arc<JwtService>,
    /// WebSocket ping 间隔
    pub ping_interval: Duration,
}

impl AppState {
    pub fn new(
        relay: Arc<RelayHub>,
        chat_service: Arc<ChatService>,
        jwt_service: Arc<JwtService>,
        ping_interval: Duration,
    ) -> Self {
        Self {
            relay,
            chat_service,
            jwt_service,
            ping_interval,
        }
    }
}
