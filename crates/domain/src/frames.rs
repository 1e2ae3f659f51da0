//! WebSocket 文本帧格式
//!
//! 服务端帧：`{"event": "<name>", "data": <payload>}`。
//! 客户端帧使用同样的外形，目前只支持 `presence-announce`。

use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 服务端下发给客户端的具名事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerFrame {
    pub event: String,
    pub data: serde_json::Value,
}

impl ServerFrame {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// 客户端上行事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientFrame {
    #[serde(rename = "presence-announce")]
    PresenceAnnounce(PresenceAnnounce),
}

/// 在线声明
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceAnnounce {
    pub user_id: UserId,
    #[serde(default)]
    pub display_name: String,
    pub online: bool,
}

impl ClientFrame {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}
