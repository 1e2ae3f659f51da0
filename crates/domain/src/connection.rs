//! 连接生命周期状态机
//!
//! `OpenUnbound -> OpenBound -> Closed`，`Closed` 为终态。

use crate::errors::DomainError;
use crate::value_objects::{ConnectionId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    OpenUnbound,
    OpenBound(UserId),
    Closed,
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        !matches!(self, ConnectionState::Closed)
    }

    pub fn bound_user(&self) -> Option<UserId> {
        match self {
            ConnectionState::OpenBound(user_id) => Some(*user_id),
            _ => None,
        }
    }

    /// 绑定身份；已绑定时以最后一次为准
    pub fn bind(&mut self, id: ConnectionId, user_id: UserId) -> Result<(), DomainError> {
        match self {
            ConnectionState::Closed => Err(DomainError::ConnectionClosed {
                connection_id: id.to_string(),
            }),
            _ => {
                *self = ConnectionState::OpenBound(user_id);
                Ok(())
            }
        }
    }

    /// 撤回身份回到未绑定；已关闭的连接不变
    pub fn unbind(&mut self) -> Option<UserId> {
        match *self {
            ConnectionState::OpenBound(user_id) => {
                *self = ConnectionState::OpenUnbound;
                Some(user_id)
            }
            _ => None,
        }
    }

    /// 迁移到终态，只有第一次调用返回 true
    pub fn close(&mut self) -> bool {
        if self.is_open() {
            *self = ConnectionState::Closed;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_then_close_once() {
        let id = ConnectionId::generate();
        let mut state = ConnectionState::OpenUnbound;
        state.bind(id, UserId(7)).unwrap();
        assert_eq!(state.bound_user(), Some(UserId(7)));

        state.bind(id, UserId(8)).unwrap();
        assert_eq!(state.bound_user(), Some(UserId(8)));

        assert!(state.close());
        assert!(!state.close());
        assert!(state.bind(id, UserId(9)).is_err());
    }

    #[test]
    fn unbind_returns_to_unbound_but_not_after_close() {
        let id = ConnectionId::generate();
        let mut state = ConnectionState::OpenUnbound;
        assert_eq!(state.unbind(), None);

        state.bind(id, UserId(7)).unwrap();
        assert_eq!(state.unbind(), Some(UserId(7)));
        assert_eq!(state, ConnectionState::OpenUnbound);

        state.close();
        assert_eq!(state.unbind(), None);
        assert_eq!(state, ConnectionState::Closed);
    }

    #[test]
    fn unbound_connection_can_close() {
        let mut state = ConnectionState::OpenUnbound;
        assert!(state.close());
        assert_eq!(state.bound_user(), None);
    }
}
