use std::time::Duration;

use application::ConnectionHandle;
use axum::body::Bytes;
use axum::extract::ws::{Message as WsMessage, WebSocket};
use domain::ClientFrame;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

/// 连续未回应的 ping 次数上限
const MAX_MISSED_PONGS: u32 = 2;

/// WebSocket 连接
///
/// 把一个 socket 接到中继的连接句柄上：
/// - 出站帧由发送任务写入 socket
/// - 入站文本帧解析为客户端帧交给句柄处理
/// - 定时 ping，连续未收到 pong 视为连接失效
pub struct WebSocketConnection {
    socket: WebSocket,
    handle: ConnectionHandle,
    ping_interval: Duration,
}

impl WebSocketConnection {
    pub fn new(socket: WebSocket, handle: ConnectionHandle, ping_interval: Duration) -> Self {
        tracing::info!(connection_id = %handle.id(), "WebSocket 连接已建立");
        Self {
            socket,
            handle,
            ping_interval,
        }
    }

    /// 运行连接主循环，直到任一方向断开
    pub async fn run(self) {
        let Self {
            socket,
            mut handle,
            ping_interval,
        } = self;
        let connection_id = handle.id();

        let Some(mut outbound) = handle.take_receiver() else {
            tracing::warn!(connection_id = %connection_id, "出站队列已被取走");
            handle.close().await;
            return;
        };

        let (mut sender, mut incoming) = socket.split();

        // 创建 mpsc channel 来解耦对 sender 的访问
        let (cmd_tx, mut cmd_rx) = mpsc::channel::<WsCommand>(32);

        // 发送任务：统一处理所有对 WebSocket sender 的写操作
        let send_task = tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    Some(cmd) = cmd_rx.recv() => match cmd {
                        WsCommand::SendPong(data) => WsMessage::Pong(data),
                        WsCommand::SendPing => WsMessage::Ping(Bytes::new()),
                    },
                    frame = outbound.recv() => match frame {
                        Some(frame) => WsMessage::Text((&*frame).into()),
                        // 注册表已移除该连接
                        None => break,
                    },
                };
                if sender.send(message).await.is_err() {
                    tracing::debug!("WebSocket 写入失败");
                    break;
                }
            }
            let _ = sender.close().await;
            tracing::debug!("WebSocket发送任务结束");
        });

        let mut ticker = tokio::time::interval(ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // 第一次 tick 立即完成
        ticker.tick().await;
        let mut missed_pongs = 0u32;

        loop {
            tokio::select! {
                message = incoming.next() => match message {
                    Some(Ok(WsMessage::Text(text))) => {
                        match ClientFrame::parse(text.as_str()) {
                            Ok(frame) => {
                                if let Err(err) = handle.handle_frame(frame).await {
                                    tracing::warn!(connection_id = %connection_id, error = %err, "客户端帧处理失败");
                                }
                            }
                            Err(err) => {
                                tracing::warn!(connection_id = %connection_id, error = %err, "无法解析客户端帧");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Ping(data))) => {
                        if cmd_tx.send(WsCommand::SendPong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Pong(_))) => {
                        missed_pongs = 0;
                    }
                    Some(Ok(WsMessage::Binary(_))) => {
                        tracing::debug!(connection_id = %connection_id, "忽略二进制帧");
                    }
                    Some(Ok(WsMessage::Close(_))) | None => {
                        tracing::info!(connection_id = %connection_id, "WebSocket收到关闭消息");
                        break;
                    }
                    Some(Err(err)) => {
                        tracing::debug!(connection_id = %connection_id, error = %err, "WebSocket 读取失败");
                        break;
                    }
                },
                _ = ticker.tick() => {
                    if missed_pongs >= MAX_MISSED_PONGS {
                        tracing::info!(connection_id = %connection_id, "心跳超时，断开连接");
                        break;
                    }
                    missed_pongs += 1;
                    if cmd_tx.send(WsCommand::SendPing).await.is_err() {
                        break;
                    }
                }
            }
        }

        handle.close().await;
        send_task.abort();
        tracing::info!(connection_id = %connection_id, "WebSocket连接已断开，在线状态已清理");
    }
}

/// WebSocket 写操作命令
#[derive(Debug)]
enum WsCommand {
    SendPong(Bytes),
    SendPing,
}
