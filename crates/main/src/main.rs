//! 主应用程序入口
//!
//! 加载配置，组装中继和消息服务，启动 Axum Web API 服务。

use std::{sync::Arc, time::Duration};

use application::{
    ChatService, ChatServiceDependencies, EventBus, InMemoryEventBus, RelayHub, RelaySettings,
};
use config::AppConfig;
use infrastructure::{InMemoryMessageStore, RedisEventBus};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

/// 关闭时等待发布队列清空的上限
const FLUSH_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load()?;
    tracing::info!(config = %config.sanitize(), "配置已加载");

    let settings = RelaySettings::from_config(&config)?;
    tracing::info!(instance_id = %settings.instance_id, "进程实例标识");

    // 有 Redis 地址时走 Redis，否则单进程运行
    let redis_bus = match config.redis.url.as_deref() {
        Some(url) => match RedisEventBus::connect(url, &config.redis).await {
            Ok(bus) => Some(Arc::new(bus)),
            Err(err) => {
                tracing::warn!(error = %err, "Redis 配置无效，退化为单进程模式");
                None
            }
        },
        None => None,
    };
    let bus: Arc<dyn EventBus> = match &redis_bus {
        Some(bus) => bus.clone(),
        None => Arc::new(InMemoryEventBus::standalone()),
    };

    let relay = Arc::new(RelayHub::new(settings, bus));
    if let Err(err) = relay.start().await {
        tracing::warn!(error = %err, "订阅事件总线失败，仅本地投递");
    }
    let heartbeat = relay.spawn_heartbeat();

    let chat_service = ChatService::new(ChatServiceDependencies {
        store: Arc::new(InMemoryMessageStore::default()),
        router: relay.router().clone(),
    });
    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));

    let state = AppState::new(
        relay.clone(),
        Arc::new(chat_service),
        jwt_service,
        config.relay.ping_interval(),
    );

    // 启动 Web 服务器
    let app = router(state, &config.server.cors_origins);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("中继服务器启动在 http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 撤回本进程名单，并尽量把剩余事件发出去
    relay.shutdown(Some(heartbeat)).await;
    if let Some(bus) = redis_bus {
        if !bus.flush(FLUSH_TIMEOUT).await {
            tracing::warn!("关闭前未能清空发布队列");
        }
    }
    tracing::info!("中继服务器已停止");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "无法监听关闭信号");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到关闭信号");
}
