//! 主应用程序入口
//!
//! 启动任务协作实时网关：加载配置、选择存储、启动后台任务和 Axum 服务。

use std::sync::Arc;

use application::{
    Clock, EventDispatcher, LivenessMonitor, MembershipRegistry, PresenceAnnouncer, RoomRouter,
    SystemClock,
};
use config::AppConfig;
use domain::{TaskRepository, UserDirectory};
use infrastructure::{
    create_pg_pool, InMemoryTaskRepository, InMemoryUserDirectory, PgMutationFeed,
    PgTaskRepository, PgUserDirectory, MIGRATOR,
};
use sqlx::PgPool;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState, JwtService};

struct Storage {
    users: Arc<dyn UserDirectory>,
    tasks: Arc<dyn TaskRepository>,
    pool: Option<PgPool>,
}

async fn open_storage(config: &AppConfig) -> anyhow::Result<Storage> {
    let Some(database) = &config.database else {
        tracing::warn!("未配置数据库，使用内存存储（仅用于开发）");
        return Ok(Storage {
            users: Arc::new(InMemoryUserDirectory::new()),
            tasks: Arc::new(InMemoryTaskRepository::new()),
            pool: None,
        });
    };

    tracing::info!(
        "连接数据库: {}",
        database.url.rsplit('@').next().unwrap_or("unknown")
    );
    let pool = create_pg_pool(&database.url, database.max_connections).await?;
    MIGRATOR.run(&pool).await?;

    Ok(Storage {
        users: Arc::new(PgUserDirectory::new(pool.clone())),
        tasks: Arc::new(PgTaskRepository::new(pool.clone())),
        pool: Some(pool),
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    let realtime = config.realtime.clone();
    let storage = open_storage(&config).await?;

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let registry = Arc::new(MembershipRegistry::new(
        clock.clone(),
        realtime.presence_channel_capacity,
    ));
    let room_router = RoomRouter::new(Arc::clone(&registry));
    let dispatcher = Arc::new(EventDispatcher::new(
        room_router.clone(),
        clock.clone(),
        realtime.suppress_origin_echo,
    ));

    // 后台任务共用一个停止信号
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut background = vec![
        PresenceAnnouncer::new(&registry, room_router).spawn(shutdown_rx.clone()),
        LivenessMonitor::new(
            Arc::clone(&registry),
            clock,
            realtime.sweep_interval(),
            realtime.stale_after(),
        )
        .spawn(shutdown_rx.clone()),
    ];
    if let Some(pool) = storage.pool.clone() {
        background.push(
            PgMutationFeed::new(pool, storage.tasks.clone(), Arc::clone(&dispatcher))
                .spawn(shutdown_rx.clone()),
        );
    }

    let jwt_service = Arc::new(JwtService::new(config.jwt.clone()));
    let state = AppState::new(
        Arc::clone(&registry),
        dispatcher,
        jwt_service,
        storage.users,
        storage.tasks,
        realtime,
    );

    let app = router(state);
    let bind_address = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;
    tracing::info!("实时网关启动在 http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "failed to listen for ctrl-c");
            }
            tracing::info!("收到停止信号，开始关闭");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    let dropped = registry.shutdown().await;
    for handle in background {
        if let Err(err) = handle.await {
            tracing::warn!(error = %err, "background task ended abnormally");
        }
    }
    tracing::info!(dropped_connections = dropped, "服务已停止");

    Ok(())
}
