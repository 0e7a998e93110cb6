//! # Cascade Service サーバー
//!
//! 連鎖削除ジョブを実行する内部サービス。
//!
//! ## 役割
//!
//! - **ジョブ API**: 削除ジョブの作成・進行・取り消し・状態取得
//! - **ドライバー**: 非終端状態のジョブをバックグラウンドで 1 ステップずつ進める
//! - **データ永続化**: ジョブと業務データは同じ PostgreSQL に置く
//!
//! 環境変数は [`cascade_service::config`] を参照。
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境
//! cargo run -p cascade-service
//!
//! # ドライバーを止めて API だけで進める
//! CASCADE_DRIVER_ENABLED=false DATABASE_URL=postgres://... cargo run -p cascade-service
//! ```

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context as _;
use cascade_domain::clock::SystemClock;
use cascade_infra::{PostgresRecordStore, db, repository::PostgresDeleteJobRepository};
use cascade_service::{
    config::ServiceConfig,
    driver::Driver,
    handler::{DeleteJobState, router},
    usecase::{ChunkExecutor, DeleteJobUseCaseImpl, DiscoveryEngine},
};
use cascade_shared::observability::{TracingConfig, init_tracing};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

/// Cascade Service サーバーのエントリーポイント
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    dotenvy::dotenv().ok();

    init_tracing(TracingConfig::from_env("cascade-service"));

    let config = ServiceConfig::from_env().context("設定の読み込みに失敗しました")?;
    let descriptor = Arc::new(
        config
            .load_hierarchy()
            .context("階層定義の読み込みに失敗しました")?,
    );

    tracing::info!(
        "Cascade Service サーバーを起動します: {}:{}",
        config.host,
        config.port
    );

    let pool = db::create_pool(&config.database_url)
        .await
        .context("データベース接続に失敗しました")?;
    db::run_migrations(&pool)
        .await
        .context("マイグレーションに失敗しました")?;
    tracing::info!("データベースに接続しました");

    // 依存コンポーネントを初期化
    let jobs = Arc::new(PostgresDeleteJobRepository::new(pool.clone()));
    let record_store = Arc::new(PostgresRecordStore::new(pool));
    let clock = Arc::new(SystemClock);

    let discovery = DiscoveryEngine::new(descriptor, record_store.clone(), config.retry);
    let executor = ChunkExecutor::new(jobs.clone(), record_store, clock.clone(), config.retry);
    let usecase = DeleteJobUseCaseImpl::new(
        jobs,
        discovery,
        executor,
        clock,
        config.retry,
        config.default_chunk_size,
    );

    // ドライバー
    let driver = Driver::new(Arc::new(usecase.clone()), config.driver);
    let driver_shutdown = driver.shutdown_handle();
    let driver_task = if config.driver.enabled {
        Some(driver.spawn())
    } else {
        tracing::info!("ドライバーは無効です（advance API でジョブを進めてください）");
        None
    };

    // ルーター構築
    let app = router(Arc::new(DeleteJobState { usecase })).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("アドレスのパースに失敗しました")?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!("Cascade Service サーバーが起動しました: {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    driver_shutdown.store(true, std::sync::atomic::Ordering::SeqCst);
    if let Some(task) = driver_task {
        task.await.context("ドライバーの停止に失敗しました")?;
    }
    tracing::info!("Cascade Service サーバーを停止しました");

    Ok(())
}

/// Ctrl+C を受け取るまで待機する
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "シグナルハンドラを登録できませんでした");
    }
    tracing::info!("停止シグナルを受信しました");
}
