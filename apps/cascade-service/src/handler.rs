//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数とルーターを定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュール（この `handler.rs`）で re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、ロジックはユースケースに委譲

pub mod delete_job;
pub mod health;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
pub use delete_job::{
    DeleteJobDto,
    DeleteJobState,
    advance_delete_job,
    cancel_delete_job,
    get_delete_job,
    start_delete_job,
};
pub use health::health_check;

/// ルーターを構築する
pub fn router(state: Arc<DeleteJobState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/internal/delete-jobs", post(start_delete_job))
        .route("/internal/delete-jobs/{job_id}", get(get_delete_job))
        .route(
            "/internal/delete-jobs/{job_id}/advance",
            post(advance_delete_job),
        )
        .route(
            "/internal/delete-jobs/{job_id}/cancel",
            post(cancel_delete_job),
        )
        .with_state(state)
}
