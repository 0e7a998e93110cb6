//! # 削除ジョブハンドラ
//!
//! 削除ジョブの内部 API を提供する。
//!
//! ## エンドポイント
//!
//! - `POST /internal/delete-jobs` - ジョブ作成
//! - `GET /internal/delete-jobs/{job_id}` - ジョブの状態取得
//! - `POST /internal/delete-jobs/{job_id}/advance` - ジョブを 1 ステップ進める
//! - `POST /internal/delete-jobs/{job_id}/cancel` - ジョブの取り消し

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use cascade_domain::{
    delete_job::{DeleteJob, DeleteJobId, DeleteJobStatus},
    plan::PlanEntry,
};
use cascade_shared::ApiResponse;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    error::CoreError,
    usecase::{CancelOutcome, DeleteJobUseCaseImpl, StartJobInput},
};

/// 削除ジョブ API の共有状態
pub struct DeleteJobState {
    pub usecase: DeleteJobUseCaseImpl,
}

// --- リクエスト/レスポンス型 ---

/// ジョブ作成リクエスト
#[derive(Debug, Deserialize)]
pub struct StartDeleteJobRequest {
    pub root_table: String,
    pub root_id:    String,
    pub chunk_size: Option<u32>,
}

/// 状態取得のクエリパラメータ
#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// 削除計画をレスポンスに含めるか
    #[serde(default)]
    pub include_plan: bool,
}

/// 失敗内容 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct JobErrorDto {
    pub kind:      String,
    pub message:   String,
    pub table:     Option<String>,
    pub record_id: Option<String>,
}

/// 計画の 1 要素 DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct PlanEntryDto {
    pub table: String,
    pub id:    String,
}

impl From<&PlanEntry> for PlanEntryDto {
    fn from(entry: &PlanEntry) -> Self {
        Self {
            table: entry.table.to_string(),
            id:    entry.id.as_str().to_string(),
        }
    }
}

/// 削除ジョブ DTO
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct DeleteJobDto {
    pub id:               Uuid,
    pub root_table:       String,
    pub root_id:          String,
    pub status:           DeleteJobStatus,
    pub chunk_size:       u32,
    pub deleted_so_far:   usize,
    pub total_to_delete:  Option<usize>,
    pub remaining:        Option<usize>,
    pub progress_percent: Option<u8>,
    pub error:            Option<JobErrorDto>,
    pub version:          u32,
    pub created_at:       String,
    pub updated_at:       String,
    pub finished_at:      Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub plan:             Option<Vec<PlanEntryDto>>,
}

impl DeleteJobDto {
    fn from_job(job: &DeleteJob, include_plan: bool) -> Self {
        let progress = job.progress();
        Self {
            id:               *job.id().as_uuid(),
            root_table:       job.root_table().to_string(),
            root_id:          job.root_id().as_str().to_string(),
            status:           job.status(),
            chunk_size:       job.chunk_size().get(),
            deleted_so_far:   progress.deleted,
            total_to_delete:  progress.total,
            remaining:        progress.remaining(),
            progress_percent: progress.percent(),
            error:            job.failure().map(|f| JobErrorDto {
                kind:      f.kind.as_str().to_string(),
                message:   f.message.clone(),
                table:     f.entry.as_ref().map(|e| e.table.to_string()),
                record_id: f.entry.as_ref().map(|e| e.id.as_str().to_string()),
            }),
            version:          job.version().as_u32(),
            created_at:       job.created_at().to_rfc3339(),
            updated_at:       job.updated_at().to_rfc3339(),
            finished_at:      job.finished_at().map(|t| t.to_rfc3339()),
            plan:             job
                .plan()
                .filter(|_| include_plan)
                .map(|plan| plan.entries().iter().map(PlanEntryDto::from).collect()),
        }
    }
}

impl From<&DeleteJob> for DeleteJobDto {
    fn from(job: &DeleteJob) -> Self {
        Self::from_job(job, false)
    }
}

// --- ハンドラ ---

/// POST /internal/delete-jobs
///
/// 削除ジョブを作成する。ジョブは `pending` で作成され、advance で進める。
///
/// ## レスポンス
///
/// - `201 Created`: 作成されたジョブ
/// - `400 Bad Request`: テーブル名・ID・チャンクサイズが不正
#[tracing::instrument(skip_all)]
pub async fn start_delete_job(
    State(state): State<Arc<DeleteJobState>>,
    Json(req): Json<StartDeleteJobRequest>,
) -> Result<impl IntoResponse, CoreError> {
    let input = StartJobInput {
        root_table: req.root_table,
        root_id:    req.root_id,
        chunk_size: req.chunk_size,
    };

    let job = state.usecase.start_job(input).await?;

    let response = ApiResponse::new(DeleteJobDto::from(&job));
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /internal/delete-jobs/{job_id}
///
/// ジョブの現在の状態を取得する。`include_plan=true` で削除計画も返す。
#[tracing::instrument(skip_all, fields(%job_id))]
pub async fn get_delete_job(
    State(state): State<Arc<DeleteJobState>>,
    Path(job_id): Path<Uuid>,
    Query(query): Query<StatusQuery>,
) -> Result<impl IntoResponse, CoreError> {
    let job = state
        .usecase
        .get_status(&DeleteJobId::from_uuid(job_id))
        .await?;

    let response = ApiResponse::new(DeleteJobDto::from_job(&job, query.include_plan));
    Ok((StatusCode::OK, Json(response)))
}

/// POST /internal/delete-jobs/{job_id}/advance
///
/// ジョブを 1 ステップ（探索、または 1 チャンクの削除）進める。
/// 終端状態のジョブはそのまま返す。
#[tracing::instrument(skip_all, fields(%job_id))]
pub async fn advance_delete_job(
    State(state): State<Arc<DeleteJobState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    let job = state
        .usecase
        .advance(&DeleteJobId::from_uuid(job_id))
        .await?;

    let response = ApiResponse::new(DeleteJobDto::from(&job));
    Ok((StatusCode::OK, Json(response)))
}

/// POST /internal/delete-jobs/{job_id}/cancel
///
/// ## レスポンス
///
/// - `200 OK`: 取り消されたジョブ
/// - `404 Not Found`: ジョブが存在しない
/// - `409 Conflict`: ジョブは既に終了している
#[tracing::instrument(skip_all, fields(%job_id))]
pub async fn cancel_delete_job(
    State(state): State<Arc<DeleteJobState>>,
    Path(job_id): Path<Uuid>,
) -> Result<impl IntoResponse, CoreError> {
    match state
        .usecase
        .cancel(&DeleteJobId::from_uuid(job_id))
        .await?
    {
        CancelOutcome::Cancelled(job) => {
            let response = ApiResponse::new(DeleteJobDto::from(&job));
            Ok((StatusCode::OK, Json(response)))
        }
        CancelOutcome::AlreadyTerminal(job) => Err(CoreError::Conflict(format!(
            "削除ジョブは既に終了しています: {} ({})",
            job.id(),
            job.status()
        ))),
    }
}
