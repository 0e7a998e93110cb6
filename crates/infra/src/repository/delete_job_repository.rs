//! # DeleteJobRepository
//!
//! 削除ジョブの永続化を担当するリポジトリ。
//!
//! ## 設計方針
//!
//! - **1 ジョブ 1 行**: 削除計画は順序付きの JSON 配列として `plan` 列（JSONB）に保存する
//! - **条件付き更新**: 遷移前のステータスと version が一致する場合のみ更新する
//! - **不変条件の検証**: 読み出した行は [`DeleteJob::from_db`] で ADT に変換する

use async_trait::async_trait;
use cascade_domain::{
    delete_job::{DeleteJob, DeleteJobId, DeleteJobRecord, DeleteJobStatus, FailureKind},
    hierarchy::TableName,
    plan::{DeletionPlan, PlanEntry, RecordId},
    value_objects::{ChunkSize, Version},
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::InfraError;

/// 削除ジョブリポジトリトレイト
#[async_trait]
pub trait DeleteJobRepository: Send + Sync {
    /// 新規ジョブを挿入する
    async fn insert(&self, job: &DeleteJob) -> Result<(), InfraError>;

    /// ID でジョブを取得する
    ///
    /// # 戻り値
    ///
    /// - `Ok(Some(job))`: ジョブが見つかった場合
    /// - `Ok(None)`: ジョブが見つからない場合
    /// - `Err(_)`: データベースエラー、または保存値が不変条件に違反している場合
    async fn find_by_id(&self, id: &DeleteJobId) -> Result<Option<DeleteJob>, InfraError>;

    /// ステータスと version を条件にジョブを更新する
    ///
    /// `expected_status` と `expected_version` は遷移前のジョブの値。
    /// どちらかが DB 上の値と一致しない場合は更新せず `Conflict` を返す。
    async fn update_with_status_check(
        &self,
        job: &DeleteJob,
        expected_status: DeleteJobStatus,
        expected_version: Version,
    ) -> Result<(), InfraError>;

    /// 非終端状態のジョブ ID を作成日時順に取得する
    async fn find_active_ids(&self, limit: usize) -> Result<Vec<DeleteJobId>, InfraError>;
}

/// `delete_jobs` テーブルの 1 行
#[derive(Debug, sqlx::FromRow)]
struct DeleteJobRow {
    id:             Uuid,
    root_table:     String,
    root_id:        String,
    status:         String,
    plan:           Option<serde_json::Value>,
    deleted_so_far: i64,
    chunk_size:     i32,
    error_kind:     Option<String>,
    error:          Option<String>,
    failed_entry:   Option<serde_json::Value>,
    version:        i64,
    created_at:     DateTime<Utc>,
    updated_at:     DateTime<Utc>,
    finished_at:    Option<DateTime<Utc>>,
}

impl TryFrom<DeleteJobRow> for DeleteJob {
    type Error = InfraError;

    fn try_from(row: DeleteJobRow) -> Result<Self, Self::Error> {
        let deleted_so_far = usize::try_from(row.deleted_so_far).map_err(|_| {
            InfraError::unexpected(format!("deleted_so_far が負の値です: {}", row.deleted_so_far))
        })?;
        let chunk_size = u32::try_from(row.chunk_size).map_err(|_| {
            InfraError::unexpected(format!("chunk_size が負の値です: {}", row.chunk_size))
        })?;
        let error_kind = row
            .error_kind
            .map(|kind| {
                kind.parse::<FailureKind>()
                    .map_err(|e| InfraError::unexpected(format!("error_kind が不正です: {kind}: {e}")))
            })
            .transpose()?;

        let record = DeleteJobRecord {
            id: DeleteJobId::from_uuid(row.id),
            root_table: TableName::new(row.root_table)?,
            root_id: RecordId::new(row.root_id)?,
            status: row.status.parse::<DeleteJobStatus>()?,
            plan: row
                .plan
                .map(serde_json::from_value::<DeletionPlan>)
                .transpose()?,
            deleted_so_far,
            chunk_size: ChunkSize::new(chunk_size)?,
            error_kind,
            error: row.error,
            failed_entry: row
                .failed_entry
                .map(serde_json::from_value::<PlanEntry>)
                .transpose()?,
            version: Version::try_from(row.version)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
            finished_at: row.finished_at,
        };

        Ok(DeleteJob::from_db(record)?)
    }
}

/// 書き込み用に列の値を組み立てる
struct DeleteJobColumns {
    chunk_size:      i32,
    plan:            Option<serde_json::Value>,
    deleted_so_far:  i64,
    total_to_delete: Option<i64>,
    error_kind:      Option<&'static str>,
    error:           Option<String>,
    failed_entry:    Option<serde_json::Value>,
}

impl DeleteJobColumns {
    fn of(job: &DeleteJob) -> Result<Self, InfraError> {
        let failure = job.failure();
        Ok(Self {
            chunk_size:      i32::try_from(job.chunk_size().get()).map_err(|_| {
                InfraError::unexpected(format!("chunk_size が大きすぎます: {}", job.chunk_size()))
            })?,
            plan:            job.plan().map(serde_json::to_value).transpose()?,
            deleted_so_far:  to_i64(job.deleted_so_far())?,
            total_to_delete: job.total_to_delete().map(to_i64).transpose()?,
            error_kind:      failure.map(|f| f.kind.as_str()),
            error:           failure.map(|f| f.message.clone()),
            failed_entry:    failure
                .and_then(|f| f.entry.as_ref())
                .map(serde_json::to_value)
                .transpose()?,
        })
    }
}

fn to_i64(value: usize) -> Result<i64, InfraError> {
    i64::try_from(value).map_err(|_| InfraError::unexpected(format!("件数が大きすぎます: {value}")))
}

/// PostgreSQL 実装の DeleteJobRepository
#[derive(Debug, Clone)]
pub struct PostgresDeleteJobRepository {
    pool: PgPool,
}

impl PostgresDeleteJobRepository {
    /// 新しいリポジトリインスタンスを作成
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeleteJobRepository for PostgresDeleteJobRepository {
    #[tracing::instrument(skip_all, level = "debug", fields(job_id = %job.id()))]
    async fn insert(&self, job: &DeleteJob) -> Result<(), InfraError> {
        let columns = DeleteJobColumns::of(job)?;
        sqlx::query(
            r#"
            INSERT INTO delete_jobs (
                id, root_table, root_id, status, plan,
                deleted_so_far, total_to_delete, chunk_size,
                error_kind, error, failed_entry, version,
                created_at, updated_at, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id().as_uuid())
        .bind(job.root_table().as_str())
        .bind(job.root_id().as_str())
        .bind(job.status().as_str())
        .bind(columns.plan)
        .bind(columns.deleted_so_far)
        .bind(columns.total_to_delete)
        .bind(columns.chunk_size)
        .bind(columns.error_kind)
        .bind(columns.error)
        .bind(columns.failed_entry)
        .bind(job.version().as_i64())
        .bind(job.created_at())
        .bind(job.updated_at())
        .bind(job.finished_at())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug", fields(job_id = %id))]
    async fn find_by_id(&self, id: &DeleteJobId) -> Result<Option<DeleteJob>, InfraError> {
        let row = sqlx::query_as::<_, DeleteJobRow>(
            r#"
            SELECT
                id, root_table, root_id, status, plan,
                deleted_so_far, chunk_size,
                error_kind, error, failed_entry, version,
                created_at, updated_at, finished_at
            FROM delete_jobs
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(DeleteJob::try_from).transpose()
    }

    #[tracing::instrument(
        skip_all,
        level = "debug",
        fields(job_id = %job.id(), %expected_status, %expected_version)
    )]
    async fn update_with_status_check(
        &self,
        job: &DeleteJob,
        expected_status: DeleteJobStatus,
        expected_version: Version,
    ) -> Result<(), InfraError> {
        let columns = DeleteJobColumns::of(job)?;
        let result = sqlx::query(
            r#"
            UPDATE delete_jobs SET
                status = $1,
                plan = $2,
                deleted_so_far = $3,
                total_to_delete = $4,
                error_kind = $5,
                error = $6,
                failed_entry = $7,
                version = $8,
                updated_at = $9,
                finished_at = $10
            WHERE id = $11 AND status = $12 AND version = $13
            "#,
        )
        .bind(job.status().as_str())
        .bind(columns.plan)
        .bind(columns.deleted_so_far)
        .bind(columns.total_to_delete)
        .bind(columns.error_kind)
        .bind(columns.error)
        .bind(columns.failed_entry)
        .bind(job.version().as_i64())
        .bind(job.updated_at())
        .bind(job.finished_at())
        .bind(job.id().as_uuid())
        .bind(expected_status.as_str())
        .bind(expected_version.as_i64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(InfraError::conflict("DeleteJob", job.id().to_string()));
        }

        Ok(())
    }

    #[tracing::instrument(skip_all, level = "debug")]
    async fn find_active_ids(&self, limit: usize) -> Result<Vec<DeleteJobId>, InfraError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT id
            FROM delete_jobs
            WHERE status IN ('pending', 'discovering', 'deleting')
            ORDER BY created_at, id
            LIMIT $1
            "#,
        )
        .bind(to_i64(limit)?)
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(DeleteJobId::from_uuid).collect())
    }
}
