//! # チャンク実行
//!
//! 削除計画を `deleted_so_far` の位置から最大 `chunk_size` 件ずつ削除する。
//!
//! ## 設計方針
//!
//! - **1 回の呼び出しで 1 チャンク**: 進捗の書き込みはチャンク内の削除がすべて
//!   完了した後に 1 回だけ、条件付き更新で行う
//! - **冪等な再実行**: 削除は既に存在しないレコードでも成功するため、
//!   進捗を書き込む前にクラッシュしても同じチャンクを再実行すればよい
//! - **削除前の状態確認**: 各削除の直前にジョブを読み直し、取り消し等で状態が
//!   変わっていれば何も変更せずに中断する
//! - **読み飛ばさない**: 削除に失敗したレコードを飛ばして先に進むことはなく、
//!   ジョブを `failed` にする

use std::sync::Arc;

use cascade_domain::{
    clock::Clock,
    delete_job::{DeleteJob, DeleteJobStatus, FailureKind, JobFailure},
    plan::PlanEntry,
};
use cascade_infra::{InfraError, RecordStore, repository::DeleteJobRepository};

use super::{
    helpers::{commit_transition, load_job, transition_error},
    retry::RetryPolicy,
};
use crate::error::CoreError;

/// チャンク実行
#[derive(Clone)]
pub struct ChunkExecutor {
    jobs:         Arc<dyn DeleteJobRepository>,
    record_store: Arc<dyn RecordStore>,
    clock:        Arc<dyn Clock>,
    retry:        RetryPolicy,
}

impl ChunkExecutor {
    pub fn new(
        jobs: Arc<dyn DeleteJobRepository>,
        record_store: Arc<dyn RecordStore>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            jobs,
            record_store,
            clock,
            retry,
        }
    }

    /// 次のチャンクを削除し、更新後のジョブを返す
    ///
    /// `deleting` 以外のジョブはそのまま返す。
    /// 途中でジョブの状態が変わった場合は、読み直した最新のジョブを返す。
    #[tracing::instrument(skip_all, fields(job_id = %job.id()))]
    pub async fn process_next_chunk(&self, job: DeleteJob) -> Result<DeleteJob, CoreError> {
        let Some((offset, chunk)) = job.next_chunk() else {
            return Ok(job);
        };
        let chunk = chunk.to_vec();
        let expected = (job.status(), job.version());

        tracing::debug!(offset, size = chunk.len(), "チャンクの削除を開始します");

        for (deleted_in_chunk, entry) in chunk.iter().enumerate() {
            if let Some(current) = self.changed_since(&job).await? {
                tracing::info!(
                    offset,
                    deleted_in_chunk,
                    status = %current.status(),
                    "ジョブの状態が変わったためチャンクの削除を中断します"
                );
                return Ok(current);
            }

            if let Err(e) = self.delete_entry(entry).await {
                tracing::warn!(
                    table = %entry.table,
                    record_id = %entry.id,
                    offset,
                    deleted_in_chunk,
                    error = %e,
                    "レコードの削除に失敗しました"
                );
                let failure = JobFailure::new(failure_kind(&e), e.to_string()).at(entry.clone());
                let failed = job
                    .deletion_failed(failure, deleted_in_chunk, self.clock.now())
                    .map_err(transition_error)?;
                return commit_transition(self.jobs.as_ref(), &self.retry, expected, failed).await;
            }
        }

        let next = job
            .chunk_deleted(chunk.len(), self.clock.now())
            .map_err(transition_error)?;
        tracing::info!(
            deleted_so_far = next.deleted_so_far(),
            total = next.total_to_delete(),
            status = %next.status(),
            "チャンクの削除が完了しました"
        );
        commit_transition(self.jobs.as_ref(), &self.retry, expected, next).await
    }

    /// 保存済みのジョブが `job` から変わっていれば、最新のジョブを返す
    async fn changed_since(&self, job: &DeleteJob) -> Result<Option<DeleteJob>, CoreError> {
        let current = load_job(self.jobs.as_ref(), &self.retry, job.id()).await?;
        if current.status() == DeleteJobStatus::Deleting && current.version() == job.version() {
            Ok(None)
        } else {
            Ok(Some(current))
        }
    }

    async fn delete_entry(&self, entry: &PlanEntry) -> Result<(), InfraError> {
        let store = &self.record_store;
        let outcome = self
            .retry
            .run("delete", move || store.delete(entry))
            .await?;
        tracing::debug!(table = %entry.table, record_id = %entry.id, ?outcome, "削除しました");
        Ok(())
    }
}

fn failure_kind(e: &InfraError) -> FailureKind {
    if e.is_transient() {
        FailureKind::TransientStoreError
    } else {
        FailureKind::PermanentStoreError
    }
}
