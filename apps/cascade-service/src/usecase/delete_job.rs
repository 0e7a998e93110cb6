//! # 削除ジョブユースケース
//!
//! 削除ジョブの作成・進行・取り消し・参照を提供する。
//!
//! ## 設計方針
//!
//! - **1 回の advance で 1 ステップ**: 探索、または 1 チャンクの削除だけを行う
//! - **毎回読み直す**: advance のたびにジョブストアから最新のジョブを読み込み、
//!   呼び出しをまたいで状態をキャッシュしない
//! - **競合は失敗ではない**: 条件付き更新が拒否された場合は読み直した状態を返す
//! - **結果は getStatus で観測する**: `start_job` はジョブの最終結果によって失敗しない

use std::sync::Arc;

use cascade_domain::{
    clock::Clock,
    delete_job::{DeleteJob, DeleteJobId, DeleteJobStatus, NewDeleteJob},
    hierarchy::TableName,
    plan::RecordId,
    value_objects::ChunkSize,
};
use cascade_infra::repository::DeleteJobRepository;

use super::{
    discovery::DiscoveryEngine,
    executor::ChunkExecutor,
    helpers::{commit_transition, load_job, transition_error},
    retry::RetryPolicy,
};
use crate::error::CoreError;

/// 取り消し時に競合した場合の読み直し回数の上限
const MAX_CANCEL_ATTEMPTS: usize = 5;

/// ジョブ作成の入力
#[derive(Debug, Clone)]
pub struct StartJobInput {
    pub root_table: String,
    pub root_id:    String,
    /// 未指定の場合は設定の既定値を使う
    pub chunk_size: Option<u32>,
}

/// 取り消しの結果
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// 取り消した
    Cancelled(DeleteJob),
    /// 既に終端状態だった
    AlreadyTerminal(DeleteJob),
}

/// 削除ジョブユースケース
#[derive(Clone)]
pub struct DeleteJobUseCaseImpl {
    jobs:               Arc<dyn DeleteJobRepository>,
    discovery:          DiscoveryEngine,
    executor:           ChunkExecutor,
    clock:              Arc<dyn Clock>,
    retry:              RetryPolicy,
    default_chunk_size: ChunkSize,
}

impl DeleteJobUseCaseImpl {
    pub fn new(
        jobs: Arc<dyn DeleteJobRepository>,
        discovery: DiscoveryEngine,
        executor: ChunkExecutor,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
        default_chunk_size: ChunkSize,
    ) -> Self {
        Self {
            jobs,
            discovery,
            executor,
            clock,
            retry,
            default_chunk_size,
        }
    }

    /// 削除ジョブを作成する（pending）
    ///
    /// 入力の形式だけを検証する。ルートの存在や階層定義との整合は探索時に確認し、
    /// 問題があればジョブが `failed` になる。
    #[tracing::instrument(skip_all, fields(root_table = %input.root_table, root_id = %input.root_id))]
    pub async fn start_job(&self, input: StartJobInput) -> Result<DeleteJob, CoreError> {
        let root_table =
            TableName::new(input.root_table).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        let root_id =
            RecordId::new(input.root_id).map_err(|e| CoreError::BadRequest(e.to_string()))?;
        let chunk_size = match input.chunk_size {
            Some(size) => ChunkSize::new(size).map_err(|e| CoreError::BadRequest(e.to_string()))?,
            None => self.default_chunk_size,
        };

        let job = DeleteJob::new(NewDeleteJob {
            id: DeleteJobId::new(),
            root_table,
            root_id,
            chunk_size,
            now: self.clock.now(),
        });
        self.retry
            .run("insert_job", || self.jobs.insert(&job))
            .await?;

        tracing::info!(job_id = %job.id(), %chunk_size, "削除ジョブを作成しました");
        Ok(job)
    }

    /// ジョブを 1 ステップ進める
    ///
    /// - pending: 探索を開始し、計画を確定する（または failed）
    /// - discovering: 前回の探索が中断されているため、最初から探索し直す
    /// - deleting: 1 チャンクを削除する
    /// - 終端状態: 何もしない
    #[tracing::instrument(skip_all, fields(%job_id))]
    pub async fn advance(&self, job_id: &DeleteJobId) -> Result<DeleteJob, CoreError> {
        let job = load_job(self.jobs.as_ref(), &self.retry, job_id).await?;

        match job.status() {
            DeleteJobStatus::Pending => {
                let expected = (job.status(), job.version());
                let discovering = job
                    .discovery_started(self.clock.now())
                    .map_err(transition_error)?;
                let discovering =
                    commit_transition(self.jobs.as_ref(), &self.retry, expected, discovering)
                        .await?;
                // 競合した場合は他のアクターの書き込み結果をそのまま返す
                if discovering.status() != DeleteJobStatus::Discovering {
                    return Ok(discovering);
                }
                self.run_discovery(discovering).await
            }
            DeleteJobStatus::Discovering => {
                tracing::info!("中断された探索をやり直します");
                self.run_discovery(job).await
            }
            DeleteJobStatus::Deleting => self.executor.process_next_chunk(job).await,
            DeleteJobStatus::Completed | DeleteJobStatus::Failed | DeleteJobStatus::Cancelled => {
                Ok(job)
            }
        }
    }

    /// 探索を実行し、計画（または失敗）を書き込む
    ///
    /// 計画と `deleting` への遷移は 1 回の条件付き更新で書き込む。
    async fn run_discovery(&self, job: DeleteJob) -> Result<DeleteJob, CoreError> {
        let expected = (job.status(), job.version());
        let result = self.discovery.discover(job.root()).await;
        let now = self.clock.now();

        let next = match result {
            Ok(plan) => {
                tracing::info!(job_id = %job.id(), total = plan.len(), "探索が完了しました");
                job.plan_discovered(plan, now)
            }
            Err(e) => {
                tracing::warn!(job_id = %job.id(), error = %e, "探索に失敗しました");
                job.discovery_failed(e.into_failure(), now)
            }
        }
        .map_err(transition_error)?;

        commit_transition(self.jobs.as_ref(), &self.retry, expected, next).await
    }

    /// ジョブを取り消す
    ///
    /// 削除済みのレコードは復元しない。
    #[tracing::instrument(skip_all, fields(%job_id))]
    pub async fn cancel(&self, job_id: &DeleteJobId) -> Result<CancelOutcome, CoreError> {
        for _ in 0..MAX_CANCEL_ATTEMPTS {
            let job = load_job(self.jobs.as_ref(), &self.retry, job_id).await?;
            if job.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(job));
            }

            let expected = (job.status(), job.version());
            let cancelled = job
                .cancelled(self.clock.now())
                .map_err(transition_error)?;
            let current =
                commit_transition(self.jobs.as_ref(), &self.retry, expected, cancelled.clone())
                    .await?;
            if current == cancelled {
                tracing::info!(
                    deleted_so_far = current.deleted_so_far(),
                    "削除ジョブを取り消しました"
                );
                return Ok(CancelOutcome::Cancelled(current));
            }
            if current.is_terminal() {
                return Ok(CancelOutcome::AlreadyTerminal(current));
            }
            // 取り消しより先に別の遷移が書き込まれたので、最新の状態から取り消し直す
        }

        Err(CoreError::Conflict(format!(
            "削除ジョブの更新が競合し続けたため取り消せませんでした: {job_id}"
        )))
    }

    /// ジョブの現在の状態を取得する
    pub async fn get_status(&self, job_id: &DeleteJobId) -> Result<DeleteJob, CoreError> {
        load_job(self.jobs.as_ref(), &self.retry, job_id).await
    }

    /// 非終端状態のジョブ ID を作成日時順に取得する
    pub async fn list_active(&self, limit: usize) -> Result<Vec<DeleteJobId>, CoreError> {
        let ids = self
            .retry
            .run("find_active_ids", || self.jobs.find_active_ids(limit))
            .await?;
        Ok(ids)
    }
}
