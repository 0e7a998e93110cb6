//! # 削除ジョブ
//!
//! ルートレコードとその全子孫を連鎖削除するジョブの集約。
//! 探索で確定した削除計画と進捗カウンタを保持し、プロセス再起動後も
//! `deleted_so_far` から再開できる。
//!
//! 状態遷移は ADT（代数的データ型）で表現し、各状態で有効なフィールドのみを持たせる。
//!
//! ```text
//! Pending ──→ Discovering ──→ Deleting ──┬──→ Completed
//!    │             │            │  ↺     │
//!    │             └──→ Failed ←┘        │
//!    └─────────────┴──────┴──→ Cancelled ┘（Completed 以外の非終端状態から）
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

use crate::{
    DomainError,
    hierarchy::TableName,
    plan::{DeletionPlan, PlanEntry, RecordId},
    value_objects::{ChunkSize, Version},
};

define_uuid_id! {
    /// 削除ジョブ ID
    pub struct DeleteJobId;
}

/// 削除ジョブステータス（DB・API 上の表現）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeleteJobStatus {
    /// 作成直後
    Pending,
    /// 削除計画を探索中
    Discovering,
    /// チャンク単位で削除中
    Deleting,
    /// 全件削除済み
    Completed,
    /// 回復不能なエラーで停止
    Failed,
    /// 外部から取り消された
    Cancelled,
}

impl DeleteJobStatus {
    /// 終端状態かどうか
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::Completed | Self::Failed | Self::Cancelled => true,
            Self::Pending | Self::Discovering | Self::Deleting => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

impl std::str::FromStr for DeleteJobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "discovering" => Ok(Self::Discovering),
            "deleting" => Ok(Self::Deleting),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(DomainError::Validation(format!(
                "不正な削除ジョブステータス: {s}"
            ))),
        }
    }
}

/// 失敗原因の種別
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    IntoStaticStr,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FailureKind {
    /// ルートレコードが存在しない
    RootNotFound,
    /// 階層定義とスキーマの不一致
    UnknownTable,
    /// 一時的なストアエラーがリトライ上限を超えた
    TransientStoreError,
    /// 恒久的なストアエラー
    PermanentStoreError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// ジョブの失敗内容
///
/// `entry` は実行中に失敗したレコード。探索中の失敗では `None`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub kind:    FailureKind,
    pub message: String,
    pub entry:   Option<PlanEntry>,
}

impl JobFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            entry: None,
        }
    }

    /// 失敗したレコードを付与する
    pub fn at(self, entry: PlanEntry) -> Self {
        Self {
            entry: Some(entry),
            ..self
        }
    }
}

impl std::fmt::Display for JobFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.entry {
            Some(entry) => write!(f, "{entry}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// 削除ジョブの状態（ADT ベースステートマシン）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteJobState {
    Pending,
    Discovering,
    Deleting(DeletingState),
    Completed(CompletedState),
    Failed(FailedState),
    Cancelled(CancelledState),
}

/// Deleting 状態の固有フィールド
///
/// `deleted_so_far < plan.len()` を常に満たす。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletingState {
    pub plan:           DeletionPlan,
    pub deleted_so_far: usize,
}

/// Completed 状態の固有フィールド（`deleted_so_far == plan.len()`）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedState {
    pub plan:        DeletionPlan,
    pub finished_at: DateTime<Utc>,
}

/// Failed 状態の固有フィールド
///
/// 探索中に失敗した場合は `plan` が `None`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedState {
    pub plan:           Option<DeletionPlan>,
    pub deleted_so_far: usize,
    pub failure:        JobFailure,
    pub finished_at:    DateTime<Utc>,
}

/// Cancelled 状態の固有フィールド
///
/// 削除済みのレコードは復元されないため、取消時点の進捗を残す。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelledState {
    pub plan:           Option<DeletionPlan>,
    pub deleted_so_far: usize,
    pub finished_at:    DateTime<Utc>,
}

/// 進捗
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobProgress {
    pub deleted: usize,
    /// 探索完了前は `None`
    pub total:   Option<usize>,
}

impl JobProgress {
    /// 進捗率（0〜100）。探索完了前は `None`
    pub fn percent(&self) -> Option<u8> {
        let total = self.total?;
        if total == 0 {
            return Some(100);
        }
        let percent = self.deleted.min(total).saturating_mul(100) / total;
        u8::try_from(percent).ok()
    }

    /// 未削除件数。探索完了前は `None`
    pub fn remaining(&self) -> Option<usize> {
        self.total.map(|total| total.saturating_sub(self.deleted))
    }
}

/// 削除ジョブエンティティ
///
/// ## 楽観的ロック
///
/// 状態遷移のたびに `version` をインクリメントする。
/// リポジトリは遷移前のステータスと version を条件に更新し、
/// 他のアクターが先に書き込んでいれば競合として拒否する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteJob {
    id:         DeleteJobId,
    root:       PlanEntry,
    chunk_size: ChunkSize,
    version:    Version,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    state:      DeleteJobState,
}

/// 削除ジョブの新規作成パラメータ
pub struct NewDeleteJob {
    pub id:         DeleteJobId,
    pub root_table: TableName,
    pub root_id:    RecordId,
    pub chunk_size: ChunkSize,
    pub now:        DateTime<Utc>,
}

/// 削除ジョブの DB 復元パラメータ
///
/// DB スキーマのフラット構造を表現する。`from_db()` で不変条件を検証して ADT に変換する。
#[derive(Debug, Clone)]
pub struct DeleteJobRecord {
    pub id:             DeleteJobId,
    pub root_table:     TableName,
    pub root_id:        RecordId,
    pub status:         DeleteJobStatus,
    pub plan:           Option<DeletionPlan>,
    pub deleted_so_far: usize,
    pub chunk_size:     ChunkSize,
    pub error_kind:     Option<FailureKind>,
    pub error:          Option<String>,
    pub failed_entry:   Option<PlanEntry>,
    pub version:        Version,
    pub created_at:     DateTime<Utc>,
    pub updated_at:     DateTime<Utc>,
    pub finished_at:    Option<DateTime<Utc>>,
}

fn required<T>(value: Option<T>, status: DeleteJobStatus, field: &str) -> Result<T, DomainError> {
    value.ok_or_else(|| {
        DomainError::Validation(format!("{status} のジョブには {field} が必要です"))
    })
}

impl DeleteJob {
    /// 新しい削除ジョブを作成する（Pending）
    pub fn new(params: NewDeleteJob) -> Self {
        Self {
            id:         params.id,
            root:       PlanEntry::new(params.root_table, params.root_id),
            chunk_size: params.chunk_size,
            version:    Version::initial(),
            created_at: params.now,
            updated_at: params.now,
            state:      DeleteJobState::Pending,
        }
    }

    /// 既存のデータから復元する
    ///
    /// # Errors
    ///
    /// - `DomainError::Validation`: 状態と列の組み合わせが不変条件に違反する場合
    pub fn from_db(record: DeleteJobRecord) -> Result<Self, DomainError> {
        let status = record.status;
        let plan_len = record.plan.as_ref().map(DeletionPlan::len);
        if let Some(len) = plan_len
            && record.deleted_so_far > len
        {
            return Err(DomainError::Validation(format!(
                "deleted_so_far({}) が計画件数({len})を超えています",
                record.deleted_so_far
            )));
        }

        let state = match status {
            DeleteJobStatus::Pending | DeleteJobStatus::Discovering => {
                if record.plan.is_some() || record.deleted_so_far != 0 {
                    return Err(DomainError::Validation(format!(
                        "{status} のジョブは計画と進捗を持てません"
                    )));
                }
                if status == DeleteJobStatus::Pending {
                    DeleteJobState::Pending
                } else {
                    DeleteJobState::Discovering
                }
            }
            DeleteJobStatus::Deleting => {
                let plan = required(record.plan, status, "plan")?;
                if record.deleted_so_far >= plan.len() {
                    return Err(DomainError::Validation(
                        "deleting のジョブには未削除のレコードが必要です".to_string(),
                    ));
                }
                DeleteJobState::Deleting(DeletingState {
                    plan,
                    deleted_so_far: record.deleted_so_far,
                })
            }
            DeleteJobStatus::Completed => {
                let plan = required(record.plan, status, "plan")?;
                if record.deleted_so_far != plan.len() {
                    return Err(DomainError::Validation(
                        "completed のジョブは全件削除済みである必要があります".to_string(),
                    ));
                }
                DeleteJobState::Completed(CompletedState {
                    plan,
                    finished_at: required(record.finished_at, status, "finished_at")?,
                })
            }
            DeleteJobStatus::Failed => {
                let failure = JobFailure {
                    kind:    required(record.error_kind, status, "error_kind")?,
                    message: required(record.error, status, "error")?,
                    entry:   record.failed_entry,
                };
                DeleteJobState::Failed(FailedState {
                    plan: record.plan,
                    deleted_so_far: record.deleted_so_far,
                    failure,
                    finished_at: required(record.finished_at, status, "finished_at")?,
                })
            }
            DeleteJobStatus::Cancelled => DeleteJobState::Cancelled(CancelledState {
                plan:           record.plan,
                deleted_so_far: record.deleted_so_far,
                finished_at:    required(record.finished_at, status, "finished_at")?,
            }),
        };

        Ok(Self {
            id: record.id,
            root: PlanEntry::new(record.root_table, record.root_id),
            chunk_size: record.chunk_size,
            version: record.version,
            created_at: record.created_at,
            updated_at: record.updated_at,
            state,
        })
    }

    // Getter メソッド

    pub fn id(&self) -> &DeleteJobId {
        &self.id
    }

    pub fn root(&self) -> &PlanEntry {
        &self.root
    }

    pub fn root_table(&self) -> &TableName {
        &self.root.table
    }

    pub fn root_id(&self) -> &RecordId {
        &self.root.id
    }

    pub fn chunk_size(&self) -> ChunkSize {
        self.chunk_size
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// 状態への直接アクセス（パターンマッチ用）
    pub fn state(&self) -> &DeleteJobState {
        &self.state
    }

    pub fn status(&self) -> DeleteJobStatus {
        match &self.state {
            DeleteJobState::Pending => DeleteJobStatus::Pending,
            DeleteJobState::Discovering => DeleteJobStatus::Discovering,
            DeleteJobState::Deleting(_) => DeleteJobStatus::Deleting,
            DeleteJobState::Completed(_) => DeleteJobStatus::Completed,
            DeleteJobState::Failed(_) => DeleteJobStatus::Failed,
            DeleteJobState::Cancelled(_) => DeleteJobStatus::Cancelled,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    pub fn plan(&self) -> Option<&DeletionPlan> {
        match &self.state {
            DeleteJobState::Pending | DeleteJobState::Discovering => None,
            DeleteJobState::Deleting(s) => Some(&s.plan),
            DeleteJobState::Completed(s) => Some(&s.plan),
            DeleteJobState::Failed(s) => s.plan.as_ref(),
            DeleteJobState::Cancelled(s) => s.plan.as_ref(),
        }
    }

    pub fn deleted_so_far(&self) -> usize {
        match &self.state {
            DeleteJobState::Pending | DeleteJobState::Discovering => 0,
            DeleteJobState::Deleting(s) => s.deleted_so_far,
            DeleteJobState::Completed(s) => s.plan.len(),
            DeleteJobState::Failed(s) => s.deleted_so_far,
            DeleteJobState::Cancelled(s) => s.deleted_so_far,
        }
    }

    /// 計画件数。探索完了前は `None`
    pub fn total_to_delete(&self) -> Option<usize> {
        self.plan().map(DeletionPlan::len)
    }

    pub fn failure(&self) -> Option<&JobFailure> {
        match &self.state {
            DeleteJobState::Failed(s) => Some(&s.failure),
            DeleteJobState::Pending
            | DeleteJobState::Discovering
            | DeleteJobState::Deleting(_)
            | DeleteJobState::Completed(_)
            | DeleteJobState::Cancelled(_) => None,
        }
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        match &self.state {
            DeleteJobState::Pending | DeleteJobState::Discovering | DeleteJobState::Deleting(_) => {
                None
            }
            DeleteJobState::Completed(s) => Some(s.finished_at),
            DeleteJobState::Failed(s) => Some(s.finished_at),
            DeleteJobState::Cancelled(s) => Some(s.finished_at),
        }
    }

    pub fn progress(&self) -> JobProgress {
        JobProgress {
            deleted: self.deleted_so_far(),
            total:   self.total_to_delete(),
        }
    }

    /// 次に処理するチャンク（オフセットとレコード列）
    ///
    /// Deleting 以外では `None`。
    pub fn next_chunk(&self) -> Option<(usize, &[PlanEntry])> {
        match &self.state {
            DeleteJobState::Deleting(s) => Some((
                s.deleted_so_far,
                s.plan.chunk(s.deleted_so_far, self.chunk_size),
            )),
            DeleteJobState::Pending
            | DeleteJobState::Discovering
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => None,
        }
    }

    // 状態遷移メソッド

    fn invalid(&self, action: &'static str) -> DomainError {
        DomainError::InvalidTransition {
            from: self.status().as_str(),
            action,
        }
    }

    fn transitioned(self, state: DeleteJobState, now: DateTime<Utc>) -> Self {
        Self {
            state,
            version: self.version.next(),
            updated_at: now,
            ..self
        }
    }

    /// 探索を開始する（Pending → Discovering）
    pub fn discovery_started(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Pending => Ok(self.transitioned(DeleteJobState::Discovering, now)),
            DeleteJobState::Discovering
            | DeleteJobState::Deleting(_)
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("start_discovery")),
        }
    }

    /// 探索結果の計画を確定する（Discovering → Deleting）
    ///
    /// 計画の最後の要素はこのジョブのルートでなければならない。
    pub fn plan_discovered(
        self,
        plan: DeletionPlan,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Discovering => {
                if plan.root() != Some(&self.root) {
                    return Err(DomainError::Validation(format!(
                        "削除計画の最後がルート {} ではありません",
                        self.root
                    )));
                }
                Ok(self.transitioned(
                    DeleteJobState::Deleting(DeletingState {
                        plan,
                        deleted_so_far: 0,
                    }),
                    now,
                ))
            }
            DeleteJobState::Pending
            | DeleteJobState::Deleting(_)
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("plan_discovered")),
        }
    }

    /// 探索の失敗を記録する（Discovering → Failed）
    pub fn discovery_failed(
        self,
        failure: JobFailure,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Discovering => Ok(self.transitioned(
                DeleteJobState::Failed(FailedState {
                    plan: None,
                    deleted_so_far: 0,
                    failure,
                    finished_at: now,
                }),
                now,
            )),
            DeleteJobState::Pending
            | DeleteJobState::Deleting(_)
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("discovery_failed")),
        }
    }

    /// チャンクの削除完了を記録する（Deleting → Deleting / Completed）
    ///
    /// `count` は 1 以上、未削除件数以下でなければならない。
    pub fn chunk_deleted(self, count: usize, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Deleting(DeletingState {
                plan,
                deleted_so_far,
            }) => {
                let remaining = plan.len() - deleted_so_far;
                if count == 0 || count > remaining {
                    return Err(DomainError::Validation(format!(
                        "削除件数 {count} が不正です（残り {remaining} 件）"
                    )));
                }
                let deleted_so_far = deleted_so_far + count;
                let state = if deleted_so_far == plan.len() {
                    DeleteJobState::Completed(CompletedState {
                        plan,
                        finished_at: now,
                    })
                } else {
                    DeleteJobState::Deleting(DeletingState {
                        plan,
                        deleted_so_far,
                    })
                };
                Ok(Self {
                    state,
                    version: self.version.next(),
                    updated_at: now,
                    ..self
                })
            }
            DeleteJobState::Pending
            | DeleteJobState::Discovering
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("chunk_deleted")),
        }
    }

    /// 削除中の失敗を記録する（Deleting → Failed）
    ///
    /// `deleted_in_chunk` は失敗したチャンク内で既に削除できた件数。
    /// 削除済みの進捗は巻き戻さない。
    pub fn deletion_failed(
        self,
        failure: JobFailure,
        deleted_in_chunk: usize,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Deleting(DeletingState {
                plan,
                deleted_so_far,
            }) => {
                let remaining = plan.len() - deleted_so_far;
                if deleted_in_chunk >= remaining {
                    return Err(DomainError::Validation(format!(
                        "失敗時の削除件数 {deleted_in_chunk} が不正です（残り {remaining} 件）"
                    )));
                }
                Ok(Self {
                    state: DeleteJobState::Failed(FailedState {
                        plan: Some(plan),
                        deleted_so_far: deleted_so_far + deleted_in_chunk,
                        failure,
                        finished_at: now,
                    }),
                    version: self.version.next(),
                    updated_at: now,
                    ..self
                })
            }
            DeleteJobState::Pending
            | DeleteJobState::Discovering
            | DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("deletion_failed")),
        }
    }

    /// ジョブを取り消す（Pending / Discovering / Deleting → Cancelled）
    pub fn cancelled(self, now: DateTime<Utc>) -> Result<Self, DomainError> {
        match self.state {
            DeleteJobState::Pending | DeleteJobState::Discovering => Ok(self.transitioned(
                DeleteJobState::Cancelled(CancelledState {
                    plan:           None,
                    deleted_so_far: 0,
                    finished_at:    now,
                }),
                now,
            )),
            DeleteJobState::Deleting(DeletingState {
                plan,
                deleted_so_far,
            }) => Ok(Self {
                state: DeleteJobState::Cancelled(CancelledState {
                    plan: Some(plan),
                    deleted_so_far,
                    finished_at: now,
                }),
                version: self.version.next(),
                updated_at: now,
                ..self
            }),
            DeleteJobState::Completed(_)
            | DeleteJobState::Failed(_)
            | DeleteJobState::Cancelled(_) => Err(self.invalid("cancel")),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn entry(table: &str, id: &str) -> PlanEntry {
        PlanEntry::new(TableName::new(table).unwrap(), RecordId::new(id).unwrap())
    }

    /// projects ×3 → teams ×2 → orgs の 6 件の計画
    fn org_plan() -> DeletionPlan {
        DeletionPlan::try_from(vec![
            entry("projects", "p3"),
            entry("projects", "p2"),
            entry("projects", "p1"),
            entry("teams", "t2"),
            entry("teams", "t1"),
            entry("orgs", "o1"),
        ])
        .unwrap()
    }

    #[fixture]
    fn pending_job(now: DateTime<Utc>) -> DeleteJob {
        DeleteJob::new(NewDeleteJob {
            id: DeleteJobId::new(),
            root_table: TableName::new("orgs").unwrap(),
            root_id: RecordId::new("o1").unwrap(),
            chunk_size: ChunkSize::new(2).unwrap(),
            now,
        })
    }

    #[fixture]
    fn deleting_job(pending_job: DeleteJob, now: DateTime<Utc>) -> DeleteJob {
        pending_job
            .discovery_started(now)
            .unwrap()
            .plan_discovered(org_plan(), now)
            .unwrap()
    }

    fn record_from(job: &DeleteJob) -> DeleteJobRecord {
        let failure = job.failure();
        DeleteJobRecord {
            id:             job.id().clone(),
            root_table:     job.root_table().clone(),
            root_id:        job.root_id().clone(),
            status:         job.status(),
            plan:           job.plan().cloned(),
            deleted_so_far: job.deleted_so_far(),
            chunk_size:     job.chunk_size(),
            error_kind:     failure.map(|f| f.kind),
            error:          failure.map(|f| f.message.clone()),
            failed_entry:   failure.and_then(|f| f.entry.clone()),
            version:        job.version(),
            created_at:     job.created_at(),
            updated_at:     job.updated_at(),
            finished_at:    job.finished_at(),
        }
    }

    // ===== 生成と復元 =====

    #[rstest]
    fn test_新規作成の初期状態(pending_job: DeleteJob) {
        assert_eq!(pending_job.status(), DeleteJobStatus::Pending);
        assert_eq!(pending_job.version(), Version::initial());
        assert_eq!(pending_job.deleted_so_far(), 0);
        assert_eq!(pending_job.total_to_delete(), None);
        assert!(pending_job.next_chunk().is_none());
    }

    #[rstest]
    fn test_全状態でfrom_dbの往復が一致する(deleting_job: DeleteJob, now: DateTime<Utc>) {
        let jobs = vec![
            deleting_job.clone(),
            deleting_job.clone().chunk_deleted(2, now).unwrap(),
            deleting_job.clone().chunk_deleted(6, now).unwrap(),
            deleting_job.clone().cancelled(now).unwrap(),
            deleting_job
                .deletion_failed(
                    JobFailure::new(FailureKind::PermanentStoreError, "FK 違反")
                        .at(entry("projects", "p2")),
                    1,
                    now,
                )
                .unwrap(),
        ];

        for job in jobs {
            let restored = DeleteJob::from_db(record_from(&job)).unwrap();
            assert_eq!(restored, job);
        }
    }

    #[rstest]
    fn test_from_dbはdeletingで計画がないと拒否する(deleting_job: DeleteJob) {
        let record = DeleteJobRecord {
            plan: None,
            ..record_from(&deleting_job)
        };
        assert!(DeleteJob::from_db(record).is_err());
    }

    #[rstest]
    fn test_from_dbは計画件数を超える進捗を拒否する(deleting_job: DeleteJob) {
        let record = DeleteJobRecord {
            deleted_so_far: 7,
            ..record_from(&deleting_job)
        };
        assert!(DeleteJob::from_db(record).is_err());
    }

    #[rstest]
    fn test_from_dbはfailedでエラー内容がないと拒否する(deleting_job: DeleteJob) {
        let record = DeleteJobRecord {
            status: DeleteJobStatus::Failed,
            finished_at: deleting_job.created_at().into(),
            ..record_from(&deleting_job)
        };
        assert!(DeleteJob::from_db(record).is_err());
    }

    // ===== 探索 =====

    #[rstest]
    fn test_探索開始でdiscoveringになりversionが上がる(pending_job: DeleteJob, now: DateTime<Utc>) {
        let sut = pending_job.discovery_started(now).unwrap();

        assert_eq!(sut.status(), DeleteJobStatus::Discovering);
        assert_eq!(sut.version().as_u32(), 2);
    }

    #[rstest]
    fn test_計画確定でdeletingになり件数が固定される(deleting_job: DeleteJob) {
        assert_eq!(deleting_job.status(), DeleteJobStatus::Deleting);
        assert_eq!(deleting_job.total_to_delete(), Some(6));
        assert_eq!(deleting_job.deleted_so_far(), 0);
    }

    #[rstest]
    fn test_ルートが最後にない計画は拒否する(pending_job: DeleteJob, now: DateTime<Utc>) {
        let plan = DeletionPlan::try_from(vec![entry("orgs", "o1"), entry("teams", "t1")]).unwrap();

        let result = pending_job
            .discovery_started(now)
            .unwrap()
            .plan_discovered(plan, now);

        assert!(matches!(result, Err(DomainError::Validation(_))));
    }

    #[rstest]
    fn test_探索失敗でfailedになり計画を持たない(pending_job: DeleteJob, now: DateTime<Utc>) {
        let sut = pending_job
            .discovery_started(now)
            .unwrap()
            .discovery_failed(
                JobFailure::new(FailureKind::RootNotFound, "orgs(o1) が存在しません"),
                now,
            )
            .unwrap();

        assert_eq!(sut.status(), DeleteJobStatus::Failed);
        assert!(sut.plan().is_none());
        assert_eq!(sut.failure().unwrap().kind, FailureKind::RootNotFound);
        assert_eq!(sut.finished_at(), Some(now));
    }

    #[rstest]
    fn test_pendingから直接計画確定はできない(pending_job: DeleteJob, now: DateTime<Utc>) {
        let result = pending_job.plan_discovered(org_plan(), now);
        assert!(matches!(
            result,
            Err(DomainError::InvalidTransition { from: "pending", .. })
        ));
    }

    // ===== チャンク実行 =====

    #[rstest]
    fn test_next_chunkはオフセットからチャンクサイズ分を返す(
        deleting_job: DeleteJob,
        now: DateTime<Utc>,
    ) {
        let sut = deleting_job.chunk_deleted(2, now).unwrap();

        let (offset, chunk) = sut.next_chunk().unwrap();
        assert_eq!(offset, 2);
        assert_eq!(chunk, &[entry("projects", "p1"), entry("teams", "t2")]);
    }

    #[rstest]
    fn test_最後のチャンクでcompletedになる(deleting_job: DeleteJob, now: DateTime<Utc>) {
        let sut = deleting_job
            .chunk_deleted(2, now)
            .unwrap()
            .chunk_deleted(2, now)
            .unwrap()
            .chunk_deleted(2, now)
            .unwrap();

        assert_eq!(sut.status(), DeleteJobStatus::Completed);
        assert_eq!(sut.deleted_so_far(), 6);
        assert_eq!(sut.progress().percent(), Some(100));
    }

    #[rstest]
    #[case(0)]
    #[case(7)]
    fn test_不正な削除件数は拒否する(
        deleting_job: DeleteJob,
        now: DateTime<Utc>,
        #[case] count: usize,
    ) {
        assert!(deleting_job.chunk_deleted(count, now).is_err());
    }

    #[rstest]
    fn test_削除失敗でチャンク内の削除済み件数が進捗に加算される(
        deleting_job: DeleteJob,
        now: DateTime<Utc>,
    ) {
        let sut = deleting_job
            .chunk_deleted(2, now)
            .unwrap()
            .deletion_failed(
                JobFailure::new(FailureKind::PermanentStoreError, "制約違反")
                    .at(entry("teams", "t2")),
                1,
                now,
            )
            .unwrap();

        assert_eq!(sut.status(), DeleteJobStatus::Failed);
        assert_eq!(sut.deleted_so_far(), 3);
        assert_eq!(
            sut.failure().unwrap().to_string(),
            "teams(t2): 制約違反"
        );
    }

    // ===== 取消 =====

    #[rstest]
    fn test_削除中の取消は進捗を保持する(deleting_job: DeleteJob, now: DateTime<Utc>) {
        let sut = deleting_job
            .chunk_deleted(4, now)
            .unwrap()
            .cancelled(now)
            .unwrap();

        assert_eq!(sut.status(), DeleteJobStatus::Cancelled);
        assert_eq!(sut.deleted_so_far(), 4);
        assert_eq!(sut.total_to_delete(), Some(6));
    }

    #[rstest]
    fn test_pendingとdiscoveringは取消できる(pending_job: DeleteJob, now: DateTime<Utc>) {
        assert!(pending_job.clone().cancelled(now).is_ok());
        assert!(
            pending_job
                .discovery_started(now)
                .unwrap()
                .cancelled(now)
                .is_ok()
        );
    }

    #[rstest]
    fn test_終端状態からの遷移はすべて拒否する(deleting_job: DeleteJob, now: DateTime<Utc>) {
        let completed = deleting_job.chunk_deleted(6, now).unwrap();

        assert!(completed.clone().cancelled(now).is_err());
        assert!(completed.clone().chunk_deleted(1, now).is_err());
        assert!(completed.clone().discovery_started(now).is_err());
        assert!(
            completed
                .deletion_failed(JobFailure::new(FailureKind::PermanentStoreError, "x"), 0, now)
                .is_err()
        );
    }

    // ===== ステータス =====

    #[rstest]
    #[case("pending", DeleteJobStatus::Pending, false)]
    #[case("discovering", DeleteJobStatus::Discovering, false)]
    #[case("deleting", DeleteJobStatus::Deleting, false)]
    #[case("completed", DeleteJobStatus::Completed, true)]
    #[case("failed", DeleteJobStatus::Failed, true)]
    #[case("cancelled", DeleteJobStatus::Cancelled, true)]
    fn test_ステータスの文字列変換と終端判定(
        #[case] s: &str,
        #[case] status: DeleteJobStatus,
        #[case] terminal: bool,
    ) {
        assert_eq!(s.parse::<DeleteJobStatus>().unwrap(), status);
        assert_eq!(status.as_str(), s);
        assert_eq!(status.is_terminal(), terminal);
    }

    #[test]
    fn test_不正なステータス文字列は拒否する() {
        assert!("running".parse::<DeleteJobStatus>().is_err());
    }

    #[test]
    fn test_進捗率は探索前はnone() {
        let progress = JobProgress {
            deleted: 0,
            total:   None,
        };
        assert_eq!(progress.percent(), None);
        assert_eq!(progress.remaining(), None);
    }
}
