//! ユースケース層の共通ヘルパー
//!
//! ジョブの読み込みと、条件付き更新による状態遷移の書き込みを共通化する。

use cascade_domain::{
    DomainError,
    delete_job::{DeleteJob, DeleteJobId, DeleteJobStatus},
    value_objects::Version,
};
use cascade_infra::repository::DeleteJobRepository;

use super::retry::RetryPolicy;
use crate::error::CoreError;

/// ジョブを読み込む。存在しなければ `CoreError::NotFound`
pub(crate) async fn load_job(
    jobs: &dyn DeleteJobRepository,
    retry: &RetryPolicy,
    id: &DeleteJobId,
) -> Result<DeleteJob, CoreError> {
    retry
        .run("find_job", || jobs.find_by_id(id))
        .await?
        .ok_or_else(|| CoreError::NotFound(format!("削除ジョブが見つかりません: {id}")))
}

/// 遷移後のジョブを書き込む
///
/// `expected` は遷移前のステータスと version。
/// 他の書き込みが先行していた場合は失敗にせず、読み直した最新のジョブを返す。
pub(crate) async fn commit_transition(
    jobs: &dyn DeleteJobRepository,
    retry: &RetryPolicy,
    expected: (DeleteJobStatus, Version),
    next: DeleteJob,
) -> Result<DeleteJob, CoreError> {
    let (expected_status, expected_version) = expected;
    let result = retry
        .run("update_job", || {
            jobs.update_with_status_check(&next, expected_status, expected_version)
        })
        .await;

    match result {
        Ok(()) => {
            tracing::debug!(
                job_id = %next.id(),
                from = %expected_status,
                to = %next.status(),
                version = %next.version(),
                "ジョブの状態を更新しました"
            );
            Ok(next)
        }
        Err(e) if e.is_conflict() => {
            tracing::info!(
                job_id = %next.id(),
                attempted = %next.status(),
                "他の書き込みが先行したため最新の状態を読み直します"
            );
            load_job(jobs, retry, next.id()).await
        }
        Err(e) => Err(e.into()),
    }
}

/// 状態遷移の失敗を内部エラーに変換する
///
/// 遷移前に状態を確認しているため、正しい実装では発生しない。
pub(crate) fn transition_error(e: DomainError) -> CoreError {
    CoreError::Internal(format!("不正な状態遷移です: {e}"))
}

#[cfg(test)]
mod tests {
    use cascade_domain::{
        delete_job::NewDeleteJob,
        hierarchy::TableName,
        plan::RecordId,
        value_objects::ChunkSize,
    };
    use cascade_infra::mock::MockDeleteJobRepository;
    use chrono::{DateTime, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn new_job() -> DeleteJob {
        DeleteJob::new(NewDeleteJob {
            id:         DeleteJobId::new(),
            root_table: TableName::new("orgs").unwrap(),
            root_id:    RecordId::new("o1").unwrap(),
            chunk_size: ChunkSize::new(2).unwrap(),
            now:        now(),
        })
    }

    #[tokio::test]
    async fn test_存在しないジョブはnot_foundになる() {
        let repo = MockDeleteJobRepository::new();

        let result = load_job(&repo, &RetryPolicy::default(), &DeleteJobId::new()).await;

        assert!(matches!(result, Err(CoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_遷移を書き込むと遷移後のジョブを返す() {
        let repo = MockDeleteJobRepository::new();
        let job = new_job();
        repo.insert(&job).await.unwrap();

        let next = job.clone().discovery_started(now()).unwrap();
        let committed = commit_transition(
            &repo,
            &RetryPolicy::default(),
            (job.status(), job.version()),
            next.clone(),
        )
        .await
        .unwrap();

        assert_eq!(committed, next);
        assert_eq!(repo.get(job.id()), Some(next));
    }

    #[tokio::test]
    async fn test_競合した場合は最新の状態を返す() {
        let repo = MockDeleteJobRepository::new();
        let job = new_job();
        repo.insert(&job).await.unwrap();
        let cancelled = job.clone().cancelled(now()).unwrap();
        repo.modify(job.id(), |_| cancelled.clone());

        let next = job.clone().discovery_started(now()).unwrap();
        let committed = commit_transition(
            &repo,
            &RetryPolicy::default(),
            (job.status(), job.version()),
            next,
        )
        .await
        .unwrap();

        assert_eq!(committed.status(), DeleteJobStatus::Cancelled);
        assert_eq!(committed, cancelled);
    }
}
