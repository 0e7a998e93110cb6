//! PostgresDeleteJobRepository / PostgresRecordStore 統合テスト
//!
//! データベースを使用したテスト。sqlx::test マクロを使用して、
//! テストごとに一時データベースを作成しマイグレーションを適用する。
//!
//! 実行方法:
//! ```bash
//! DATABASE_URL=postgres://localhost/cascade cargo test -p cascade-infra --test postgres_store_test
//! ```

use cascade_domain::{
    delete_job::{DeleteJob, DeleteJobId, DeleteJobStatus, FailureKind, JobFailure, NewDeleteJob},
    hierarchy::{ColumnName, TableName},
    plan::{DeletionPlan, PlanEntry, RecordId},
    value_objects::ChunkSize,
};
use cascade_infra::{
    DeleteOutcome,
    PostgresRecordStore,
    RecordStore,
    repository::{DeleteJobRepository, PostgresDeleteJobRepository},
};
use chrono::{DateTime, Utc};
use pretty_assertions::assert_eq;
use sqlx::PgPool;

fn test_now() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

fn entry(table: &str, id: &str) -> PlanEntry {
    PlanEntry::new(TableName::new(table).unwrap(), RecordId::new(id).unwrap())
}

fn new_job() -> DeleteJob {
    DeleteJob::new(NewDeleteJob {
        id:         DeleteJobId::new(),
        root_table: TableName::new("organizations").unwrap(),
        root_id:    RecordId::new("org-1").unwrap(),
        chunk_size: ChunkSize::new(2).unwrap(),
        now:        test_now(),
    })
}

fn org_plan() -> DeletionPlan {
    DeletionPlan::try_from(vec![
        entry("teams", "team-1"),
        entry("workspaces", "ws-1"),
        entry("organizations", "org-1"),
    ])
    .unwrap()
}

async fn seed_hierarchy(pool: &PgPool) {
    sqlx::query("INSERT INTO organizations (id) VALUES ('org-1')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO workspaces (id, organization_id) VALUES ('ws-1', 'org-1')")
        .execute(pool)
        .await
        .unwrap();
    sqlx::query("INSERT INTO teams (id, workspace_id) VALUES ('team-1', 'ws-1')")
        .execute(pool)
        .await
        .unwrap();
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_insert_したジョブをfind_by_idで復元できる(pool: PgPool) {
    let sut = PostgresDeleteJobRepository::new(pool);
    let job = new_job();

    sut.insert(&job).await.unwrap();
    let found = sut.find_by_id(job.id()).await.unwrap();

    assert_eq!(found, Some(job));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_計画と進捗がjsonbを経由して復元される(pool: PgPool) {
    let sut = PostgresDeleteJobRepository::new(pool);
    let job = new_job();
    sut.insert(&job).await.unwrap();

    let discovering = job.clone().discovery_started(test_now()).unwrap();
    sut.update_with_status_check(&discovering, job.status(), job.version())
        .await
        .unwrap();
    let deleting = discovering
        .clone()
        .plan_discovered(org_plan(), test_now())
        .unwrap();
    sut.update_with_status_check(&deleting, discovering.status(), discovering.version())
        .await
        .unwrap();
    let progressed = deleting.clone().chunk_deleted(2, test_now()).unwrap();
    sut.update_with_status_check(&progressed, deleting.status(), deleting.version())
        .await
        .unwrap();

    let found = sut.find_by_id(job.id()).await.unwrap().unwrap();

    assert_eq!(found.status(), DeleteJobStatus::Deleting);
    assert_eq!(found.deleted_so_far(), 2);
    assert_eq!(found.plan(), Some(&org_plan()));
    assert_eq!(found, progressed);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_version不一致の更新は競合になる(pool: PgPool) {
    let sut = PostgresDeleteJobRepository::new(pool);
    let job = new_job();
    sut.insert(&job).await.unwrap();
    let discovering = job.clone().discovery_started(test_now()).unwrap();
    sut.update_with_status_check(&discovering, job.status(), job.version())
        .await
        .unwrap();

    // 古い version を期待した 2 回目の書き込み
    let cancelled = job.clone().cancelled(test_now()).unwrap();
    let err = sut
        .update_with_status_check(&cancelled, job.status(), job.version())
        .await
        .unwrap_err();

    assert!(err.is_conflict());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_失敗したジョブのエラー内容が保存される(pool: PgPool) {
    let sut = PostgresDeleteJobRepository::new(pool);
    let job = new_job();
    sut.insert(&job).await.unwrap();
    let discovering = job.clone().discovery_started(test_now()).unwrap();
    sut.update_with_status_check(&discovering, job.status(), job.version())
        .await
        .unwrap();
    let deleting = discovering
        .clone()
        .plan_discovered(org_plan(), test_now())
        .unwrap();
    sut.update_with_status_check(&deleting, discovering.status(), discovering.version())
        .await
        .unwrap();

    let failure = JobFailure::new(FailureKind::PermanentStoreError, "外部キー制約違反")
        .at(entry("workspaces", "ws-1"));
    let failed = deleting
        .clone()
        .deletion_failed(failure.clone(), 1, test_now())
        .unwrap();
    sut.update_with_status_check(&failed, deleting.status(), deleting.version())
        .await
        .unwrap();

    let found = sut.find_by_id(job.id()).await.unwrap().unwrap();
    assert_eq!(found.status(), DeleteJobStatus::Failed);
    assert_eq!(found.deleted_so_far(), 1);
    assert_eq!(found.failure(), Some(&failure));
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_find_active_idsは終端状態のジョブを含まない(pool: PgPool) {
    let sut = PostgresDeleteJobRepository::new(pool);
    let active = new_job();
    let finished = new_job();
    sut.insert(&active).await.unwrap();
    sut.insert(&finished).await.unwrap();
    let cancelled = finished.clone().cancelled(test_now()).unwrap();
    sut.update_with_status_check(&cancelled, finished.status(), finished.version())
        .await
        .unwrap();

    let ids = sut.find_active_ids(10).await.unwrap();

    assert_eq!(ids, vec![active.id().clone()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_record_storeで子レコードを探索できる(pool: PgPool) {
    seed_hierarchy(&pool).await;
    let sut = PostgresRecordStore::new(pool);

    let exists = sut
        .exists(
            &TableName::new("organizations").unwrap(),
            &RecordId::new("org-1").unwrap(),
        )
        .await
        .unwrap();
    let children = sut
        .find_children(
            &TableName::new("workspaces").unwrap(),
            &ColumnName::new("organization_id").unwrap(),
            &RecordId::new("org-1").unwrap(),
        )
        .await
        .unwrap();

    assert!(exists);
    assert_eq!(children, vec![RecordId::new("ws-1").unwrap()]);
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_子レコードが残っている親の削除は恒久的エラーになる(pool: PgPool) {
    seed_hierarchy(&pool).await;
    let sut = PostgresRecordStore::new(pool);

    let err = sut.delete(&entry("workspaces", "ws-1")).await.unwrap_err();

    assert!(!err.is_transient());
}

#[sqlx::test(migrations = "../../migrations")]
async fn test_削除は冪等である(pool: PgPool) {
    seed_hierarchy(&pool).await;
    let sut = PostgresRecordStore::new(pool);
    let team = entry("teams", "team-1");

    let first = sut.delete(&team).await.unwrap();
    let second = sut.delete(&team).await.unwrap();

    assert_eq!(first, DeleteOutcome::Deleted);
    assert_eq!(second, DeleteOutcome::AlreadyAbsent);
}
