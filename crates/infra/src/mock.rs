//! # テスト用モック
//!
//! ユースケーステストで使用するインメモリの record store とジョブリポジトリ。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! cascade-infra = { workspace = true, features = ["test-utils"] }
//! ```
//!
//! [`InMemoryRecordStore`] は `ON DELETE RESTRICT` と同じく、子レコードが残っている
//! 親レコードの削除を恒久的エラーとして拒否する。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use cascade_domain::{
    delete_job::{DeleteJob, DeleteJobId, DeleteJobStatus},
    hierarchy::{ColumnName, HierarchyEdge, TableName},
    plan::{PlanEntry, RecordId},
    value_objects::Version,
};

use crate::{
    error::InfraError,
    record_store::{DeleteOutcome, RecordStore},
    repository::DeleteJobRepository,
};

// ===== InMemoryRecordStore =====

/// 親レコードへの参照
#[derive(Debug, Clone)]
struct ParentRef {
    foreign_key: ColumnName,
    parent:      PlanEntry,
}

/// 削除時に注入する障害
#[derive(Debug, Clone, Copy)]
enum Fault {
    /// 残り回数だけ一時的エラーを返す
    Transient { remaining: u32 },
    /// 常に恒久的エラーを返す
    Permanent,
}

#[derive(Default)]
struct StoreState {
    rows:            HashMap<PlanEntry, Option<ParentRef>>,
    faults:          HashMap<PlanEntry, Fault>,
    read_failures:   u32,
    deleted:         Vec<PlanEntry>,
    delete_attempts: usize,
}

type DeleteHook = Box<dyn Fn(&PlanEntry) + Send + Sync>;

/// インメモリ record store
#[derive(Clone, Default)]
pub struct InMemoryRecordStore {
    state: Arc<Mutex<StoreState>>,
    hook:  Arc<Mutex<Option<DeleteHook>>>,
}

fn entry(table: &str, id: &str) -> PlanEntry {
    PlanEntry::new(TableName::new(table).unwrap(), RecordId::new(id).unwrap())
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 親を持たないレコードを追加する
    pub fn insert(&self, table: &str, id: &str) {
        self.state.lock().unwrap().rows.insert(entry(table, id), None);
    }

    /// `edge` の子テーブルに `parent_id` を参照するレコードを追加する
    pub fn insert_child(&self, edge: &HierarchyEdge, id: &str, parent_id: &str) {
        let parent = PlanEntry::new(edge.parent_table.clone(), RecordId::new(parent_id).unwrap());
        let row = PlanEntry::new(edge.child_table.clone(), RecordId::new(id).unwrap());
        self.state.lock().unwrap().rows.insert(
            row,
            Some(ParentRef {
                foreign_key: edge.foreign_key.clone(),
                parent,
            }),
        );
    }

    /// レコードが残っているか
    pub fn contains(&self, table: &str, id: &str) -> bool {
        self.state.lock().unwrap().rows.contains_key(&entry(table, id))
    }

    /// 残っているレコード数
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 実際に削除されたレコード（削除順）
    pub fn deleted_entries(&self) -> Vec<PlanEntry> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// `delete` の呼び出し回数（失敗を含む）
    pub fn delete_attempts(&self) -> usize {
        self.state.lock().unwrap().delete_attempts
    }

    /// 指定レコードの削除を `times` 回だけ一時的エラーにする
    pub fn fail_transiently(&self, table: &str, id: &str, times: u32) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(entry(table, id), Fault::Transient { remaining: times });
    }

    /// 指定レコードの削除を常に恒久的エラーにする
    pub fn fail_permanently(&self, table: &str, id: &str) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(entry(table, id), Fault::Permanent);
    }

    /// 以降の読み取り（`exists` / `find_children`）を `times` 回だけ一時的エラーにする
    pub fn fail_next_reads(&self, times: u32) {
        self.state.lock().unwrap().read_failures = times;
    }

    /// 削除成功のたびに呼ばれるフックを設定する
    pub fn on_delete(&self, hook: impl Fn(&PlanEntry) + Send + Sync + 'static) {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
    }

    fn consume_read_failure(&self) -> Result<(), InfraError> {
        let mut state = self.state.lock().unwrap();
        if state.read_failures > 0 {
            state.read_failures -= 1;
            return Err(InfraError::transient("読み取りがタイムアウトしました"));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn exists(&self, table: &TableName, id: &RecordId) -> Result<bool, InfraError> {
        self.consume_read_failure()?;
        let key = PlanEntry::new(table.clone(), id.clone());
        Ok(self.state.lock().unwrap().rows.contains_key(&key))
    }

    async fn find_children(
        &self,
        table: &TableName,
        foreign_key: &ColumnName,
        parent_id: &RecordId,
    ) -> Result<Vec<RecordId>, InfraError> {
        self.consume_read_failure()?;
        let state = self.state.lock().unwrap();
        let mut ids = state
            .rows
            .iter()
            .filter(|(row, parent_ref)| {
                &row.table == table
                    && parent_ref.as_ref().is_some_and(|p| {
                        &p.foreign_key == foreign_key && &p.parent.id == parent_id
                    })
            })
            .map(|(row, _)| row.id.clone())
            .collect::<Vec<_>>();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(ids)
    }

    async fn delete(&self, entry: &PlanEntry) -> Result<DeleteOutcome, InfraError> {
        let outcome = {
            let mut state = self.state.lock().unwrap();
            state.delete_attempts += 1;

            match state.faults.get_mut(entry) {
                Some(Fault::Transient { remaining }) if *remaining > 0 => {
                    *remaining -= 1;
                    return Err(InfraError::transient(format!("{entry} の削除がタイムアウトしました")));
                }
                Some(Fault::Permanent) => {
                    return Err(InfraError::permanent(format!("{entry} の削除が拒否されました")));
                }
                Some(Fault::Transient { .. }) | None => {}
            }

            let has_children = state
                .rows
                .values()
                .any(|parent_ref| parent_ref.as_ref().is_some_and(|p| &p.parent == entry));
            if has_children {
                return Err(InfraError::permanent(format!(
                    "外部キー制約違反: {entry} を参照するレコードが残っています"
                )));
            }

            if state.rows.remove(entry).is_some() {
                state.deleted.push(entry.clone());
                DeleteOutcome::Deleted
            } else {
                DeleteOutcome::AlreadyAbsent
            }
        };

        if let Some(hook) = self.hook.lock().unwrap().as_ref() {
            hook(entry);
        }

        Ok(outcome)
    }
}

// ===== MockDeleteJobRepository =====

#[derive(Clone, Default)]
pub struct MockDeleteJobRepository {
    jobs: Arc<Mutex<Vec<DeleteJob>>>,
}

impl MockDeleteJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存済みのジョブを直接書き換える
    ///
    /// ユースケースを経由しない外部からの書き込み（並行するキャンセル等）を再現する。
    pub fn modify(&self, id: &DeleteJobId, f: impl FnOnce(DeleteJob) -> DeleteJob) {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(pos) = jobs.iter().position(|j| j.id() == id) {
            let job = jobs[pos].clone();
            jobs[pos] = f(job);
        }
    }

    /// 保存済みのジョブのスナップショット
    pub fn get(&self, id: &DeleteJobId) -> Option<DeleteJob> {
        self.jobs
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.id() == id)
            .cloned()
    }
}

#[async_trait]
impl DeleteJobRepository for MockDeleteJobRepository {
    async fn insert(&self, job: &DeleteJob) -> Result<(), InfraError> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &DeleteJobId) -> Result<Option<DeleteJob>, InfraError> {
        Ok(self.get(id))
    }

    async fn update_with_status_check(
        &self,
        job: &DeleteJob,
        expected_status: DeleteJobStatus,
        expected_version: Version,
    ) -> Result<(), InfraError> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(pos) = jobs.iter().position(|j| j.id() == job.id()) else {
            return Err(InfraError::conflict("DeleteJob", job.id().to_string()));
        };
        if jobs[pos].status() != expected_status || jobs[pos].version() != expected_version {
            return Err(InfraError::conflict("DeleteJob", job.id().to_string()));
        }
        jobs[pos] = job.clone();
        Ok(())
    }

    async fn find_active_ids(&self, limit: usize) -> Result<Vec<DeleteJobId>, InfraError> {
        let jobs = self.jobs.lock().unwrap();
        let mut active = jobs.iter().filter(|j| !j.is_terminal()).collect::<Vec<_>>();
        active.sort_by_key(|j| j.created_at());
        Ok(active
            .into_iter()
            .take(limit)
            .map(|j| j.id().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn org_team_edge() -> HierarchyEdge {
        HierarchyEdge::new("teams", "orgs", "org_id").unwrap()
    }

    #[tokio::test]
    async fn test_子レコードが残っている親の削除は恒久的エラーになる() {
        let store = InMemoryRecordStore::new();
        store.insert("orgs", "o1");
        store.insert_child(&org_team_edge(), "t1", "o1");

        let err = store.delete(&entry("orgs", "o1")).await.unwrap_err();

        assert!(!err.is_transient());
        assert!(store.contains("orgs", "o1"));
    }

    #[tokio::test]
    async fn test_存在しないレコードの削除はalready_absentを返す() {
        let store = InMemoryRecordStore::new();

        let outcome = store.delete(&entry("orgs", "o1")).await.unwrap();

        assert_eq!(outcome, DeleteOutcome::AlreadyAbsent);
        assert!(store.deleted_entries().is_empty());
    }

    #[tokio::test]
    async fn test_find_childrenは外部キーが一致するレコードをid順に返す() {
        let store = InMemoryRecordStore::new();
        let edge = org_team_edge();
        store.insert("orgs", "o1");
        store.insert("orgs", "o2");
        store.insert_child(&edge, "t2", "o1");
        store.insert_child(&edge, "t1", "o1");
        store.insert_child(&edge, "t3", "o2");

        let ids = store
            .find_children(&edge.child_table, &edge.foreign_key, &RecordId::new("o1").unwrap())
            .await
            .unwrap();

        assert_eq!(
            ids.iter().map(RecordId::as_str).collect::<Vec<_>>(),
            vec!["t1", "t2"]
        );
    }

    #[tokio::test]
    async fn test_一時的エラーは指定回数だけ返される() {
        let store = InMemoryRecordStore::new();
        store.insert("orgs", "o1");
        store.fail_transiently("orgs", "o1", 2);
        let target = entry("orgs", "o1");

        assert!(store.delete(&target).await.unwrap_err().is_transient());
        assert!(store.delete(&target).await.unwrap_err().is_transient());
        assert_eq!(store.delete(&target).await.unwrap(), DeleteOutcome::Deleted);
        assert_eq!(store.delete_attempts(), 3);
    }

    #[tokio::test]
    async fn test_ステータスが一致しない更新は競合になる() {
        let repo = MockDeleteJobRepository::new();
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let job = DeleteJob::new(cascade_domain::delete_job::NewDeleteJob {
            id: DeleteJobId::new(),
            root_table: TableName::new("orgs").unwrap(),
            root_id: RecordId::new("o1").unwrap(),
            chunk_size: cascade_domain::value_objects::ChunkSize::new(2).unwrap(),
            now,
        });
        repo.insert(&job).await.unwrap();

        let discovering = job.clone().discovery_started(now).unwrap();
        let err = repo
            .update_with_status_check(&discovering, DeleteJobStatus::Discovering, job.version())
            .await
            .unwrap_err();

        assert!(err.is_conflict());
        assert_eq!(repo.get(job.id()).unwrap().status(), DeleteJobStatus::Pending);
    }
}
