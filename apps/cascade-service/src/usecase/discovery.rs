//! # 探索エンジン
//!
//! ルートレコードから階層定義を幅優先でたどり、全子孫を列挙して削除計画を作る。
//!
//! ## 設計方針
//!
//! - **深さ非依存**: 階層の深さや形に関する知識を持たず、[`HierarchyDescriptor`] の辺だけを使う
//! - **全ての子テーブル**: 1 つのテーブルに複数の子テーブルがあれば、すべてをたどる
//! - **計画は訪問順の逆順**: 子は必ず親より前に並び、ルートは最後になる
//! - **副作用なし**: record store を読むだけで、ジョブの状態は呼び出し側が更新する

use std::{
    collections::{HashSet, VecDeque},
    sync::Arc,
};

use cascade_domain::{
    DomainError,
    delete_job::{FailureKind, JobFailure},
    hierarchy::HierarchyDescriptor,
    plan::{DeletionPlan, PlanEntry},
};
use cascade_infra::{InfraError, RecordStore};
use thiserror::Error;

use super::retry::RetryPolicy;

/// 探索の失敗
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// ルートレコードが存在しない
    #[error("ルートレコードが見つかりません: {0}")]
    RootNotFound(PlanEntry),

    /// 階層定義に存在しないテーブル
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// record store のエラー（リトライ後）
    #[error("record store の読み取りに失敗しました: {0}")]
    Store(#[from] InfraError),
}

impl DiscoveryError {
    /// ジョブに記録する失敗内容に変換する
    pub fn into_failure(self) -> JobFailure {
        let kind = match &self {
            Self::RootNotFound(_) => FailureKind::RootNotFound,
            Self::Domain(DomainError::UnknownTable(_)) => FailureKind::UnknownTable,
            Self::Domain(_) => FailureKind::PermanentStoreError,
            Self::Store(e) if e.is_transient() => FailureKind::TransientStoreError,
            Self::Store(_) => FailureKind::PermanentStoreError,
        };
        let failure = JobFailure::new(kind, self.to_string());
        match self {
            Self::RootNotFound(root) => failure.at(root),
            Self::Domain(_) | Self::Store(_) => failure,
        }
    }
}

/// 探索エンジン
#[derive(Clone)]
pub struct DiscoveryEngine {
    descriptor:   Arc<HierarchyDescriptor>,
    record_store: Arc<dyn RecordStore>,
    retry:        RetryPolicy,
}

impl DiscoveryEngine {
    pub fn new(
        descriptor: Arc<HierarchyDescriptor>,
        record_store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            descriptor,
            record_store,
            retry,
        }
    }

    /// ルートから全子孫を列挙し、削除計画を返す
    ///
    /// 子孫がなければルート 1 件だけの計画になる。
    #[tracing::instrument(skip_all, fields(root = %root))]
    pub async fn discover(&self, root: &PlanEntry) -> Result<DeletionPlan, DiscoveryError> {
        if !self.descriptor.contains(&root.table) {
            return Err(DomainError::UnknownTable(root.table.to_string()).into());
        }

        let store = &self.record_store;
        let root_exists = self
            .retry
            .run("exists", move || store.exists(&root.table, &root.id))
            .await?;
        if !root_exists {
            return Err(DiscoveryError::RootNotFound(root.clone()));
        }

        let mut visited = Vec::new();
        let mut seen = HashSet::from([root.clone()]);
        let mut queue = VecDeque::from([root.clone()]);

        while let Some(node) = queue.pop_front() {
            for edge in self.descriptor.child_edges_of(&node.table)? {
                let parent_id = &node.id;
                let child_ids = self
                    .retry
                    .run("find_children", move || {
                        store.find_children(&edge.child_table, &edge.foreign_key, parent_id)
                    })
                    .await?;
                tracing::debug!(
                    parent = %node,
                    table = %edge.child_table,
                    count = child_ids.len(),
                    "子レコードを取得しました"
                );

                for id in child_ids {
                    let child = PlanEntry::new(edge.child_table.clone(), id);
                    if seen.insert(child.clone()) {
                        queue.push_back(child);
                    }
                }
            }
            visited.push(node);
        }

        let plan = DeletionPlan::from_visitation_order(visited)?;
        tracing::info!(total = plan.len(), "削除計画を作成しました");
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use cascade_domain::{
        hierarchy::{HierarchyEdge, TableName},
        plan::RecordId,
    };
    use cascade_infra::mock::InMemoryRecordStore;
    use pretty_assertions::assert_eq;

    use super::*;

    fn entry(table: &str, id: &str) -> PlanEntry {
        PlanEntry::new(TableName::new(table).unwrap(), RecordId::new(id).unwrap())
    }

    /// orgs → teams → projects、orgs → labels
    fn descriptor() -> HierarchyDescriptor {
        HierarchyDescriptor::new(vec![
            HierarchyEdge::new("teams", "orgs", "org_id").unwrap(),
            HierarchyEdge::new("projects", "teams", "team_id").unwrap(),
            HierarchyEdge::new("labels", "orgs", "org_id").unwrap(),
        ])
        .unwrap()
    }

    fn engine(store: &InMemoryRecordStore) -> DiscoveryEngine {
        DiscoveryEngine::new(
            Arc::new(descriptor()),
            Arc::new(store.clone()),
            RetryPolicy::without_backoff(5),
        )
    }

    fn seeded_store() -> InMemoryRecordStore {
        let d = descriptor();
        let [team, project, label] = [&d.edges()[0], &d.edges()[1], &d.edges()[2]];
        let store = InMemoryRecordStore::new();
        store.insert("orgs", "o1");
        store.insert_child(team, "t1", "o1");
        store.insert_child(team, "t2", "o1");
        store.insert_child(project, "p1", "t1");
        store.insert_child(project, "p2", "t2");
        store.insert_child(project, "p3", "t2");
        store.insert_child(label, "l1", "o1");
        store
    }

    #[tokio::test]
    async fn test_全ての子テーブルをたどり訪問順の逆順で計画を作る() {
        let store = seeded_store();

        let plan = engine(&store).discover(&entry("orgs", "o1")).await.unwrap();

        assert_eq!(
            plan.entries(),
            &[
                entry("projects", "p3"),
                entry("projects", "p2"),
                entry("projects", "p1"),
                entry("labels", "l1"),
                entry("teams", "t2"),
                entry("teams", "t1"),
                entry("orgs", "o1"),
            ]
        );
    }

    #[tokio::test]
    async fn test_子孫がなければルートだけの計画になる() {
        let store = InMemoryRecordStore::new();
        store.insert("orgs", "o1");

        let plan = engine(&store).discover(&entry("orgs", "o1")).await.unwrap();

        assert_eq!(plan.entries(), &[entry("orgs", "o1")]);
    }

    #[tokio::test]
    async fn test_ルートが存在しなければroot_not_foundになる() {
        let store = InMemoryRecordStore::new();

        let err = engine(&store)
            .discover(&entry("orgs", "missing"))
            .await
            .unwrap_err();

        let failure = err.into_failure();
        assert_eq!(failure.kind, FailureKind::RootNotFound);
        assert_eq!(failure.entry, Some(entry("orgs", "missing")));
    }

    #[tokio::test]
    async fn test_階層定義にないテーブルはunknown_tableになる() {
        let store = InMemoryRecordStore::new();
        store.insert("invoices", "i1");

        let err = engine(&store)
            .discover(&entry("invoices", "i1"))
            .await
            .unwrap_err();

        assert_eq!(err.into_failure().kind, FailureKind::UnknownTable);
    }

    #[tokio::test]
    async fn test_一時的な読み取りエラーはリトライで回復する() {
        let store = seeded_store();
        store.fail_next_reads(3);

        let plan = engine(&store).discover(&entry("orgs", "o1")).await.unwrap();

        assert_eq!(plan.len(), 7);
    }

    #[tokio::test]
    async fn test_読み取りエラーがリトライ上限を超えるとtransient_store_errorになる() {
        let store = seeded_store();
        store.fail_next_reads(100);

        let err = engine(&store).discover(&entry("orgs", "o1")).await.unwrap_err();

        assert_eq!(err.into_failure().kind, FailureKind::TransientStoreError);
    }
}
