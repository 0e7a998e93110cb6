//! 削除ジョブテストビルダー
//!
//! インメモリの record store とジョブリポジトリ、固定時刻の Clock で
//! [`DeleteJobUseCaseImpl`] を組み立てる。

use std::sync::Arc;

use cascade_domain::{
    clock::FixedClock,
    hierarchy::HierarchyDescriptor,
    value_objects::ChunkSize,
};
use cascade_infra::mock::{InMemoryRecordStore, MockDeleteJobRepository};
use chrono::{DateTime, Utc};

use crate::usecase::{ChunkExecutor, DeleteJobUseCaseImpl, DiscoveryEngine, RetryPolicy};

/// 削除ジョブテストのセットアップデータ
pub struct DeleteJobTestSetup {
    pub sut:        DeleteJobUseCaseImpl,
    pub jobs:       MockDeleteJobRepository,
    pub records:    InMemoryRecordStore,
    pub descriptor: Arc<HierarchyDescriptor>,
    pub now:        DateTime<Utc>,
}

impl DeleteJobTestSetup {
    /// 組み込み階層の先頭から `depth` 段下まで 1 件ずつレコードを作る
    ///
    /// ルートは `organizations/{root_id}`、子孫の ID は `{table}-{root_id}`。
    /// 作成したレコード数（`depth + 1`）を返す。
    ///
    /// # Panics
    ///
    /// `depth` が階層定義の辺の数を超える場合
    pub fn seed_chain(&self, root_id: &str, depth: usize) -> usize {
        let edges = self.descriptor.edges();
        assert!(depth <= edges.len(), "階層は {} 段までです", edges.len());

        self.records.insert("organizations", root_id);
        let mut parent_id = root_id.to_string();
        for edge in &edges[..depth] {
            let id = format!("{}-{root_id}", edge.child_table);
            self.records.insert_child(edge, &id, &parent_id);
            parent_id = id;
        }
        depth + 1
    }
}

/// 削除ジョブテストビルダー
///
/// # 使用例
///
/// ```ignore
/// use cascade_service::test_utils::DeleteJobTestBuilder;
///
/// #[tokio::test]
/// async fn test_example() {
///     let setup = DeleteJobTestBuilder::new().with_default_chunk_size(2).build();
///     setup.seed_chain("org-1", 3);
///
///     let job = setup.sut.start_job(...).await.unwrap();
///     let job = setup.sut.advance(job.id()).await.unwrap();
/// }
/// ```
pub struct DeleteJobTestBuilder {
    descriptor:         HierarchyDescriptor,
    default_chunk_size: u32,
    max_retries:        u32,
    now:                DateTime<Utc>,
}

impl Default for DeleteJobTestBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeleteJobTestBuilder {
    pub fn new() -> Self {
        Self {
            descriptor:         HierarchyDescriptor::workspace_hierarchy(),
            default_chunk_size: 100,
            max_retries:        5,
            now:                DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    pub fn with_descriptor(mut self, descriptor: HierarchyDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    pub fn with_default_chunk_size(mut self, chunk_size: u32) -> Self {
        self.default_chunk_size = chunk_size;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// SUT とモックを組み立てる
    ///
    /// リトライは待機なしで行う。
    pub fn build(self) -> DeleteJobTestSetup {
        let jobs = MockDeleteJobRepository::new();
        let records = InMemoryRecordStore::new();
        let descriptor = Arc::new(self.descriptor);
        let clock = Arc::new(FixedClock::new(self.now));
        let retry = RetryPolicy::without_backoff(self.max_retries);

        let discovery = DiscoveryEngine::new(descriptor.clone(), Arc::new(records.clone()), retry);
        let executor = ChunkExecutor::new(
            Arc::new(jobs.clone()),
            Arc::new(records.clone()),
            clock.clone(),
            retry,
        );
        let sut = DeleteJobUseCaseImpl::new(
            Arc::new(jobs.clone()),
            discovery,
            executor,
            clock,
            retry,
            ChunkSize::new(self.default_chunk_size).unwrap(),
        );

        DeleteJobTestSetup {
            sut,
            jobs,
            records,
            descriptor,
            now: self.now,
        }
    }
}
