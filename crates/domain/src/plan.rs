//! # 削除計画（Deletion Plan）
//!
//! 削除対象レコードを依存関係順に並べた列。
//! 探索時に一度だけ組み立てられ、以後は変更されない。
//! 実行時は `deleted_so_far` をオフセットとして論理的に消費する。

use serde::{Deserialize, Serialize};

use crate::{DomainError, hierarchy::TableName, value_objects::ChunkSize};

/// レコード ID（文字列表現）
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, derive_more::Display,
)]
#[serde(try_from = "String", into = "String")]
#[display("{_0}")]
pub struct RecordId(String);

impl RecordId {
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(DomainError::Validation("レコード ID は必須です".to_string()));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RecordId {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RecordId> for String {
    fn from(value: RecordId) -> Self {
        value.0
    }
}

/// 削除対象の 1 レコード
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, derive_more::Display)]
#[display("{table}({id})")]
pub struct PlanEntry {
    pub table: TableName,
    pub id:    RecordId,
}

impl PlanEntry {
    pub fn new(table: TableName, id: RecordId) -> Self {
        Self { table, id }
    }
}

/// 削除計画
///
/// # 不変条件
///
/// - 空ではない（最低でもルート 1 件を含む）
/// - 子レコードは必ず親レコードより前に並ぶ
/// - 最後の要素はルート
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<PlanEntry>", into = "Vec<PlanEntry>")]
pub struct DeletionPlan(Vec<PlanEntry>);

impl DeletionPlan {
    /// 探索の訪問順（親が先）を反転して計画を作る
    ///
    /// 幅優先探索は親を子より先に訪問するため、反転すれば子が親より前に並ぶ。
    pub fn from_visitation_order(mut visited: Vec<PlanEntry>) -> Result<Self, DomainError> {
        visited.reverse();
        Self::try_from(visited)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[PlanEntry] {
        &self.0
    }

    /// 計画の最後に置かれたルート
    pub fn root(&self) -> Option<&PlanEntry> {
        self.0.last()
    }

    /// `offset` から最大 `chunk_size` 件を返す
    ///
    /// `offset` が計画の長さ以上の場合は空スライスを返す。
    pub fn chunk(&self, offset: usize, chunk_size: ChunkSize) -> &[PlanEntry] {
        let start = offset.min(self.0.len());
        let end = start.saturating_add(chunk_size.as_usize()).min(self.0.len());
        &self.0[start..end]
    }
}

impl TryFrom<Vec<PlanEntry>> for DeletionPlan {
    type Error = DomainError;

    fn try_from(entries: Vec<PlanEntry>) -> Result<Self, Self::Error> {
        if entries.is_empty() {
            return Err(DomainError::Validation(
                "削除計画にはルートが含まれている必要があります".to_string(),
            ));
        }
        Ok(Self(entries))
    }
}

impl From<DeletionPlan> for Vec<PlanEntry> {
    fn from(plan: DeletionPlan) -> Self {
        plan.0
    }
}
