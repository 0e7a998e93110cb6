//! # Record Store
//!
//! 連鎖削除の対象となる業務データへのアクセスを抽象化する。
//!
//! ## 設計方針
//!
//! - **最小の操作**: 存在確認、外部キーによる子レコード検索、ID による削除のみ
//! - **冪等な削除**: 既に存在しないレコードの削除は [`DeleteOutcome::AlreadyAbsent`] として
//!   成功扱いにする。同じチャンクを再実行しても結果は変わらない
//! - **識別子の埋め込み**: テーブル名・列名は SQL にバインドできないため、
//!   [`TableName`] / [`ColumnName`] の検証済み識別子を二重引用符で囲んで埋め込む
//!
//! PostgreSQL 実装では各テーブルの主キー列を `id`（TEXT）とする。

use async_trait::async_trait;
use cascade_domain::{
    hierarchy::{ColumnName, TableName},
    plan::{PlanEntry, RecordId},
};
use sqlx::PgPool;

use crate::error::InfraError;

/// 削除操作の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    /// レコードを削除した
    Deleted,
    /// レコードは既に存在しなかった
    AlreadyAbsent,
}

/// record store トレイト
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// レコードが存在するかを確認する
    async fn exists(&self, table: &TableName, id: &RecordId) -> Result<bool, InfraError>;

    /// `table.foreign_key = parent_id` を満たすレコードの ID を ID 順に取得する
    async fn find_children(
        &self,
        table: &TableName,
        foreign_key: &ColumnName,
        parent_id: &RecordId,
    ) -> Result<Vec<RecordId>, InfraError>;

    /// レコードを削除する
    async fn delete(&self, entry: &PlanEntry) -> Result<DeleteOutcome, InfraError>;
}

/// PostgreSQL 実装の RecordStore
#[derive(Debug, Clone)]
pub struct PostgresRecordStore {
    pool: PgPool,
}

impl PostgresRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecordStore for PostgresRecordStore {
    #[tracing::instrument(skip_all, level = "debug", fields(%table, record_id = %id))]
    async fn exists(&self, table: &TableName, id: &RecordId) -> Result<bool, InfraError> {
        let sql = format!(r#"SELECT EXISTS (SELECT 1 FROM "{table}" WHERE id = $1)"#);
        let exists = sqlx::query_scalar::<_, bool>(&sql)
            .bind(id.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%table, %foreign_key, %parent_id))]
    async fn find_children(
        &self,
        table: &TableName,
        foreign_key: &ColumnName,
        parent_id: &RecordId,
    ) -> Result<Vec<RecordId>, InfraError> {
        let sql = format!(r#"SELECT id FROM "{table}" WHERE "{foreign_key}" = $1 ORDER BY id"#);
        let ids = sqlx::query_scalar::<_, String>(&sql)
            .bind(parent_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        Ok(ids
            .into_iter()
            .map(RecordId::new)
            .collect::<Result<Vec<_>, _>>()?)
    }

    #[tracing::instrument(skip_all, level = "debug", fields(%entry))]
    async fn delete(&self, entry: &PlanEntry) -> Result<DeleteOutcome, InfraError> {
        let sql = format!(r#"DELETE FROM "{}" WHERE id = $1"#, entry.table);
        let result = sqlx::query(&sql)
            .bind(entry.id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            Ok(DeleteOutcome::AlreadyAbsent)
        } else {
            Ok(DeleteOutcome::Deleted)
        }
    }
}
