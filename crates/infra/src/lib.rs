//! # Cascade インフラ層
//!
//! 外部システムとの接続・通信を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **データベース接続**: PostgreSQL への接続プール管理とマイグレーション
//! - **ジョブストア**: 削除ジョブの永続化（[`repository::DeleteJobRepository`]）
//! - **record store**: 削除対象データの探索と削除（[`record_store::RecordStore`]）
//!
//! ## 依存関係
//!
//! ```text
//! service → infra → domain
//! ```
//!
//! ## モジュール構成
//!
//! - [`db`] - PostgreSQL データベース接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`record_store`] - 業務データへのアクセス
//! - [`repository`] - リポジトリ実装
//! - `mock` - インメモリ実装（`test-utils` feature）

pub mod db;
pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod record_store;
pub mod repository;

pub use error::{InfraError, InfraErrorKind};
pub use record_store::{DeleteOutcome, PostgresRecordStore, RecordStore};
