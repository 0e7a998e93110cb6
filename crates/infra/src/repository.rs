//! # リポジトリ実装
//!
//! 削除ジョブの永続化を担当するリポジトリのトレイトと PostgreSQL 実装を提供する。
//!
//! ## 設計方針
//!
//! - **データベース抽象化**: sqlx を使用し、PostgreSQL 固有の処理をカプセル化
//! - **テスタビリティ**: トレイト経由でモック可能な設計

pub mod delete_job_repository;

pub use delete_job_repository::{DeleteJobRepository, PostgresDeleteJobRepository};
