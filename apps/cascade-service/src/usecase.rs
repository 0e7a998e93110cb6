//! # ユースケース層
//!
//! 連鎖削除ジョブのビジネスロジックを実装する。
//!
//! ## 設計方針
//!
//! - **依存性注入**: ジョブリポジトリと record store を `Arc<dyn Trait>` で外部から注入
//! - **薄いハンドラ**: ハンドラとドライバは薄く保ち、ロジックはユースケースに集約
//!
//! ## モジュール構成
//!
//! - `delete_job`: ジョブの作成・進行・取り消し・参照
//! - `discovery`: 削除計画の探索
//! - `executor`: チャンク単位の削除
//! - `retry`: 一時的エラーのリトライ

pub(crate) mod helpers;

pub mod delete_job;
pub mod discovery;
pub mod executor;
pub mod retry;

pub use delete_job::{CancelOutcome, DeleteJobUseCaseImpl, StartJobInput};
pub use discovery::{DiscoveryEngine, DiscoveryError};
pub use executor::ChunkExecutor;
pub use retry::RetryPolicy;
