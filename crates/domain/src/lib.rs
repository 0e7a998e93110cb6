//! # Cascade ドメイン層
//!
//! 連鎖削除ジョブの中核となるドメインモデルを定義する。
//!
//! ## 設計方針
//!
//! - **エンティティ**: 一意の識別子を持つオブジェクト（例: `DeleteJob`）
//! - **値オブジェクト**: 識別子を持たない不変オブジェクト（例: `ChunkSize`,
//!   `PlanEntry`）
//! - **静的メタデータ**: テーブル間の親子関係（`HierarchyDescriptor`）
//! - **ドメインエラー**: ビジネスルール違反を表現するエラー型
//!
//! ## 依存関係の方向
//!
//! ```text
//! service → infra → domain
//! ```
//!
//! ドメイン層は I/O を一切持たない。record store やジョブストアへのアクセスは
//! インフラ層のトレイト経由でユースケース層が行う。
//!
//! ## モジュール構成
//!
//! - [`delete_job`] - 削除ジョブの集約と状態遷移
//! - [`hierarchy`] - テーブル間の親子関係
//! - [`plan`] - 削除計画
//! - [`error`] - ドメイン層で発生するエラーの定義
//!
//! ## 使用例
//!
//! ```rust
//! use cascade_domain::hierarchy::{HierarchyDescriptor, TableName};
//!
//! let descriptor = HierarchyDescriptor::workspace_hierarchy();
//! let edges = descriptor
//!     .child_edges_of(&TableName::new("organizations").unwrap())
//!     .unwrap();
//! assert_eq!(edges[0].child_table.as_str(), "workspaces");
//! ```

#[macro_use]
mod macros;

pub mod clock;
pub mod delete_job;
pub mod error;
pub mod hierarchy;
pub mod plan;
pub mod value_objects;

pub use error::DomainError;
