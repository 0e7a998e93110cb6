//! テストユーティリティ
//!
//! ユースケースのテストで使うビルダーを提供する。

mod delete_job_test_builder;

pub use delete_job_test_builder::{DeleteJobTestBuilder, DeleteJobTestSetup};
