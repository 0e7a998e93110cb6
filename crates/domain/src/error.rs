//! # ドメイン層エラー定義
//!
//! ビジネスルール違反やドメイン固有の例外状態を表現するエラー型。
//!
//! ## 設計方針
//!
//! - **型による分類**: エラーの種類を列挙型で明示し、パターンマッチで処理可能に
//! - **thiserror 活用**: `#[error(...)]` マクロでエラーメッセージを自動生成
//! - **HTTP ステータスへのマッピング**: API 層でステータスコードに変換可能
//!
//! ## エラーの種類と HTTP ステータスの対応
//!
//! | エラー種別 | HTTP ステータス | 用途 |
//! |-----------|----------------|------|
//! | `Validation` | 400 Bad Request | 入力値の検証失敗 |
//! | `NotFound` | 404 Not Found | エンティティが存在しない |
//! | `UnknownTable` | 400 Bad Request | 階層定義に存在しないテーブル |
//! | `InvalidTransition` | 409 Conflict | 現在の状態では許可されない遷移 |
//!
//! ## 使用例
//!
//! ```rust
//! use cascade_domain::DomainError;
//!
//! fn validate_chunk_size(size: u32) -> Result<(), DomainError> {
//!     if size == 0 {
//!         return Err(DomainError::Validation("チャンクサイズは 1 以上です".to_string()));
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// ドメイン層で発生するエラー
///
/// 削除ジョブの状態遷移や階層定義の検証で発生する例外状態を表現する。
/// API 層でこのエラーを受け取り、適切な HTTP レスポンスに変換する。
#[derive(Debug, Error)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// 入力値や DB から復元した値が不変条件に違反している場合に使用する。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// エンティティが見つからない
    #[error("{entity_type} が見つかりません: {id}")]
    NotFound {
        /// エンティティの種類（"DeleteJob" など）
        entity_type: &'static str,
        /// 検索に使用した識別子
        id:          String,
    },

    /// 階層定義に存在しないテーブル
    ///
    /// 階層定義と record store のスキーマは同じ定義から作られるため、
    /// 正しい入力では発生しない。発生した場合は設定ミスとして扱う。
    #[error("階層定義に存在しないテーブルです: {0}")]
    UnknownTable(String),

    /// 不正な状態遷移
    ///
    /// 削除ジョブの現在の状態では許可されていない操作を行おうとした場合に使用する。
    #[error("{from} 状態のジョブには {action} を適用できません")]
    InvalidTransition {
        /// 遷移元の状態
        from:   &'static str,
        /// 試みた操作
        action: &'static str,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transitionのメッセージに状態と操作が含まれる() {
        let err = DomainError::InvalidTransition {
            from:   "completed",
            action: "cancel",
        };

        assert_eq!(
            err.to_string(),
            "completed 状態のジョブには cancel を適用できません"
        );
    }

    #[test]
    fn test_unknown_tableのメッセージにテーブル名が含まれる() {
        let err = DomainError::UnknownTable("widgets".to_string());
        assert!(err.to_string().contains("widgets"));
    }
}
