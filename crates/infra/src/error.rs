//! # インフラ層エラー定義
//!
//! データベースや record store との通信で発生するエラーを表現する。
//!
//! ## 設計方針
//!
//! - **エラーの変換**: sqlx::Error, serde_json::Error をラップ
//! - **一時的/恒久的の分類**: [`InfraError::is_transient`] でリトライ可否を判定する
//! - **SpanTrace 自動捕捉**: `From` 実装や convenience constructor で
//!   エラー生成時の呼び出し経路を自動記録する
//!
//! ## 構造
//!
//! `std::io::Error` と同じ struct + enum パターンを採用:
//! - [`InfraError`]: エラー種別（[`InfraErrorKind`]）と [`SpanTrace`] を保持するラッパー
//! - [`InfraErrorKind`]: エラーの具体的な種別（Database, Conflict, Transient 等）

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

/// PostgreSQL の SQLSTATE のうち、再試行で解消しうるもの
///
/// - `40001`: serialization_failure
/// - `40P01`: deadlock_detected
/// - `55P03`: lock_not_available
/// - `57P01`: admin_shutdown
/// - `53300`: too_many_connections
const TRANSIENT_SQLSTATES: [&str; 5] = ["40001", "40P01", "55P03", "57P01", "53300"];

/// インフラ層で発生するエラー
///
/// エラー種別（[`InfraErrorKind`]）と [`SpanTrace`]（呼び出し経路）を保持する。
///
/// ## パターンマッチ
///
/// エラー種別に応じた処理には [`kind()`](InfraError::kind) を使用する:
///
/// ```ignore
/// match error.kind() {
///     InfraErrorKind::Conflict { entity, id } => { /* 再読み込み */ }
///     _ => { /* その他 */ }
/// }
/// ```
#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// インフラ層エラーの種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// データベースエラー
    ///
    /// SQL クエリの実行失敗、接続エラー、制約違反など。
    /// リトライ可否は SQLSTATE とエラー種別から判定する。
    #[error("データベースエラー: {0}")]
    Database(#[source] sqlx::Error),

    /// シリアライズ/デシリアライズエラー
    ///
    /// 削除計画（JSONB 列）の変換に失敗した場合に使用する。
    #[error("シリアライズエラー: {0}")]
    Serialization(#[source] serde_json::Error),

    /// 楽観的ロック競合（ステータスまたはバージョン不一致）
    ///
    /// 条件付き UPDATE で期待した状態と DB 上の状態が一致しなかった場合。
    /// ユースケース層で再読み込みして再判定する。
    #[error("競合が発生しました: {entity}(id={id})")]
    Conflict {
        /// エンティティ名（例: "DeleteJob"）
        entity: String,
        /// エンティティの ID
        id:     String,
    },

    /// 一時的なストアエラー
    ///
    /// 接続断やタイムアウトなど、時間をおいて再試行すれば成功しうるエラー。
    #[error("一時的なストアエラー: {0}")]
    Transient(String),

    /// 恒久的なストアエラー
    ///
    /// このサブシステムの外側の制約などで、再試行しても成功しないエラー。
    #[error("恒久的なストアエラー: {0}")]
    Permanent(String),

    /// 予期しないエラー
    ///
    /// DB から復元した値が不変条件に違反している場合など。
    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

// ===== InfraError のメソッド =====

impl InfraError {
    /// エラー種別を取得する
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    /// SpanTrace を取得する
    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    /// Conflict バリアントかどうか
    pub fn is_conflict(&self) -> bool {
        matches!(self.kind, InfraErrorKind::Conflict { .. })
    }

    /// 再試行で解消しうるエラーかどうか
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            InfraErrorKind::Transient(_) => true,
            InfraErrorKind::Database(err) => is_transient_sqlx(err),
            InfraErrorKind::Serialization(_)
            | InfraErrorKind::Conflict { .. }
            | InfraErrorKind::Permanent(_)
            | InfraErrorKind::Unexpected(_) => false,
        }
    }

    /// InfraError を分解して InfraErrorKind と SpanTrace を取り出す
    pub fn into_parts(self) -> (InfraErrorKind, SpanTrace) {
        (self.kind, self.span_trace)
    }

    // ===== Convenience constructors =====

    /// 楽観的ロック競合エラーを生成する
    pub fn conflict(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::capture(InfraErrorKind::Conflict {
            entity: entity.into(),
            id:     id.into(),
        })
    }

    /// 一時的なストアエラーを生成する
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::capture(InfraErrorKind::Transient(msg.into()))
    }

    /// 恒久的なストアエラーを生成する
    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::capture(InfraErrorKind::Permanent(msg.into()))
    }

    /// 予期しないエラーを生成する
    pub fn unexpected(msg: impl Into<String>) -> Self {
        Self::capture(InfraErrorKind::Unexpected(msg.into()))
    }

    fn capture(kind: InfraErrorKind) -> Self {
        Self {
            kind,
            span_trace: SpanTrace::capture(),
        }
    }
}

fn is_transient_sqlx(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .is_some_and(|code| TRANSIENT_SQLSTATES.iter().any(|state| *state == code)),
        _ => false,
    }
}

// ===== トレイト実装 =====

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

// ===== From 実装（SpanTrace 自動キャプチャ） =====

impl From<sqlx::Error> for InfraError {
    fn from(source: sqlx::Error) -> Self {
        Self::capture(InfraErrorKind::Database(source))
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self::capture(InfraErrorKind::Serialization(source))
    }
}

impl From<cascade_domain::DomainError> for InfraError {
    fn from(source: cascade_domain::DomainError) -> Self {
        Self::unexpected(source.to_string())
    }
}
