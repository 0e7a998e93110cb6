//! # Cascade Service 設定
//!
//! 環境変数からサーバー・削除ジョブ・ドライバーの設定を読み込む。
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `CASCADE_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `CASCADE_PORT` | No | ポート番号（デフォルト: `3100`） |
//! | `DATABASE_URL` | **Yes** | PostgreSQL 接続 URL |
//! | `CASCADE_DEFAULT_CHUNK_SIZE` | No | 既定のチャンクサイズ（デフォルト: `100`） |
//! | `CASCADE_MAX_RETRIES` | No | 一時的エラーのリトライ回数（デフォルト: `5`） |
//! | `CASCADE_INITIAL_BACKOFF_MS` | No | 最初の待機時間（デフォルト: `100`） |
//! | `CASCADE_MAX_BACKOFF_MS` | No | 待機時間の上限（デフォルト: `5000`） |
//! | `CASCADE_DRIVER_ENABLED` | No | ドライバーを起動するか（デフォルト: `true`） |
//! | `CASCADE_DRIVER_INTERVAL_MS` | No | ドライバーのポーリング間隔。1 以上（デフォルト: `1000`） |
//! | `CASCADE_DRIVER_BATCH_SIZE` | No | 1 回のポーリングで進めるジョブ数。1 以上（デフォルト: `50`） |
//! | `CASCADE_HIERARCHY_PATH` | No | 階層定義 JSON のパス（未設定で組み込みの 11 階層） |

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use cascade_domain::{DomainError, hierarchy::HierarchyDescriptor, value_objects::ChunkSize};
use thiserror::Error;

use crate::usecase::RetryPolicy;

/// 設定の読み込みエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// 必須の環境変数が未設定
    #[error("{0} が設定されていません（.env を確認してください）")]
    Missing(&'static str),

    /// 値を解釈できない
    #[error("{key} の値が不正です: {value:?}（{reason}）")]
    Invalid {
        key:    &'static str,
        value:  String,
        reason: String,
    },

    /// 階層定義ファイルを読み込めない
    #[error("階層定義を読み込めません: {}: {reason}", path.display())]
    Hierarchy { path: PathBuf, reason: String },
}

/// Cascade Service の設定
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// データベース接続 URL
    pub database_url: String,
    /// チャンクサイズ未指定のジョブに使う値
    pub default_chunk_size: ChunkSize,
    /// 一時的エラーのリトライ
    pub retry: RetryPolicy,
    /// ドライバー設定
    pub driver: DriverConfig,
    /// 階層定義 JSON のパス
    pub hierarchy_path: Option<PathBuf>,
}

/// ドライバーの設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverConfig {
    pub enabled:    bool,
    pub interval:   Duration,
    /// 1 tick で進めるジョブ数の上限
    pub batch_size: usize,
}

impl ServiceConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// 任意の参照関数から設定を読み込む
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = RetryPolicy::default();
        let chunk_size = parse_or(&lookup, "CASCADE_DEFAULT_CHUNK_SIZE", 100u32)?;

        Ok(Self {
            host: lookup("CASCADE_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_or(&lookup, "CASCADE_PORT", 3100)?,
            database_url: lookup("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?,
            default_chunk_size: ChunkSize::new(chunk_size).map_err(|e| ConfigError::Invalid {
                key:    "CASCADE_DEFAULT_CHUNK_SIZE",
                value:  chunk_size.to_string(),
                reason: e.to_string(),
            })?,
            retry: RetryPolicy {
                max_retries:     parse_or(&lookup, "CASCADE_MAX_RETRIES", defaults.max_retries)?,
                initial_backoff: Duration::from_millis(parse_or(
                    &lookup,
                    "CASCADE_INITIAL_BACKOFF_MS",
                    duration_ms(defaults.initial_backoff),
                )?),
                max_backoff:     Duration::from_millis(parse_or(
                    &lookup,
                    "CASCADE_MAX_BACKOFF_MS",
                    duration_ms(defaults.max_backoff),
                )?),
            },
            driver: DriverConfig {
                enabled:    parse_or(&lookup, "CASCADE_DRIVER_ENABLED", true)?,
                interval:   Duration::from_millis(parse_nonzero_or(
                    &lookup,
                    "CASCADE_DRIVER_INTERVAL_MS",
                    1_000u64,
                )?),
                batch_size: parse_nonzero_or(&lookup, "CASCADE_DRIVER_BATCH_SIZE", 50usize)?,
            },
            hierarchy_path: lookup("CASCADE_HIERARCHY_PATH").map(PathBuf::from),
        })
    }

    /// 階層定義を読み込む
    ///
    /// パスが未設定なら組み込みの 11 階層を返す。
    pub fn load_hierarchy(&self) -> Result<HierarchyDescriptor, ConfigError> {
        let Some(path) = &self.hierarchy_path else {
            return Ok(HierarchyDescriptor::workspace_hierarchy());
        };
        let hierarchy_error = |reason: String| ConfigError::Hierarchy {
            path: path.clone(),
            reason,
        };

        let json = std::fs::read_to_string(path).map_err(|e| hierarchy_error(e.to_string()))?;
        HierarchyDescriptor::from_json(&json)
            .map_err(|e: DomainError| hierarchy_error(e.to_string()))
    }
}

fn parse_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}

/// 0 を受け付けない [`parse_or`]
///
/// `Default` が 0 になる整数型に使う。
fn parse_nonzero_or<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr + Default + PartialEq + std::fmt::Display,
    T::Err: std::fmt::Display,
{
    let value = parse_or(lookup, key, default)?;
    if value == T::default() {
        return Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: "1 以上を指定してください".to_string(),
        });
    }
    Ok(value)
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
