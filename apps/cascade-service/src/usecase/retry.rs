//! # リトライポリシー
//!
//! record store / ジョブストアへの呼び出しを、一時的エラーに限って
//! exponential backoff で再試行する。
//!
//! 待機時間は `initial_backoff × 2^retry` を `max_backoff` で打ち切った値。
//! 既定値（5 回、100ms 起点、上限 5 000ms）では 100, 200, 400, 800, 1600ms と待機する。

use std::{future::Future, time::Duration};

use cascade_infra::InfraError;

const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(100);
const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(5_000);

/// リトライポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大リトライ回数（初回の試行を含まない）
    pub max_retries:     u32,
    pub initial_backoff: Duration,
    pub max_backoff:     Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries:     DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff:     DEFAULT_MAX_BACKOFF,
        }
    }
}

impl RetryPolicy {
    /// 待機せずにリトライするポリシー（テスト用）
    pub fn without_backoff(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// `retry` 回目（0 始まり）のリトライ前に待機する時間
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// 一時的エラーの間は `operation` を再試行する
    ///
    /// 恒久的エラーは即座に返す。リトライ上限に達した場合は最後の一時的エラーを返す。
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut f: F) -> Result<T, InfraError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let mut retry = 0;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && retry < self.max_retries => {
                    let backoff = self.backoff(retry);
                    retry += 1;
                    tracing::warn!(
                        operation,
                        retry,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "一時的なエラーのためリトライします"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
