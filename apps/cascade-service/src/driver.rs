//! # ドライバー
//!
//! 非終端状態のジョブを定期的に取得し、1 tick につき各ジョブを 1 ステップずつ進める
//! バックグラウンドタスク。
//!
//! 1 つのジョブに対して同時に 2 つ以上の `advance` を実行しない。
//! エラーはログに残し、次の tick で同じジョブを再び進める。

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use tokio::task::JoinHandle;

use crate::{config::DriverConfig, error::CoreError, usecase::DeleteJobUseCaseImpl};

/// ポーリング間隔の下限（`tokio::time::interval` は 0 を受け付けない）
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// 1 tick の処理結果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// advance を呼び出したジョブ数
    pub advanced: usize,
    /// この tick で終端状態になったジョブ数
    pub finished: usize,
    /// advance がエラーになったジョブ数
    pub errors:   usize,
}

/// ドライバー
pub struct Driver {
    usecase:    Arc<DeleteJobUseCaseImpl>,
    interval:   Duration,
    batch_size: usize,
    shutdown:   Arc<AtomicBool>,
}

impl Driver {
    pub fn new(usecase: Arc<DeleteJobUseCaseImpl>, config: DriverConfig) -> Self {
        Self {
            usecase,
            interval: config.interval.max(MIN_INTERVAL),
            batch_size: config.batch_size.max(1),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 停止要求用のハンドル
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.shutdown.clone()
    }

    /// 停止を要求する。実行中の tick は最後まで処理する
    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    /// 1 tick 分の処理を行う
    pub async fn run_once(&self) -> Result<TickSummary, CoreError> {
        let ids = self.usecase.list_active(self.batch_size).await?;
        let mut summary = TickSummary::default();

        for id in ids {
            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }
            summary.advanced += 1;
            match self.usecase.advance(&id).await {
                Ok(job) if job.is_terminal() => {
                    summary.finished += 1;
                    tracing::info!(
                        job_id = %id,
                        status = %job.status(),
                        deleted_so_far = job.deleted_so_far(),
                        "削除ジョブが終了しました"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    summary.errors += 1;
                    tracing::warn!(job_id = %id, error = %e, "削除ジョブを進められませんでした");
                }
            }
        }

        Ok(summary)
    }

    /// バックグラウンドタスクとして起動する
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            tracing::info!(interval_ms = self.interval.as_millis() as u64, "ドライバーを起動しました");

            loop {
                interval.tick().await;
                if self.shutdown.load(Ordering::SeqCst) {
                    break;
                }

                match self.run_once().await {
                    Ok(summary) if summary.advanced > 0 => {
                        tracing::debug!(
                            advanced = summary.advanced,
                            finished = summary.finished,
                            errors = summary.errors,
                            "ドライバーの tick を処理しました"
                        );
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(error = %e, "アクティブなジョブを取得できませんでした");
                    }
                }
            }

            tracing::info!("ドライバーを停止しました");
        })
    }
}
