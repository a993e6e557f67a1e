//! バッチ実行
//!
//! 1件1タスクで並行に照合し、入力と同じ順序で結果を返す。
//! タスク内のエラー・panic はその件の Exception 行になり、他の件には影響しない。

use crate::orchestrator::MatchOrchestrator;
use crate::progress::progress_bar;
use category_match_common::{build_result_row, BatchItem, BatchSummary, MatchMethod, MatchOutcome, ResultRow};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

/// タスク自体が結果を返さずに終わった件のメッセージ
const TASK_ABORTED_MESSAGE: &str = "任务异常终止";

/// バッチを実行する
///
/// # Arguments
/// * `orchestrator` - 全タスクで共有するカスケード
/// * `items` - 入力（重複も位置ごとに独立して扱う）
/// * `max_workers` - 同時実行数の上限
/// * `show_progress` - 進捗バーを表示するか
///
/// # Returns
/// 入力と同じ順序・同じ件数の結果行
pub async fn run_batch(
    orchestrator: Arc<MatchOrchestrator>,
    items: Vec<BatchItem>,
    max_workers: usize,
    show_progress: bool,
) -> Vec<ResultRow> {
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let pb = show_progress.then(|| progress_bar(total as u64, "匹配中"));
    let mut set = JoinSet::new();

    for (index, item) in items.iter().enumerate() {
        // 空きが出るまで次のタスクを起動しない
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => break,
        };
        let orchestrator = Arc::clone(&orchestrator);
        let item = item.clone();
        let pb = pb.clone();

        set.spawn(async move {
            let _permit = permit;
            let outcome = run_item(&orchestrator, &item).await;
            if let Some(pb) = &pb {
                pb.inc(1);
            }
            (index, build_result_row(&item, &outcome))
        });
    }

    let mut slots: Vec<Option<ResultRow>> = (0..total).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, row)) => slots[index] = Some(row),
            // どの件かは collect_rows で空きスロットとして記録する
            Err(e) => error!(error = %e, "タスクが異常終了しました"),
        }
    }
    if let Some(pb) = pb {
        pb.finish_and_clear();
    }

    let rows = collect_rows(slots, &items);

    let summary = BatchSummary::from_rows(&rows);
    info!(
        total = summary.total,
        succeeded = summary.succeeded(),
        flagged = summary.flagged(),
        exceptions = summary.count(MatchMethod::Exception),
        elapsed = format!("{:.2}s", started.elapsed().as_secs_f64()),
        "バッチ完了"
    );
    rows
}

/// スロットを入力順の結果行にする（結果のない件は Exception）
fn collect_rows(slots: Vec<Option<ResultRow>>, items: &[BatchItem]) -> Vec<ResultRow> {
    slots
        .into_iter()
        .zip(items)
        .enumerate()
        .map(|(index, (slot, item))| {
            slot.unwrap_or_else(|| {
                error!(index, external_id = %item.external_id, "結果のないタスクを Exception にします");
                build_result_row(
                    item,
                    &MatchOutcome::Exception {
                        message: TASK_ABORTED_MESSAGE.to_string(),
                    },
                )
            })
        })
        .collect()
}

/// 1件を照合（エラー・panic は Exception に変換）
async fn run_item(orchestrator: &MatchOrchestrator, item: &BatchItem) -> MatchOutcome {
    match AssertUnwindSafe(orchestrator.match_one(item.text()))
        .catch_unwind()
        .await
    {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            error!(external_id = %item.external_id, error = %e, "照合中にエラー");
            MatchOutcome::Exception { message: e.to_string() }
        }
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            error!(external_id = %item.external_id, panic = %message, "照合中に panic");
            MatchOutcome::Exception { message }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}
