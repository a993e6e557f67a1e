//! 1ファイル分の処理と対話入力
//!
//! 読み込み → バッチ照合 → Excel 出力。失敗は画面に出して次の入力へ進む。

use crate::batch::run_batch;
use crate::context::RunContext;
use crate::error::{CategoryMatchError, Result};
use crate::export;
use crate::loader::{normalize_input_path, read_input_items};
use category_match_common::BatchSummary;
use dialoguer::Input;
use std::path::{Path, PathBuf};
use tracing::info;

/// 対話入力の解釈
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptAction {
    Quit,
    /// 空入力（もう一度聞く）
    Skip,
    File(PathBuf),
}

pub fn parse_prompt_input(raw: &str) -> PromptAction {
    let trimmed = raw.trim();
    match trimmed.to_lowercase().as_str() {
        "q" | "quit" | "exit" => PromptAction::Quit,
        _ => match normalize_input_path(trimmed) {
            Some(path) => PromptAction::File(path),
            None => PromptAction::Skip,
        },
    }
}

/// 入力ファイルのパスを聞く
pub fn prompt_input_path() -> Result<PromptAction> {
    let input: String = Input::new()
        .with_prompt("ファイルパス (q:終了)")
        .allow_empty(true)
        .interact_text()
        .map_err(|e| CategoryMatchError::Prompt(e.to_string()))?;
    Ok(parse_prompt_input(&input))
}

/// 1ファイルの処理結果
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub output_path: PathBuf,
    pub summary: BatchSummary,
}

/// 1ファイルを照合して結果Excelを書き出す
///
/// # Arguments
/// * `ctx` - 実行コンテキスト
/// * `input` - 品类ファイル（1行1件）
/// * `output_dir` - 出力ディレクトリ
/// * `show_progress` - 進捗バーを表示するか
///
/// # Returns
/// 有効な行がなければ None
pub async fn process_file(
    ctx: &RunContext,
    input: &Path,
    output_dir: &Path,
    show_progress: bool,
) -> Result<Option<ProcessedFile>> {
    let items = read_input_items(input)?;
    if items.is_empty() {
        return Ok(None);
    }
    info!(input = %input.display(), items = items.len(), "照合開始");

    let rows = run_batch(
        ctx.orchestrator.clone(),
        items,
        ctx.config.matching.batch_max_workers,
        show_progress,
    )
    .await;
    let summary = BatchSummary::from_rows(&rows);

    let stem = export::input_stem(Some(input));
    let output_path = export::export_results(
        &rows,
        output_dir,
        stem.as_deref(),
        &ctx.config.app.input_stem_ignore,
    )?;
    info!(output = %output_path.display(), "結果を書き出しました");

    Ok(Some(ProcessedFile { output_path, summary }))
}
