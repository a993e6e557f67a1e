//! ログ初期化
//!
//! コンソール（stderr）とログファイル（`category_matching_YYYYMMDD.log`）の2系統。
//! コンソールは警告以上（`--verbose` で debug）、ファイルは info 以上を記録する。
//! `RUST_LOG` が設定されていればコンソール側の既定値より優先する。

use crate::error::Result;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// 当日のログファイル名
pub fn log_file_name(date: chrono::NaiveDate) -> String {
    format!("category_matching_{}.log", date.format("%Y%m%d"))
}

/// ログを初期化
///
/// # Arguments
/// * `log_dir` - ログファイルの出力先（なければ作成）
/// * `verbose` - コンソールに debug ログまで出す
///
/// # Returns
/// ログファイルのパス
pub fn init(log_dir: &Path, verbose: bool) -> Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;
    let path = log_dir.join(log_file_name(chrono::Local::now().date_naive()));
    let file = OpenOptions::new().create(true).append(true).open(&path)?;

    let console_default = if verbose {
        "category_match=debug,category_match_common=debug"
    } else {
        "warn"
    };
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(console_default));
    let file_filter = EnvFilter::new("info");

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_filter(file_filter);

    // テストなどで二重初期化された場合は既存の購読者を使う
    let _ = tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init();

    Ok(path)
}

/// ログ用の要約（長文は先頭のみ）
pub fn summary(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
