//! エラー型定義
//!
//! 共通ライブラリの大半は失敗しない純粋関数で、エラーを返すのは結果Excelの生成のみ。

use thiserror::Error;

/// 共通エラー型
#[derive(Error, Debug)]
pub enum Error {
    #[error("Excel生成エラー: {0}")]
    Excel(String),
}

/// Result型エイリアス
pub type Result<T> = std::result::Result<T, Error>;
