//! Excel出力（CLI版）
//!
//! 生成は共通ライブラリ（excel_core）で行い、ここではファイルへ書き出す。

use crate::error::Result;
use category_match_common::export::excel_core::generate_result_excel_buffer;
use category_match_common::ResultRow;
use std::path::Path;

/// 結果Excelを書き出す
///
/// # Arguments
/// * `rows` - 結果行（入力順）
/// * `output_path` - 出力ファイル（親ディレクトリは作成する）
pub fn write_result_excel(rows: &[ResultRow], output_path: &Path) -> Result<()> {
    let buffer = generate_result_excel_buffer(rows)?;

    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(output_path, buffer)?;
    Ok(())
}
