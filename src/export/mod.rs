pub mod excel;

use crate::error::Result;
use category_match_common::ResultRow;
use chrono::NaiveDateTime;
use std::path::{Path, PathBuf};

/// 出力ファイル名に付ける表題
pub const OUTPUT_TITLE: &str = "匹配结果";

/// 出力ファイル名
///
/// 入力ファイル名（拡張子なし）があれば先頭に付ける。
/// `ignore_stem` と同じ名前（既定の「新建文本文档」）は付けない。
pub fn output_file_name(input_stem: Option<&str>, ignore_stem: &str, now: NaiveDateTime) -> String {
    let stamp = now.format("%Y%m%d_%H%M%S");
    match input_stem.map(str::trim).filter(|s| !s.is_empty() && *s != ignore_stem) {
        Some(stem) => format!("{}_{}_{}.xlsx", stem, OUTPUT_TITLE, stamp),
        None => format!("{}_{}.xlsx", OUTPUT_TITLE, stamp),
    }
}

/// 入力パスから拡張子なしのファイル名を取り出す
pub fn input_stem(input: Option<&Path>) -> Option<String> {
    input
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(String::from)
}

/// 結果を出力ディレクトリへ書き出す
///
/// # Returns
/// 書き出したファイルのパス
pub fn export_results(
    rows: &[ResultRow],
    output_dir: &Path,
    input_stem: Option<&str>,
    ignore_stem: &str,
) -> Result<PathBuf> {
    let name = output_file_name(input_stem, ignore_stem, chrono::Local::now().naive_local());
    let output_path = output_dir.join(name);
    excel::write_result_excel(rows, &output_path)?;
    Ok(output_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 1)
            .unwrap()
    }

    #[test]
    fn test_output_file_name_with_stem() {
        assert_eq!(
            output_file_name(Some("门店清单"), "新建文本文档", at()),
            "门店清单_匹配结果_20250307_090501.xlsx"
        );
    }

    #[test]
    fn test_output_file_name_ignored_or_missing_stem() {
        assert_eq!(
            output_file_name(Some("新建文本文档"), "新建文本文档", at()),
            "匹配结果_20250307_090501.xlsx"
        );
        assert_eq!(output_file_name(None, "新建文本文档", at()), "匹配结果_20250307_090501.xlsx");
        assert_eq!(output_file_name(Some("  "), "新建文本文档", at()), "匹配结果_20250307_090501.xlsx");
    }

    #[test]
    fn test_input_stem() {
        assert_eq!(input_stem(Some(Path::new("data/门店清单.txt"))).as_deref(), Some("门店清单"));
        assert_eq!(input_stem(None), None);
    }

    #[test]
    fn test_export_results_writes_into_dir() {
        let dir = tempdir().unwrap();
        let path = export_results(&[], dir.path(), Some("门店"), "新建文本文档").unwrap();
        assert!(path.starts_with(dir.path()));
        assert!(path.exists());
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("门店_匹配结果_"));
        assert!(name.ends_with(".xlsx"));
    }
}
