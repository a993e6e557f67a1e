//! Excel生成（共通ライブラリ）
//!
//! 照合結果を1シートの表として書き出す。成功扱いでない行は赤字。

use crate::error::{Error, Result};
use rust_xlsxwriter::*;

/// 出力シート名
pub const RESULT_SHEET_NAME: &str = "匹配结果";

/// ヘッダー行
pub const RESULT_HEADERS: [&str; 7] = [
    "品类名称",
    "一级原子品类",
    "品类编码",
    "原子品类",
    "匹配方式",
    "匹配详情",
    "大模型描述",
];

/// 列幅（文字数単位）
const COLUMN_WIDTHS: [f64; 7] = [28.0, 14.0, 12.0, 18.0, 14.0, 40.0, 60.0];

/// 結果行のトレイト（ResultRow 以外の型にも対応）
pub trait ReportRow {
    fn display_name(&self) -> &str;
    fn level1_category(&self) -> &str;
    fn category_code(&self) -> &str;
    fn atomic_category(&self) -> &str;
    fn method_label(&self) -> &str;
    fn detail(&self) -> &str;
    fn llm_description(&self) -> &str;
    fn is_flagged(&self) -> bool;
}

/// common::ResultRow に ReportRow を実装
impl ReportRow for crate::report::ResultRow {
    fn display_name(&self) -> &str { &self.display_name }
    fn level1_category(&self) -> &str { &self.level1_category }
    fn category_code(&self) -> &str { &self.category_code }
    fn atomic_category(&self) -> &str { &self.atomic_category }
    fn method_label(&self) -> &str { self.method.label() }
    fn detail(&self) -> &str { &self.detail }
    fn llm_description(&self) -> &str { &self.llm_description }
    fn is_flagged(&self) -> bool { crate::report::ResultRow::is_flagged(self) }
}

fn row_values<T: ReportRow>(row: &T) -> [&str; 7] {
    [
        row.display_name(),
        row.level1_category(),
        row.category_code(),
        row.atomic_category(),
        row.method_label(),
        row.detail(),
        row.llm_description(),
    ]
}

/// 結果Excelをバッファに生成
///
/// # Arguments
/// * `rows` - 結果行（ReportRowトレイトを実装した型）
///
/// # Returns
/// xlsx のバイト列
pub fn generate_result_excel_buffer<T: ReportRow>(rows: &[T]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();

    let header_format = Format::new()
        .set_bold()
        .set_background_color(Color::RGB(0xF5F5F5))
        .set_border(FormatBorder::Thin)
        .set_border_color(Color::RGB(0xAAAAAA));

    let value_format = Format::new().set_align(FormatAlign::VerticalCenter);

    let flagged_format = Format::new()
        .set_align(FormatAlign::VerticalCenter)
        .set_font_color(Color::Red);

    let worksheet = workbook.add_worksheet();
    worksheet
        .set_name(RESULT_SHEET_NAME)
        .map_err(|e| Error::Excel(format!("シート名設定エラー: {}", e)))?;

    for (col, width) in COLUMN_WIDTHS.iter().enumerate() {
        worksheet
            .set_column_width(col as u16, *width)
            .map_err(|e| Error::Excel(format!("列幅設定エラー: {}", e)))?;
    }

    for (col, header) in RESULT_HEADERS.iter().enumerate() {
        worksheet
            .write_string_with_format(0, col as u16, *header, &header_format)
            .map_err(|e| Error::Excel(format!("ヘッダー書き込みエラー: {}", e)))?;
    }

    for (i, row) in rows.iter().enumerate() {
        let excel_row = (i + 1) as u32;
        let format = if row.is_flagged() { &flagged_format } else { &value_format };
        for (col, value) in row_values(row).iter().enumerate() {
            worksheet
                .write_string_with_format(excel_row, col as u16, *value, format)
                .map_err(|e| Error::Excel(format!("値書き込みエラー: {}", e)))?;
        }
    }

    worksheet
        .set_freeze_panes(1, 0)
        .map_err(|e| Error::Excel(format!("ウィンドウ枠固定エラー: {}", e)))?;

    workbook
        .save_to_buffer()
        .map_err(|e| Error::Excel(format!("Excel保存エラー: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::build_result_row;
    use crate::types::{BatchItem, CategoryRule, MatchOutcome};

    #[test]
    fn test_generate_buffer_is_xlsx() {
        let item = BatchItem::new("喜茶奶茶店", "喜茶奶茶店");
        let rows = vec![
            build_result_row(
                &item,
                &MatchOutcome::RuleMatched {
                    rules: vec![CategoryRule::from_atomic("奶茶")],
                },
            ),
            build_result_row(&item, &MatchOutcome::Unmatched),
        ];
        let buffer = generate_result_excel_buffer(&rows).expect("Excel生成失敗");
        // xlsx は zip（PK ヘッダー）
        assert!(buffer.len() > 4);
        assert_eq!(&buffer[..2], b"PK");
    }

    #[test]
    fn test_generate_buffer_empty_rows() {
        let rows: Vec<crate::report::ResultRow> = Vec::new();
        assert!(generate_result_excel_buffer(&rows).is_ok());
    }
}
