//! 規則表・検証済みブランド表・入力テキストの読み込み
//!
//! - 規則表: 1行目=判定ロジック説明、2行目=フィールド説明、3行目以降=データ
//! - ブランド表: 1行目=ヘッダー（列名で位置を特定）、2行目以降=データ
//! - 入力: UTF-8テキスト、1行1件

use crate::error::{CategoryMatchError, Result};
use calamine::{open_workbook_auto, Data, Range, Reader};
use category_match_common::{split_keywords, BatchItem, CategoryRule, VerifiedBrand};
use lazy_static::lazy_static;
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// 規則表のデータ開始行（0始まり）
const RULE_DATA_START_ROW: usize = 2;

/// ブランド表の列名
const BRAND_NAME_HEADER: &str = "品牌名称";
const BRAND_ATOMIC_HEADER: &str = "原子品类";
const BRAND_CODE_HEADER: &str = "品牌编码";
const BRAND_KEYWORDS_HEADER: &str = "品牌关键词（，表示同时包含）";

lazy_static! {
    // Windows のドライブ指定（c:/... や c:\...）
    static ref WINDOWS_DRIVE: Regex = Regex::new(r"^([a-zA-Z])\s*[:\\](.*)$").unwrap();
}

/// セル値を文字列化（整数値の浮動小数は `.0` を付けない）
pub fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.trim().to_string(),
        Data::Float(n) => {
            if n.fract() == 0.0 && n.abs() < 1e15 {
                format!("{}", *n as i64)
            } else {
                format!("{}", n)
            }
        }
        Data::Int(n) => format!("{}", n),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => format!("{}", dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Error(e) => format!("{:?}", e),
    }
}

fn cell_to_int(cell: &Data) -> i64 {
    match cell {
        Data::Int(n) => *n,
        Data::Float(n) => *n as i64,
        Data::String(s) => s.trim().parse::<f64>().map(|f| f as i64).unwrap_or(0),
        _ => 0,
    }
}

/// 先頭シートを読み込む
fn first_sheet(path: &Path) -> Result<Range<Data>> {
    let mut workbook = open_workbook_auto(path)?;
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| CategoryMatchError::InvalidCatalog(format!("シートがありません: {}", path.display())))?;
    Ok(workbook.worksheet_range(&sheet_name)?)
}

/// 1行を CategoryRule に変換
///
/// 列: 0 一级原子品类, 1 品类编码, 2 原子品类, 3 序号, 4-7 关键词组1-4, 8 关键词组5, 9 一定不包含
fn row_to_rule(row: &[Data]) -> CategoryRule {
    let text = |i: usize| row.get(i).map(cell_to_string).unwrap_or_default();
    let keywords = |i: usize| split_keywords(&text(i));

    CategoryRule {
        level1_category: text(0),
        category_code: text(1),
        atomic_category: text(2),
        sequence_no: row.get(3).map(cell_to_int).unwrap_or(0),
        keyword_group_1: keywords(4),
        keyword_group_2: keywords(5),
        keyword_group_3: keywords(6),
        keyword_group_4: keywords(7),
        keyword_group_5: keywords(8),
        must_not_contain: keywords(9),
    }
}

/// 規則表を読み込む
///
/// # Arguments
/// * `path` - 規則表xlsxのパス
///
/// # Returns
/// 規則表の順の規則リスト（キーワードが空の行も含む。評価時に一致しない）
pub fn load_rules(path: &Path) -> Result<Vec<CategoryRule>> {
    if !path.exists() {
        return Err(CategoryMatchError::FileNotFound(path.display().to_string()));
    }

    let range = first_sheet(path)?;
    let rules: Vec<CategoryRule> = range
        .rows()
        .skip(RULE_DATA_START_ROW)
        .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
        .map(row_to_rule)
        .collect();

    let malformed = rules.iter().filter(|r| r.is_malformed()).count();
    if malformed > 0 {
        warn!(path = %path.display(), malformed, "キーワードが空の規則があります（一致しません）");
    }
    info!(path = %path.display(), count = rules.len(), "規則表を読み込みました");
    Ok(rules)
}

fn find_column(header: &[String], name: &str) -> Option<usize> {
    header.iter().position(|h| h.trim() == name)
}

/// 検証済みブランド表を読み込む
///
/// ファイルがない、または必須列（品牌名称・原子品类）がない場合は空リスト。
pub fn load_verified_brands(path: &Path) -> Result<Vec<VerifiedBrand>> {
    if !path.exists() {
        warn!(path = %path.display(), "検証済みブランド表がありません（類似度照合は常に該当なし）");
        return Ok(Vec::new());
    }

    let range = first_sheet(path)?;
    let mut rows = range.rows();
    let header: Vec<String> = match rows.next() {
        Some(row) => row.iter().map(cell_to_string).collect(),
        None => return Ok(Vec::new()),
    };

    let (col_name, col_atomic) = match (
        find_column(&header, BRAND_NAME_HEADER),
        find_column(&header, BRAND_ATOMIC_HEADER),
    ) {
        (Some(n), Some(a)) => (n, a),
        _ => {
            warn!(path = %path.display(), "必須列（{} / {}）がありません", BRAND_NAME_HEADER, BRAND_ATOMIC_HEADER);
            return Ok(Vec::new());
        }
    };
    let col_code = find_column(&header, BRAND_CODE_HEADER);
    let col_keywords = find_column(&header, BRAND_KEYWORDS_HEADER);

    let cell = |row: &[Data], col: Option<usize>| -> String {
        col.and_then(|c| row.get(c)).map(cell_to_string).unwrap_or_default()
    };

    let brands: Vec<VerifiedBrand> = rows
        .filter_map(|row| {
            let brand_name = cell(row, Some(col_name));
            if brand_name.is_empty() {
                return None;
            }
            Some(VerifiedBrand {
                brand_code: cell(row, col_code),
                brand_name,
                brand_keywords: cell(row, col_keywords),
                atomic_category: cell(row, Some(col_atomic)),
                embedding: None,
            })
        })
        .collect();

    info!(path = %path.display(), count = brands.len(), "検証済みブランド表を読み込みました");
    Ok(brands)
}

/// 入力テキストを行ごとに分割（BOM・空行を除去）
pub fn parse_input_text(text: &str) -> Vec<BatchItem> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| BatchItem::new(line, line))
        .collect()
}

/// 入力ファイルを読み込む
pub fn read_input_items(path: &Path) -> Result<Vec<BatchItem>> {
    if !path.exists() {
        return Err(CategoryMatchError::FileNotFound(path.display().to_string()));
    }
    let bytes = std::fs::read(path)?;
    let text = String::from_utf8(bytes).map_err(|e| {
        CategoryMatchError::Config(format!("UTF-8として読めません: {} ({})", path.display(), e))
    })?;
    Ok(parse_input_text(&text))
}

/// ユーザーが入力・ドラッグしたパスを正規化
///
/// 前後の空白と引号を除く。Unix 上では Windows のドライブ指定を WSL のマウント先に変換する
/// （`c:/Users/a.txt` → `/mnt/c/Users/a.txt`）。空なら None。
pub fn normalize_input_path(raw: &str) -> Option<PathBuf> {
    let s = raw
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '‘' | '’'))
        .trim();
    if s.is_empty() {
        return None;
    }
    if cfg!(unix) {
        if let Some(caps) = WINDOWS_DRIVE.captures(s) {
            let drive = caps[1].to_lowercase();
            let rest = caps[2].replace('\\', "/");
            let rest = rest.trim_matches('/');
            return Some(if rest.is_empty() {
                PathBuf::from(format!("/mnt/{}", drive))
            } else {
                PathBuf::from(format!("/mnt/{}/{}", drive, rest))
            });
        }
    }
    Some(PathBuf::from(s))
}
