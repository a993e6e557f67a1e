//! 結果行の射影とバッチ集計
//!
//! MatchOutcome を出力Excelの1行（ResultRow）に変換する。

use crate::types::{BatchItem, CategoryRule, MatchMethod, MatchOutcome, VerifiedBrand};
use serde::Serialize;
use std::collections::BTreeMap;

/// キーワード規則一致時の詳細欄
pub const RULE_MATCH_DETAIL: &str = "已使用关键词匹配到";

/// 複数規則の連結区切り
pub const MULTI_VALUE_SEPARATOR: &str = "；";

/// 出力の1行
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRow {
    pub external_id: String,
    pub display_name: String,
    pub level1_category: String,
    pub category_code: String,
    pub atomic_category: String,
    pub method: MatchMethod,
    pub detail: String,
    pub llm_description: String,
}

impl ResultRow {
    pub fn method_tag(&self) -> &'static str {
        self.method.tag()
    }

    /// 赤字で強調する行か
    pub fn is_flagged(&self) -> bool {
        !self.method.is_success()
    }
}

/// 規則の各列を `；` で連結（空値は除外）
fn join_column<F>(rules: &[CategoryRule], f: F) -> String
where
    F: Fn(&CategoryRule) -> &str,
{
    rules
        .iter()
        .map(|r| f(r).trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(MULTI_VALUE_SEPARATOR)
}

/// 類似度一致の詳細欄: `brandName（code） 原子品类 X 相似度 0.xxxx`
pub fn similarity_detail(brand: &VerifiedBrand, score: f64) -> String {
    let mut detail = String::new();
    if !brand.brand_name.is_empty() {
        detail.push_str(&brand.brand_name);
    }
    if !brand.brand_code.is_empty() {
        detail.push_str(&format!("（{}）", brand.brand_code));
    }
    let atomic = brand.atomic_category.trim();
    if !atomic.is_empty() {
        detail.push_str(&format!(" 原子品类 {}", atomic));
    }
    detail.push_str(&format!(" 相似度 {:.4}", score));
    detail.trim().to_string()
}

/// MatchOutcome を ResultRow に変換
///
/// # Arguments
/// * `item` - バッチ入力
/// * `outcome` - カスケードの終端状態
pub fn build_result_row(item: &BatchItem, outcome: &MatchOutcome) -> ResultRow {
    let method = outcome.method();

    let detail = match outcome {
        MatchOutcome::RuleMatched { .. } => RULE_MATCH_DETAIL.to_string(),
        MatchOutcome::SimilarityMatched(candidate) => similarity_detail(&candidate.brand, candidate.score),
        MatchOutcome::LlmRuleMatched { description, .. }
        | MatchOutcome::LlmSearchedUnmatched { description, .. } => description.clone(),
        MatchOutcome::LlmNotFound { marker, .. } => marker.clone(),
        MatchOutcome::Unmatched => String::new(),
        MatchOutcome::Exception { message } => message.clone(),
    };

    // 未搜索到・未匹配・异常はカテゴリ列を空にする
    let rules: &[CategoryRule] = match method {
        MatchMethod::LlmNotFound | MatchMethod::Unmatched | MatchMethod::Exception => &[],
        _ => outcome.matched_rules(),
    };

    ResultRow {
        external_id: item.external_id.clone(),
        display_name: item.text().to_string(),
        level1_category: join_column(rules, |r| &r.level1_category),
        category_code: join_column(rules, |r| &r.category_code),
        atomic_category: join_column(rules, |r| &r.atomic_category),
        method,
        detail,
        llm_description: outcome.llm_description().unwrap_or_default().to_string(),
    }
}

/// バッチ集計（methodTag ごとの件数）
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub counts: BTreeMap<MatchMethod, usize>,
}

impl BatchSummary {
    pub fn from_rows(rows: &[ResultRow]) -> Self {
        let mut counts = BTreeMap::new();
        for row in rows {
            *counts.entry(row.method).or_insert(0) += 1;
        }
        Self {
            total: rows.len(),
            counts,
        }
    }

    pub fn count(&self, method: MatchMethod) -> usize {
        self.counts.get(&method).copied().unwrap_or(0)
    }

    /// 成功扱いの件数
    pub fn succeeded(&self) -> usize {
        self.counts
            .iter()
            .filter(|(m, _)| m.is_success())
            .map(|(_, n)| n)
            .sum()
    }

    /// 赤字行の件数
    pub fn flagged(&self) -> usize {
        self.total - self.succeeded()
    }
}
