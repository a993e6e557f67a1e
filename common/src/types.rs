//! 照合データの型定義
//!
//! CLIとバッチ実行で共有される型:
//! - CategoryRule: キーワード規則（規則表の1行）
//! - VerifiedBrand: 検証済みブランド（類似度照合の参照先）
//! - MatchOutcome: 1件のカスケード照合の終端状態
//! - BatchItem: バッチ入力の1件

use serde::{Deserialize, Serialize};
use std::fmt;

/// キーワード規則
///
/// 規則表から一度だけ読み込まれ、実行中は不変。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CategoryRule {
    pub level1_category: String,      // 一级原子品类
    pub category_code: String,        // 品类编码（数値セルも文字列で保持）
    pub atomic_category: String,      // 原子品类
    pub sequence_no: i64,             // 序号（参考情報）
    pub keyword_group_1: Vec<String>,
    pub keyword_group_2: Vec<String>,
    pub keyword_group_3: Vec<String>,
    pub keyword_group_4: Vec<String>,
    /// OR グループ（いずれか1つを含めば可）
    pub keyword_group_5: Vec<String>,
    pub must_not_contain: Vec<String>,
}

impl CategoryRule {
    /// 原子品类のみを持つ規則を合成（類似度照合の結果用）
    pub fn from_atomic(atomic_category: impl Into<String>) -> Self {
        Self {
            atomic_category: atomic_category.into(),
            ..Default::default()
        }
    }

    /// AND グループ1〜4
    pub fn and_groups(&self) -> [&[String]; 4] {
        [
            &self.keyword_group_1,
            &self.keyword_group_2,
            &self.keyword_group_3,
            &self.keyword_group_4,
        ]
    }

    /// キーワードグループ1〜5がすべて空（決してマッチしない）
    pub fn is_malformed(&self) -> bool {
        self.and_groups().iter().all(|g| g.is_empty()) && self.keyword_group_5.is_empty()
    }
}

/// 検証済みブランド
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifiedBrand {
    pub brand_code: String,
    pub brand_name: String,
    /// 参考情報のみ（照合には使わない）
    pub brand_keywords: String,
    pub atomic_category: String,
    /// 一括埋め込みで一度だけ計算されるベクトル
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

impl VerifiedBrand {
    /// ベクトルを除いた複製（照合結果に持たせる用）
    pub fn without_embedding(&self) -> Self {
        Self {
            brand_code: self.brand_code.clone(),
            brand_name: self.brand_name.clone(),
            brand_keywords: self.brand_keywords.clone(),
            atomic_category: self.atomic_category.clone(),
            embedding: None,
        }
    }
}

/// 類似度照合の結果
///
/// 該当なしの場合は rules が空、brand が None、score が 0.0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityMatch {
    pub rules: Vec<CategoryRule>,
    pub brand: Option<VerifiedBrand>,
    pub score: f64,
}

impl SimilarityMatch {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_match(&self) -> bool {
        self.brand.is_some() && !self.rules.is_empty()
    }

    /// 候補に変換（該当なしなら None）
    pub fn into_candidate(self) -> Option<SimilarityCandidate> {
        let brand = self.brand?;
        let rule = self.rules.into_iter().next()?;
        Some(SimilarityCandidate {
            rule,
            brand,
            score: self.score,
        })
    }
}

/// 類似度照合で選ばれた候補
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityCandidate {
    /// 原子品类のみを持つ合成規則
    pub rule: CategoryRule,
    pub brand: VerifiedBrand,
    pub score: f64,
}

/// 照合方式（レポートの methodTag）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchMethod {
    RuleMatched,
    SimilarityMatched,
    LlmRuleMatched,
    LlmSearchedUnmatched,
    LlmNotFound,
    Unmatched,
    Exception,
}

impl MatchMethod {
    pub const ALL: [MatchMethod; 7] = [
        MatchMethod::RuleMatched,
        MatchMethod::SimilarityMatched,
        MatchMethod::LlmRuleMatched,
        MatchMethod::LlmSearchedUnmatched,
        MatchMethod::LlmNotFound,
        MatchMethod::Unmatched,
        MatchMethod::Exception,
    ];

    pub fn tag(&self) -> &'static str {
        match self {
            MatchMethod::RuleMatched => "RuleMatched",
            MatchMethod::SimilarityMatched => "SimilarityMatched",
            MatchMethod::LlmRuleMatched => "LlmRuleMatched",
            MatchMethod::LlmSearchedUnmatched => "LlmSearchedUnmatched",
            MatchMethod::LlmNotFound => "LlmNotFound",
            MatchMethod::Unmatched => "Unmatched",
            MatchMethod::Exception => "Exception",
        }
    }

    /// 出力Excelに書く表示名
    pub fn label(&self) -> &'static str {
        match self {
            MatchMethod::RuleMatched => "规则",
            MatchMethod::SimilarityMatched => "相似度",
            MatchMethod::LlmRuleMatched => "搜索后匹配",
            MatchMethod::LlmSearchedUnmatched => "搜索后未匹配",
            MatchMethod::LlmNotFound => "未搜索到",
            MatchMethod::Unmatched => "未匹配",
            MatchMethod::Exception => "异常",
        }
    }

    /// 成功扱い（赤字にしない）かどうか
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            MatchMethod::RuleMatched | MatchMethod::SimilarityMatched | MatchMethod::LlmRuleMatched
        )
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// カスケード照合の終端状態
///
/// 各バリアントは ResultRow の構築に必要なデータをすべて持つ。
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// 入力テキストがキーワード規則に一致
    RuleMatched { rules: Vec<CategoryRule> },
    /// 類似度が LLM 閾値以上（または LLM が説明を返さなかった）
    SimilarityMatched(SimilarityCandidate),
    /// LLM の説明文がキーワード規則に一致
    LlmRuleMatched {
        rules: Vec<CategoryRule>,
        description: String,
    },
    /// LLM は説明を返したが規則に一致しない
    LlmSearchedUnmatched {
        candidate: SimilarityCandidate,
        description: String,
    },
    /// LLM が「見つからない」と明示
    LlmNotFound {
        candidate: SimilarityCandidate,
        marker: String,
    },
    Unmatched,
    /// パイプライン内の想定外エラー
    Exception { message: String },
}

impl MatchOutcome {
    pub fn method(&self) -> MatchMethod {
        match self {
            MatchOutcome::RuleMatched { .. } => MatchMethod::RuleMatched,
            MatchOutcome::SimilarityMatched(_) => MatchMethod::SimilarityMatched,
            MatchOutcome::LlmRuleMatched { .. } => MatchMethod::LlmRuleMatched,
            MatchOutcome::LlmSearchedUnmatched { .. } => MatchMethod::LlmSearchedUnmatched,
            MatchOutcome::LlmNotFound { .. } => MatchMethod::LlmNotFound,
            MatchOutcome::Unmatched => MatchMethod::Unmatched,
            MatchOutcome::Exception { .. } => MatchMethod::Exception,
        }
    }

    pub fn matched_rules(&self) -> &[CategoryRule] {
        match self {
            MatchOutcome::RuleMatched { rules } | MatchOutcome::LlmRuleMatched { rules, .. } => rules,
            MatchOutcome::SimilarityMatched(candidate)
            | MatchOutcome::LlmSearchedUnmatched { candidate, .. }
            | MatchOutcome::LlmNotFound { candidate, .. } => std::slice::from_ref(&candidate.rule),
            MatchOutcome::Unmatched | MatchOutcome::Exception { .. } => &[],
        }
    }

    fn candidate(&self) -> Option<&SimilarityCandidate> {
        match self {
            MatchOutcome::SimilarityMatched(candidate)
            | MatchOutcome::LlmSearchedUnmatched { candidate, .. }
            | MatchOutcome::LlmNotFound { candidate, .. } => Some(candidate),
            _ => None,
        }
    }

    pub fn from_similarity(&self) -> bool {
        self.candidate().is_some()
    }

    pub fn reference_brand(&self) -> Option<&VerifiedBrand> {
        self.candidate().map(|c| &c.brand)
    }

    /// 類似度（from_similarity の場合のみ意味を持つ）
    pub fn score(&self) -> f64 {
        self.candidate().map(|c| c.score).unwrap_or(0.0)
    }

    pub fn llm_description(&self) -> Option<&str> {
        match self {
            MatchOutcome::LlmRuleMatched { description, .. }
            | MatchOutcome::LlmSearchedUnmatched { description, .. } => Some(description),
            MatchOutcome::LlmNotFound { marker, .. } => Some(marker),
            _ => None,
        }
    }
}

/// バッチ入力の1件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchItem {
    pub external_id: String,
    pub raw_text: String,
}

impl BatchItem {
    pub fn new(external_id: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            external_id: external_id.into(),
            raw_text: raw_text.into(),
        }
    }

    /// 照合に使うテキスト（前後の空白を除去）
    pub fn text(&self) -> &str {
        self.raw_text.trim()
    }
}
