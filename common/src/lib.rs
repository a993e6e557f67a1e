//! Category Match Common Library
//!
//! CLIとバッチ実行で共有される型・規則エンジン・レポート射影
//!
//! 三段カスケード（キーワード規則 → 類似度 → LLM検索）のうち、
//! I/O を持たない純粋なロジックをここに置く。

pub mod types;
pub mod error;
pub mod rules;
pub mod similarity;
pub mod prompts;
pub mod parser;
pub mod report;
pub mod export;

pub use types::{
    BatchItem, CategoryRule, MatchMethod, MatchOutcome, SimilarityCandidate, SimilarityMatch,
    VerifiedBrand,
};
pub use error::{Error, Result};
pub use rules::{evaluate, match_all};
pub use similarity::{argmax_first, blended_score, cosine_to_unit, jaro_winkler_similarity, weighted};
pub use prompts::{build_keyword_hint, build_system_prompt, PromptOptions};
pub use parser::{
    classify_description, extract_embedded_tool_call, looks_like_tool_call, split_keywords,
    DescriptionKind, ParsedToolCall,
};
pub use report::{build_result_row, similarity_detail, BatchSummary, ResultRow};
