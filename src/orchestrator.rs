//! カスケード照合
//!
//! 1件ごとに 規則 → 類似度 → LLM の順に試し、終端状態を決める。
//! 各段はトレイトで注入する（テストではモックに差し替える）。

use crate::config::MatchingConfig;
use crate::error::Result;
use async_trait::async_trait;
use category_match_common::{classify_description, match_all, CategoryRule, DescriptionKind, MatchOutcome, SimilarityMatch};
use std::sync::Arc;
use tracing::debug;

/// 類似度照合の段
#[async_trait]
pub trait SimilarityStage: Send + Sync {
    /// 閾値以上で最大スコアの候補（なければ `SimilarityMatch::none()`）
    async fn best_match(&self, text: &str, threshold: f64) -> Result<SimilarityMatch>;
}

/// 説明文生成の段（失敗は None、エラーは返さない）
#[async_trait]
pub trait DescriptionStage: Send + Sync {
    async fn describe(&self, text: &str) -> Option<String>;
}

/// 1件分のカスケードを実行する
pub struct MatchOrchestrator {
    rules: Arc<Vec<CategoryRule>>,
    similarity: Arc<dyn SimilarityStage>,
    describer: Option<Arc<dyn DescriptionStage>>,
    settings: MatchingConfig,
}

impl MatchOrchestrator {
    /// # Arguments
    /// * `rules` - キーワード規則（読み取り専用で共有）
    /// * `similarity` - 類似度照合の段
    /// * `describer` - LLM の段（API キーがなければ None）
    /// * `settings` - 閾値と「見つからない」フレーズ
    pub fn new(
        rules: Arc<Vec<CategoryRule>>,
        similarity: Arc<dyn SimilarityStage>,
        describer: Option<Arc<dyn DescriptionStage>>,
        settings: MatchingConfig,
    ) -> Self {
        Self {
            rules,
            similarity,
            describer,
            settings,
        }
    }

    /// 1件を照合して終端状態を返す
    ///
    /// 類似度の段のエラーだけが `Err` になる（呼び出し側で Exception 行にする）。
    pub async fn match_one(&self, text: &str) -> Result<MatchOutcome> {
        let text = text.trim();

        // 1. 規則
        let rules = match_all(text, &self.rules);
        if !rules.is_empty() {
            debug!(text = %text, rules = rules.len(), "規則に一致");
            return Ok(MatchOutcome::RuleMatched { rules });
        }

        // 2. 類似度
        let candidate = match self
            .similarity
            .best_match(text, self.settings.similarity_threshold)
            .await?
            .into_candidate()
        {
            Some(candidate) => candidate,
            None => return Ok(MatchOutcome::Unmatched),
        };
        if candidate.score >= self.settings.llm_fallback_threshold {
            return Ok(MatchOutcome::SimilarityMatched(candidate));
        }

        // 3. LLM
        let description = match &self.describer {
            Some(describer) => describer.describe(text).await,
            None => None,
        };
        let description = match description {
            Some(d) => d,
            None => {
                debug!(text = %text, score = candidate.score, "説明なし、類似度の候補を採用");
                return Ok(MatchOutcome::SimilarityMatched(candidate));
            }
        };

        match classify_description(&description, &self.settings.not_found_phrases) {
            Some(DescriptionKind::NotFound(_)) => Ok(MatchOutcome::LlmNotFound {
                candidate,
                marker: self.settings.not_found_marker.clone(),
            }),
            Some(DescriptionKind::Description(description)) => {
                let rules = match_all(&description, &self.rules);
                if rules.is_empty() {
                    Ok(MatchOutcome::LlmSearchedUnmatched { candidate, description })
                } else {
                    Ok(MatchOutcome::LlmRuleMatched { rules, description })
                }
            }
            None => Ok(MatchOutcome::SimilarityMatched(candidate)),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use category_match_common::MatchMethod;

    fn orchestrator(similarity: FixedSimilarity, describer: Option<Arc<FixedDescriber>>) -> MatchOrchestrator {
        orchestrator_with_rules(vec![tea_rule()], similarity, describer)
    }

    fn orchestrator_with_rules(
        rules: Vec<CategoryRule>,
        similarity: FixedSimilarity,
        describer: Option<Arc<FixedDescriber>>,
    ) -> MatchOrchestrator {
        MatchOrchestrator::new(
            Arc::new(rules),
            Arc::new(similarity),
            describer.map(|d| d as Arc<dyn DescriptionStage>),
            MatchingConfig::default(),
        )
    }

    // ============================================
    // 終端状態
    // ============================================

    #[tokio::test]
    async fn test_rule_matched_skips_later_stages() {
        let describer = Arc::new(FixedDescriber::new(Some("x")));
        let o = orchestrator(FixedSimilarity::default(), Some(describer.clone()));
        let outcome = o.match_one("喜茶奶茶店").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::RuleMatched);
        assert_eq!(outcome.matched_rules()[0].atomic_category, "奶茶");
        assert_eq!(describer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_high_similarity_skips_llm() {
        let describer = Arc::new(FixedDescriber::new(Some("茶饮")));
        let o = orchestrator(
            FixedSimilarity::default().with("喜茶", "奶茶", 0.95),
            Some(describer.clone()),
        );
        let outcome = o.match_one("喜茶").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::SimilarityMatched);
        assert!((outcome.score() - 0.95).abs() < 1e-9);
        assert_eq!(describer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_threshold_is_inclusive() {
        let describer = Arc::new(FixedDescriber::new(Some("茶饮")));
        let o = orchestrator(FixedSimilarity::default().with("喜茶", "奶茶", 0.9), Some(describer.clone()));
        assert_eq!(o.match_one("喜茶").await.unwrap().method(), MatchMethod::SimilarityMatched);
        assert_eq!(describer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_llm_rule_matched() {
        let describer = Arc::new(FixedDescriber::new(Some("新式茶饮品牌")));
        let o = orchestrator(FixedSimilarity::default().with("喜茶", "咖啡", 0.5), Some(describer.clone()));
        let outcome = o.match_one("喜茶").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::LlmRuleMatched);
        assert_eq!(outcome.matched_rules()[0].atomic_category, "奶茶");
        assert_eq!(outcome.llm_description(), Some("新式茶饮品牌"));
        assert_eq!(describer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_llm_searched_unmatched_keeps_candidate() {
        let describer = Arc::new(FixedDescriber::new(Some("一家连锁便利店")));
        let o = orchestrator(FixedSimilarity::default().with("罗森", "咖啡", 0.5), Some(describer));
        let outcome = o.match_one("罗森").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::LlmSearchedUnmatched);
        assert_eq!(outcome.matched_rules()[0].atomic_category, "咖啡");
        assert_eq!(outcome.llm_description(), Some("一家连锁便利店"));
    }

    #[tokio::test]
    async fn test_llm_not_found() {
        let describer = Arc::new(FixedDescriber::new(Some("未匹配到。")));
        let o = orchestrator(FixedSimilarity::default().with("xyz", "咖啡", 0.5), Some(describer));
        let outcome = o.match_one("xyz").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::LlmNotFound);
        match outcome {
            MatchOutcome::LlmNotFound { marker, .. } => assert_eq!(marker, "未匹配到结果"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_silent_llm_failure_keeps_similarity() {
        let describer = Arc::new(FixedDescriber::new(None));
        let o = orchestrator(FixedSimilarity::default().with("喜茶", "咖啡", 0.5), Some(describer.clone()));
        let outcome = o.match_one("喜茶").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::SimilarityMatched);
        assert_eq!(describer.call_count(), 1);
    }

    #[tokio::test]
    async fn test_no_describer_keeps_similarity() {
        let o = orchestrator(FixedSimilarity::default().with("喜茶", "咖啡", 0.5), None);
        assert_eq!(o.match_one("喜茶").await.unwrap().method(), MatchMethod::SimilarityMatched);
    }

    #[tokio::test]
    async fn test_no_candidate_is_unmatched() {
        let describer = Arc::new(FixedDescriber::new(Some("茶饮")));
        let o = orchestrator(FixedSimilarity::default(), Some(describer.clone()));
        assert_eq!(o.match_one("???").await.unwrap(), MatchOutcome::Unmatched);
        assert_eq!(describer.call_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_rules_still_cascade() {
        let o = MatchOrchestrator::new(
            Arc::new(vec![]),
            Arc::new(FixedSimilarity::default()),
            None,
            MatchingConfig::default(),
        );
        assert_eq!(o.match_one("喜茶奶茶").await.unwrap(), MatchOutcome::Unmatched);
    }

    #[tokio::test]
    async fn test_similarity_error_propagates() {
        let similarity = FixedSimilarity {
            fail_on: Some("坏".into()),
            ..Default::default()
        };
        let o = orchestrator(similarity, None);
        assert!(o.match_one("坏").await.is_err());
    }

    // ============================================
    // 代表シナリオ
    // ============================================

    #[tokio::test]
    async fn test_scenario_single_group_rule() {
        let rule = CategoryRule {
            atomic_category: "奶茶".into(),
            keyword_group_1: vec!["奶茶".into()],
            ..Default::default()
        };
        let o = orchestrator_with_rules(vec![rule], FixedSimilarity::default(), None);
        let outcome = o.match_one("喜茶奶茶店").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::RuleMatched);
        assert_eq!(outcome.matched_rules()[0].atomic_category, "奶茶");
    }

    #[tokio::test]
    async fn test_scenario_no_rules_high_similarity() {
        let describer = Arc::new(FixedDescriber::new(Some("未匹配到结果")));
        let similarity = FixedSimilarity::default().with_brand("Heytea喜茶", "喜茶", "奶茶", 0.95);
        let o = orchestrator_with_rules(vec![], similarity, Some(describer.clone()));

        let outcome = o.match_one("Heytea喜茶").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::SimilarityMatched);
        assert_eq!(outcome.matched_rules()[0].atomic_category, "奶茶");
        assert_eq!(describer.call_count(), 0);
        match outcome {
            MatchOutcome::SimilarityMatched(candidate) => {
                assert_eq!(candidate.brand.brand_name, "喜茶");
                assert_eq!(candidate.score, 0.95);
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_scenario_no_rules_low_similarity_not_found() {
        let describer = Arc::new(FixedDescriber::new(Some("未匹配到结果")));
        let similarity = FixedSimilarity::default().with_brand("Heytea喜茶", "喜茶", "奶茶", 0.5);
        let o = orchestrator_with_rules(vec![], similarity, Some(describer.clone()));

        let outcome = o.match_one("Heytea喜茶").await.unwrap();
        assert_eq!(outcome.method(), MatchMethod::LlmNotFound);
        assert_eq!(describer.call_count(), 1);
    }
}
