//! 類似度照合
//!
//! 入力テキストと全ブランドのスコアを計算し、最大のものを候補にする。
//! スコア = w × 意味類似度（コサインを [0,1] に写像）+ (1 - w) × Jaro-Winkler

use crate::embedding::{embed_query, EmbeddingBackend};
use crate::error::Result;
use crate::orchestrator::SimilarityStage;
use async_trait::async_trait;
use category_match_common::{argmax_first, blended_score, CategoryRule, SimilarityMatch, VerifiedBrand};
use rayon::prelude::*;
use std::sync::Arc;
use tracing::debug;

/// 類似度照合器
///
/// ブランドのベクトルは事前に `fill_brand_embeddings` で埋めておくこと。
pub struct SimilarityMatcher {
    backend: Arc<dyn EmbeddingBackend>,
    brands: Arc<Vec<VerifiedBrand>>,
    blend_weight: f64,
}

impl SimilarityMatcher {
    pub fn new(backend: Arc<dyn EmbeddingBackend>, brands: Arc<Vec<VerifiedBrand>>, blend_weight: f64) -> Self {
        Self {
            backend,
            brands,
            blend_weight,
        }
    }

    /// 類似度照合
    ///
    /// # Arguments
    /// * `text` - 入力テキスト
    /// * `threshold` - これ未満のスコアは該当なし
    ///
    /// # Returns
    /// 最大スコアのブランドと、原子品类のみの合成規則。該当なしは `SimilarityMatch::none()`
    pub async fn match_by_similarity(&self, text: &str, threshold: f64) -> Result<SimilarityMatch> {
        let query = text.trim().to_string();
        if query.is_empty() || self.brands.is_empty() {
            return Ok(SimilarityMatch::none());
        }

        let query_vec = embed_query(Arc::clone(&self.backend), query.clone()).await?;
        let brands = Arc::clone(&self.brands);
        let w = self.blend_weight;

        // ブランド数に比例する計算なので非同期ワーカーの外で行う
        let best = tokio::task::spawn_blocking(move || {
            let scores = score_brands(&query_vec, &query, &brands, w);
            select_best(&query, &brands, &scores, threshold)
        })
        .await?;
        Ok(best)
    }
}

#[async_trait]
impl SimilarityStage for SimilarityMatcher {
    async fn best_match(&self, text: &str, threshold: f64) -> Result<SimilarityMatch> {
        self.match_by_similarity(text, threshold).await
    }
}

/// 全ブランドのスコアを並列計算（ブランド名が空なら負の無限大）
pub fn score_brands(query_vec: &[f32], query: &str, brands: &[VerifiedBrand], w: f64) -> Vec<f64> {
    brands
        .par_iter()
        .map(|brand| {
            if brand.brand_name.trim().is_empty() {
                return f64::NEG_INFINITY;
            }
            blended_score(
                query_vec,
                query,
                brand.embedding.as_deref(),
                &brand.brand_name,
                w,
            )
        })
        .collect()
}

/// 最大スコアのブランドを選ぶ（同点は規則表の順で先頭）
pub fn select_best(query: &str, brands: &[VerifiedBrand], scores: &[f64], threshold: f64) -> SimilarityMatch {
    let (index, score) = match argmax_first(scores) {
        Some(best) => best,
        None => return SimilarityMatch::none(),
    };
    if !score.is_finite() || score < threshold {
        debug!(query = %query, best = score, threshold, "類似度が閾値未満");
        return SimilarityMatch::none();
    }

    let brand = &brands[index];
    debug!(query = %query, brand = %brand.brand_name, score, "類似度候補");
    SimilarityMatch {
        rules: vec![CategoryRule::from_atomic(brand.atomic_category.trim())],
        brand: Some(brand.without_embedding()),
        score,
    }
}
