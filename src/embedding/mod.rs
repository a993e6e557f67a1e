//! 埋め込みランタイム
//!
//! 推論はすべて `spawn_blocking` 上で行い、非同期ワーカーを塞がない。
//! ブランドのベクトルは照合の前に一括で計算し、以降は再計算しない。

pub mod bge;
pub mod cache;

use crate::error::Result;
use crate::progress::progress_bar;
use cache::EmbeddingCache;
use category_match_common::VerifiedBrand;
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub use bge::BgeEmbedder;

/// 文埋め込みのバックエンド（同期・バッチ）
///
/// 返すベクトルは L2 正規化済みであること。
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

/// 一括埋め込みのオプション
#[derive(Debug, Clone)]
pub struct FillOptions {
    /// 1チャンクのテキスト数（進捗とメモリの単位）
    pub fill_chunk: usize,
    /// キャッシュファイルの置き場所（None ならキャッシュしない）
    pub cache_dir: Option<PathBuf>,
    pub show_progress: bool,
}

impl Default for FillOptions {
    fn default() -> Self {
        Self {
            fill_chunk: 16000,
            cache_dir: None,
            show_progress: false,
        }
    }
}

/// 一括埋め込みの統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillStats {
    pub total: usize,
    pub cache_hits: usize,
    pub computed: usize,
}

/// 1件の入力テキストを埋め込む
pub async fn embed_query(backend: Arc<dyn EmbeddingBackend>, text: String) -> Result<Vec<f32>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<f32>> {
        let mut vectors = backend.embed_batch(&[text.as_str()])?;
        Ok(vectors.pop().unwrap_or_default())
    })
    .await?
}

/// 全ブランドのベクトルを一括で計算して埋める
///
/// ブランド名が空のものは計算しない（意味類似度 0 として扱われる）。
/// 同名のブランドは1回だけ計算する。
///
/// # Arguments
/// * `backend` - 埋め込みバックエンド
/// * `brands` - 検証済みブランド（所有権を受け取り、ベクトルを埋めて返す）
/// * `options` - チャンクサイズとキャッシュの設定
pub async fn fill_brand_embeddings(
    backend: Arc<dyn EmbeddingBackend>,
    brands: Vec<VerifiedBrand>,
    options: FillOptions,
) -> Result<(Vec<VerifiedBrand>, FillStats)> {
    tokio::task::spawn_blocking(move || fill_blocking(backend.as_ref(), brands, &options)).await?
}

fn fill_blocking(
    backend: &dyn EmbeddingBackend,
    mut brands: Vec<VerifiedBrand>,
    options: &FillOptions,
) -> Result<(Vec<VerifiedBrand>, FillStats)> {
    let mut cache = match &options.cache_dir {
        Some(dir) => EmbeddingCache::load(dir, backend.model_id()),
        None => EmbeddingCache::new(backend.model_id()),
    };

    // 重複を除いたブランド名（出現順）
    let mut unique: Vec<String> = Vec::new();
    let mut seen: HashSet<&str> = HashSet::new();
    for brand in &brands {
        let name = brand.brand_name.trim();
        if !name.is_empty() && seen.insert(name) {
            unique.push(name.to_string());
        }
    }

    let (cached, missing) = cache::split_cached(&unique, &cache);
    let mut vectors: HashMap<String, Vec<f32>> = unique
        .iter()
        .zip(cached)
        .filter_map(|(name, v)| v.map(|v| (name.clone(), v)))
        .collect();

    let stats = FillStats {
        total: unique.len(),
        cache_hits: unique.len() - missing.len(),
        computed: missing.len(),
    };

    if !missing.is_empty() {
        let chunk = options.fill_chunk.max(1);
        let pb = options
            .show_progress
            .then(|| progress_bar(missing.len() as u64, "品牌向量"));

        for positions in missing.chunks(chunk) {
            let texts: Vec<&str> = positions.iter().map(|&i| unique[i].as_str()).collect();
            let computed = backend.embed_batch(&texts)?;
            for (text, vector) in texts.iter().zip(computed) {
                cache.insert(text, &vector);
                vectors.insert(text.to_string(), vector);
            }
            if let Some(pb) = &pb {
                pb.inc(positions.len() as u64);
            }
        }
        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        if let Some(dir) = &options.cache_dir {
            if let Err(e) = cache.save(dir) {
                warn!(error = %e, dir = %dir.display(), "埋め込みキャッシュの保存に失敗");
            }
        }
    }

    for brand in &mut brands {
        brand.embedding = vectors.get(brand.brand_name.trim()).cloned();
    }

    info!(
        brands = brands.len(),
        unique = stats.total,
        cache_hits = stats.cache_hits,
        computed = stats.computed,
        "ブランドベクトルを計算しました"
    );
    Ok((brands, stats))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use std::sync::atomic::Ordering;

    fn brand(name: &str) -> VerifiedBrand {
        VerifiedBrand {
            brand_name: name.to_string(),
            atomic_category: "奶茶".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fill_skips_empty_and_dedups() {
        let backend = Arc::new(CharEmbedder::new());
        let brands = vec![brand("喜茶"), brand(""), brand("喜茶"), brand("奈雪")];
        let options = FillOptions {
            fill_chunk: 1,
            ..Default::default()
        };
        let (filled, stats) = fill_brand_embeddings(backend.clone(), brands, options).await.unwrap();

        assert_eq!(stats.total, 2);
        assert_eq!(stats.computed, 2);
        assert_eq!(backend.texts.load(Ordering::SeqCst), 2);
        // チャンクサイズ 1 なので2回に分かれる
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!(filled[0].embedding.is_some());
        assert!(filled[1].embedding.is_none());
        assert_eq!(filled[0].embedding, filled[2].embedding);
    }

    #[tokio::test]
    async fn test_fill_uses_persisted_cache() {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let options = FillOptions {
            cache_dir: Some(dir.path().to_path_buf()),
            ..Default::default()
        };

        let first = Arc::new(CharEmbedder::new());
        let (_, stats) = fill_brand_embeddings(first, vec![brand("喜茶")], options.clone())
            .await
            .unwrap();
        assert_eq!(stats.computed, 1);
        assert!(dir.path().join(cache::CACHE_FILE_NAME).exists());

        let second = Arc::new(CharEmbedder::new());
        let (filled, stats) = fill_brand_embeddings(second.clone(), vec![brand("喜茶")], options)
            .await
            .unwrap();
        assert_eq!(stats.cache_hits, 1);
        assert_eq!(stats.computed, 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
        assert_eq!(filled[0].embedding.as_deref(), Some(char_vector("喜茶").as_slice()));
    }

    #[tokio::test]
    async fn test_embed_query() {
        let backend = Arc::new(CharEmbedder::new());
        let v = embed_query(backend, "喜茶".to_string()).await.unwrap();
        assert_eq!(v, char_vector("喜茶"));
    }
}
