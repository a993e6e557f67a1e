//! 埋め込みベクトルキャッシュモジュール
//!
//! モデルID + ブランド名の SHA-256 をキーにしてベクトルを保存し、
//! 次回以降の一括埋め込みで同じブランド名の推論をスキップする。

use crate::error::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const CACHE_FILE_NAME: &str = ".embedding-cache.json";

/// キャッシュファイルの構造
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingCache {
    /// バージョン（互換性チェック用）
    version: u32,
    /// 生成に使ったモデル
    model_id: String,
    /// キー（sha256 hex） → エントリ
    entries: HashMap<String, CacheEntry>,
}

/// キャッシュエントリ
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// ブランド名（確認用）
    pub text: String,
    /// 次元数
    pub dim: usize,
    /// f32 リトルエンディアンの base64
    pub vector: String,
}

impl EmbeddingCache {
    const CURRENT_VERSION: u32 = 1;

    pub fn new(model_id: &str) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            model_id: model_id.to_string(),
            entries: HashMap::new(),
        }
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(CACHE_FILE_NAME)
    }

    /// キャッシュファイルを読み込み
    ///
    /// バージョンまたはモデルが異なる場合は空のキャッシュを返す。
    pub fn load(dir: &Path, model_id: &str) -> Self {
        let cache_path = Self::path(dir);
        if !cache_path.exists() {
            return Self::new(model_id);
        }

        let file = match File::open(&cache_path) {
            Ok(f) => f,
            Err(_) => return Self::new(model_id),
        };

        let reader = BufReader::new(file);
        match serde_json::from_reader::<_, EmbeddingCache>(reader) {
            Ok(cache) => {
                if cache.version != Self::CURRENT_VERSION {
                    warn!(found = cache.version, "キャッシュバージョン不一致、再生成します");
                    return Self::new(model_id);
                }
                if cache.model_id != model_id {
                    warn!(cached = %cache.model_id, current = %model_id, "キャッシュのモデル不一致、再生成します");
                    return Self::new(model_id);
                }
                debug!(entries = cache.entries.len(), "埋め込みキャッシュを読み込みました");
                cache
            }
            Err(e) => {
                warn!(error = %e, "キャッシュ読み込み失敗、再生成します");
                Self::new(model_id)
            }
        }
    }

    /// キャッシュファイルを保存
    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let file = File::create(Self::path(dir))?;
        let writer = BufWriter::new(file);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// キャッシュファイルを削除
    ///
    /// # Returns
    /// 削除した場合 true
    pub fn clear(dir: &Path) -> Result<bool> {
        let path = Self::path(dir);
        if path.exists() {
            std::fs::remove_file(path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// キー（モデルID + テキストの SHA-256）
    pub fn key(&self, text: &str) -> String {
        cache_key(&self.model_id, text)
    }

    /// キャッシュをルックアップ（壊れたエントリは None）
    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let entry = self.entries.get(&self.key(text))?;
        let vector = decode_vector(&entry.vector)?;
        if vector.len() != entry.dim {
            return None;
        }
        Some(vector)
    }

    /// キャッシュに追加
    pub fn insert(&mut self, text: &str, vector: &[f32]) {
        let key = self.key(text);
        self.entries.insert(
            key,
            CacheEntry {
                text: text.to_string(),
                dim: vector.len(),
                vector: encode_vector(vector),
            },
        );
    }

    /// キャッシュ件数
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// キャッシュキーを計算
pub fn cache_key(model_id: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// f32 ベクトルを base64 に変換
pub fn encode_vector(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|v| v.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

/// base64 から f32 ベクトルに戻す
pub fn decode_vector(encoded: &str) -> Option<Vec<f32>> {
    let bytes = STANDARD.decode(encoded).ok()?;
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect(),
    )
}

/// キャッシュ済みのベクトルとキャッシュにないテキストに振り分け
///
/// # Returns
/// (各テキストのキャッシュ済みベクトル, 未キャッシュのテキスト位置)
pub fn split_cached(texts: &[String], cache: &EmbeddingCache) -> (Vec<Option<Vec<f32>>>, Vec<usize>) {
    let mut vectors = Vec::with_capacity(texts.len());
    let mut missing = Vec::new();

    for (i, text) in texts.iter().enumerate() {
        match cache.get(text) {
            Some(v) => vectors.push(Some(v)),
            None => {
                vectors.push(None);
                missing.push(i);
            }
        }
    }

    (vectors, missing)
}
