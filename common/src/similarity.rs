//! 類似度計算
//!
//! 語彙類似度（Jaro-Winkler）、コサイン類似度の [0,1] 写像、両者の加重ブレンド。

/// Jaro-Winkler 類似度（前後の空白を除去、どちらかが空なら 0）
pub fn jaro_winkler_similarity(a: &str, b: &str) -> f64 {
    let a = a.trim();
    let b = b.trim();
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    strsim::jaro_winkler(a, b)
}

/// L2 正規化済みベクトル同士のコサイン類似度
///
/// 長さが異なる場合・空の場合は None
pub fn cosine(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| *x as f64 * *y as f64).sum();
    Some(dot)
}

/// コサイン類似度 [-1,1] を [0,1] に写像
pub fn cosine_to_unit(cos: f64) -> f64 {
    ((cos + 1.0) / 2.0).clamp(0.0, 1.0)
}

/// 意味類似度と語彙類似度の加重ブレンド
///
/// `w * semantic + (1 - w) * lexical` を誤差なく端点が一致する形で計算する。
pub fn weighted(semantic: f64, lexical: f64, w: f64) -> f64 {
    let w = w.clamp(0.0, 1.0);
    (lexical + w * (semantic - lexical)).clamp(0.0, 1.0)
}

/// 1ブランドに対するスコア
///
/// # Arguments
/// * `query_vec` - 入力テキストの埋め込み（L2 正規化済み）
/// * `query` - 入力テキスト
/// * `brand_vec` - ブランド名の埋め込み（未計算なら None）
/// * `brand_name` - ブランド名
/// * `w` - 意味類似度の重み
pub fn blended_score(
    query_vec: &[f32],
    query: &str,
    brand_vec: Option<&[f32]>,
    brand_name: &str,
    w: f64,
) -> f64 {
    let semantic = brand_vec
        .and_then(|v| cosine(query_vec, v))
        .map(cosine_to_unit)
        .unwrap_or(0.0);
    let lexical = jaro_winkler_similarity(query, brand_name);
    weighted(semantic, lexical, w)
}

/// 最大スコアの位置（同点は先頭優先）
pub fn argmax_first(scores: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &s) in scores.iter().enumerate() {
        match best {
            Some((_, b)) if s <= b => {}
            _ => best = Some((i, s)),
        }
    }
    best
}
