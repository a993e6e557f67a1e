//! 照合パイプラインの結合テスト
//!
//! xlsx の規則表・ブランド表を作成し、読み込み → 埋め込み → カスケード → Excel 出力までを通す。
//! 埋め込みは文字ベースのテスト用バックエンド、LLM は httpmock で代替する。

use calamine::{open_workbook_auto, Reader};
use category_match::config::Config;
use category_match::context::RunContext;
use category_match::embedding::cache::CACHE_FILE_NAME;
use category_match::embedding::EmbeddingBackend;
use category_match::error::Result;
use category_match::loader::{self, cell_to_string};
use category_match::session::process_file;
use category_match_common::MatchMethod;
use httpmock::prelude::*;
use rust_xlsxwriter::Workbook;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

/// 文字コードから決定的なベクトルを作る
struct CharEmbedder;

impl EmbeddingBackend for CharEmbedder {
    fn model_id(&self) -> &str {
        "test/char"
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; 8];
                for c in text.chars() {
                    v[(c as usize) % 8] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                v.into_iter().map(|x| x / norm).collect()
            })
            .collect())
    }
}

// ============================================
// テストデータ
// ============================================

fn write_rules(path: &Path) {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.write_string(0, 0, "判定逻辑：关键词组1-4任一组全部包含，且包含关键词组5任一，且不包含排除词").unwrap();
    let headers = [
        "一级原子品类", "品类编码", "原子品类", "序号",
        "关键词组1", "关键词组2", "关键词组3", "关键词组4", "关键词组5", "一定不包含",
    ];
    for (col, h) in headers.iter().enumerate() {
        ws.write_string(1, col as u16, *h).unwrap();
    }

    let rows: [(&str, f64, &str, f64, &str, &str); 2] = [
        ("餐饮", 1001.0, "奶茶", 1.0, "奶茶", "设备"),
        ("餐饮", 1002.0, "咖啡", 2.0, "咖啡", "咖啡机"),
    ];
    for (i, (level1, code, atomic, seq, g1, not)) in rows.iter().enumerate() {
        let r = (i + 2) as u32;
        ws.write_string(r, 0, *level1).unwrap();
        ws.write_number(r, 1, *code).unwrap();
        ws.write_string(r, 2, *atomic).unwrap();
        ws.write_number(r, 3, *seq).unwrap();
        ws.write_string(r, 4, *g1).unwrap();
        ws.write_string(r, 9, *not).unwrap();
    }
    workbook.save(path).unwrap();
}

fn write_brands(path: &Path) {
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    for (col, h) in ["品牌编码", "品牌名称", "原子品类"].iter().enumerate() {
        ws.write_string(0, col as u16, *h).unwrap();
    }
    let brands = [("B001", "喜茶", "奶茶"), ("B002", "瑞幸咖啡", "咖啡")];
    for (i, (code, name, atomic)) in brands.iter().enumerate() {
        let r = (i + 1) as u32;
        ws.write_string(r, 0, *code).unwrap();
        ws.write_string(r, 1, *name).unwrap();
        ws.write_string(r, 2, *atomic).unwrap();
    }
    workbook.save(path).unwrap();
}

fn chat_reply(content: &str) -> serde_json::Value {
    json!({"choices": [{"message": {"role": "assistant", "content": content}}]})
}

// ============================================
// 読み込み
// ============================================

#[test]
fn test_load_catalogs_from_xlsx() {
    let dir = tempdir().expect("Failed to create temp dir");
    let rules_path = dir.path().join("rules.xlsx");
    let brands_path = dir.path().join("brands.xlsx");
    write_rules(&rules_path);
    write_brands(&brands_path);

    let rules = loader::load_rules(&rules_path).unwrap();
    assert_eq!(rules.len(), 2);
    assert_eq!(rules[0].category_code, "1001");
    assert_eq!(rules[0].atomic_category, "奶茶");
    assert_eq!(rules[0].sequence_no, 1);
    assert_eq!(rules[0].keyword_group_1, vec!["奶茶"]);
    assert_eq!(rules[1].must_not_contain, vec!["咖啡机"]);

    let brands = loader::load_verified_brands(&brands_path).unwrap();
    assert_eq!(brands.len(), 2);
    assert_eq!(brands[1].brand_code, "B002");
    assert_eq!(brands[1].brand_name, "瑞幸咖啡");
    assert!(brands[1].brand_keywords.is_empty());
}

#[test]
fn test_brands_without_required_columns() {
    let dir = tempdir().expect("Failed to create temp dir");
    let path = dir.path().join("brands.xlsx");
    let mut workbook = Workbook::new();
    let ws = workbook.add_worksheet();
    ws.write_string(0, 0, "名称").unwrap();
    ws.write_string(1, 0, "喜茶").unwrap();
    workbook.save(&path).unwrap();

    assert!(loader::load_verified_brands(&path).unwrap().is_empty());
}

// ============================================
// パイプライン全体
// ============================================

#[tokio::test]
async fn test_full_pipeline_writes_ordered_report() {
    let dir = tempdir().expect("Failed to create temp dir");
    let excel_dir = dir.path().join("excel");
    std::fs::create_dir_all(&excel_dir).unwrap();

    let mut config = Config::default();
    config.app.excel_dir = excel_dir.clone();
    config.app.output_dir = dir.path().join("output");
    write_rules(&config.app.rules_path());
    write_brands(&config.app.verified_path());

    let server = MockServer::start_async().await;
    let described = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_includes("星巴克门店");
            then.status(200).json_body(chat_reply("连锁咖啡品牌"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_includes("某某某");
            then.status(200).json_body(chat_reply("未匹配到结果"));
        })
        .await;
    server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/v1/chat/completions")
                .body_includes("便利店甲");
            then.status(200).json_body(chat_reply("社区便利店"));
        })
        .await;

    config.llm.api_key = Some("sk-test".into());
    config.llm.base_url = server.url("/v1");
    config.llm.timeout_seconds = 5;

    let ctx = RunContext::build_with_backend(config, Arc::new(CharEmbedder), false)
        .await
        .unwrap();
    assert_eq!(ctx.summary.rules, 2);
    assert_eq!(ctx.summary.brands, 2);
    assert_eq!(ctx.summary.embeddings.computed, 2);
    assert!(ctx.summary.llm_enabled);
    assert!(ctx.summary.tool_names.is_empty());
    assert!(excel_dir.join(CACHE_FILE_NAME).exists());

    let input = dir.path().join("门店清单.txt");
    std::fs::write(&input, "喜茶奶茶店\n喜茶\n星巴克门店\n\n某某某\n便利店甲\n").unwrap();

    let output_dir = dir.path().join("output");
    let done = process_file(&ctx, &input, &output_dir, false)
        .await
        .unwrap()
        .expect("有効な行がある");
    described.assert_async().await;

    assert_eq!(done.summary.total, 5);
    assert_eq!(done.summary.count(MatchMethod::RuleMatched), 1);
    assert_eq!(done.summary.count(MatchMethod::SimilarityMatched), 1);
    assert_eq!(done.summary.count(MatchMethod::LlmRuleMatched), 1);
    assert_eq!(done.summary.count(MatchMethod::LlmNotFound), 1);
    assert_eq!(done.summary.count(MatchMethod::LlmSearchedUnmatched), 1);

    let file_name = done.output_path.file_name().unwrap().to_str().unwrap();
    assert!(file_name.starts_with("门店清单_匹配结果_"));

    // 出力Excelを読み戻して順序と内容を確認
    let mut workbook = open_workbook_auto(&done.output_path).unwrap();
    let range = workbook.worksheet_range("匹配结果").unwrap();
    let rows: Vec<Vec<String>> = range
        .rows()
        .map(|r| r.iter().map(cell_to_string).collect())
        .collect();

    assert_eq!(rows.len(), 6);
    assert_eq!(rows[0][0], "品类名称");

    let names: Vec<&str> = rows[1..].iter().map(|r| r[0].as_str()).collect();
    assert_eq!(names, vec!["喜茶奶茶店", "喜茶", "星巴克门店", "某某某", "便利店甲"]);

    let methods: Vec<&str> = rows[1..].iter().map(|r| r[4].as_str()).collect();
    assert_eq!(
        methods,
        vec![
            MatchMethod::RuleMatched.label(),
            MatchMethod::SimilarityMatched.label(),
            MatchMethod::LlmRuleMatched.label(),
            MatchMethod::LlmNotFound.label(),
            MatchMethod::LlmSearchedUnmatched.label(),
        ]
    );

    // 規則一致
    assert_eq!(rows[1][1], "餐饮");
    assert_eq!(rows[1][2], "1001");
    assert_eq!(rows[1][3], "奶茶");
    assert_eq!(rows[1][5], "已使用关键词匹配到");
    // 類似度一致
    assert_eq!(rows[2][3], "奶茶");
    assert!(rows[2][5].starts_with("喜茶（B001） 原子品类 奶茶 相似度 "));
    // LLM 説明文が規則に一致
    assert_eq!(rows[3][3], "咖啡");
    assert_eq!(rows[3][6], "连锁咖啡品牌");
    // 見つからない: カテゴリ列は空
    assert_eq!(rows[4][3], "");
    assert_eq!(rows[4][5], "未匹配到结果");
    // 検索後未一致: 類似度の候補を残す
    assert!(!rows[5][3].is_empty());
    assert_eq!(rows[5][6], "社区便利店");
}

#[tokio::test]
async fn test_missing_rules_aborts_setup() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.app.excel_dir = dir.path().to_path_buf();

    let result = RunContext::build_with_backend(config, Arc::new(CharEmbedder), false).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_empty_input_file() {
    let dir = tempdir().expect("Failed to create temp dir");
    let mut config = Config::default();
    config.app.excel_dir = dir.path().to_path_buf();
    config.llm.api_key = None;
    write_rules(&config.app.rules_path());

    let ctx = RunContext::build_with_backend(config, Arc::new(CharEmbedder), false)
        .await
        .unwrap();
    assert_eq!(ctx.summary.brands, 0);

    let input = dir.path().join("空.txt");
    std::fs::write(&input, "\n  \n").unwrap();
    let done = process_file(&ctx, &input, &dir.path().join("out"), false).await.unwrap();
    assert!(done.is_none());
}
