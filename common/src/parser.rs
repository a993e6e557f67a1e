//! テキストパーサー
//!
//! - 規則表のキーワードセルを分割
//! - LLM の返答を「説明文」「見つからない」に分類
//! - content に埋め込まれたツール呼び出し（JSON / `<tool_call>` ブロック）を抽出

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

lazy_static! {
    static ref KEYWORD_SEPARATOR: Regex = Regex::new(r"[,，、]").unwrap();
    static ref TOOL_CALL_BLOCK: Regex =
        Regex::new(r"(?s)<tool_call>\s*(.*?)\s*(?:</tool_call>|\z)").unwrap();
    static ref CODE_FENCE: Regex = Regex::new(r"(?s)^```(?:json)?\s*(.*?)\s*```$").unwrap();
}

/// キーワードセルを分割
///
/// 区切り文字は `,` `，` `、`。前後の空白を除去し、空要素は捨てる。
///
/// # Examples
/// ```
/// use category_match_common::split_keywords;
///
/// assert_eq!(split_keywords("奶茶， 果茶、,茶饮"), vec!["奶茶", "果茶", "茶饮"]);
/// ```
pub fn split_keywords(cell: &str) -> Vec<String> {
    KEYWORD_SEPARATOR
        .split(cell)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// LLM 返答の分類
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionKind {
    /// 規則の再照合に使う説明文
    Description(String),
    /// 「見つからない」フレーズ（一致したフレーズを保持）
    NotFound(String),
}

/// LLM の返答を分類
///
/// 返答全体（末尾の句点を除く）がいずれかのフレーズと一致すれば NotFound。
/// 空の返答は None。
pub fn classify_description(content: &str, not_found_phrases: &[String]) -> Option<DescriptionKind> {
    let text = content.trim();
    if text.is_empty() {
        return None;
    }
    let bare = text.trim_end_matches(['。', '.', '！', '!']).trim_end();
    let hit = not_found_phrases
        .iter()
        .map(|p| p.trim())
        .find(|p| !p.is_empty() && (*p == text || *p == bare));
    match hit {
        Some(phrase) => Some(DescriptionKind::NotFound(phrase.to_string())),
        None => Some(DescriptionKind::Description(text.to_string())),
    }
}

/// content から復元したツール呼び出し
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedToolCall {
    pub name: String,
    /// 常に JSON オブジェクト（不正なら空オブジェクト）
    pub arguments: Value,
}

fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(text)
}

/// content がツール呼び出しの直列化に見えるか
pub fn looks_like_tool_call(content: &str) -> bool {
    let text = content.trim();
    if text.contains("<tool_call>") {
        return true;
    }
    let body = strip_code_fence(text);
    (body.starts_with('{') || body.starts_with('['))
        && (body.contains("\"tool_calls\"") || (body.contains("\"name\"") && body.contains("\"arguments\"")))
}

/// 引数を JSON オブジェクトに正規化（文字列なら再パース）
fn normalize_arguments(raw: Option<&Value>) -> Value {
    let value = match raw {
        Some(Value::String(s)) => serde_json::from_str::<Value>(s).unwrap_or(Value::Null),
        Some(v) => v.clone(),
        None => Value::Null,
    };
    match value {
        Value::Object(_) => value,
        _ => Value::Object(Map::new()),
    }
}

/// `{name, arguments}` または `{function: {name, arguments}}` を1件に変換
fn parse_single_call(value: &Value) -> Option<ParsedToolCall> {
    let obj = value.as_object()?;
    let inner = obj.get("function").and_then(Value::as_object).unwrap_or(obj);
    let name = inner.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let args = inner.get("arguments").or_else(|| inner.get("parameters"));
    Some(ParsedToolCall {
        name: name.to_string(),
        arguments: normalize_arguments(args),
    })
}

fn parse_calls_from_json(value: &Value) -> Vec<ParsedToolCall> {
    match value {
        Value::Array(items) => items.iter().filter_map(parse_single_call).collect(),
        Value::Object(obj) => match obj.get("tool_calls") {
            Some(Value::Array(items)) => items.iter().filter_map(parse_single_call).collect(),
            _ => parse_single_call(value).into_iter().collect(),
        },
        _ => Vec::new(),
    }
}

/// content に埋め込まれたツール呼び出しを抽出
///
/// 対応形式:
/// 1. `<tool_call>{...}</tool_call>` ブロック（複数可）
/// 2. `{"name": ..., "arguments": ...}` オブジェクト
/// 3. `{"tool_calls": [...]}` オブジェクト
///
/// # Returns
/// * `Some(calls)` - 1件以上復元できた
/// * `None` - ツール呼び出しではない、または復元できない
pub fn extract_embedded_tool_call(content: &str) -> Option<Vec<ParsedToolCall>> {
    let text = content.trim();

    if text.contains("<tool_call>") {
        let calls: Vec<ParsedToolCall> = TOOL_CALL_BLOCK
            .captures_iter(text)
            .filter_map(|c| c.get(1))
            .filter_map(|m| serde_json::from_str::<Value>(strip_code_fence(m.as_str())).ok())
            .flat_map(|v| parse_calls_from_json(&v))
            .collect();
        return if calls.is_empty() { None } else { Some(calls) };
    }

    let body = strip_code_fence(text);
    let value: Value = serde_json::from_str(body).ok()?;
    let calls = parse_calls_from_json(&value);
    if calls.is_empty() {
        None
    } else {
        Some(calls)
    }
}
