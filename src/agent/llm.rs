//! OpenAI 互換 Chat Completions クライアント
//!
//! `POST {base_url}/chat/completions` に messages と tools を送り、
//! 返答の content と tool_calls を取り出す。

use crate::config::LlmConfig;
use crate::error::{CategoryMatchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// 会話メッセージ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Some(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new("system", content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new("user", content)
    }

    /// ツール呼び出しを要求した assistant の発話
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(calls),
            ..Self::new("assistant", content)
        }
    }

    /// ツールの実行結果
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.into()),
            ..Self::new("tool", content)
        }
    }
}

/// モデルが要求したツール呼び出し
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub kind: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    "function".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON 文字列（オブジェクトで返すプロバイダもあるので文字列化する）
    #[serde(default, deserialize_with = "arguments_as_string")]
    pub arguments: String,
}

fn arguments_as_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        Value::Null => "{}".to_string(),
        other => other.to_string(),
    })
}

/// モデルに渡すツール定義
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON Schema
    pub parameters: Value,
}

impl ToolSpec {
    pub fn to_openai(&self) -> Value {
        let parameters = if self.parameters.is_object() {
            self.parameters.clone()
        } else {
            serde_json::json!({"type": "object", "properties": {}})
        };
        serde_json::json!({
            "type": "function",
            "function": {
                "name": &self.name,
                "description": &self.description,
                "parameters": parameters,
            }
        })
    }
}

/// モデルの1回分の返答
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssistantReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl AssistantReply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    /// 空白以外の content
    pub fn non_empty_content(&self) -> Option<&str> {
        self.content.as_deref().map(str::trim).filter(|c| !c.is_empty())
    }
}

/// LLM バックエンド
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// ログ用のモデル名
    fn model(&self) -> &str;

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<AssistantReply>;
}

/// OpenAI 互換 API クライアント
#[derive(Clone)]
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl OpenAiCompatClient {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds.max(1)))
            .build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

#[derive(Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallRequest>>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ResponseMessage>,
}

#[derive(Deserialize)]
struct ApiResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[async_trait]
impl LlmBackend for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, messages: &[ChatMessage], tools: &[ToolSpec]) -> Result<AssistantReply> {
        let mut body = serde_json::json!({
            "model": &self.model,
            "messages": messages,
            "max_tokens": self.max_tokens,
        });
        if !tools.is_empty() {
            body["tools"] = Value::Array(tools.iter().map(ToolSpec::to_openai).collect());
        }

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let head: String = body.chars().take(300).collect();
            return Err(CategoryMatchError::Llm(format!("HTTP {}: {}", status, head)));
        }

        let text = response.text().await?;
        debug!(len = text.len(), "LLM レスポンス受信");

        let api: ApiResponse = serde_json::from_str(&text)
            .map_err(|e| CategoryMatchError::LlmParse(e.to_string()))?;

        let message = api.choices.into_iter().next().and_then(|c| c.message);
        Ok(match message {
            Some(m) => AssistantReply {
                content: m.content,
                tool_calls: m.tool_calls.unwrap_or_default(),
            },
            None => AssistantReply::default(),
        })
    }
}

/// scheme + host のみ残す（パス・クエリは出さない）
pub fn mask_base_url(url: &str) -> String {
    let url = url.trim();
    if url.is_empty() {
        return "(未設定)".to_string();
    }
    match reqwest::Url::parse(url) {
        Ok(parsed) => match parsed.host_str() {
            Some(host) => match parsed.port() {
                Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
                None => format!("{}://{}", parsed.scheme(), host),
            },
            None => "(不正なURL)".to_string(),
        },
        Err(_) => "(不正なURL)".to_string(),
    }
}
