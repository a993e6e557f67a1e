//! エージェント型フォールバック
//!
//! 類似度が低いときだけ呼ばれる。LLM にツール（MCP）を使わせながら
//! 入力テキストの説明文を書かせ、その説明文を規則エンジンで再照合する。
//! 失敗はすべて「説明なし」に落とし、エラーは外へ出さない。

pub mod llm;
pub mod mcp;
pub mod tools;

use crate::logging::summary;
use crate::orchestrator::DescriptionStage;
use async_trait::async_trait;
use category_match_common::{build_system_prompt, extract_embedded_tool_call, looks_like_tool_call, ParsedToolCall};
use llm::{ChatMessage, FunctionCall, LlmBackend, ToolCallRequest};
use std::sync::Arc;
use std::time::Instant;
use tools::{parse_arguments, ToolRegistry};
use tracing::{debug, info, warn};

pub use llm::{mask_base_url, OpenAiCompatClient};
pub use mcp::build_registry;

/// ログに出す入力の要約の長さ
const LOG_INPUT_SUMMARY_LEN: usize = 80;
/// ログに出す返答の要約の長さ
const LOG_REPLY_SUMMARY_LEN: usize = 120;

/// ツール付き多ラウンド対話クライアント
pub struct AgenticClient {
    llm: Arc<dyn LlmBackend>,
    tools: Arc<ToolRegistry>,
    system_prompt: String,
    max_rounds: usize,
    /// ログ用の接続先（scheme + host）
    endpoint: String,
}

impl AgenticClient {
    /// # Arguments
    /// * `llm` - LLM バックエンド
    /// * `tools` - 実行開始時に作ったツールレジストリ
    /// * `keyword_hint` - システムプロンプトに載せる参考キーワード
    /// * `max_rounds` - 1件あたりの最大ラウンド数
    pub fn new(llm: Arc<dyn LlmBackend>, tools: Arc<ToolRegistry>, keyword_hint: &str, max_rounds: usize) -> Self {
        let system_prompt = build_system_prompt(keyword_hint, !tools.is_empty());
        Self {
            llm,
            tools,
            system_prompt,
            max_rounds: max_rounds.max(1),
            endpoint: String::new(),
        }
    }

    pub fn with_endpoint(mut self, base_url: &str) -> Self {
        self.endpoint = mask_base_url(base_url);
        self
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }

    /// 説明文を生成する
    ///
    /// # Returns
    /// 空でない説明文。空返答・ラウンド上限・通信エラー・解釈できないツール呼び出し、
    /// ツールが1つもないのにツール呼び出しを求められた場合は None
    pub async fn generate_description(&self, text: &str) -> Option<String> {
        let query = text.trim();
        if query.is_empty() {
            return None;
        }
        let input_summary = summary(query, LOG_INPUT_SUMMARY_LEN);
        let specs = self.tools.specs();
        let mut messages = vec![ChatMessage::system(self.system_prompt.as_str()), ChatMessage::user(query)];
        let started = Instant::now();

        for round in 1..=self.max_rounds {
            let round_start = Instant::now();
            let reply = match self.llm.complete(&messages, &specs).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(
                        input = %input_summary,
                        round,
                        model = %self.llm.model(),
                        endpoint = %self.endpoint,
                        error = %e,
                        "LLM 呼び出し失敗"
                    );
                    return None;
                }
            };
            info!(
                input = %input_summary,
                round,
                tool_calls = reply.tool_calls.len(),
                elapsed = format!("{:.2}s", round_start.elapsed().as_secs_f64()),
                "LLM 応答"
            );

            // 空でない content があれば、tool_calls が付いていても content を優先する
            if let Some(content) = reply.non_empty_content() {
                let content = content.to_string();
                if !looks_like_tool_call(&content) {
                    info!(
                        input = %input_summary,
                        rounds = round,
                        elapsed = format!("{:.2}s", started.elapsed().as_secs_f64()),
                        description = %summary(&content, LOG_REPLY_SUMMARY_LEN),
                        "説明文を取得"
                    );
                    return Some(content);
                }

                // content に直列化されたツール呼び出し
                match extract_embedded_tool_call(&content) {
                    Some(calls) if !self.tools.is_empty() => {
                        debug!(input = %input_summary, round, calls = calls.len(), "content 内のツール呼び出しを実行");
                        self.dispatch_embedded(round, &calls, &input_summary, &mut messages)
                            .await;
                        continue;
                    }
                    _ => {
                        warn!(
                            input = %input_summary,
                            round,
                            content = %summary(&content, LOG_REPLY_SUMMARY_LEN),
                            "実行できないツール呼び出し"
                        );
                        return None;
                    }
                }
            }

            if reply.tool_calls.is_empty() || self.tools.is_empty() {
                info!(input = %input_summary, round, "内容もツール呼び出しもない返答");
                return None;
            }

            // ネイティブのツール呼び出し
            messages.push(ChatMessage::assistant_tool_calls(
                reply.content.clone().unwrap_or_default(),
                reply.tool_calls.clone(),
            ));
            for call in &reply.tool_calls {
                let args = parse_arguments(&call.function.arguments);
                let result = self.tools.dispatch(&call.function.name, args, &input_summary).await;
                messages.push(ChatMessage::tool_result(call.id.as_str(), result));
            }
        }

        warn!(input = %input_summary, max_rounds = self.max_rounds, "ラウンド上限に達しました");
        None
    }

    async fn dispatch_embedded(
        &self,
        round: usize,
        calls: &[ParsedToolCall],
        input_summary: &str,
        messages: &mut Vec<ChatMessage>,
    ) {
        let requests: Vec<ToolCallRequest> = calls
            .iter()
            .enumerate()
            .map(|(i, call)| ToolCallRequest {
                id: format!("call_{}_{}", round, i),
                kind: "function".to_string(),
                function: FunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect();
        messages.push(ChatMessage::assistant_tool_calls("", requests.clone()));

        for (request, call) in requests.iter().zip(calls) {
            let result = self
                .tools
                .dispatch(&call.name, call.arguments.clone(), input_summary)
                .await;
            messages.push(ChatMessage::tool_result(request.id.as_str(), result));
        }
    }
}

#[async_trait]
impl DescriptionStage for AgenticClient {
    async fn describe(&self, text: &str) -> Option<String> {
        self.generate_description(text).await
    }
}
