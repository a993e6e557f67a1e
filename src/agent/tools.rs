//! ツールレジストリ
//!
//! ツール名 → ツール本体の対応を実行開始時に一度だけ作り、以降は読み取り専用で共有する。

use super::llm::ToolSpec;
use crate::error::{CategoryMatchError, Result};
use crate::logging::summary;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// ツール結果のログ要約の長さ
const LOG_RESULT_SUMMARY_LEN: usize = 120;

/// 未知のツール名に返す結果
pub const UNKNOWN_TOOL_RESULT: &str = "{}";

/// LLM から呼び出せるツール
#[async_trait]
pub trait Tool: Send + Sync {
    /// 関数呼び出しで使う名前
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// 引数の JSON Schema
    fn parameters_schema(&self) -> Value;

    /// 実行してテキスト結果を返す
    async fn invoke(&self, args: Value) -> Result<String>;

    fn to_spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// ツールレジストリ（名前順で決定的）
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
    timeout: Duration,
}

impl ToolRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            tools: BTreeMap::new(),
            timeout,
        }
    }

    /// ツールを登録（同名は後勝ち）
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            warn!(tool = %name, "同名のツールを上書きしました");
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// モデルに渡すツール定義
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|t| t.to_spec()).collect()
    }

    /// ツールを実行してテキスト結果を返す
    ///
    /// - 未知のツール名: `{}`
    /// - 実行エラー・タイムアウト: 空文字（警告ログ）
    pub async fn dispatch(&self, name: &str, args: Value, context: &str) -> String {
        let tool = match self.get(name) {
            Some(tool) => tool,
            None => {
                warn!(tool = %name, context = %context, "未知のツール");
                return UNKNOWN_TOOL_RESULT.to_string();
            }
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, tool.invoke(args))
            .await
            .unwrap_or_else(|_| {
                Err(CategoryMatchError::Tool(format!(
                    "タイムアウト（{}秒）",
                    self.timeout.as_secs()
                )))
            });
        let elapsed = start.elapsed().as_secs_f64();

        match outcome {
            Ok(text) => {
                info!(
                    tool = %name,
                    context = %context,
                    elapsed = format!("{:.2}s", elapsed),
                    result_summary = %summary(&text, LOG_RESULT_SUMMARY_LEN),
                    "ツール呼び出し完了"
                );
                text
            }
            Err(e) => {
                warn!(
                    tool = %name,
                    context = %context,
                    elapsed = format!("{:.2}s", elapsed),
                    error = %e,
                    "ツール呼び出し失敗"
                );
                String::new()
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

/// 引数の JSON 文字列をオブジェクトに変換（不正なら空オブジェクト）
pub fn parse_arguments(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => Value::Object(serde_json::Map::new()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// 呼び出しを記録し、固定の結果を返すテスト用ツール
    pub struct FakeTool {
        pub name: String,
        pub result: std::result::Result<String, String>,
        pub delay: Option<Duration>,
        pub calls: Mutex<Vec<Value>>,
    }

    impl FakeTool {
        pub fn ok(name: &str, result: &str) -> Self {
            Self {
                name: name.to_string(),
                result: Ok(result.to_string()),
                delay: None,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing(name: &str, message: &str) -> Self {
            Self {
                result: Err(message.to_string()),
                ..Self::ok(name, "")
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.lock().map(|c| c.len()).unwrap_or(0)
        }
    }

    #[async_trait]
    impl Tool for FakeTool {
        fn name(&self) -> &str {
            &self.name
        }

        fn description(&self) -> &str {
            "fake"
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object", "properties": {"query": {"type": "string"}}})
        }

        async fn invoke(&self, args: Value) -> Result<String> {
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(args);
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.result.clone().map_err(CategoryMatchError::Tool)
        }
    }
}
