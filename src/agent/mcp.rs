//! MCP クライアント
//!
//! 設定されたサーバーへ接続し、initialize → tools/list を行って
//! 各ツールを `server__tool` の名前でレジストリへ登録する。
//!
//! 対応トランスポート:
//! - stdio: 子プロセスの標準入出力に改行区切りの JSON-RPC
//! - streamable-http: POST した応答が JSON または SSE（`data:` 行）
//!
//! 1サーバーにつき同時に1リクエストのみ（非同期 Mutex で直列化）。

use super::tools::{Tool, ToolRegistry};
use crate::config::{McpConfig, McpServerConfig, McpTransport};
use crate::error::{CategoryMatchError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// レジストリに登録するツール名の区切り
pub const TOOL_NAME_SEPARATOR: &str = "__";

const SESSION_HEADER: &str = "Mcp-Session-Id";

/// 接続と初期化のタイムアウト
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================
// JSON-RPC
// ============================================

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    method: &'a str,
    #[serde(skip_serializing_if = "Value::is_null")]
    params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    fn call(id: u64, method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(id),
            method,
            params,
        }
    }

    fn notification(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn has_id(&self, id: u64) -> bool {
        match &self.id {
            Some(Value::Number(n)) => n.as_u64() == Some(id),
            Some(Value::String(s)) => s.parse::<u64>().ok() == Some(id),
            _ => false,
        }
    }

    fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(CategoryMatchError::Mcp(format!(
                "JSON-RPC error {}: {}",
                err.code, err.message
            )));
        }
        Ok(self.result.unwrap_or(Value::Null))
    }
}

/// サーバーが公開するツール
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct McpToolInfo {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "inputSchema", default)]
    pub input_schema: Value,
}

#[derive(Debug, Deserialize)]
struct ToolsListResult {
    #[serde(default)]
    tools: Vec<McpToolInfo>,
    #[serde(rename = "nextCursor", default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

/// tools/call の結果
#[derive(Debug, Deserialize)]
pub struct CallToolResult {
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(rename = "isError", default)]
    is_error: bool,
}

impl CallToolResult {
    /// text ブロックを改行で連結
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn is_error(&self) -> bool {
        self.is_error
    }
}

// ============================================
// トランスポート
// ============================================

#[async_trait]
trait Channel: Send + Sync {
    async fn request(&self, method: &str, params: Value) -> Result<Value>;

    async fn notify(&self, method: &str, params: Value) -> Result<()>;
}

struct StdioChannel {
    io: Mutex<StdioIo>,
    next_id: AtomicU64,
}

struct StdioIo {
    // drop 時に子プロセスを終了させるため保持する
    _child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// 書き込み途中でキャンセル（タイムアウト）された。以降の行は壊れるので使わない
    write_interrupted: bool,
}

impl StdioChannel {
    fn spawn(config: &McpServerConfig) -> Result<Self> {
        let command = config
            .command
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| CategoryMatchError::Mcp(format!("{}: command が未設定", config.name)))?;

        let mut cmd = Command::new(command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = &config.cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| CategoryMatchError::Mcp(format!("{}: 起動に失敗: {}", config.name, e)))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| CategoryMatchError::Mcp("stdin を取得できません".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| CategoryMatchError::Mcp("stdout を取得できません".into()))?;

        Ok(Self {
            io: Mutex::new(StdioIo {
                _child: child,
                stdin,
                stdout: BufReader::new(stdout),
                write_interrupted: false,
            }),
            next_id: AtomicU64::new(1),
        })
    }
}

/// 1行書き込む
///
/// 書き込み中に future が破棄されると `interrupted` が立ったまま残り、
/// 以降の書き込みはエラーになる（途中まで書いた行の後ろに次の要求を繋げない）。
async fn write_line<W: AsyncWrite + Unpin>(
    writer: &mut W,
    interrupted: &mut bool,
    message: &JsonRpcRequest<'_>,
) -> Result<()> {
    if *interrupted {
        return Err(CategoryMatchError::Mcp(
            "前回の書き込みが中断されたため接続を使用できません".into(),
        ));
    }
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    *interrupted = true;
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await?;
    *interrupted = false;
    Ok(())
}

#[async_trait]
impl Channel for StdioChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.io.lock().await;
        let io = &mut *guard;
        write_line(&mut io.stdin, &mut io.write_interrupted, &JsonRpcRequest::call(id, method, params)).await?;
        read_response(&mut io.stdout, id).await?.into_result()
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let mut guard = self.io.lock().await;
        let io = &mut *guard;
        write_line(
            &mut io.stdin,
            &mut io.write_interrupted,
            &JsonRpcRequest::notification(method, params),
        )
        .await
    }
}

/// 指定 id の応答が来るまで行を読む（通知・サーバーからの要求・非 JSON 行は読み飛ばす）
async fn read_response<R: AsyncBufRead + Unpin>(reader: &mut R, id: u64) -> Result<JsonRpcResponse> {
    let mut line = String::new();
    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            return Err(CategoryMatchError::Mcp("サーバーが応答前に終了しました".into()));
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<JsonRpcResponse>(trimmed) {
            Ok(response) if response.has_id(id) => return Ok(response),
            Ok(_) => debug!(line = %trimmed, "対象外のメッセージを無視"),
            Err(_) => debug!(line = %trimmed, "JSON でない行を無視"),
        }
    }
}

struct HttpChannel {
    client: reqwest::Client,
    url: String,
    session_id: Mutex<Option<String>>,
    next_id: AtomicU64,
}

impl HttpChannel {
    fn new(config: &McpServerConfig, timeout: Duration) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| CategoryMatchError::Mcp(format!("{}: url が未設定", config.name)))?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            session_id: Mutex::new(None),
            next_id: AtomicU64::new(1),
        })
    }

    async fn post(&self, session: &mut Option<String>, message: &JsonRpcRequest<'_>) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "application/json, text/event-stream")
            .json(message);
        if let Some(id) = session.as_deref() {
            request = request.header(SESSION_HEADER, id);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let head: String = body.chars().take(200).collect();
            return Err(CategoryMatchError::Mcp(format!("HTTP {}: {}", status, head)));
        }

        if let Some(id) = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            *session = Some(id.to_string());
        }
        Ok(response)
    }
}

#[async_trait]
impl Channel for HttpChannel {
    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut session = self.session_id.lock().await;
        let response = self
            .post(&mut session, &JsonRpcRequest::call(id, method, params))
            .await?;

        let is_sse = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("text/event-stream"))
            .unwrap_or(false);
        let body = response.text().await?;

        let messages = if is_sse {
            parse_sse_data(&body)
        } else {
            vec![body]
        };
        for message in messages {
            if let Some(response) = parse_response_payload(&message, id) {
                return response.into_result();
            }
        }
        Err(CategoryMatchError::Mcp(format!("{} の応答がありません", method)))
    }

    async fn notify(&self, method: &str, params: Value) -> Result<()> {
        let mut session = self.session_id.lock().await;
        self.post(&mut session, &JsonRpcRequest::notification(method, params))
            .await?;
        Ok(())
    }
}

/// SSE 本文からイベントごとの data を取り出す（複数行の data は改行で連結）
fn parse_sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    for line in body.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            if !current.is_empty() {
                events.push(current.join("\n"));
                current.clear();
            }
            continue;
        }
        if let Some(data) = line.strip_prefix("data:") {
            current.push(data.strip_prefix(' ').unwrap_or(data));
        }
    }
    if !current.is_empty() {
        events.push(current.join("\n"));
    }
    events
}

/// 単体またはバッチ（配列）の JSON から指定 id の応答を探す
fn parse_response_payload(payload: &str, id: u64) -> Option<JsonRpcResponse> {
    match serde_json::from_str::<Value>(payload.trim()).ok()? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| serde_json::from_value::<JsonRpcResponse>(v).ok())
            .find(|r| r.has_id(id)),
        value => serde_json::from_value::<JsonRpcResponse>(value)
            .ok()
            .filter(|r| r.has_id(id)),
    }
}

// ============================================
// クライアント
// ============================================

/// 1サーバーとのセッション
pub struct McpClient {
    name: String,
    channel: Box<dyn Channel>,
}

impl McpClient {
    /// 接続して initialize まで行う
    pub async fn connect(config: &McpServerConfig, request_timeout: Duration) -> Result<Self> {
        let channel: Box<dyn Channel> = match config.transport {
            McpTransport::Stdio => Box::new(StdioChannel::spawn(config)?),
            McpTransport::StreamableHttp => Box::new(HttpChannel::new(config, request_timeout)?),
            McpTransport::Sse => {
                return Err(CategoryMatchError::Mcp(format!(
                    "{}: SSE トランスポートは未対応",
                    config.name
                )))
            }
        };

        let client = Self {
            name: config.name.clone(),
            channel,
        };
        client.initialize().await?;
        Ok(client)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&self) -> Result<()> {
        let result = self
            .channel
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": env!("CARGO_PKG_NAME"),
                        "version": env!("CARGO_PKG_VERSION"),
                    }
                }),
            )
            .await?;
        let protocol = result
            .get("protocolVersion")
            .and_then(serde_json::Value::as_str)
            .unwrap_or("?");
        debug!(server = %self.name, protocol = %protocol, "initialize 完了");
        self.channel
            .notify("notifications/initialized", Value::Null)
            .await
    }

    /// ツール一覧（ページングを辿る）
    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = match &cursor {
                Some(c) => json!({ "cursor": c }),
                None => json!({}),
            };
            let result = self.channel.request("tools/list", params).await?;
            let page: ToolsListResult = serde_json::from_value(result)?;
            tools.extend(page.tools);
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tools)
    }

    pub async fn call_tool(&self, tool: &str, arguments: Value) -> Result<CallToolResult> {
        let arguments = if arguments.is_object() { arguments } else { json!({}) };
        let result = self
            .channel
            .request("tools/call", json!({ "name": tool, "arguments": arguments }))
            .await?;
        Ok(serde_json::from_value(result)?)
    }
}

/// MCP サーバーのツール
pub struct McpTool {
    client: Arc<McpClient>,
    info: McpToolInfo,
    qualified_name: String,
}

impl McpTool {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let qualified_name = qualified_tool_name(client.name(), &info.name);
        Self {
            client,
            info,
            qualified_name,
        }
    }
}

#[async_trait]
impl Tool for McpTool {
    fn name(&self) -> &str {
        &self.qualified_name
    }

    fn description(&self) -> &str {
        self.info.description.as_deref().unwrap_or("")
    }

    fn parameters_schema(&self) -> Value {
        self.info.input_schema.clone()
    }

    async fn invoke(&self, args: Value) -> Result<String> {
        let result = self.client.call_tool(&self.info.name, args).await?;
        if result.is_error() {
            return Err(CategoryMatchError::Tool(result.text()));
        }
        Ok(result.text())
    }
}

pub fn qualified_tool_name(server: &str, tool: &str) -> String {
    format!("{}{}{}", server, TOOL_NAME_SEPARATOR, tool)
}

/// 設定された全サーバーに接続してレジストリを作る
///
/// 接続できないサーバー・SSE のサーバーは警告を出してスキップする。
pub async fn build_registry(config: &McpConfig) -> ToolRegistry {
    let tool_timeout = Duration::from_secs(config.tool_timeout_seconds.max(1));
    let mut registry = ToolRegistry::new(tool_timeout);

    for server in &config.servers {
        if server.transport == McpTransport::Sse {
            warn!(server = %server.name, "SSE トランスポートは未対応のためスキップします");
            continue;
        }
        if server.name.trim().is_empty() {
            warn!("name のない MCP サーバー設定をスキップします");
            continue;
        }

        let connected = tokio::time::timeout(CONNECT_TIMEOUT, async {
            let client = McpClient::connect(server, tool_timeout).await?;
            let tools = client.list_tools().await?;
            Ok::<_, CategoryMatchError>((client, tools))
        })
        .await;

        match connected {
            Ok(Ok((client, tools))) => {
                let client = Arc::new(client);
                let count = tools.len();
                for info in tools {
                    registry.register(Arc::new(McpTool::new(Arc::clone(&client), info)));
                }
                info!(server = %server.name, tools = count, "MCP サーバーに接続しました");
            }
            Ok(Err(e)) => warn!(server = %server.name, error = %e, "MCP サーバーに接続できません"),
            Err(_) => warn!(server = %server.name, "MCP サーバーへの接続がタイムアウトしました"),
        }
    }

    registry
}
