use thiserror::Error;

#[derive(Error, Debug)]
pub enum CategoryMatchError {
    #[error(transparent)]
    Common(#[from] category_match_common::Error),

    #[error("設定エラー: {0}")]
    Config(String),

    #[error("ファイルが見つかりません: {0}")]
    FileNotFound(String),

    #[error("規則表が不正: {0}")]
    InvalidCatalog(String),

    #[error("Excel読み込みエラー: {0}")]
    Calamine(#[from] calamine::Error),

    #[error("埋め込みモデルエラー: {0}")]
    Embedding(String),

    #[error("LLM呼び出しエラー: {0}")]
    Llm(String),

    #[error("LLMレスポンスのパースに失敗: {0}")]
    LlmParse(String),

    #[error("MCPエラー: {0}")]
    Mcp(String),

    #[error("ツール呼び出しエラー: {0}")]
    Tool(String),

    #[error("HTTPエラー: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON解析エラー: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IOエラー: {0}")]
    Io(#[from] std::io::Error),

    #[error("タスク実行エラー: {0}")]
    Task(String),

    #[error("入力エラー: {0}")]
    Prompt(String),
}

impl From<tokio::task::JoinError> for CategoryMatchError {
    fn from(e: tokio::task::JoinError) -> Self {
        CategoryMatchError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CategoryMatchError>;
