use crate::error::{CategoryMatchError, Result};
use category_match_common::PromptOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// 環境変数によるAPIキー指定
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub matching: MatchingConfig,
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub mcp: McpConfig,
    pub prompt: PromptConfig,
    pub app: AppConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MatchingConfig {
    /// これ未満の類似度は候補にしない
    pub similarity_threshold: f64,
    /// これ以上の類似度は LLM を呼ばずに採用
    pub llm_fallback_threshold: f64,
    pub batch_max_workers: usize,
    pub not_found_phrases: Vec<String>,
    pub not_found_marker: String,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.0,
            llm_fallback_threshold: 0.9,
            batch_max_workers: 8,
            not_found_phrases: vec!["未匹配到结果".into(), "未匹配到".into()],
            not_found_marker: "未匹配到结果".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub model_id: String,
    pub revision: String,
    /// 意味類似度の重み（残りが語彙類似度）
    pub blend_weight: f64,
    pub fill_chunk: usize,
    pub encode_batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model_id: "BAAI/bge-small-zh-v1.5".into(),
            revision: "main".into(),
            blend_weight: 0.5,
            fill_chunk: 16000,
            encode_batch_size: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub max_tokens: u32,
    pub max_rounds: usize,
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1".into(),
            model: "qwen-plus".into(),
            max_tokens: 768,
            max_rounds: 8,
            timeout_seconds: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum McpTransport {
    #[default]
    Stdio,
    StreamableHttp,
    /// 旧 SSE トランスポート（未対応、読み込み時に警告してスキップ）
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct McpServerConfig {
    pub name: String,
    pub transport: McpTransport,
    pub url: Option<String>,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpConfig {
    pub servers: Vec<McpServerConfig>,
    /// 1回のツール呼び出しのタイムアウト
    pub tool_timeout_seconds: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            tool_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PromptConfig {
    pub max_keyword_examples: usize,
    pub max_keyword_hint_chars: usize,
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            max_keyword_examples: 10,
            max_keyword_hint_chars: 120,
        }
    }
}

impl PromptConfig {
    pub fn options(&self) -> PromptOptions {
        PromptOptions {
            max_keyword_examples: self.max_keyword_examples,
            max_keyword_hint_chars: self.max_keyword_hint_chars,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub excel_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub rules_filename: String,
    pub verified_filename: String,
    /// 出力ファイル名に使わない入力ファイル名（拡張子なし）
    pub input_stem_ignore: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            excel_dir: PathBuf::from("excel"),
            output_dir: PathBuf::from("output"),
            log_dir: PathBuf::from("logs"),
            rules_filename: "原子品类关键词.xlsx".into(),
            verified_filename: "校验过的品牌对应原子品类.xlsx".into(),
            input_stem_ignore: "新建文本文档".into(),
        }
    }
}

impl AppConfig {
    pub fn rules_path(&self) -> PathBuf {
        self.excel_dir.join(&self.rules_filename)
    }

    pub fn verified_path(&self) -> PathBuf {
        self.excel_dir.join(&self.verified_filename)
    }
}

impl Config {
    /// 既定パスから読み込み（ファイルがなければ既定値）
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// 指定パスから読み込み（ファイルがなければ既定値）
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&content)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| CategoryMatchError::Config("ホームディレクトリが見つかりません".into()))?;
        Ok(home.join(".config").join("category-match").join("config.json"))
    }

    /// 値の範囲チェック
    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f64| -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(CategoryMatchError::Config(format!("{} は 0〜1 の範囲で指定してください: {}", name, v)))
            }
        };
        unit("matching.similarity_threshold", self.matching.similarity_threshold)?;
        unit("matching.llm_fallback_threshold", self.matching.llm_fallback_threshold)?;
        unit("embedding.blend_weight", self.embedding.blend_weight)?;

        if self.matching.batch_max_workers == 0 {
            return Err(CategoryMatchError::Config("matching.batch_max_workers は1以上".into()));
        }
        if self.llm.max_rounds == 0 {
            return Err(CategoryMatchError::Config("llm.max_rounds は1以上".into()));
        }
        if self.embedding.fill_chunk == 0 || self.embedding.encode_batch_size == 0 {
            return Err(CategoryMatchError::Config("embedding のチャンクサイズは1以上".into()));
        }
        Ok(())
    }

    /// APIキーを取得（設定が空なら環境変数）
    pub fn get_api_key(&self) -> Option<String> {
        self.llm
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(String::from)
            .or_else(|| {
                std::env::var(API_KEY_ENV)
                    .ok()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
            })
    }

    pub fn set_api_key(&mut self, key: String) -> Result<()> {
        self.llm.api_key = Some(key);
        self.save()
    }

    /// 表示用（APIキーを伏せる）
    pub fn masked(&self) -> Self {
        let mut shown = self.clone();
        shown.llm.api_key = self.llm.api_key.as_deref().map(mask_key);
        shown
    }
}

/// APIキーを伏せ字にする（先頭4文字のみ表示）
pub fn mask_key(key: &str) -> String {
    let head: String = key.chars().take(4).collect();
    if key.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{}****", head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.matching.similarity_threshold, 0.0);
        assert_eq!(config.matching.llm_fallback_threshold, 0.9);
        assert_eq!(config.matching.batch_max_workers, 8);
        assert_eq!(config.embedding.blend_weight, 0.5);
        assert_eq!(config.llm.max_rounds, 8);
        assert_eq!(config.llm.max_tokens, 768);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempdir().expect("Failed to create temp dir");
        let config = Config::load_from(&dir.path().join("none.json")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"matching": {"batch_max_workers": 2}, "mcp": {"servers": [{"name": "search", "transport": "streamable-http", "url": "http://localhost:9000/mcp"}]}}"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.matching.batch_max_workers, 2);
        assert_eq!(config.matching.llm_fallback_threshold, 0.9);
        assert_eq!(config.mcp.servers.len(), 1);
        assert_eq!(config.mcp.servers[0].transport, McpTransport::StreamableHttp);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let mut config = Config::default();
        config.embedding.blend_weight = 1.5;
        assert!(matches!(config.validate(), Err(CategoryMatchError::Config(_))));

        let mut config = Config::default();
        config.matching.batch_max_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempdir().expect("Failed to create temp dir");
        let path = dir.path().join("nested").join("config.json");
        let mut config = Config::default();
        config.llm.model = "qwen-max".into();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.llm.model, "qwen-max");
    }

    #[test]
    fn test_configured_key_wins() {
        let mut config = Config::default();
        config.llm.api_key = Some("sk-configured".into());
        assert_eq!(config.get_api_key().as_deref(), Some("sk-configured"));
    }

    #[test]
    fn test_mask_key() {
        assert_eq!(mask_key("sk-1234567890"), "sk-1****");
        assert_eq!(mask_key("abc"), "****");

        let mut config = Config::default();
        config.llm.api_key = Some("sk-secret-value".into());
        let shown = config.masked();
        assert_eq!(shown.llm.api_key.as_deref(), Some("sk-s****"));
    }
}
