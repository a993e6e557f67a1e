//! 実行コンテキスト
//!
//! 実行開始時に一度だけ、規則表・ブランド表・埋め込みモデル・ツール・LLM を用意し、
//! カスケードを組み立てる。以降は読み取り専用で共有する。

use crate::agent::{build_registry, AgenticClient, OpenAiCompatClient};
use crate::config::Config;
use crate::embedding::{fill_brand_embeddings, BgeEmbedder, EmbeddingBackend, FillOptions, FillStats};
use crate::error::Result;
use crate::loader;
use crate::matcher::SimilarityMatcher;
use crate::orchestrator::{DescriptionStage, MatchOrchestrator};
use category_match_common::build_keyword_hint;
use std::sync::Arc;
use tracing::{info, warn};

/// 準備結果の要約（画面表示用）
#[derive(Debug, Clone, Default)]
pub struct SetupSummary {
    pub rules: usize,
    pub brands: usize,
    pub embeddings: FillStats,
    pub llm_enabled: bool,
    pub tool_names: Vec<String>,
}

pub struct RunContext {
    pub config: Config,
    pub orchestrator: Arc<MatchOrchestrator>,
    pub summary: SetupSummary,
}

impl RunContext {
    /// BGE モデルを読み込んでコンテキストを作る
    pub async fn build(config: Config, show_progress: bool) -> Result<Self> {
        let embedding = config.embedding.clone();
        let backend = tokio::task::spawn_blocking(move || {
            BgeEmbedder::load(&embedding.model_id, &embedding.revision, embedding.encode_batch_size)
        })
        .await??;
        Self::build_with_backend(config, Arc::new(backend), show_progress).await
    }

    /// 埋め込みバックエンドを指定してコンテキストを作る
    ///
    /// 規則表が読めない場合のみエラー。ブランド表がない・API キーがない・
    /// MCP サーバーに接続できない場合は該当の段を縮退させて続行する。
    pub async fn build_with_backend(
        config: Config,
        backend: Arc<dyn EmbeddingBackend>,
        show_progress: bool,
    ) -> Result<Self> {
        let rules = loader::load_rules(&config.app.rules_path())?;
        let brands = loader::load_verified_brands(&config.app.verified_path())?;

        let options = FillOptions {
            fill_chunk: config.embedding.fill_chunk,
            cache_dir: Some(config.app.excel_dir.clone()),
            show_progress,
        };
        let (brands, embeddings) = fill_brand_embeddings(Arc::clone(&backend), brands, options).await?;

        let mut summary = SetupSummary {
            rules: rules.len(),
            brands: brands.len(),
            embeddings,
            ..Default::default()
        };

        let similarity = Arc::new(SimilarityMatcher::new(
            backend,
            Arc::new(brands),
            config.embedding.blend_weight,
        ));

        let describer: Option<Arc<dyn DescriptionStage>> = match config.get_api_key() {
            Some(api_key) => {
                let registry = build_registry(&config.mcp).await;
                summary.tool_names = registry.names();
                let llm = OpenAiCompatClient::new(&config.llm, api_key)?;
                let keyword_hint = build_keyword_hint(&rules, &config.prompt.options());
                let agent = AgenticClient::new(
                    Arc::new(llm),
                    Arc::new(registry),
                    &keyword_hint,
                    config.llm.max_rounds,
                )
                .with_endpoint(&config.llm.base_url);
                info!(
                    model = %config.llm.model,
                    endpoint = %crate::agent::mask_base_url(&config.llm.base_url),
                    tools = agent.tool_count(),
                    "LLM 検索を有効化"
                );
                summary.llm_enabled = true;
                Some(Arc::new(agent))
            }
            None => {
                warn!("APIキーが未設定のため LLM 検索は無効です");
                None
            }
        };

        let orchestrator = MatchOrchestrator::new(
            Arc::new(rules),
            similarity,
            describer,
            config.matching.clone(),
        );

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
            summary,
        })
    }
}
