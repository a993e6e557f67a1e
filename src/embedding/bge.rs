//! BGE 文埋め込み（candle BERT）
//!
//! BAAI/bge-small-zh-v1.5 を HuggingFace Hub から取得し、
//! CLS トークンのベクトルを L2 正規化して返す。

use super::EmbeddingBackend;
use crate::error::{CategoryMatchError, Result};
use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{api::sync::Api, Repo, RepoType};
use tokenizers::{Tokenizer, TruncationParams};
use tracing::{debug, info};

/// BERT の最大トークン長
const MAX_SEQUENCE_LENGTH: usize = 512;

pub struct BgeEmbedder {
    model_id: String,
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    batch_size: usize,
}

impl BgeEmbedder {
    /// モデルを読み込む（初回はダウンロード、以降は ~/.cache/huggingface を使う）
    ///
    /// # Arguments
    /// * `model_id` - HuggingFace のリポジトリ名
    /// * `revision` - ブランチまたはコミット
    /// * `batch_size` - 1回の forward に渡す最大件数
    pub fn load(model_id: &str, revision: &str, batch_size: usize) -> Result<Self> {
        Self::load_inner(model_id, revision, batch_size)
            .map_err(|e| CategoryMatchError::Embedding(format!("{:#}", e)))
    }

    fn load_inner(model_id: &str, revision: &str, batch_size: usize) -> anyhow::Result<Self> {
        info!(model = %model_id, revision = %revision, "埋め込みモデルを読み込み中");

        let device = Device::Cpu;

        let api = Api::new().context("HuggingFace API クライアントの作成に失敗")?;
        let repo = api.repo(Repo::with_revision(
            model_id.to_string(),
            RepoType::Model,
            revision.to_string(),
        ));

        let config_path = repo.get("config.json").context("config.json の取得に失敗")?;
        let tokenizer_path = repo.get("tokenizer.json").context("tokenizer.json の取得に失敗")?;
        let weights_path = repo
            .get("model.safetensors")
            .context("model.safetensors の取得に失敗")?;

        let config: Config = serde_json::from_str(
            &std::fs::read_to_string(&config_path).context("config.json の読み込みに失敗")?,
        )
        .context("config.json の解析に失敗")?;
        debug!(hidden_size = config.hidden_size, "モデル設定");

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("トークナイザーの読み込みに失敗: {}", e))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_SEQUENCE_LENGTH,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("トークナイザーの設定に失敗: {}", e))?;

        // safetensors をメモリマップで読み込む（ファイルは hf-hub のキャッシュ内で不変）
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                .context("モデル重みの読み込みに失敗")?
        };
        let model = BertModel::load(vb, &config).context("BERT モデルの構築に失敗")?;

        info!(model = %model_id, "埋め込みモデルを読み込みました");

        Ok(Self {
            model_id: model_id.to_string(),
            model,
            tokenizer,
            device,
            batch_size: batch_size.max(1),
        })
    }

    /// 1バッチの forward と CLS 抽出
    fn forward_batch(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("トークナイズに失敗: {}", e))?;

        let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0);

        let mut input_ids = Vec::with_capacity(texts.len() * max_len);
        let mut attention_mask = Vec::with_capacity(texts.len() * max_len);
        let mut token_type_ids = Vec::with_capacity(texts.len() * max_len);

        for encoding in &encodings {
            let pad = max_len - encoding.get_ids().len();
            input_ids.extend_from_slice(encoding.get_ids());
            input_ids.extend(std::iter::repeat(0u32).take(pad));
            attention_mask.extend_from_slice(encoding.get_attention_mask());
            attention_mask.extend(std::iter::repeat(0u32).take(pad));
            token_type_ids.extend_from_slice(encoding.get_type_ids());
            token_type_ids.extend(std::iter::repeat(0u32).take(pad));
        }

        let shape = (texts.len(), max_len);
        let input_ids = Tensor::from_vec(input_ids, shape, &self.device)?.to_dtype(DType::U32)?;
        let attention_mask = Tensor::from_vec(attention_mask, shape, &self.device)?;
        let token_type_ids = Tensor::from_vec(token_type_ids, shape, &self.device)?.to_dtype(DType::U32)?;

        let output = self
            .model
            .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

        // (batch, seq, hidden) → (batch, hidden)
        let cls = output.narrow(1, 0, 1)?.squeeze(1)?;
        let normalized = l2_normalize(&cls)?;
        Ok(normalized.to_vec2::<f32>()?)
    }
}

fn l2_normalize(tensor: &Tensor) -> anyhow::Result<Tensor> {
    let norm = tensor.sqr()?.sum_keepdim(1)?.sqrt()?.clamp(1e-12, f64::MAX)?;
    Ok(tensor.broadcast_div(&norm)?)
}

impl EmbeddingBackend for BgeEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self
                .forward_batch(chunk)
                .map_err(|e| CategoryMatchError::Embedding(format!("{:#}", e)))?;
            vectors.extend(batch);
        }
        Ok(vectors)
    }
}
