use anyhow::{anyhow, Result};
use std::path::PathBuf;
use std::sync::Arc;

use candle_core::{DType, Device, Tensor};
use candle_transformers::models::xlm_roberta::XLMRobertaForSequenceClassification;
use tokenizers::Tokenizer;
use tracing::info;

use codelens_core::traits::{ModelLoader, RelevanceModel};

use crate::device::select_device;
use crate::model::Checkpoint;
use crate::tokenize::tokenize_pair_on_device;

const MAX_LEN: usize = 512;

/// Cross-encoder relevance model (e.g. bge-reranker) with a single logit head.
pub struct CrossEncoderModel {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
}

impl CrossEncoderModel {
    pub fn load(model_dir: &std::path::Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading cross-encoder");
        let (tokenizer, config, vb) = Checkpoint::load(model_dir, &device)?.var_builder(&device);
        let model = XLMRobertaForSequenceClassification::new(1, &config, vb)?;
        Ok(Self { model, tokenizer, device })
    }

    fn score_pair(&self, query: &str, passage: &str) -> Result<f32> {
        let (input_ids, attention_mask) = tokenize_pair_on_device(&self.tokenizer, query, passage, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)?;
        let logits = self.model.forward(&input_ids, &attention_mask, &token_type_ids)?;
        let values: Vec<f32> = logits.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.flatten_all()?.to_vec1()?;
        values.first().copied().ok_or_else(|| anyhow!("cross-encoder returned no logits"))
    }
}

impl RelevanceModel for CrossEncoderModel {
    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        passages.iter().map(|p| self.score_pair(query, p)).collect()
    }
}

/// Defers reading the checkpoint until the reranker actually needs it.
pub struct CrossEncoderLoader {
    model_dir: PathBuf,
}

impl CrossEncoderLoader {
    pub fn new(model_dir: PathBuf) -> Self {
        Self { model_dir }
    }
}

impl ModelLoader for CrossEncoderLoader {
    fn load(&self) -> Result<Arc<dyn RelevanceModel>> {
        Ok(Arc::new(CrossEncoderModel::load(&self.model_dir)?))
    }
}
