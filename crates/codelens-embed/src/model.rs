use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info, warn};

use codelens_core::traits::EmbeddingProvider;

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_on_device;

const MAX_LEN: usize = 256;

/// Tokenizer, config and weights of an XLM-RoBERTa checkpoint directory.
pub(crate) struct Checkpoint {
    pub tokenizer: Tokenizer,
    pub config: XLMRobertaConfig,
    pub weights: HashMap<String, Tensor>,
}

impl Checkpoint {
    pub fn load(model_dir: &Path, device: &Device) -> Result<Self> {
        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;
        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(&std::fs::read_to_string(&config_path)?)?;
        let safetensors = model_dir.join("model.safetensors");
        let weights: HashMap<String, Tensor> = if safetensors.exists() {
            candle_core::safetensors::load(&safetensors, device)?
        } else {
            let weights = candle_core::pickle::read_all(model_dir.join("pytorch_model.bin"))?;
            weights.into_iter().map(|(k, t)| Ok((k, t.to_device(device)?))).collect::<Result<_>>()?
        };
        debug!(dir = %model_dir.display(), tensors = weights.len(), "checkpoint loaded");
        Ok(Self { tokenizer, config, weights })
    }

    pub fn var_builder(self, device: &Device) -> (Tokenizer, XLMRobertaConfig, VarBuilder<'static>) {
        let vb = VarBuilder::from_tensors(self.weights, DType::F32, device);
        (self.tokenizer, self.config, vb)
    }
}

/// Dense embedder over a local BGE-M3 style checkpoint.
pub struct CandleEmbedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
    dim: usize,
}

impl CandleEmbedder {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading embedding model");
        let (tokenizer, config, vb) = Checkpoint::load(model_dir, &device)?.var_builder(&device);
        let dim = config.hidden_size;
        let model = XLMRobertaModel::new(&config, vb)?;
        let name = model_dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "model".to_string());
        info!(dim, "embedding model loaded");
        Ok(Self { model, tokenizer, device, model_id: format!("candle:{name}:d{dim}"), dim })
    }

    fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let start = Instant::now();
        let (input_ids, attention_mask) = tokenize_on_device(&self.tokenizer, text, MAX_LEN, &self.device)?;
        let token_type_ids = Tensor::zeros((1, MAX_LEN), DType::I64, &self.device)?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        let emb: Vec<f32> = pooled.to_device(&Device::Cpu)?.squeeze(0)?.to_vec1()?;
        if emb.len() != self.dim {
            return Err(anyhow!("embedding has dim {}, model reports {}", emb.len(), self.dim));
        }
        if start.elapsed().as_millis() > 100 { warn!(ms = start.elapsed().as_millis() as u64, "slow embedding"); }
        Ok(emb)
    }
}

impl EmbeddingProvider for CandleEmbedder {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_one(text)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed_one(t)).collect()
    }
}

/// Locate a model directory: explicit path, then `APP_MODEL_DIR`/`MODEL_DIR`,
/// then `models/<name>` relative to the working directory or its parent.
pub fn resolve_model_dir(explicit: Option<&Path>, name: &str) -> Result<PathBuf> {
    if let Some(p) = explicit {
        if p.exists() { return Ok(p.to_path_buf()); }
        return Err(anyhow!("model directory {} does not exist", p.display()));
    }
    for var in ["APP_MODEL_DIR", "MODEL_DIR"] {
        if let Ok(dir) = std::env::var(var) {
            let p = PathBuf::from(&dir).join(name);
            if p.exists() { debug!(%var, dir = %p.display(), "using model dir"); return Ok(p); }
        }
    }
    for base in ["models", "../models"] {
        let p = Path::new(base).join(name);
        if p.exists() { return Ok(p); }
    }
    Err(anyhow!("Could not locate model directory for '{name}'"))
}
