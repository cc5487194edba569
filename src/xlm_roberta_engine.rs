use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use candle_core::utils::{cuda_is_available, metal_is_available};
use candle_core::{D, DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_nn::ops::softmax;
use candle_transformers::models::xlm_roberta::{
    Config as ModelConfig, XLMRobertaForSequenceClassification,
};
use hf_hub::{Repo, RepoType, api::tokio::Api};
use std::path::PathBuf;
use std::sync::Arc;
use tokenizers::{PaddingParams, Tokenizer, TruncationParams};

use crate::engine::Engine;
use crate::types::ToxicityScores;

pub const DEFAULT_MODEL_ID: &str = "akhooli/xlm-r-large-arabic-toxic";

/// The head is read as `[non-toxic, toxic]`.
const NUM_LABELS: usize = 2;

#[derive(Debug, Clone)]
pub struct XLMRobertaConfig {
    pub model_id: String,
    pub model_path: Option<PathBuf>,
    pub revision: String,
    pub use_pth: bool,
    pub cpu: bool,
    pub max_sequence_length: usize,
}

impl Default for XLMRobertaConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_path: None,
            revision: "main".to_string(),
            use_pth: false,
            cpu: false,
            max_sequence_length: 512,
        }
    }
}

struct LoadedModel {
    model: XLMRobertaForSequenceClassification,
    tokenizer: Tokenizer,
    device: Device,
}

impl LoadedModel {
    fn classify(&self, text: &str) -> Result<ToxicityScores> {
        let encoding = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| anyhow::anyhow!("Tokenization error: {e}"))?;
        tracing::debug!(tokens = encoding.get_ids().len(), "Text tokenized");

        let input_ids = Tensor::new(encoding.get_ids(), &self.device)?.unsqueeze(0)?;
        let attention_mask =
            Tensor::new(encoding.get_attention_mask(), &self.device)?.unsqueeze(0)?;
        // XLM-RoBERTa has a single segment type
        let token_type_ids = input_ids.zeros_like()?;

        let logits = self
            .model
            .forward(&input_ids, &attention_mask, &token_type_ids)?;
        scores_from_logits(&logits)
    }
}

/// Shared, read-only XLM-RoBERTa classifier. Cloning only bumps a refcount.
#[derive(Clone)]
pub struct XLMRobertaEngine {
    inner: Arc<LoadedModel>,
}

impl XLMRobertaEngine {
    fn device(cpu: bool) -> Result<Device> {
        if cpu {
            Ok(Device::Cpu)
        } else if metal_is_available() {
            tracing::info!("Using metal acceleration");
            Ok(Device::new_metal(0)?)
        } else if cuda_is_available() {
            tracing::info!("Using CUDA GPU acceleration");
            Ok(Device::new_cuda(0)?)
        } else {
            tracing::info!(
                "CUDA not available, running on CPU. To run on GPU, build with `--features cuda`"
            );
            Ok(Device::Cpu)
        }
    }

    #[tracing::instrument(skip(config), fields(model_id = %config.model_id, cpu = config.cpu))]
    pub async fn new(config: XLMRobertaConfig) -> Result<Self> {
        let device = Self::device(config.cpu)?;
        let weights_name = if config.use_pth {
            "pytorch_model.bin"
        } else {
            "model.safetensors"
        };

        // Local directory wins over the hub
        let (config_filename, tokenizer_filename, weights_filename) = match &config.model_path {
            Some(base_path) => {
                if !base_path.is_dir() {
                    bail!("Model path {} is not a directory.", base_path.display());
                }
                (
                    base_path.join("config.json"),
                    base_path.join("tokenizer.json"),
                    base_path.join(weights_name),
                )
            }
            None => {
                let repo = Repo::with_revision(
                    config.model_id.clone(),
                    RepoType::Model,
                    config.revision.clone(),
                );
                let api = Api::new()?.repo(repo);
                tracing::info!(revision = %config.revision, "Fetching model files from the hub");
                (
                    api.get("config.json")
                        .await
                        .context("Failed to fetch config.json")?,
                    api.get("tokenizer.json")
                        .await
                        .context("Failed to fetch tokenizer.json")?,
                    api.get(weights_name)
                        .await
                        .with_context(|| format!("Failed to fetch {weights_name}"))?,
                )
            }
        };

        let raw_config = std::fs::read_to_string(&config_filename)
            .with_context(|| format!("Failed to read {}", config_filename.display()))?;
        let num_labels = num_labels(&raw_config)?;
        if num_labels != NUM_LABELS {
            bail!("Expected a {NUM_LABELS}-label toxicity head, model config declares {num_labels}");
        }
        let model_config: ModelConfig =
            serde_json::from_str(&raw_config).context("Failed to parse XLM-RoBERTa config")?;

        let mut tokenizer = Tokenizer::from_file(tokenizer_filename)
            .map_err(|e| anyhow::anyhow!("Tokenizer error: {e}"))?;
        tokenizer.with_padding(Some(PaddingParams::default()));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: config.max_sequence_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Tokenizer truncation error: {e}"))?;

        let vb = if config.use_pth {
            VarBuilder::from_pth(&weights_filename, DType::F32, &device)?
        } else {
            unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_filename], DType::F32, &device)?
            }
        };
        let model = XLMRobertaForSequenceClassification::new(num_labels, &model_config, vb)
            .context("Failed to construct XLM-RoBERTa classifier")?;

        Ok(Self {
            inner: Arc::new(LoadedModel {
                model,
                tokenizer,
                device,
            }),
        })
    }
}

#[async_trait]
impl Engine for XLMRobertaEngine {
    #[tracing::instrument(skip(self, text), fields(text_len = text.len()))]
    async fn classify(&self, text: String) -> Result<ToxicityScores> {
        let model = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || model.classify(&text)).await?
    }
}

/// Label count from `id2label`, falling back to the transformers default of two.
fn num_labels(raw_config: &str) -> Result<usize> {
    let config: serde_json::Value =
        serde_json::from_str(raw_config).context("Failed to parse model config as JSON")?;
    Ok(config
        .get("id2label")
        .and_then(|v| v.as_object())
        .map(|labels| labels.len())
        .unwrap_or(NUM_LABELS))
}

fn scores_from_logits(logits: &Tensor) -> Result<ToxicityScores> {
    let probs = softmax(logits, D::Minus1)?
        .flatten_all()?
        .to_vec1::<f32>()?;
    match probs.as_slice() {
        &[non_toxic, toxic] => Ok(ToxicityScores {
            non_toxic: non_toxic as f64,
            toxic: toxic as f64,
        }),
        other => bail!(
            "Expected {NUM_LABELS} class probabilities, got {}",
            other.len()
        ),
    }
}
