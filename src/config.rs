use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

use crate::xlm_roberta_engine::{DEFAULT_MODEL_ID, XLMRobertaConfig};

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Server host to bind to
    #[arg(long, env = "HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Server port to bind to
    #[arg(long, env = "PORT", default_value = "5000")]
    pub port: u16,

    /// Model ID from Hugging Face Hub
    #[arg(long, env = "MODEL_ID", default_value = DEFAULT_MODEL_ID)]
    pub model_id: String,

    /// Local path to model directory, takes precedence over --model-id
    #[arg(long, env = "MODEL_PATH")]
    pub model_path: Option<PathBuf>,

    /// Model revision/branch on Hugging Face
    #[arg(long, env = "MODEL_REVISION", default_value = "main")]
    pub model_revision: String,

    /// Use PyTorch weights instead of safetensors
    #[arg(long, env = "USE_PTH")]
    pub use_pth: bool,

    /// Run on CPU instead of GPU
    #[arg(long, env = "CPU_ONLY")]
    pub cpu_only: bool,

    /// Inputs longer than this many tokens are truncated
    #[arg(long, env = "MAX_SEQUENCE_LENGTH", default_value = "512")]
    pub max_sequence_length: usize,

    /// Emit logs as JSON lines
    #[arg(long, env = "LOG_JSON")]
    pub log_json: bool,

    /// Serve Prometheus metrics on this port (disabled when unset)
    #[arg(long, env = "METRICS_PORT")]
    pub metrics_port: Option<u16>,
}

impl From<&Config> for XLMRobertaConfig {
    fn from(config: &Config) -> Self {
        Self {
            model_id: config.model_id.clone(),
            model_path: config.model_path.clone(),
            revision: config.model_revision.clone(),
            use_pth: config.use_pth,
            cpu: config.cpu_only,
            max_sequence_length: config.max_sequence_length,
        }
    }
}

impl Config {
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn metrics_address(&self) -> anyhow::Result<Option<SocketAddr>> {
        self.metrics_port
            .map(|port| {
                format!("{}:{}", self.host, port)
                    .parse()
                    .map_err(|e| anyhow::anyhow!("Invalid metrics address: {e}"))
            })
            .transpose()
    }
}
