use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::classifier::{Normalization, PredictionKind, TensorLayout};
use crate::model_manager::ModelInfo;

/// When the model is loaded into memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum LoadStrategy {
    /// At process start, before the listener opens
    #[default]
    Eager,
    /// On the first prediction request
    Lazy,
}

/// Server configuration. Every flag can also be given through its environment variable.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Rice leaf disease detection server with Grad-CAM heatmaps", long_about = None)]
pub struct ServerConfig {
    /// Address to listen on
    #[arg(long, env = "RICE_LEAF_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on
    #[arg(long, env = "RICE_LEAF_PORT", default_value_t = 5000)]
    pub port: u16,

    /// Path to the ONNX model
    #[arg(long, env = "RICE_LEAF_MODEL", default_value = "zambali_rice_efficientnet.onnx", value_name = "FILE")]
    pub model: PathBuf,

    /// Path to the classifier head weights (JSON) used for Grad-CAM
    #[arg(long, env = "RICE_LEAF_HEAD", value_name = "FILE")]
    pub head: Option<PathBuf>,

    /// Download the model from this URL into the cache instead of reading --model
    #[arg(long, env = "RICE_LEAF_MODEL_URL", value_name = "URL")]
    pub model_url: Option<String>,

    /// Expected SHA-256 of the downloaded model
    #[arg(long, env = "RICE_LEAF_MODEL_SHA256", value_name = "HEX", requires = "model_url")]
    pub model_sha256: Option<String>,

    /// Download the classifier head from this URL alongside the model
    #[arg(long, env = "RICE_LEAF_HEAD_URL", value_name = "URL", requires = "model_url")]
    pub head_url: Option<String>,

    /// Expected SHA-256 of the downloaded classifier head
    #[arg(long, env = "RICE_LEAF_HEAD_SHA256", value_name = "HEX", requires = "head_url")]
    pub head_sha256: Option<String>,

    /// Directory downloaded models are cached in
    #[arg(long, env = "RICE_LEAF_CACHE_DIR", value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Force a fresh download of the model files
    #[arg(long)]
    pub fresh: bool,

    /// Model output holding the last convolutional activation
    #[arg(long, env = "RICE_LEAF_ACTIVATION_OUTPUT", default_value = "top_activation")]
    pub activation_output: String,

    /// Model output holding class scores (defaults to the first other output)
    #[arg(long, env = "RICE_LEAF_PREDICTIONS_OUTPUT")]
    pub predictions_output: Option<String>,

    /// Whether the predictions output holds probabilities or logits
    #[arg(long, env = "RICE_LEAF_OUTPUT_KIND", value_enum, default_value_t = PredictionKind::Probabilities)]
    pub output_kind: PredictionKind,

    /// Tensor layout of the model input and activation
    #[arg(long, env = "RICE_LEAF_LAYOUT", value_enum, default_value_t = TensorLayout::Nhwc)]
    pub layout: TensorLayout,

    /// Pixel scaling applied before inference
    #[arg(long, env = "RICE_LEAF_NORMALIZATION", value_enum, default_value_t = Normalization::Raw)]
    pub normalization: Normalization,

    /// Side length images are squashed to
    #[arg(long, env = "RICE_LEAF_INPUT_SIZE", default_value_t = 224)]
    pub input_size: u32,

    /// Weight of the heatmap in the overlay (0.0 - 1.0)
    #[arg(long, env = "RICE_LEAF_HEATMAP_ALPHA", default_value_t = 0.75)]
    pub heatmap_alpha: f32,

    /// Load the model at start-up or on the first request
    #[arg(long, env = "RICE_LEAF_LOAD_STRATEGY", value_enum, default_value_t = LoadStrategy::Eager)]
    pub load_strategy: LoadStrategy,

    /// Largest accepted request body in bytes
    #[arg(long, env = "RICE_LEAF_BODY_LIMIT", default_value_t = 16 * 1024 * 1024)]
    pub body_limit: usize,

    /// ONNX Runtime intra-op threads (0 lets the runtime decide)
    #[arg(long, env = "RICE_LEAF_INTRA_THREADS", default_value_t = 0)]
    pub intra_threads: usize,

    /// ONNX Runtime inter-op threads (0 lets the runtime decide)
    #[arg(long, env = "RICE_LEAF_INTER_THREADS", default_value_t = 0)]
    pub inter_threads: usize,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    /// The download source described by the URL flags, if any.
    pub fn model_info(&self) -> Option<ModelInfo> {
        let model_url = self.model_url.clone()?;
        let name = self.model
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "default".to_string());
        Some(ModelInfo {
            name,
            model_url,
            model_hash: self.model_sha256.clone(),
            head_url: self.head_url.clone(),
            head_hash: self.head_sha256.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_server_settings() {
        let config = ServerConfig::parse_from(["rice-leaf-server"]);
        assert_eq!(config.port, 5000);
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:5000");
        assert_eq!(config.model, PathBuf::from("zambali_rice_efficientnet.onnx"));
        assert_eq!(config.activation_output, "top_activation");
        assert_eq!(config.input_size, 224);
        assert_eq!(config.heatmap_alpha, 0.75);
        assert_eq!(config.load_strategy, LoadStrategy::Eager);
        assert!(config.model_info().is_none());
    }

    #[test]
    fn test_lazy_and_layout_flags() {
        let config = ServerConfig::parse_from([
            "rice-leaf-server", "--load-strategy", "lazy", "--layout", "nchw",
            "--normalization", "imagenet", "--output-kind", "logits",
        ]);
        assert_eq!(config.load_strategy, LoadStrategy::Lazy);
        assert_eq!(config.layout, TensorLayout::Nchw);
        assert_eq!(config.normalization, Normalization::Imagenet);
        assert_eq!(config.output_kind, PredictionKind::Logits);
    }

    #[test]
    fn test_model_info_from_urls() {
        let config = ServerConfig::parse_from([
            "rice-leaf-server",
            "--model", "models/zambali.onnx",
            "--model-url", "https://example.org/zambali.onnx",
            "--model-sha256", "abc",
            "--head-url", "https://example.org/head.json",
        ]);
        let info = config.model_info().unwrap();
        assert_eq!(info.name, "zambali");
        assert_eq!(info.model_hash.as_deref(), Some("abc"));
        assert_eq!(info.head_url.as_deref(), Some("https://example.org/head.json"));
        assert_eq!(info.head_hash, None);
    }

    #[test]
    fn test_hash_requires_url() {
        assert!(ServerConfig::try_parse_from(["rice-leaf-server", "--model-sha256", "abc"]).is_err());
    }
}
