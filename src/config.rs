use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::model::{hub, HubOptions, ModelSource, Precision};
use crate::worker::PipelineSettings;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub text: TextConfig,

    #[serde(default)]
    pub worker: WorkerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Hub repository id, or a local directory with the same layout.
    #[serde(default = "default_model_id")]
    pub id: String,

    #[serde(default = "default_revision")]
    pub revision: String,

    #[serde(default)]
    pub precision: Precision,

    #[serde(default = "default_hub_endpoint")]
    pub hub_endpoint: String,

    #[serde(default = "hub::default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Never download; fail if a file is not cached.
    #[serde(default)]
    pub offline: bool,

    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// Connect/read timeout for model and image downloads.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_text_output")]
    pub text_output: String,

    #[serde(default = "default_image_output")]
    pub image_output: String,

    /// Feed `attention_mask` to the text graph (some exports require it).
    #[serde(default)]
    pub text_attention_mask: bool,
}

fn default_model_id() -> String {
    "XudongShen/DFN-public".to_string()
}

fn default_revision() -> String {
    "main".to_string()
}

fn default_hub_endpoint() -> String {
    "https://huggingface.co".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_text_output() -> String {
    "text_embeds".to_string()
}

fn default_image_output() -> String {
    "image_embeds".to_string()
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            id: default_model_id(),
            revision: default_revision(),
            precision: Precision::default(),
            hub_endpoint: default_hub_endpoint(),
            cache_dir: hub::default_cache_dir(),
            offline: false,
            intra_threads: default_intra_threads(),
            timeout_secs: default_timeout_secs(),
            text_output: default_text_output(),
            image_output: default_image_output(),
            text_attention_mask: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextConfig {
    /// Encoder token window, special tokens included.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Split long text and pool the chunks instead of truncating.
    #[serde(default = "default_chunking")]
    pub chunking: bool,

    #[serde(default = "default_pad_token")]
    pub pad_token: String,
}

fn default_max_tokens() -> usize {
    77
}

fn default_chunking() -> bool {
    true
}

fn default_pad_token() -> String {
    "<|endoftext|>".to_string()
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            chunking: default_chunking(),
            pad_token: default_pad_token(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Requests that may wait behind the running one.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

fn default_queue_depth() -> usize {
    8
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
        }
    }
}

impl Config {
    /// Load from the default location, creating it on first run.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config from {:?}", config_path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config at {:?}", config_path))?;
            config.validate()?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config to {:?}", config_path))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.text.max_tokens < 3 {
            anyhow::bail!("text.max_tokens must be at least 3, got {}", self.text.max_tokens);
        }
        if self.model.id.trim().is_empty() {
            anyhow::bail!("model.id must not be empty");
        }
        if self.model.intra_threads == 0 {
            anyhow::bail!("model.intra_threads must be at least 1");
        }
        Ok(())
    }

    /// `CLIPSCORE_CONFIG` wins over the platform config directory.
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("CLIPSCORE_CONFIG") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipscore")
    }

    pub fn model_source(&self) -> ModelSource {
        ModelSource::new(self.model.id.clone(), self.model.precision)
            .with_revision(self.model.revision.clone())
    }

    pub fn hub_options(&self) -> HubOptions {
        HubOptions {
            endpoint: self.model.hub_endpoint.clone(),
            cache_dir: self.model.cache_dir.clone(),
            offline: self.model.offline,
            timeout: self.timeout(),
            intra_threads: self.model.intra_threads,
            text_output: self.model.text_output.clone(),
            image_output: self.model.image_output.clone(),
            text_attention_mask: self.model.text_attention_mask,
            pad_token: self.text.pad_token.clone(),
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            window: self.text.max_tokens,
            chunking: self.text.chunking,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.model.timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.model.id, "XudongShen/DFN-public");
        assert_eq!(config.model.precision, Precision::Fp32);
        assert_eq!(config.text.max_tokens, 77);
        assert!(config.text.chunking);
        assert_eq!(config.worker.queue_depth, 8);
        assert_eq!(config.model_source().to_string(), "XudongShen/DFN-public@main (fp32)");
    }

    #[test]
    fn test_cache_dir_matches_hub_default() {
        let config = Config::default();
        assert_eq!(config.model.cache_dir, HubOptions::default().cache_dir);
        assert_eq!(config.hub_options().cache_dir, hub::default_cache_dir());

        let parsed: Config = toml::from_str("[model]\noffline = true\n").unwrap();
        assert_eq!(parsed.model.cache_dir, hub::default_cache_dir());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [model]
            precision = "q8"
            offline = true

            [text]
            chunking = false
            "#,
        )
        .unwrap();

        assert_eq!(config.model.precision, Precision::Q8);
        assert_eq!(config.model.revision, "main");
        assert!(config.hub_options().offline);
        assert_eq!(config.hub_options().pad_token, "<|endoftext|>");
        assert_eq!(
            config.pipeline_settings(),
            PipelineSettings {
                window: 77,
                chunking: false
            }
        );
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let created = Config::load_from(&path).unwrap();
        assert!(path.exists());

        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.model.id, created.model.id);
        assert_eq!(reloaded.model.cache_dir, created.model.cache_dir);
    }

    #[test]
    fn test_save_roundtrip_keeps_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.model.id = "/models/clip".to_string();
        config.model.timeout_secs = 5;
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.model.id, "/models/clip");
        assert_eq!(loaded.timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[text]\nmax_tokens = 0\n").unwrap();
        assert!(Config::load_from(&path).is_err());

        std::fs::write(&path, "[model]\nprecision = \"fp64\"\n").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
