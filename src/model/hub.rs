//! Model artifact resolution from a Hugging Face style hub.
//!
//! Files are cached under `<cache_dir>/models--<org>--<name>/<revision>/`
//! and downloaded on first use. A `model_id` that names an existing local
//! directory is read in place instead.

use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use super::provider::BundleLoader;
use super::{
    ClipPreprocessor, ClipTokenizer, ModelBundle, ModelSource, OrtImageEncoder, OrtTextEncoder,
    ProgressEvent,
};
use crate::error::{Result, SimilarityError};

const TOKENIZER_FILE: &str = "tokenizer.json";
const PREPROCESSOR_FILE: &str = "preprocessor_config.json";
const DOWNLOAD_BUFFER: usize = 64 * 1024;
/// Progress cadence when the server does not send a length.
const UNKNOWN_LENGTH_STEP: u64 = 1024 * 1024;

/// Where and how to fetch model artifacts.
#[derive(Debug, Clone)]
pub struct HubOptions {
    pub endpoint: String,
    pub cache_dir: PathBuf,
    /// Fail instead of downloading missing files.
    pub offline: bool,
    pub timeout: Duration,
    pub intra_threads: usize,
    pub text_output: String,
    pub image_output: String,
    pub text_attention_mask: bool,
    pub pad_token: String,
}

impl Default for HubOptions {
    fn default() -> Self {
        Self {
            endpoint: "https://huggingface.co".to_string(),
            cache_dir: default_cache_dir(),
            offline: false,
            timeout: Duration::from_secs(60),
            intra_threads: 4,
            text_output: "text_embeds".to_string(),
            image_output: "image_embeds".to_string(),
            text_attention_mask: false,
            pad_token: "<|endoftext|>".to_string(),
        }
    }
}

/// Default location of downloaded model files.
pub fn default_cache_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("clipscore")
        .join("models")
}

/// Repository-relative paths of the two encoder graphs.
pub fn encoder_files(source: &ModelSource) -> (String, String) {
    let suffix = source.precision.file_suffix();
    (
        format!("onnx/text_model{}.onnx", suffix),
        format!("onnx/vision_model{}.onnx", suffix),
    )
}

/// Loads bundles from the hub (or a local model directory) with ONNX Runtime encoders.
pub struct HubLoader {
    options: HubOptions,
    agent: ureq::Agent,
}

impl HubLoader {
    pub fn new(options: HubOptions) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(options.timeout)
            .timeout_read(options.timeout)
            .user_agent(concat!("clipscore/", env!("CARGO_PKG_VERSION")))
            .build();
        Self { options, agent }
    }

    pub fn options(&self) -> &HubOptions {
        &self.options
    }

    /// Directory that holds (or will hold) the files of `source`.
    pub fn model_dir(&self, source: &ModelSource) -> PathBuf {
        let local = Path::new(&source.model_id);
        if local.is_dir() {
            return local.to_path_buf();
        }
        self.options
            .cache_dir
            .join(format!("models--{}", source.model_id.replace('/', "--")))
            .join(&source.revision)
    }

    fn file_url(&self, source: &ModelSource, file: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.options.endpoint.trim_end_matches('/'),
            source.model_id,
            source.revision,
            file
        )
    }

    /// Return a local path for `file`, downloading it if needed.
    pub fn resolve(
        &self,
        source: &ModelSource,
        file: &str,
        progress: &dyn Fn(ProgressEvent),
    ) -> Result<PathBuf> {
        let path = self.model_dir(source).join(file);

        if path.exists() {
            let size = std::fs::metadata(&path)
                .map_err(|e| {
                    SimilarityError::ModelLoad(format!("failed to stat {}: {}", path.display(), e))
                })?
                .len();
            tracing::debug!(file = %file, path = %path.display(), "Using cached model file");
            progress(ProgressEvent::new(file, &source.model_id, size, size));
            return Ok(path);
        }

        if self.options.offline {
            return Err(SimilarityError::ModelLoad(format!(
                "{} is not cached at {} and offline mode is enabled",
                file,
                path.display()
            )));
        }

        self.download(source, file, &path, progress)?;
        Ok(path)
    }

    fn download(
        &self,
        source: &ModelSource,
        file: &str,
        path: &Path,
        progress: &dyn Fn(ProgressEvent),
    ) -> Result<()> {
        let url = self.file_url(source, file);
        tracing::info!(model = %source.model_id, file = %file, "Downloading model file...");

        let response = self.agent.get(&url).call().map_err(|e| match e {
            ureq::Error::Status(code, _) => {
                SimilarityError::ModelLoad(format!("failed to download {}: HTTP {}", url, code))
            }
            other => SimilarityError::ModelLoad(format!("failed to download {}: {}", url, other)),
        })?;

        let total: u64 = response
            .header("Content-Length")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SimilarityError::ModelLoad(format!("failed to create {}: {}", parent.display(), e))
            })?;
        }

        let part = path.with_extension(match path.extension() {
            Some(ext) => format!("{}.part", ext.to_string_lossy()),
            None => "part".to_string(),
        });
        let io_err = |e: std::io::Error| {
            SimilarityError::ModelLoad(format!("failed to write {}: {}", part.display(), e))
        };

        let copied = File::create(&part).map_err(io_err).and_then(|mut out| {
            let report = |loaded: u64| progress(ProgressEvent::new(file, &source.model_id, loaded, total));
            let loaded = copy_with_progress(&mut response.into_reader(), &mut out, total, &report)
                .map_err(|e| SimilarityError::ModelLoad(format!("download of {} failed: {}", url, e)))?;
            out.flush().map_err(io_err)?;
            Ok(loaded)
        });

        let loaded = match copied {
            Ok(loaded) => loaded,
            Err(e) => {
                let _ = std::fs::remove_file(&part);
                return Err(e);
            }
        };
        std::fs::rename(&part, path).map_err(io_err)?;

        tracing::info!(file = %file, path = ?path, bytes = loaded, "Model file downloaded");
        Ok(())
    }
}

/// Stream `reader` into `out`, reporting `loaded` on every whole-percent
/// step (or every MiB when `total` is unknown) and once more at the end.
fn copy_with_progress(
    reader: &mut dyn Read,
    out: &mut dyn Write,
    total: u64,
    report: &dyn Fn(u64),
) -> std::result::Result<u64, String> {
    let mut buf = vec![0u8; DOWNLOAD_BUFFER];
    let mut loaded = 0u64;
    let mut last_reported = 0u64;

    report(0);

    loop {
        let n = reader.read(&mut buf).map_err(|e| format!("interrupted: {}", e))?;
        if n == 0 {
            break;
        }
        if total > 0 && loaded + n as u64 > total {
            return Err(format!("body is longer than the announced {} bytes", total));
        }
        out.write_all(&buf[..n]).map_err(|e| format!("write failed: {}", e))?;
        loaded += n as u64;

        let step = if total > 0 {
            loaded * 100 / total > last_reported * 100 / total
        } else {
            loaded - last_reported >= UNKNOWN_LENGTH_STEP
        };
        if step {
            report(loaded);
            last_reported = loaded;
        }
    }

    if total > 0 && loaded != total {
        return Err(format!("truncated: {} of {} bytes", loaded, total));
    }
    if last_reported != loaded {
        report(loaded);
    }
    Ok(loaded)
}

impl BundleLoader for HubLoader {
    fn load(&self, source: &ModelSource, progress: &dyn Fn(ProgressEvent)) -> Result<ModelBundle> {
        let (text_file, vision_file) = encoder_files(source);

        let tokenizer_path = self.resolve(source, TOKENIZER_FILE, progress)?;
        let tokenizer = ClipTokenizer::from_file(&tokenizer_path, &self.options.pad_token)?;

        let preprocessor_path = self.resolve(source, PREPROCESSOR_FILE, progress)?;
        let preprocessor = ClipPreprocessor::from_file(&preprocessor_path)?;

        let text_path = self.resolve(source, &text_file, progress)?;
        let text_encoder = OrtTextEncoder::from_file(
            &text_path,
            self.options.intra_threads,
            self.options.text_output.clone(),
            self.options.text_attention_mask,
        )?;

        let vision_path = self.resolve(source, &vision_file, progress)?;
        let image_encoder = OrtImageEncoder::from_file(
            &vision_path,
            self.options.intra_threads,
            self.options.image_output.clone(),
        )?;

        tracing::info!(model = %source, "CLIP model bundle loaded");

        Ok(ModelBundle::new(
            source.clone(),
            Arc::new(tokenizer),
            Arc::new(preprocessor),
            Arc::new(text_encoder),
            Arc::new(image_encoder),
        ))
    }
}
