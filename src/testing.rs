//! Test doubles for the model artifacts.

use image::{DynamicImage, Rgb, RgbImage};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Result, SimilarityError};
use crate::model::preprocess::{PreprocessorConfig, SizeSpec};
use crate::model::{
    BundleLoader, ClipPreprocessor, ImageEncoder, ModelBundle, ModelSource, PixelTensor, Precision,
    ProgressEvent, TextEncoder, TextTokenizer, TokenWindow,
};

pub const BOS: u32 = 0;
pub const EOS: u32 = 1;
pub const DIM: usize = 8;

pub fn source() -> ModelSource {
    ModelSource::new("test/clip", Precision::Fp32)
}

/// Whitespace tokenizer: one token per word, ids assigned on first sight.
#[derive(Default)]
pub struct FakeTokenizer {
    vocab: Mutex<Vec<String>>,
}

impl FakeTokenizer {
    fn id_for(&self, word: &str) -> u32 {
        let mut vocab = self.vocab.lock().unwrap();
        let pos = match vocab.iter().position(|w| w == word) {
            Some(pos) => pos,
            None => {
                vocab.push(word.to_string());
                vocab.len() - 1
            }
        };
        pos as u32 + 2
    }
}

impl TextTokenizer for FakeTokenizer {
    fn tokenize(&self, text: &str) -> Result<Vec<u32>> {
        Ok(text.split_whitespace().map(|w| self.id_for(w)).collect())
    }

    fn decode(&self, ids: &[u32]) -> Result<String> {
        let vocab = self.vocab.lock().unwrap();
        let words: Vec<&str> = ids
            .iter()
            .filter(|&&id| id != BOS && id != EOS)
            .map(|&id| vocab[(id - 2) as usize].as_str())
            .collect();
        Ok(words.join(" "))
    }

    fn encode_window(&self, text: &str, window: usize) -> Result<TokenWindow> {
        let mut content = self.tokenize(text)?;
        content.truncate(window.saturating_sub(2));

        let mut ids: Vec<i64> = vec![BOS as i64];
        ids.extend(content.iter().map(|&id| id as i64));
        ids.push(EOS as i64);
        let mut attention_mask = vec![1i64; ids.len()];

        ids.resize(window, EOS as i64);
        attention_mask.resize(window, 0);
        Ok(TokenWindow { ids, attention_mask })
    }

    fn special_token_count(&self) -> usize {
        2
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeMode {
    Normal,
    Zero,
    Fail,
}

/// Deterministic, strictly positive text embeddings derived from token ids.
pub struct FakeTextEncoder {
    mode: FakeMode,
    calls: AtomicUsize,
}

impl FakeTextEncoder {
    pub fn new(mode: FakeMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn raw(window: &TokenWindow) -> Vec<f32> {
        (0..DIM)
            .map(|i| {
                let sum: i64 = window
                    .ids
                    .iter()
                    .zip(&window.attention_mask)
                    .filter(|(_, m)| **m == 1)
                    .map(|(&id, _)| (id * (i as i64 + 3)) % 5)
                    .sum();
                1.0 + sum as f32
            })
            .collect()
    }
}

impl TextEncoder for FakeTextEncoder {
    fn encode(&self, window: &TokenWindow) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.mode {
            FakeMode::Normal => Ok(Self::raw(window)),
            FakeMode::Zero => Ok(vec![0.0; DIM]),
            FakeMode::Fail => Err(SimilarityError::Encode("fake text encoder failure".into())),
        }
    }
}

/// Strictly positive image embeddings derived from the mean pixel magnitude.
pub struct FakeImageEncoder {
    mode: FakeMode,
    dim: usize,
}

impl FakeImageEncoder {
    pub fn new(mode: FakeMode) -> Self {
        Self { mode, dim: DIM }
    }

    pub fn with_dim(mut self, dim: usize) -> Self {
        self.dim = dim;
        self
    }
}

impl ImageEncoder for FakeImageEncoder {
    fn encode(&self, pixels: &PixelTensor) -> Result<Vec<f32>> {
        match self.mode {
            FakeMode::Normal => {
                let mean = pixels.data.iter().map(|x| x.abs()).sum::<f32>()
                    / pixels.data.len().max(1) as f32;
                Ok((0..self.dim)
                    .map(|i| 1.0 + mean * ((i % 3) as f32 + 1.0))
                    .collect())
            }
            FakeMode::Zero => Ok(vec![0.0; self.dim]),
            FakeMode::Fail => Err(SimilarityError::Encode("fake vision encoder failure".into())),
        }
    }
}

pub fn small_preprocessor() -> ClipPreprocessor {
    ClipPreprocessor::new(PreprocessorConfig {
        size: SizeSpec::Square(8),
        crop_size: SizeSpec::Square(8),
        ..Default::default()
    })
}

pub const FAKE_FILES: [&str; 4] = [
    "tokenizer.json",
    "preprocessor_config.json",
    "onnx/text_model.onnx",
    "onnx/vision_model.onnx",
];

/// Loader that reports two progress steps per artifact and counts builds.
pub struct CountingLoader {
    loads: AtomicUsize,
    fail_first: usize,
    delay: Duration,
    image_mode: FakeMode,
    image_dim: usize,
}

impl CountingLoader {
    pub fn new() -> Self {
        Self {
            loads: AtomicUsize::new(0),
            fail_first: 0,
            delay: Duration::ZERO,
            image_mode: FakeMode::Normal,
            image_dim: DIM,
        }
    }

    pub fn with_delay_ms(mut self, ms: u64) -> Self {
        self.delay = Duration::from_millis(ms);
        self
    }

    pub fn failing_first(mut self, n: usize) -> Self {
        self.fail_first = n;
        self
    }

    pub fn with_image_mode(mut self, mode: FakeMode) -> Self {
        self.image_mode = mode;
        self
    }

    pub fn with_image_dim(mut self, dim: usize) -> Self {
        self.image_dim = dim;
        self
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl BundleLoader for CountingLoader {
    fn load(&self, source: &ModelSource, progress: &dyn Fn(ProgressEvent)) -> Result<ModelBundle> {
        let attempt = self.loads.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);

        for file in FAKE_FILES {
            progress(ProgressEvent::new(file, &source.model_id, 50, 100));
            if attempt < self.fail_first {
                return Err(SimilarityError::ModelLoad(format!("{}: connection reset", file)));
            }
            progress(ProgressEvent::new(file, &source.model_id, 100, 100));
        }

        Ok(ModelBundle::new(
            source.clone(),
            Arc::new(FakeTokenizer::default()),
            Arc::new(small_preprocessor()),
            Arc::new(FakeTextEncoder::new(FakeMode::Normal)),
            Arc::new(FakeImageEncoder::new(self.image_mode).with_dim(self.image_dim)),
        ))
    }
}

pub fn png_bytes(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
    let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)));
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

/// Write a word-level `tokenizer.json` with `<bos> $A <eos>` framing.
pub fn write_word_level_tokenizer(dir: &Path, words: &[&str]) -> PathBuf {
    let mut vocab = serde_json::Map::new();
    for (i, tok) in ["<unk>", "<bos>", "<eos>"].iter().enumerate() {
        vocab.insert(tok.to_string(), serde_json::json!(i));
    }
    for (i, word) in words.iter().enumerate() {
        vocab.insert(word.to_string(), serde_json::json!(i + 3));
    }

    let added = |id: u32, content: &str| {
        serde_json::json!({
            "id": id, "content": content, "single_word": false, "lstrip": false,
            "rstrip": false, "normalized": false, "special": true
        })
    };
    let special = |name: &str, type_id: u32| serde_json::json!({"SpecialToken": {"id": name, "type_id": type_id}});
    let seq = |name: &str, type_id: u32| serde_json::json!({"Sequence": {"id": name, "type_id": type_id}});

    let json = serde_json::json!({
        "version": "1.0",
        "truncation": null,
        "padding": null,
        "added_tokens": [added(0, "<unk>"), added(1, "<bos>"), added(2, "<eos>")],
        "normalizer": null,
        "pre_tokenizer": {"type": "Whitespace"},
        "post_processor": {
            "type": "TemplateProcessing",
            "single": [special("<bos>", 0), seq("A", 0), special("<eos>", 0)],
            "pair": [special("<bos>", 0), seq("A", 0), special("<eos>", 0), seq("B", 1), special("<eos>", 1)],
            "special_tokens": {
                "<bos>": {"id": "<bos>", "ids": [1], "tokens": ["<bos>"]},
                "<eos>": {"id": "<eos>", "ids": [2], "tokens": ["<eos>"]}
            }
        },
        "decoder": null,
        "model": {"type": "WordLevel", "vocab": vocab, "unk_token": "<unk>"}
    });

    let path = dir.join("tokenizer.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&json).unwrap()).unwrap();
    path
}
