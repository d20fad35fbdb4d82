use std::{
    fs::File,
    io::{BufReader, Error as IoError, Read},
    ops::RangeInclusive,
    path::Path,
};

use displaydoc::Display;
use log::debug;
use serde::Deserialize;
use thiserror::Error;

use crate::pooler::Pooler;

/// The potential errors of the configuration.
#[derive(Debug, Display, Error)]
pub enum ConfigError {
    /// The batch size must be at least one
    BatchSize,
    /// The token size must be at least two to allow for special tokens and at most 512
    TokenSize,
    /// Failed to load a data file: {0}
    DataFile(#[from] IoError),
    /// Failed to parse a json configuration: {0}
    Json(#[from] serde_json::Error),
    /// Invalid module configuration: {0}
    Modules(String),
    /// The pooling mode must be either the first token or the mean of the tokens
    PoolingMode,
}

/// The configuration of a [`Pipeline`].
///
/// [`Pipeline`]: crate::Pipeline
pub struct Config<'a> {
    pub(crate) tokenizer: Box<dyn Read + Send + 'a>,
    pub(crate) model: Box<dyn Read + Send + 'a>,
    pub(crate) token_size: usize,
    pub(crate) batch_size: usize,
    pub(crate) pooler: Pooler,
    pub(crate) normalize: bool,
}

impl<'a> Config<'a> {
    /// The range of supported token sizes.
    ///
    /// The token size must also exceed the number of special tokens of the tokenizer, which is
    /// checked when the [`Pipeline`](crate::Pipeline) is created.
    pub const TOKEN_RANGE: RangeInclusive<usize> = 2..=512;

    /// The default number of sequences per model run.
    pub const BATCH_SIZE: usize = 32;

    /// The default number of tokens per sequence.
    pub const TOKEN_SIZE: usize = 128;

    /// Creates a configuration from a serialized `tokenizer.json` and an onnx model.
    pub fn from_readers(
        tokenizer: Box<dyn Read + Send + 'a>,
        model: Box<dyn Read + Send + 'a>,
    ) -> Self {
        Config {
            tokenizer,
            model,
            token_size: Self::TOKEN_SIZE,
            batch_size: Self::BATCH_SIZE,
            pooler: Pooler::default(),
            normalize: false,
        }
    }

    /// Creates a configuration from a `tokenizer.json` file and an onnx model file.
    pub fn from_files(
        tokenizer: impl AsRef<Path>,
        model: impl AsRef<Path>,
    ) -> Result<Self, ConfigError> {
        let tokenizer = Box::new(BufReader::new(File::open(tokenizer)?));
        let model = Box::new(BufReader::new(File::open(model)?));
        Ok(Self::from_readers(tokenizer, model))
    }

    /// Creates a configuration from an exported sentence transformers model directory.
    ///
    /// The directory contains the `tokenizer.json`, the onnx model as `model.onnx` or
    /// `onnx/model.onnx` and the sentence transformers configurations `modules.json`,
    /// `<pooling>/config.json` and optionally `sentence_bert_config.json`. The pooling strategy,
    /// the normalization and the token size are derived from the configurations.
    ///
    /// # Errors
    /// Fails if a file is missing or invalid or if the modules can't be represented by a pipeline.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Config<'static>, ConfigError> {
        let dir = dir.as_ref();

        let modules = read_json::<Vec<ModuleConfig>>(dir.join("modules.json"))?;
        let normalize = validate_modules(&modules)?;
        let pooling = read_json::<PoolingConfig>(dir.join(&modules[1].path).join("config.json"))?;
        let pooler = pooling.pooler()?;

        let model = ["model.onnx", "onnx/model.onnx"]
            .iter()
            .map(|model| dir.join(model))
            .find(|model| model.is_file())
            .unwrap_or_else(|| dir.join("model.onnx"));
        let config = Config::from_files(dir.join("tokenizer.json"), model)?
            .with_pooling(pooler)
            .with_normalize(normalize);

        let sentence_bert = dir.join("sentence_bert_config.json");
        let config = if sentence_bert.is_file() {
            let sentence_bert = read_json::<SentenceBertConfig>(sentence_bert)?;
            config.with_token_size(sentence_bert.max_seq_length)?
        } else {
            config
        };
        debug!(
            "loaded sentence transformers model from {} with {:?} pooling, normalization {} and token size {}",
            dir.display(),
            config.pooler,
            config.normalize,
            config.token_size,
        );

        Ok(config)
    }

    /// Sets the token size for the tokenizer and the model.
    ///
    /// Defaults to [`Config::TOKEN_SIZE`].
    ///
    /// # Errors
    /// Fails if `size` is less than two or greater than 512.
    pub fn with_token_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if Self::TOKEN_RANGE.contains(&size) {
            self.token_size = size;
            Ok(self)
        } else {
            Err(ConfigError::TokenSize)
        }
    }

    /// Sets the maximum number of sequences per model run.
    ///
    /// Defaults to [`Config::BATCH_SIZE`].
    ///
    /// # Errors
    /// Fails if `size` is zero.
    pub fn with_batch_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if size > 0 {
            self.batch_size = size;
            Ok(self)
        } else {
            Err(ConfigError::BatchSize)
        }
    }

    /// Sets the pooling strategy.
    ///
    /// Defaults to [`Pooler::Average`].
    pub fn with_pooling(mut self, pooler: Pooler) -> Self {
        self.pooler = pooler;
        self
    }

    /// Whether the pooled embeddings are scaled to unit length.
    ///
    /// Defaults to `false`.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }
}

/// A module entry of a `modules.json`.
#[derive(Debug, Deserialize)]
struct ModuleConfig {
    path: String,
    #[serde(rename = "type")]
    kind: String,
}

impl ModuleConfig {
    /// Returns the unqualified module type, eg. `Pooling` for `sentence_transformers.models.Pooling`.
    fn name(&self) -> &str {
        self.kind.rsplit('.').next().unwrap_or_default()
    }
}

/// Checks that the modules consist of a transformer and a pooling, optionally followed by a
/// normalization.
///
/// Returns whether the modules normalize the embeddings.
fn validate_modules(modules: &[ModuleConfig]) -> Result<bool, ConfigError> {
    let names = modules.iter().map(ModuleConfig::name).collect::<Vec<_>>();
    match names.as_slice() {
        ["Transformer", "Pooling"] => Ok(false),
        ["Transformer", "Pooling", "Normalize"] => Ok(true),
        ["Transformer", "Pooling", other, ..] => Err(ConfigError::Modules(format!(
            "unsupported module {} after the pooling",
            other,
        ))),
        _ => Err(ConfigError::Modules(format!(
            "expected a transformer and a pooling module, but got {:?}",
            names,
        ))),
    }
}

/// The pooling configuration of a sentence transformers model.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct PoolingConfig {
    pooling_mode_cls_token: bool,
    pooling_mode_mean_tokens: bool,
    pooling_mode_max_tokens: bool,
    pooling_mode_mean_sqrt_len_tokens: bool,
}

impl PoolingConfig {
    fn pooler(&self) -> Result<Pooler, ConfigError> {
        match (
            self.pooling_mode_cls_token,
            self.pooling_mode_mean_tokens,
            self.pooling_mode_max_tokens,
            self.pooling_mode_mean_sqrt_len_tokens,
        ) {
            (true, false, false, false) => Ok(Pooler::First),
            (false, true, false, false) => Ok(Pooler::Average),
            _ => Err(ConfigError::PoolingMode),
        }
    }
}

/// The sentence transformers specific configuration.
#[derive(Debug, Deserialize)]
struct SentenceBertConfig {
    max_seq_length: usize,
}

fn read_json<T>(path: impl AsRef<Path>) -> Result<T, ConfigError>
where
    T: for<'de> Deserialize<'de>,
{
    let file = BufReader::new(File::open(path)?);
    serde_json::from_reader(file).map_err(Into::into)
}
