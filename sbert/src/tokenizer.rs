use std::{
    io::{Error as IoError, Read},
    path::Path,
};

use derive_more::{Deref, From};
use displaydoc::Display;
use ndarray::Array2;
use thiserror::Error;
use tokenizers::{Encoding, PostProcessor, Tokenizer as HfTokenizer, TruncationParams};

/// The potential errors of the tokenizer.
#[derive(Debug, Display, Error)]
pub enum TokenizerError {
    /// Failed to read the tokenizer: {0}
    Read(#[from] IoError),
    /// Failed to build the tokenizer: {0}
    Build(String),
    /// Failed to encode the sequences: {0}
    Encode(String),
}

/// The token ids of the encoded sequences.
#[derive(Clone, Debug, Deref, From)]
pub struct TokenIds(pub Array2<i64>);

/// The attention masks of the encoded sequences.
#[derive(Clone, Debug, Deref, From)]
pub struct AttentionMasks(pub Array2<i64>);

/// The type ids of the encoded sequences.
#[derive(Clone, Debug, Deref, From)]
pub struct TypeIds(pub Array2<i64>);

/// The encoded sequences.
///
/// All arrays are of shape `(batch_size, token_size)`, where the token size is the number of
/// tokens of the longest sequence and shorter sequences are padded with zeros.
#[derive(Clone, Debug)]
pub struct Encodings {
    pub token_ids: TokenIds,
    pub attention_masks: AttentionMasks,
    pub type_ids: TypeIds,
}

impl Encodings {
    /// Returns the `(batch_size, token_size)` shape of the encodings.
    pub fn dim(&self) -> (usize, usize) {
        self.token_ids.dim()
    }
}

/// Encodes batches of sequences.
pub trait Tokenize {
    /// Encodes the sequences into padded token arrays.
    fn encode_batch(&self, sequences: &[&str]) -> Result<Encodings, TokenizerError>;
}

/// A wrapped, pre-configured huggingface tokenizer.
pub struct Tokenizer {
    tokenizer: HfTokenizer,
    token_size: usize,
}

impl Tokenizer {
    /// Creates a tokenizer from a serialized `tokenizer.json`.
    ///
    /// Sequences are truncated to the maximum number of tokens per tokenized sequence, which
    /// includes special tokens as well.
    pub fn new(mut tokenizer: impl Read, token_size: usize) -> Result<Self, TokenizerError> {
        let mut json = String::new();
        tokenizer.read_to_string(&mut json)?;
        let tokenizer = json
            .parse::<HfTokenizer>()
            .map_err(|error| TokenizerError::Build(error.to_string()))?;

        Self::with_tokenizer(tokenizer, token_size)
    }

    /// Creates a tokenizer from a `tokenizer.json` file.
    pub fn from_file(
        tokenizer: impl AsRef<Path>,
        token_size: usize,
    ) -> Result<Self, TokenizerError> {
        let tokenizer = HfTokenizer::from_file(tokenizer)
            .map_err(|error| TokenizerError::Build(error.to_string()))?;

        Self::with_tokenizer(tokenizer, token_size)
    }

    /// Wraps an already built tokenizer.
    ///
    /// Any padding of the tokenizer is disabled, the encodings are padded per batch instead.
    ///
    /// # Errors
    /// Fails if the token size leaves no room for a regular token next to the special tokens
    /// added by the post processor.
    pub fn with_tokenizer(
        mut tokenizer: HfTokenizer,
        token_size: usize,
    ) -> Result<Self, TokenizerError> {
        let special_tokens = tokenizer
            .get_post_processor()
            .map_or(0, |processor| processor.added_tokens(false));
        if token_size <= special_tokens {
            return Err(TokenizerError::Build(format!(
                "token size {} must exceed the {} special tokens",
                token_size, special_tokens,
            )));
        }

        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: token_size,
                ..TruncationParams::default()
            }))
            .map_err(|error| TokenizerError::Build(error.to_string()))?;
        tokenizer.with_padding(None);

        Ok(Tokenizer {
            tokenizer,
            token_size,
        })
    }

    /// Returns the maximum number of tokens per tokenized sequence.
    pub fn token_size(&self) -> usize {
        self.token_size
    }
}

impl Tokenize for Tokenizer {
    fn encode_batch(&self, sequences: &[&str]) -> Result<Encodings, TokenizerError> {
        let encodings = self
            .tokenizer
            .encode_batch(sequences.to_vec(), true)
            .map_err(|error| TokenizerError::Encode(error.to_string()))?;

        Ok(pad_encodings(&encodings, self.token_size))
    }
}

/// Collects the encodings into arrays padded with zeros to the longest encoding.
///
/// Encodings longer than the token size are cut off.
fn pad_encodings(encodings: &[Encoding], token_size: usize) -> Encodings {
    let max_len = encodings
        .iter()
        .map(Encoding::len)
        .max()
        .unwrap_or_default()
        .min(token_size);
    let shape = (encodings.len(), max_len);
    let pad = |values: fn(&Encoding) -> &[u32]| {
        Array2::from_shape_fn(shape, |(i, j)| {
            values(&encodings[i])
                .get(j)
                .map_or(0, |&value| i64::from(value))
        })
    };

    Encodings {
        token_ids: pad(Encoding::get_ids).into(),
        attention_masks: pad(Encoding::get_attention_mask).into(),
        type_ids: pad(Encoding::get_type_ids).into(),
    }
}
