#![cfg_attr(doc, forbid(broken_intra_doc_links, private_intra_doc_links))]
//! The sbert crate computes sentence embeddings from transformer token embeddings.
//!
//! The token embeddings of a sequence are mean pooled over the active tokens of its attention
//! mask and the pooled embedding is optionally scaled to unit length:
//!
//! ```
//! use ndarray::{arr2, arr3};
//! use sbert::pool_and_normalize;
//!
//! let token_embeddings = arr3(&[[[1_f32, 1., 1., 1.], [2., 2., 2., 2.], [9., 9., 9., 9.]]]);
//! let attention_mask = arr2(&[[1, 1, 0]]);
//!
//! let embeddings = pool_and_normalize(&token_embeddings, &attention_mask, false).unwrap();
//! assert_eq!(embeddings, arr2(&[[1.5_f32, 1.5, 1.5, 1.5]]));
//!
//! let embeddings = pool_and_normalize(&token_embeddings, &attention_mask, true).unwrap();
//! assert_eq!(embeddings, arr2(&[[0.5_f32, 0.5, 0.5, 0.5]]));
//! ```
//!
//! The [`Pipeline`] fuses a tokenizer, an onnx model and the pooling:
//!
//! ```no_run
//! use sbert::{Config, Pipeline};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_dir("all-MiniLM-L6-v2")?.with_batch_size(16)?;
//!     let pipeline = Pipeline::from_config(config)?;
//!
//!     let embeddings = pipeline.run_batch(&["This is a sequence.", "This is another one."])?;
//!     assert_eq!(embeddings.shape(), [2, pipeline.embedding_size()]);
//!
//!     Ok(())
//! }
//! ```

mod config;
mod model;
mod normalizer;
mod pipeline;
mod pooler;
mod tokenizer;
pub mod utils;

pub use crate::{
    config::{Config, ConfigError},
    model::{ModelError, OnnxModel, Predict, Predictions},
    normalizer::{l2_normalize, NORM_EPSILON},
    pipeline::{Pipeline, PipelineError},
    pooler::{
        first_pool,
        mean_pool,
        pool_and_normalize,
        Embedding,
        Embedding1,
        Embedding2,
        MaskValue,
        Pooler,
        PoolerError,
        MEAN_POOLING_EPSILON,
    },
    tokenizer::{AttentionMasks, Encodings, TokenIds, Tokenize, Tokenizer, TokenizerError, TypeIds},
};
