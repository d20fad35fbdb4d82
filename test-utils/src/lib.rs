//! Test utilities of the workspace.
//!
//! The pretrained model assets are expected as an exported sentence transformers directory in
//! `data/<model>` or in the directory given by the `SBERT_MODEL_DIR` environment variable. Tests
//! depending on them are ignored by default, run them with `cargo test -- --ignored`.

mod approx_eq;
mod asset;
pub mod minilm;

pub use crate::{
    approx_eq::{assert_flattened_approx_eq, FlattenIndexed},
    asset::{resolve_model_dir, resolve_path, DATA_DIR, MODEL_DIR_VAR},
};
