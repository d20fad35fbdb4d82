use std::{io::Result, path::PathBuf};

use crate::asset::{resolve_file, resolve_model_dir};

/// Resolves the directory of the exported all-MiniLM-L6-v2 sentence transformers model.
pub fn dir() -> Result<PathBuf> {
    resolve_model_dir("all-MiniLM-L6-v2")
}

/// Resolves the path to the all-MiniLM-L6-v2 tokenizer.
pub fn tokenizer() -> Result<PathBuf> {
    resolve_file(&dir()?, &["tokenizer.json"])
}

/// Resolves the path to the all-MiniLM-L6-v2 onnx model.
pub fn model() -> Result<PathBuf> {
    resolve_file(&dir()?, &["model.onnx", "onnx/model.onnx"])
}
