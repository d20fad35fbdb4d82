use std::{
    env::current_dir,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context, Error};
use log::{info, warn};
use sbert::{utils::cosine_similarity_matrix, Config, Pipeline};
use serde::Serialize;
use structopt::StructOpt;

use crate::{
    exit_code::NO_ERROR,
    utils::{progress_spin_until_done, to_json, to_rows},
};

/// Embeds sequences with an exported sentence transformers model.
#[derive(StructOpt, Debug)]
pub struct EmbedCmd {
    /// The exported sentence transformers model directory.
    ///
    /// Defaults to `data/all-MiniLM-L6-v2` in the current or any parent directory.
    #[structopt(long)]
    pub model_dir: Option<PathBuf>,

    /// The maximum number of sequences per model run.
    #[structopt(short, long, default_value = "32")]
    pub batch_size: usize,

    /// The maximum number of tokens per sequence, defaults to the model configuration.
    #[structopt(short, long)]
    pub token_size: Option<usize>,

    /// Don't scale the embeddings to unit length, even if the model configuration does.
    #[structopt(long)]
    pub no_normalize: bool,

    /// Also output the pairwise cosine similarities of the embeddings.
    #[structopt(long)]
    pub similarity: bool,

    #[structopt(long)]
    pub pretty: bool,

    /// The sequences to embed.
    #[structopt(required = true)]
    pub sequences: Vec<String>,
}

impl EmbedCmd {
    const MODEL_DIR: &'static str = "all-MiniLM-L6-v2";

    pub fn run(self) -> Result<i32, Error> {
        let EmbedCmd {
            model_dir,
            batch_size,
            token_size,
            no_normalize,
            similarity,
            pretty,
            sequences,
        } = self;

        let model_dir = model_dir.map_or_else(find_model_dir, Ok)?;
        check_model_dir(&model_dir)?;

        let config = Config::from_dir(&model_dir)
            .context("Loading the model configuration failed")?
            .with_batch_size(batch_size)?;
        let config = match token_size {
            Some(size) => config.with_token_size(size)?,
            None => config,
        };
        let config = if no_normalize {
            config.with_normalize(false)
        } else {
            config
        };
        let pipeline = progress_spin_until_done("Loading model", || Pipeline::from_config(config))
            .context("Building the pipeline failed")?;
        info!(
            "embedding {} sequences with batch size {}",
            sequences.len(),
            pipeline.batch_size(),
        );

        let embeddings = pipeline
            .run_batch(&sequences)
            .context("Embedding the sequences failed")?;
        let output = EmbedOutput {
            embeddings: to_rows(&embeddings),
            similarities: similarity.then(|| to_rows(&cosine_similarity_matrix(&embeddings))),
        };
        println!("{}", to_json(&output, pretty)?);

        let empty = sequences
            .iter()
            .filter(|sequence| sequence.trim().is_empty())
            .count();
        if empty > 0 {
            warn!("{} of the sequences are empty, their embeddings are zero", empty);
        }

        Ok(NO_ERROR)
    }
}

#[derive(Serialize)]
struct EmbedOutput {
    embeddings: Vec<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    similarities: Option<Vec<Vec<f32>>>,
}

fn check_model_dir(dir: &Path) -> Result<(), Error> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(anyhow!("Model Dir is not a dir: {}", dir.display()))
    }
}

fn find_model_dir() -> Result<PathBuf, Error> {
    let current_dir = current_dir()?;
    let model_dir = current_dir
        .ancestors()
        .map(|dir| dir.join("data").join(EmbedCmd::MODEL_DIR))
        .find(|dir| dir.exists());

    model_dir.ok_or_else(|| {
        anyhow!(
            "No Model Dir data/{} found in {} or its parents",
            EmbedCmd::MODEL_DIR,
            current_dir.display(),
        )
    })
}
