use std::path::PathBuf;

use anyhow::{bail, Context, Error};
use log::warn;
use ndarray::{Array2, Array3};
use sbert::pool_and_normalize;
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

use crate::{
    exit_code::NO_ERROR,
    utils::{read_json, to_json, to_rows},
};

/// Pools token embeddings from a json file into sentence embeddings.
///
/// The file contains an object with the `token_embeddings` of shape
/// `(batch_size, token_size, embedding_size)` and the `attention_mask` of shape
/// `(batch_size, token_size)` as nested arrays.
#[derive(StructOpt, Debug)]
pub struct PoolCmd {
    /// Scale the pooled embeddings to unit length.
    #[structopt(long)]
    pub normalize: bool,

    #[structopt(long)]
    pub pretty: bool,

    /// The file with the token embeddings and the attention mask.
    pub input: PathBuf,
}

impl PoolCmd {
    pub fn run(self) -> Result<i32, Error> {
        let PoolCmd {
            normalize,
            pretty,
            input,
        } = self;

        let output = pool(read_json(&input)?, normalize)?;
        println!("{}", to_json(&output, pretty)?);

        Ok(NO_ERROR)
    }
}

/// Pools the token embeddings of the input.
///
/// Sequences without active tokens are valid, their embeddings are zero.
fn pool(input: PoolInput, normalize: bool) -> Result<PoolOutput, Error> {
    let token_embeddings = to_array3(input.token_embeddings)?;
    let attention_mask = to_array2(input.attention_mask)?;

    let embeddings = pool_and_normalize(&token_embeddings, &attention_mask, normalize)
        .context("Pooling failed")?;
    for (idx, mask) in attention_mask.rows().into_iter().enumerate() {
        if mask.iter().all(|&value| value == 0) {
            warn!("sequence {} has no active tokens, its embedding is zero", idx);
        }
    }

    Ok(PoolOutput {
        embeddings: to_rows(&embeddings),
    })
}

#[derive(Deserialize)]
struct PoolInput {
    token_embeddings: Vec<Vec<Vec<f32>>>,
    attention_mask: Vec<Vec<i64>>,
}

#[derive(Serialize)]
struct PoolOutput {
    embeddings: Vec<Vec<f32>>,
}

fn to_array2(rows: Vec<Vec<i64>>) -> Result<Array2<i64>, Error> {
    let shape = (rows.len(), rows.first().map_or(0, Vec::len));
    if rows.iter().any(|row| row.len() != shape.1) {
        bail!("Attention mask rows have different lengths");
    }

    Array2::from_shape_vec(shape, rows.into_iter().flatten().collect())
        .context("Collecting attention mask failed")
}

fn to_array3(batch: Vec<Vec<Vec<f32>>>) -> Result<Array3<f32>, Error> {
    let token_size = batch.first().map_or(0, Vec::len);
    let embedding_size = batch
        .first()
        .and_then(|tokens| tokens.first())
        .map_or(0, Vec::len);
    if batch.iter().any(|tokens| {
        tokens.len() != token_size || tokens.iter().any(|token| token.len() != embedding_size)
    }) {
        bail!("Token embeddings have different lengths");
    }

    let shape = (batch.len(), token_size, embedding_size);
    Array3::from_shape_vec(shape, batch.into_iter().flatten().flatten().collect())
        .context("Collecting token embeddings failed")
}
