//! Run as `cargo run --example embed -- <model dir> <sequences>...`.

use std::{env::args, error::Error};

use sbert::{utils::cosine_similarity_matrix, Config, Pipeline};

fn main() -> Result<(), Box<dyn Error>> {
    let mut args = args().skip(1);
    let dir = args.next().ok_or("missing model directory")?;
    let sequences = args.collect::<Vec<_>>();

    let pipeline = Pipeline::from_config(Config::from_dir(dir)?.with_token_size(64)?)?;
    let embeddings = pipeline.run_batch(&sequences)?;
    assert_eq!(
        embeddings.shape(),
        [sequences.len(), pipeline.embedding_size()],
    );
    println!("{:.4}", cosine_similarity_matrix(&embeddings));

    Ok(())
}
