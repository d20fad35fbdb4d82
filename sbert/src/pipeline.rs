use displaydoc::Display;
use log::{debug, info};
use ndarray::{concatenate, Array2, Axis, ShapeError};
use thiserror::Error;

use crate::{
    config::{Config, ConfigError},
    model::{ModelError, OnnxModel, Predict},
    normalizer::l2_normalize,
    pooler::{Embedding1, Embedding2, Pooler, PoolerError},
    tokenizer::{Tokenize, Tokenizer, TokenizerError},
};

/// A pipeline for a sentence embedding model.
///
/// Consists of a tokenizer, a model and a pooler, the pooled embeddings are optionally normalized.
/// Can be created from a [`Config`] or assembled from any [`Tokenize`] and [`Predict`]
/// implementations.
pub struct Pipeline<T, M> {
    pub(crate) tokenizer: T,
    pub(crate) model: M,
    pub(crate) pooler: Pooler,
    pub(crate) normalize: bool,
    pub(crate) batch_size: usize,
}

/// The potential errors of the [`Pipeline`].
#[derive(Debug, Display, Error)]
pub enum PipelineError {
    /// Failed to run the tokenizer: {0}
    Tokenizer(#[from] TokenizerError),
    /// Failed to run the model: {0}
    Model(#[from] ModelError),
    /// Failed to run the pooler: {0}
    Pooler(#[from] PoolerError),
    /// Failed to concatenate the batched embeddings: {0}
    Concatenate(#[from] ShapeError),
}

impl Pipeline<Tokenizer, OnnxModel> {
    /// Creates a pipeline from a configuration.
    pub fn from_config(config: Config) -> Result<Self, PipelineError> {
        let tokenizer = Tokenizer::new(config.tokenizer, config.token_size)?;
        let model = OnnxModel::new(config.model, config.batch_size, config.token_size)?;
        info!(
            "created pipeline with {:?} pooling and embedding size {}",
            config.pooler,
            model.embedding_size(),
        );

        Ok(Pipeline {
            tokenizer,
            model,
            pooler: config.pooler,
            normalize: config.normalize,
            batch_size: config.batch_size,
        })
    }
}

impl<T, M> Pipeline<T, M>
where
    T: Tokenize,
    M: Predict,
{
    /// Assembles a pipeline from a tokenizer and a model.
    ///
    /// The embeddings aren't normalized and the sequences are processed in batches of the model
    /// batch size by default, or of [`Config::BATCH_SIZE`] if the model isn't limited.
    pub fn new(tokenizer: T, model: M, pooler: Pooler) -> Self {
        let batch_size = model.batch_size().unwrap_or(Config::BATCH_SIZE);
        Pipeline {
            tokenizer,
            model,
            pooler,
            normalize: false,
            batch_size,
        }
    }

    /// Whether the pooled embeddings are scaled to unit length.
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Sets the maximum number of sequences per model run.
    ///
    /// The size is capped at the model batch size.
    ///
    /// # Errors
    /// Fails if `size` is zero.
    pub fn with_batch_size(mut self, size: usize) -> Result<Self, ConfigError> {
        if size > 0 {
            self.batch_size = self.model.batch_size().map_or(size, |max| size.min(max));
            Ok(self)
        } else {
            Err(ConfigError::BatchSize)
        }
    }

    /// Computes the embedding of the sequence.
    pub fn run(&self, sequence: impl AsRef<str>) -> Result<Embedding1, PipelineError> {
        let embeddings = self.run_batch(&[sequence.as_ref()])?;
        Ok(embeddings.into_inner().index_axis_move(Axis(0), 0).into())
    }

    /// Computes the embeddings of the sequences, one row per sequence in the given order.
    ///
    /// The sequences are processed in chunks of the batch size.
    pub fn run_batch(&self, sequences: &[impl AsRef<str>]) -> Result<Embedding2, PipelineError> {
        if sequences.is_empty() {
            return Ok(Array2::zeros((0, self.embedding_size())).into());
        }

        let sequences = sequences.iter().map(AsRef::as_ref).collect::<Vec<&str>>();
        let embeddings = sequences
            .chunks(self.batch_size)
            .map(|batch| self.run_chunk(batch))
            .collect::<Result<Vec<_>, _>>()?;
        let embeddings = embeddings
            .iter()
            .map(|embedding| embedding.view())
            .collect::<Vec<_>>();

        concatenate(Axis(0), &embeddings)
            .map(Into::into)
            .map_err(Into::into)
    }

    fn run_chunk(&self, sequences: &[&str]) -> Result<Embedding2, PipelineError> {
        let encodings = self.tokenizer.encode_batch(sequences)?;
        let predictions = self.model.predict(&encodings)?;
        let embeddings = self.pooler.pool(&predictions, &encodings.attention_masks)?;
        debug!(
            "pooled {} sequences of {} tokens",
            encodings.dim().0,
            encodings.dim().1,
        );

        if self.normalize {
            Ok(l2_normalize(embeddings.into_inner()).into())
        } else {
            Ok(embeddings)
        }
    }

    /// Gets the embedding size.
    pub fn embedding_size(&self) -> usize {
        self.model.embedding_size()
    }
}

impl<T, M> Pipeline<T, M> {
    /// Gets the maximum number of sequences per model run.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Gets the pooling strategy.
    pub fn pooler(&self) -> Pooler {
        self.pooler
    }

    /// Whether the pooled embeddings are scaled to unit length.
    pub fn normalize(&self) -> bool {
        self.normalize
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, error::Error};

    use ndarray::{arr1, arr2, Array1, Array3};
    use tract_onnx::prelude::IntoArcTensor;

    use super::*;
    use crate::{
        model::{tests::concat_model, MockPredict, Predictions},
        tokenizer::Encodings,
        utils::{cosine_similarity, cosine_similarity_matrix, l2_norm},
    };
    use test_utils::{assert_approx_eq, minilm};

    /// Encodes each word as a token of its length.
    fn encode(sequences: &[&str]) -> Encodings {
        let words = sequences
            .iter()
            .map(|sequence| sequence.split_whitespace().collect::<Vec<_>>())
            .collect::<Vec<_>>();
        let token_size = words.iter().map(Vec::len).max().unwrap_or_default();
        let token_ids = Array2::from_shape_fn((sequences.len(), token_size), |(i, j)| {
            words[i].get(j).map_or(0, |word| word.len() as i64)
        });
        let attention_masks = token_ids.mapv(|id| (id > 0) as i64);
        let type_ids = Array2::<i64>::zeros(token_ids.raw_dim());

        Encodings {
            token_ids: token_ids.into(),
            attention_masks: attention_masks.into(),
            type_ids: type_ids.into(),
        }
    }

    /// Predicts the token id and a constant one for each token.
    fn predict(encodings: &Encodings) -> Predictions {
        let (batch_size, token_size) = encodings.dim();
        Array3::from_shape_fn((batch_size, token_size, 2), |(i, j, k)| {
            if k == 0 {
                encodings.token_ids[[i, j]] as f32
            } else {
                1.
            }
        })
        .into_arc_tensor()
        .into()
    }

    /// Counts the encoded batches.
    #[derive(Default)]
    struct WordLengths {
        batches: Cell<usize>,
    }

    impl Tokenize for WordLengths {
        fn encode_batch(&self, sequences: &[&str]) -> Result<Encodings, TokenizerError> {
            self.batches.set(self.batches.get() + 1);
            Ok(encode(sequences))
        }
    }

    struct Invalid;

    impl Tokenize for Invalid {
        fn encode_batch(&self, _sequences: &[&str]) -> Result<Encodings, TokenizerError> {
            Err(TokenizerError::Encode("invalid".into()))
        }
    }

    fn model(times: usize) -> MockPredict {
        let mut model = MockPredict::new();
        model
            .expect_predict()
            .times(times)
            .returning(|encodings| Ok(predict(encodings)));
        model.expect_embedding_size().return_const(2_usize);
        model.expect_batch_size().return_const(None::<usize>);
        model
    }

    #[test]
    fn test_run() {
        let pipeline = Pipeline::new(WordLengths::default(), model(1), Pooler::Average);
        let embedding = pipeline.run("a bbb").unwrap();
        assert_eq!(embedding, arr1(&[2., 1.]));
    }

    #[test]
    fn test_run_batch_chunked() {
        let pipeline = Pipeline::new(WordLengths::default(), model(2), Pooler::Average)
            .with_batch_size(2)
            .unwrap();
        let embeddings = pipeline
            .run_batch(&["a bb", "ccc", "dddd ee f"])
            .unwrap();
        assert_approx_eq!(
            f32,
            embeddings.view(),
            [[1.5, 1.], [3., 1.], [7. / 3., 1.]],
        );
        assert_eq!(pipeline.tokenizer.batches.get(), 2);
    }

    #[test]
    fn test_run_batch_first() {
        let pipeline = Pipeline::new(WordLengths::default(), model(1), Pooler::First);
        let embeddings = pipeline.run_batch(&["a bb", "ccc"]).unwrap();
        assert_eq!(embeddings, arr2(&[[1., 1.], [3., 1.]]));
    }

    #[test]
    fn test_run_batch_normalized() {
        let pipeline = Pipeline::new(WordLengths::default(), model(1), Pooler::Average)
            .with_normalize(true);
        let embeddings = pipeline.run_batch(&["ccc", "a"]).unwrap();
        let norm = 10_f32.sqrt();
        assert_approx_eq!(
            f32,
            embeddings.view(),
            [[3. / norm, 1. / norm], [0.5_f32.sqrt(), 0.5_f32.sqrt()]],
            epsilon = 1e-6,
        );
    }

    #[test]
    fn test_run_batch_degenerate() {
        let pipeline = Pipeline::new(WordLengths::default(), model(1), Pooler::Average)
            .with_normalize(true);
        let embeddings = pipeline.run_batch(&["", "a"]).unwrap();
        assert_eq!(embeddings.row(0), Array1::<f32>::zeros(2));
        assert!(embeddings.iter().all(|value| value.is_finite()));
    }

    #[test]
    fn test_run_batch_empty() {
        let pipeline = Pipeline::new(WordLengths::default(), model(0), Pooler::Average);
        let embeddings = pipeline.run_batch(&[] as &[&str]).unwrap();
        assert_eq!(embeddings.shape(), [0, 2]);
        assert_eq!(pipeline.tokenizer.batches.get(), 0);
    }

    #[test]
    fn test_run_batch_tokenizer_error() {
        let pipeline = Pipeline::new(Invalid, model(0), Pooler::Average);

        let error = pipeline.run_batch(&["a"]).unwrap_err();
        assert!(matches!(
            error,
            PipelineError::Tokenizer(TokenizerError::Encode(_)),
        ));
    }

    #[test]
    fn test_run_batch_model_error() {
        let mut model = MockPredict::new();
        model
            .expect_predict()
            .returning(|_| Err(ModelError::TokenSize { actual: 3, max: 2 }));
        model.expect_batch_size().return_const(Some(2_usize));
        let pipeline = Pipeline::new(WordLengths::default(), model, Pooler::Average);

        let error = pipeline.run_batch(&["a b c"]).unwrap_err();
        assert!(matches!(
            error,
            PipelineError::Model(ModelError::TokenSize { actual: 3, max: 2 }),
        ));
    }

    #[test]
    fn test_with_batch_size_invalid() {
        let pipeline = Pipeline::new(WordLengths::default(), model(0), Pooler::Average);
        assert!(matches!(
            pipeline.with_batch_size(0).err().unwrap(),
            ConfigError::BatchSize,
        ));
    }

    #[test]
    fn test_batch_size_capped() {
        let mut model = MockPredict::new();
        model
            .expect_predict()
            .times(2)
            .returning(|encodings| Ok(predict(encodings)));
        model.expect_embedding_size().return_const(2_usize);
        model.expect_batch_size().return_const(Some(2_usize));

        let pipeline = Pipeline::new(WordLengths::default(), model, Pooler::Average);
        assert_eq!(pipeline.batch_size(), 2);
        let pipeline = pipeline.with_batch_size(8).unwrap();
        assert_eq!(pipeline.batch_size(), 2);
        let pipeline = pipeline.with_batch_size(1).unwrap();
        assert_eq!(pipeline.batch_size(), 1);
        let pipeline = pipeline.with_batch_size(2).unwrap();

        let embeddings = pipeline.run_batch(&["a", "bb", "ccc"]).unwrap();
        assert_eq!(embeddings.shape(), [3, 2]);
        assert_eq!(pipeline.tokenizer.batches.get(), 2);
    }

    #[test]
    fn test_run_batch_onnx_model() {
        let model = OnnxModel::plan(concat_model(2), 4, 8).unwrap();
        let pipeline = Pipeline::new(WordLengths::default(), model, Pooler::Average);
        assert_eq!(pipeline.batch_size(), 4);

        let embeddings = pipeline
            .run_batch(&["a", "bb", "ccc", "dddd", "a bbb"])
            .unwrap();
        assert_eq!(
            embeddings,
            arr2(&[[1., 1.], [2., 1.], [3., 1.], [4., 1.], [2., 1.]]),
        );
        assert_eq!(pipeline.tokenizer.batches.get(), 2);
    }

    #[test]
    #[ignore = "requires the all-MiniLM-L6-v2 onnx assets"]
    fn test_pipeline_minilm() -> Result<(), Box<dyn Error>> {
        let config = Config::from_dir(minilm::dir()?)?
            .with_batch_size(2)?
            .with_token_size(64)?;
        let pipeline = Pipeline::from_config(config)?;
        assert!(pipeline.normalize());
        assert_eq!(pipeline.pooler(), Pooler::Average);

        let embeddings = pipeline.run_batch(&[
            "A man is eating food.",
            "A man is eating a piece of bread.",
            "The girl is carrying a baby.",
        ])?;
        assert_eq!(embeddings.shape(), [3, pipeline.embedding_size()]);
        for row in embeddings.rows() {
            assert_approx_eq!(f32, l2_norm(&&row), 1., epsilon = 1e-5);
        }

        let similarities = cosine_similarity_matrix(&embeddings);
        assert!(similarities[[0, 1]] > similarities[[0, 2]]);

        let embedding = pipeline.run("A man is eating food.")?;
        assert_approx_eq!(
            f32,
            cosine_similarity(&&embedding.view(), &&embeddings.row(0)),
            1.,
            epsilon = 1e-5,
        );

        Ok(())
    }
}
