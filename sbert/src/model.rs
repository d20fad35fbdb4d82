use std::{
    io::{Error as IoError, Read},
    ops::RangeInclusive,
    sync::Arc,
};

use derive_more::{Deref, From};
use displaydoc::Display;
use log::debug;
use ndarray::{s, Array2, ArrayBase, Data, Ix2};
use thiserror::Error;
use tract_onnx::prelude::{
    tvec,
    Datum,
    Framework,
    InferenceFact,
    InferenceModel,
    InferenceModelExt,
    IntoArcTensor,
    Tensor,
    TractError,
    TypedModel,
    TypedSimplePlan,
};

use crate::tokenizer::Encodings;

#[cfg(test)]
use mockall::automock;

/// The potential errors of the model.
#[derive(Debug, Display, Error)]
pub enum ModelError {
    /// Failed to read the onnx model: {0}
    Read(#[from] IoError),
    /// Failed to run a tract operation: {0}
    Tract(#[from] TractError),
    /// Invalid onnx model shapes
    Shape,
    /// Invalid number of onnx model inputs {0}, expected token ids, attention mask and optional type ids
    Inputs(usize),
    /// The batch size {actual} exceeds the model batch size {max}
    BatchSize { actual: usize, max: usize },
    /// The token size {actual} exceeds the model token size {max}
    TokenSize { actual: usize, max: usize },
}

/// The predicted token embeddings.
///
/// The predictions are of shape `(batch_size, token_size, embedding_size)`.
#[derive(Clone, Debug, Deref, From)]
pub struct Predictions(pub Arc<Tensor>);

/// Computes token embeddings of encoded sequences.
#[cfg_attr(test, automock)]
pub trait Predict {
    /// Runs prediction on the encoded sequences.
    ///
    /// The leading dimensions of the predictions match the shape of the encodings.
    fn predict(&self, encodings: &Encodings) -> Result<Predictions, ModelError>;

    /// Returns the number of values per token embedding.
    fn embedding_size(&self) -> usize;

    /// Returns the maximum number of sequences per prediction, if the model is limited.
    fn batch_size(&self) -> Option<usize>;
}

/// A transformer model based on an onnx definition.
pub struct OnnxModel {
    plan: TypedSimplePlan<TypedModel>,
    inputs: usize,
    batch_size: usize,
    token_size: usize,
    embedding_size: usize,
}

impl OnnxModel {
    /// The range of supported model inputs.
    const INPUTS: RangeInclusive<usize> = 2..=3;

    /// Creates a model from an onnx model file.
    ///
    /// Requires the batch and token size of the model inputs. The model takes token ids and
    /// attention masks and optionally type ids as inputs, in that order.
    pub fn new(
        mut model: impl Read,
        batch_size: usize,
        token_size: usize,
    ) -> Result<Self, ModelError> {
        let model = tract_onnx::onnx().model_for_read(&mut model)?;
        Self::plan(model, batch_size, token_size)
    }

    /// Plans the parsed onnx model for inputs of shape `(batch_size, token_size)`.
    pub(crate) fn plan(
        mut model: InferenceModel,
        batch_size: usize,
        token_size: usize,
    ) -> Result<Self, ModelError> {
        let input_fact = InferenceFact::dt_shape(i64::datum_type(), &[batch_size, token_size]);
        let inputs = model.inputs.len();
        if !Self::INPUTS.contains(&inputs) {
            return Err(ModelError::Inputs(inputs));
        }
        for input in 0..inputs {
            model = model.with_input_fact(input, input_fact.clone())?;
        }
        let plan = model.into_optimized()?.into_runnable()?;

        let embedding_size = match plan.model().output_fact(0)?.shape.as_concrete() {
            Some(&[batch, token, embedding]) if batch == batch_size && token == token_size => {
                embedding
            }
            _ => return Err(ModelError::Shape),
        };
        debug!(
            "planned onnx model with {} inputs of shape ({}, {}) and embedding size {}",
            inputs, batch_size, token_size, embedding_size,
        );

        Ok(OnnxModel {
            plan,
            inputs,
            batch_size,
            token_size,
            embedding_size,
        })
    }

    /// Returns the token size of the model.
    pub fn token_size(&self) -> usize {
        self.token_size
    }
}

impl Predict for OnnxModel {
    fn predict(&self, encodings: &Encodings) -> Result<Predictions, ModelError> {
        let (rows, cols) = encodings.dim();
        if rows > self.batch_size {
            return Err(ModelError::BatchSize {
                actual: rows,
                max: self.batch_size,
            });
        }
        if cols > self.token_size {
            return Err(ModelError::TokenSize {
                actual: cols,
                max: self.token_size,
            });
        }

        let shape = (self.batch_size, self.token_size);
        let mut inputs = tvec![
            pad(&encodings.token_ids.0, shape).into(),
            pad(&encodings.attention_masks.0, shape).into(),
        ];
        if self.inputs == 3 {
            inputs.push(pad(&encodings.type_ids.0, shape).into());
        }
        let outputs = self.plan.run(inputs)?;

        let predictions = outputs[0]
            .to_array_view::<f32>()?
            .slice(s![..rows, ..cols, ..])
            .to_owned()
            .into_arc_tensor();

        Ok(predictions.into())
    }

    fn embedding_size(&self) -> usize {
        self.embedding_size
    }

    fn batch_size(&self) -> Option<usize> {
        Some(self.batch_size)
    }
}

/// Pads the `array` with zeros to the `shape`.
fn pad<S>(array: &ArrayBase<S, Ix2>, shape: (usize, usize)) -> Array2<i64>
where
    S: Data<Elem = i64>,
{
    Array2::from_shape_fn(shape, |coords| array.get(coords).copied().unwrap_or(0))
}
