use derive_more::{Deref, From};
use displaydoc::Display;
use float_cmp::{ApproxEq, F32Margin};
use ndarray::{
    s,
    Array,
    Array2,
    ArrayBase,
    Axis,
    Data,
    Dimension,
    Ix1,
    Ix2,
    Ix3,
    NdFloat,
    ShapeError,
    Zip,
};
use num_traits::NumCast;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tract_onnx::prelude::TractError;

use crate::{model::Predictions, normalizer::l2_normalize, tokenizer::AttentionMasks};

/// The lower bound of the token count in the mean pooling denominator.
pub const MEAN_POOLING_EPSILON: f64 = 1e-9;

/// A d-dimensional sequence embedding.
#[derive(Clone, Debug, Deref, From, Serialize, Deserialize)]
pub struct Embedding<D>(Array<f32, D>)
where
    D: Dimension;

/// A 1-dimensional sequence embedding.
pub type Embedding1 = Embedding<Ix1>;

/// A 2-dimensional sequence embedding, one row per sequence.
pub type Embedding2 = Embedding<Ix2>;

impl<D> Embedding<D>
where
    D: Dimension,
{
    /// Unwraps the embedding array.
    pub fn into_inner(self) -> Array<f32, D> {
        self.0
    }
}

impl<S, D> PartialEq<ArrayBase<S, D>> for Embedding<D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    fn eq(&self, other: &ArrayBase<S, D>) -> bool {
        if self.shape() != other.shape() {
            return false;
        }

        let margin = F32Margin::default();
        Zip::from(&self.0)
            .and(other)
            .all(|this, other| (*this).approx_eq(*other, margin))
    }
}

impl<S, D> PartialEq<Embedding<D>> for ArrayBase<S, D>
where
    S: Data<Elem = f32>,
    D: Dimension,
{
    fn eq(&self, other: &Embedding<D>) -> bool {
        other.eq(self)
    }
}

impl<D> PartialEq for Embedding<D>
where
    D: Dimension,
{
    fn eq(&self, other: &Self) -> bool {
        self.eq(&other.0)
    }
}

/// The potential errors of the pooler.
#[derive(Debug, Display, Error)]
pub enum PoolerError {
    /// Mismatched shapes of the embeddings {embeddings:?} and the attention mask {mask:?}
    Shape {
        embeddings: [usize; 2],
        mask: [usize; 2],
    },
    /// The attention mask must only contain zeros and ones
    MaskValue,
    /// Invalid prediction datum type {0}
    Datum(#[from] TractError),
    /// Invalid prediction dimensionality {0}
    Dimensionality(#[from] ShapeError),
}

/// A value of an attention mask.
pub trait MaskValue: Copy {
    /// Checks whether the value marks an active token.
    ///
    /// Returns `None` if the value is not a valid mask value.
    fn is_active(self) -> Option<bool>;
}

impl MaskValue for bool {
    fn is_active(self) -> Option<bool> {
        Some(self)
    }
}

macro_rules! impl_mask_value {
    ($($int:ty),+ $(,)?) => {
        $(
            impl MaskValue for $int {
                fn is_active(self) -> Option<bool> {
                    match self {
                        0 => Some(false),
                        1 => Some(true),
                        _ => None,
                    }
                }
            }
        )+
    };
}

impl_mask_value!(u8, u32, u64, usize, i32, i64);

/// Checks that the mask matches the leading dimensions of the embeddings and casts it to weights.
fn mask_weights<A, S1, S2>(
    token_embeddings: &ArrayBase<S1, Ix3>,
    attention_mask: &ArrayBase<S2, Ix2>,
) -> Result<Array2<A>, PoolerError>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data,
    S2::Elem: MaskValue,
{
    let (batch_size, token_size, _) = token_embeddings.dim();
    if attention_mask.dim() != (batch_size, token_size) {
        let (mask_rows, mask_cols) = attention_mask.dim();
        return Err(PoolerError::Shape {
            embeddings: [batch_size, token_size],
            mask: [mask_rows, mask_cols],
        });
    }
    if !attention_mask.iter().all(|value| value.is_active().is_some()) {
        return Err(PoolerError::MaskValue);
    }

    Ok(attention_mask.mapv(|value| {
        if value.is_active().unwrap_or_default() {
            A::one()
        } else {
            A::zero()
        }
    }))
}

/// Pools the token embeddings over their averaged, active tokens.
///
/// The embeddings are of shape `(batch_size, token_size, embedding_size)` and the attention mask
/// is of shape `(batch_size, token_size)`. The pooled embeddings are of shape
/// `(batch_size, embedding_size)`. The token count of each sequence is clamped to
/// [`MEAN_POOLING_EPSILON`] from below, hence a sequence without active tokens is pooled to zeros.
///
/// # Errors
/// Fails if the shapes don't match or if the mask contains values other than zero and one.
pub fn mean_pool<A, S1, S2>(
    token_embeddings: &ArrayBase<S1, Ix3>,
    attention_mask: &ArrayBase<S2, Ix2>,
) -> Result<Array2<A>, PoolerError>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data,
    S2::Elem: MaskValue,
{
    let (batch_size, token_size, embedding_size) = token_embeddings.dim();
    let mask = mask_weights(token_embeddings, attention_mask)?.insert_axis(Axis(2));
    let expanded_mask = mask
        .broadcast(token_embeddings.raw_dim())
        .ok_or(PoolerError::Shape {
            embeddings: [batch_size, token_size],
            mask: [batch_size, token_size],
        })?;
    debug_assert_eq!(
        expanded_mask.dim(),
        (batch_size, token_size, embedding_size),
    );

    let sum_embeddings = (token_embeddings * &expanded_mask).sum_axis(Axis(1));
    let epsilon =
        <A as NumCast>::from(MEAN_POOLING_EPSILON).unwrap_or_else(A::min_positive_value);
    let sum_mask = expanded_mask
        .sum_axis(Axis(1))
        .mapv(|count| count.max(epsilon).min(A::max_value()));

    Ok(sum_embeddings / &sum_mask)
}

/// Pools the token embeddings over their first tokens.
///
/// The attention mask is only checked for its shape. Sequences of zero tokens are pooled to zeros.
///
/// # Errors
/// Fails if the shapes don't match or if the mask contains values other than zero and one.
pub fn first_pool<A, S1, S2>(
    token_embeddings: &ArrayBase<S1, Ix3>,
    attention_mask: &ArrayBase<S2, Ix2>,
) -> Result<Array2<A>, PoolerError>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data,
    S2::Elem: MaskValue,
{
    mask_weights(token_embeddings, attention_mask)?;

    let (batch_size, token_size, embedding_size) = token_embeddings.dim();
    if token_size == 0 {
        Ok(Array2::zeros((batch_size, embedding_size)))
    } else {
        Ok(token_embeddings.slice(s![.., 0, ..]).to_owned())
    }
}

/// Computes the sentence embeddings from the token embeddings.
///
/// The token embeddings are mean pooled over the active tokens of the attention mask, see
/// [`mean_pool()`], and each pooled row is optionally scaled to unit length, see
/// [`l2_normalize()`].
///
/// # Errors
/// Fails if the shapes don't match or if the mask contains values other than zero and one.
pub fn pool_and_normalize<A, S1, S2>(
    token_embeddings: &ArrayBase<S1, Ix3>,
    attention_mask: &ArrayBase<S2, Ix2>,
    normalize: bool,
) -> Result<Array2<A>, PoolerError>
where
    A: NdFloat,
    S1: Data<Elem = A>,
    S2: Data,
    S2::Elem: MaskValue,
{
    let pooled = mean_pool(token_embeddings, attention_mask)?;
    if normalize {
        Ok(l2_normalize(pooled))
    } else {
        Ok(pooled)
    }
}

/// A pooling strategy for the model predictions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Pooler {
    /// Pools the predictions over their first tokens (`[CLS]`).
    First,
    /// Pools the predictions over their averaged, active tokens.
    Average,
}

impl Default for Pooler {
    fn default() -> Self {
        Pooler::Average
    }
}

impl Pooler {
    /// Pools the predictions of shape `(batch_size, token_size, embedding_size)`.
    pub(crate) fn pool(
        &self,
        predictions: &Predictions,
        attention_masks: &AttentionMasks,
    ) -> Result<Embedding2, PoolerError> {
        let predictions = predictions
            .to_array_view::<f32>()?
            .into_dimensionality::<Ix3>()?;
        let pooled = match self {
            Pooler::First => first_pool(&predictions, &attention_masks.0)?,
            Pooler::Average => mean_pool(&predictions, &attention_masks.0)?,
        };

        Ok(pooled.into())
    }
}
