use ndarray::{Array2, NdFloat};
use num_traits::NumCast;

/// The lower bound of the l2 norm in the normalization denominator.
pub const NORM_EPSILON: f64 = 1e-12;

/// Scales each row of the embeddings to unit length.
///
/// The l2 norm of each row is clamped to [`NORM_EPSILON`] from below, hence rows of zeros stay
/// zeros instead of turning into NaNs.
pub fn l2_normalize<A>(mut embeddings: Array2<A>) -> Array2<A>
where
    A: NdFloat,
{
    let epsilon = <A as NumCast>::from(NORM_EPSILON).unwrap_or_else(A::min_positive_value);
    for mut row in embeddings.rows_mut() {
        let norm = row.dot(&row).sqrt().max(epsilon);
        row.mapv_inplace(|value| value / norm);
    }

    embeddings
}
