use std::ops::Deref;

use ndarray::{Array2, ArrayBase, Data, Ix1, Ix2};

/// Computes the l2 norm (euclidean metric) of a vector.
///
/// # Panics
/// Panics if the vector doesn't consist solely of real values.
pub fn l2_norm<A, S>(a: &A) -> f32
where
    A: Deref<Target = ArrayBase<S, Ix1>>,
    S: Data<Elem = f32>,
{
    let norm = a.dot(a.deref()).sqrt();
    assert!(
        norm.is_finite(),
        "vector must consist of real values only, but got:\n{:?}",
        a.deref(),
    );

    norm
}

/// Computes the cosine similarity of two vectors.
///
/// The similarity is zero if any of the vectors is zero.
///
/// # Panics
/// Panics if the vectors don't consist solely of real values or their shapes don't match.
pub fn cosine_similarity<A, B, S>(a: &A, b: &B) -> f32
where
    A: Deref<Target = ArrayBase<S, Ix1>>,
    B: Deref<Target = ArrayBase<S, Ix1>>,
    S: Data<Elem = f32>,
{
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);

    (norm_a != 0. && norm_b != 0.)
        .then(|| a.dot(b.deref()) / norm_a / norm_b)
        .unwrap_or_default()
}

/// Computes the pairwise cosine similarities of the rows of the embeddings.
///
/// # Panics
/// Panics if the embeddings don't consist solely of real values.
pub fn cosine_similarity_matrix<E, S>(embeddings: &E) -> Array2<f32>
where
    E: Deref<Target = ArrayBase<S, Ix2>>,
    S: Data<Elem = f32>,
{
    let rows = embeddings.nrows();
    Array2::from_shape_fn((rows, rows), |(i, j)| {
        cosine_similarity(&&embeddings.row(i), &&embeddings.row(j))
    })
}

#[cfg(test)]
mod tests {
    use ndarray::{arr1, arr2};

    use super::*;
    use crate::pooler::{Embedding1, Embedding2};
    use test_utils::assert_approx_eq;

    #[test]
    fn test_l2_norm() {
        let a = Embedding1::from(arr1(&[1., 2., 3.]));
        assert_approx_eq!(f32, l2_norm(&a), 3.7416575);
    }

    #[test]
    #[should_panic(expected = "vector must consist of real values only, but got")]
    fn test_l2_norm_nan() {
        let a = Embedding1::from(arr1(&[1., f32::NAN, 3.]));
        l2_norm(&a);
    }

    #[test]
    #[should_panic(expected = "vector must consist of real values only, but got")]
    fn test_l2_norm_inf() {
        let a = Embedding1::from(arr1(&[1., f32::INFINITY, 3.]));
        l2_norm(&a);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding1::from(arr1(&[1., 2., 3.]));
        let b = Embedding1::from(arr1(&[4., 5., 6.]));
        let c = Embedding1::from(arr1(&[-1., -2., -3.]));

        assert_approx_eq!(f32, cosine_similarity(&a, &a), 1., ulps = 4);
        assert_approx_eq!(f32, cosine_similarity(&a, &b), 0.9746319);
        assert_approx_eq!(f32, cosine_similarity(&a, &c), -1., ulps = 4);
    }

    #[test]
    fn test_cosine_similarity_zero() {
        let a = Embedding1::from(arr1(&[0., 0., 0.]));
        let b = Embedding1::from(arr1(&[4., 5., 6.]));
        assert_approx_eq!(f32, cosine_similarity(&a, &b), 0.);
        assert_approx_eq!(f32, cosine_similarity(&b, &a), 0.);
    }

    #[test]
    fn test_cosine_similarity_matrix() {
        let embeddings = Embedding2::from(arr2(&[[1., 0.], [0., 2.], [3., 3.], [0., 0.]]));
        let sqrt_half = 0.5_f32.sqrt();
        assert_approx_eq!(
            f32,
            cosine_similarity_matrix(&embeddings),
            [
                [1., 0., sqrt_half, 0.],
                [0., 1., sqrt_half, 0.],
                [sqrt_half, sqrt_half, 1., 0.],
                [0., 0., 0., 0.],
            ],
            epsilon = 1e-6,
        );
    }

    #[test]
    fn test_cosine_similarity_matrix_empty() {
        let embeddings = Embedding2::from(Array2::zeros((0, 3)));
        assert_eq!(cosine_similarity_matrix(&embeddings).dim(), (0, 0));
    }
}
