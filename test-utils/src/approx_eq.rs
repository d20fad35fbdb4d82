use float_cmp::{ApproxEq, F32Margin};
use ndarray::{ArrayBase, Data, Dimension, IntoDimension, Ix};

/// Asserts the approximate equality of two `f32` values or of nested containers of them.
///
/// The containers can be slices, arrays, vectors or ndarray arrays in any combination, as long as
/// they have the same logical shape:
///
/// ```
/// use ndarray::arr2;
/// use test_utils::assert_approx_eq;
///
/// assert_approx_eq!(f32, 0.15039155, 0.1503916, ulps = 3);
/// assert_approx_eq!(f32, [[1., 2.], [3., 4.]], arr2(&[[1., 2.], [3., 4.0000001]]));
/// assert_approx_eq!(f32, vec![0.5, 0.25], [0.5, 0.2501], epsilon = 1e-3);
/// ```
///
/// The `epsilon` defaults to `0` and the `ulps` default to `2`. Two NaNs are considered equal.
#[macro_export]
macro_rules! assert_approx_eq {
    (f32, $left:expr, $right:expr $(,)?) => {
        $crate::assert_approx_eq!(f32, $left, $right, epsilon = 0., ulps = 2)
    };
    (f32, $left:expr, $right:expr, ulps = $ulps:expr $(,)?) => {
        $crate::assert_approx_eq!(f32, $left, $right, epsilon = 0., ulps = $ulps)
    };
    (f32, $left:expr, $right:expr, epsilon = $epsilon:expr $(,)?) => {
        $crate::assert_approx_eq!(f32, $left, $right, epsilon = $epsilon, ulps = 2)
    };
    (f32, $left:expr, $right:expr, epsilon = $epsilon:expr, ulps = $ulps:expr $(,)?) => {
        $crate::assert_flattened_approx_eq(&$left, &$right, $epsilon, $ulps)
    };
}

/// Flattens nested containers into their leaf values in logical order.
///
/// Implemented on references, each leaf is yielded with its multi-dimensional index.
pub trait FlattenIndexed<'a>: Copy {
    type Leaf;

    /// Yields the leaves, with their indices appended to the `prefix`.
    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a>;
}

impl<'a> FlattenIndexed<'a> for &'a f32 {
    type Leaf = f32;

    fn flatten_indexed(self, prefix: Vec<Ix>) -> Box<dyn Iterator<Item = (Vec<Ix>, f32)> + 'a> {
        Box::new(std::iter::once((prefix, *self)))
    }
}

impl<'a, T> FlattenIndexed<'a> for &'a &'a T
where
    &'a T: FlattenIndexed<'a>,
    T: 'a + ?Sized,
{
    type Leaf = <&'a T as FlattenIndexed<'a>>::Leaf;

    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a> {
        (*self).flatten_indexed(prefix)
    }
}

impl<'a, T: 'a> FlattenIndexed<'a> for &'a [T]
where
    &'a T: FlattenIndexed<'a>,
{
    type Leaf = <&'a T as FlattenIndexed<'a>>::Leaf;

    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a> {
        Box::new(self.iter().enumerate().flat_map(move |(idx, element)| {
            let mut prefix = prefix.clone();
            prefix.push(idx);
            element.flatten_indexed(prefix)
        }))
    }
}

impl<'a, T, const N: usize> FlattenIndexed<'a> for &'a [T; N]
where
    &'a T: FlattenIndexed<'a>,
{
    type Leaf = <&'a T as FlattenIndexed<'a>>::Leaf;

    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a> {
        self.as_ref().flatten_indexed(prefix)
    }
}

impl<'a, T: 'a> FlattenIndexed<'a> for &'a Vec<T>
where
    &'a T: FlattenIndexed<'a>,
{
    type Leaf = <&'a T as FlattenIndexed<'a>>::Leaf;

    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a> {
        self.as_slice().flatten_indexed(prefix)
    }
}

impl<'a, S, D> FlattenIndexed<'a> for &'a ArrayBase<S, D>
where
    S: Data,
    S::Elem: Copy,
    &'a S::Elem: FlattenIndexed<'a>,
    D: Dimension,
{
    type Leaf = S::Elem;

    fn flatten_indexed(
        self,
        prefix: Vec<Ix>,
    ) -> Box<dyn Iterator<Item = (Vec<Ix>, Self::Leaf)> + 'a> {
        Box::new(self.indexed_iter().map(move |(idx, element)| {
            let mut prefix = prefix.clone();
            prefix.extend(idx.into_dimension().as_array_view().iter());
            (prefix, *element)
        }))
    }
}

/// Compares the flattened leaves, see [`assert_approx_eq!`].
#[doc(hidden)]
#[track_caller]
pub fn assert_flattened_approx_eq<'a>(
    left: impl FlattenIndexed<'a, Leaf = f32>,
    right: impl FlattenIndexed<'a, Leaf = f32>,
    epsilon: f32,
    ulps: i32,
) {
    let margin = F32Margin { epsilon, ulps };
    let mut left = left.flatten_indexed(Vec::new());
    let mut right = right.flatten_indexed(Vec::new());
    loop {
        match (left.next(), right.next()) {
            (Some((left_idx, left_value)), Some((right_idx, right_value))) => {
                assert_eq!(
                    left_idx, right_idx,
                    "mismatched dimensionality in logical order: {:?} != {:?}",
                    left_idx, right_idx,
                );
                assert!(
                    (left_value.is_nan() && right_value.is_nan())
                        || left_value.approx_eq(right_value, margin),
                    "approximate equality failed (epsilon={:?}, ulps={:?}) at index {:?}: {:?} != {:?}",
                    epsilon,
                    ulps,
                    left_idx,
                    left_value,
                    right_value,
                );
            }
            (Some((idx, _)), None) => panic!("left input is longer, starting at index {:?}", idx),
            (None, Some((idx, _))) => panic!("right input is longer, starting at index {:?}", idx),
            (None, None) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::catch_unwind;

    use ndarray::{arr1, arr2, arr3};

    #[test]
    fn test_float() {
        assert_approx_eq!(f32, 0.15039155, 0.1503916, ulps = 3);
        catch_unwind(|| assert_approx_eq!(f32, 0.15039155, 0.1503916, ulps = 2)).unwrap_err();
    }

    #[test]
    fn test_epsilon() {
        assert_approx_eq!(f32, 0.125, 0.625, epsilon = 0.5);
        catch_unwind(|| assert_approx_eq!(f32, 0.125, 0.625, epsilon = 0.49)).unwrap_err();
    }

    #[test]
    fn test_containers() {
        assert_approx_eq!(f32, [0.25, 1.25], arr1(&[0.25, 1.25]));
        assert_approx_eq!(f32, vec![0.25, 1.25], &[0.25, 1.25]);
        assert_approx_eq!(
            f32,
            [[0.25, 1.25], [0., 0.125]],
            arr2(&[[0.25, 1.25], [0., 0.125]]),
        );
        assert_approx_eq!(
            f32,
            arr3(&[[[0.25], [1.25]]]).view(),
            [[[0.25], [1.25]]],
        );
    }

    #[test]
    fn test_nan() {
        assert_approx_eq!(f32, [3.1, f32::NAN, 1.], [3.1, f32::NAN, 1.]);
    }

    #[test]
    #[should_panic(expected = "at index [1]")]
    fn test_nan_mismatch() {
        assert_approx_eq!(f32, [3.1, f32::NAN, 1.], [3.1, 3., 1.]);
    }

    #[test]
    #[should_panic(expected = "at index [1, 0]")]
    fn test_value_mismatch() {
        assert_approx_eq!(f32, [[0.35, 4.35], [1., 2.]], arr2(&[[0.35, 4.35], [1.1, 2.]]));
    }

    #[test]
    #[should_panic(expected = "starting at index [0, 2]")]
    fn test_length_mismatch() {
        assert_approx_eq!(f32, [[1., 2., 3.]], [[1., 2.]]);
    }
}
