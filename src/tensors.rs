//! Shapes and tensor buffers.
//!
//! # Layout
//!
//! Values live in flat `f32` buffers laid out **column-major**: the first
//! dimension varies fastest, and batch elements are stored one after another
//! as the outermost axis. With this layout, `n` vectors of length `k` written
//! back to back form a `k x n` matrix, which is what the fused matrix-multiply
//! path in [`exec`](crate::exec) relies on.
//!
//! # Types
//!
//! - [`Dim`]: a small `Copy` shape with up to [`MAX_DIMS`] dimensions and a batch count
//! - [`Tensor`]: an owned buffer, used for parameters, inputs and results
//! - [`TensorView`] / [`TensorViewMut`]: borrowed windows into pool memory, handed to kernels
//!
//! # Example
//!
//! ```rust
//! use fusegraph::tensor;
//! // literals are written row by row and stored column-major
//! let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! assert_eq!(t.dim.dims(), &[2, 2]);
//! assert_eq!(t.data, vec![1.0, 3.0, 2.0, 4.0]);
//! ```

use std::fmt;

/// Maximum number of dimensions a [`Dim`] can carry.
pub const MAX_DIMS: usize = 7;

/// Shape of a value: up to [`MAX_DIMS`] dimensions plus a batch count.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dim {
    d: [usize; MAX_DIMS],
    nd: usize,
    bd: usize,
}

impl Dim {
    /// Creates an unbatched shape.
    ///
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] dimensions are given.
    pub fn new(dims: &[usize]) -> Self {
        Self::batched(dims, 1)
    }

    /// Creates a shape with `bd` batch elements.
    ///
    /// # Panics
    /// Panics if more than [`MAX_DIMS`] dimensions are given.
    pub fn batched(dims: &[usize], bd: usize) -> Self {
        assert!(
            dims.len() <= MAX_DIMS,
            "{} dimensions requested, at most {MAX_DIMS} supported",
            dims.len()
        );
        let mut d = [1; MAX_DIMS];
        d[..dims.len()].copy_from_slice(dims);
        Self {
            d,
            nd: dims.len(),
            bd: bd.max(1),
        }
    }

    /// A one-element vector shape.
    pub fn scalar() -> Self {
        Self::new(&[1])
    }

    /// The dimensions, without the batch count.
    pub fn dims(&self) -> &[usize] {
        &self.d[..self.nd]
    }

    /// Number of dimensions.
    pub fn ndims(&self) -> usize {
        self.nd
    }

    /// Number of batch elements.
    pub fn batch_elems(&self) -> usize {
        self.bd
    }

    /// Elements in a single batch element.
    pub fn batch_size(&self) -> usize {
        self.dims().iter().product()
    }

    /// Total number of elements, batches included.
    pub fn size(&self) -> usize {
        self.batch_size() * self.bd
    }

    /// First dimension, or 1 for a rank-0 shape.
    pub fn rows(&self) -> usize {
        self.d[0]
    }

    /// Second dimension, or 1 when there is none.
    pub fn cols(&self) -> usize {
        self.d[1]
    }

    /// The same shape with the batch axis removed.
    #[must_use]
    pub fn single_batch(&self) -> Self {
        Self { bd: 1, ..*self }
    }
}

impl Default for Dim {
    fn default() -> Self {
        Self::scalar()
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, d) in self.dims().iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "}}")?;
        if self.bd > 1 {
            write!(f, "X{}", self.bd)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An owned tensor: shape plus column-major data.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    pub dim: Dim,
    pub data: Vec<f32>,
}

impl Tensor {
    /// Creates a tensor from column-major data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape.
    pub fn new(dim: Dim, data: Vec<f32>) -> Self {
        assert_eq!(
            dim.size(),
            data.len(),
            "dim {dim} is incompatible with {} data elements",
            data.len()
        );
        Self { dim, data }
    }

    /// A zero-filled tensor.
    pub fn zeros(dim: Dim) -> Self {
        Self {
            dim,
            data: vec![0.0; dim.size()],
        }
    }

    /// A one-element tensor.
    pub fn scalar(value: f32) -> Self {
        Self::new(Dim::scalar(), vec![value])
    }

    /// Builds a tensor from row-major data (last index fastest), reordering it
    /// into the crate's column-major layout.
    ///
    /// # Panics
    /// Panics if `data` does not hold exactly `shape.iter().product()` elements.
    pub fn from_row_major(shape: &[usize], data: Vec<f32>) -> Self {
        let dim = Dim::new(shape);
        assert_eq!(dim.size(), data.len(), "shape {dim} does not match data");
        let mut out = vec![0.0; data.len()];
        let mut idx = [0usize; MAX_DIMS];
        for (r, &v) in data.iter().enumerate() {
            let mut rem = r;
            for k in (0..shape.len()).rev() {
                idx[k] = rem % shape[k];
                rem /= shape[k];
            }
            let mut c = 0;
            let mut stride = 1;
            for k in 0..shape.len() {
                c += idx[k] * stride;
                stride *= shape[k];
            }
            out[c] = v;
        }
        Self { dim, data: out }
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn update(&mut self, mut other: Tensor) {
        assert_eq!(self.dim, other.dim, "dim mismatch");
        std::mem::swap(&mut self.data, &mut other.data);
    }

    /// Borrows the tensor as a view.
    pub fn view(&self) -> TensorView<'_> {
        TensorView::new(self.dim, &self.data)
    }

    /// The single element of a one-element tensor.
    pub fn as_scalar(&self) -> f32 {
        self.view().as_scalar()
    }
}

/// Read-only window into tensor memory.
#[derive(Debug, Clone, Copy)]
pub struct TensorView<'a> {
    pub dim: Dim,
    pub data: &'a [f32],
}

impl<'a> TensorView<'a> {
    /// Wraps `data` with the given shape.
    ///
    /// # Panics
    /// Panics if the slice length does not match the shape.
    pub fn new(dim: Dim, data: &'a [f32]) -> Self {
        assert_eq!(dim.size(), data.len(), "view dim {dim} over {} elements", data.len());
        Self { dim, data }
    }

    /// Batch element `b`; an unbatched view returns its only element for every `b`.
    pub fn batch(&self, b: usize) -> &'a [f32] {
        let n = self.dim.batch_size();
        let b = if self.dim.batch_elems() == 1 { 0 } else { b };
        &self.data[b * n..(b + 1) * n]
    }

    /// Element `(row, col)` of batch element 0.
    pub fn at(&self, row: usize, col: usize) -> f32 {
        self.data[row + col * self.dim.rows()]
    }

    /// The first element; intended for one-element values.
    pub fn as_scalar(&self) -> f32 {
        self.data[0]
    }

    /// Copies the view into an owned tensor.
    pub fn to_tensor(&self) -> Tensor {
        Tensor::new(self.dim, self.data.to_vec())
    }
}

/// Writable window into tensor memory.
#[derive(Debug)]
pub struct TensorViewMut<'a> {
    pub dim: Dim,
    pub data: &'a mut [f32],
}

impl<'a> TensorViewMut<'a> {
    /// Wraps `data` with the given shape.
    ///
    /// # Panics
    /// Panics if the slice length does not match the shape.
    pub fn new(dim: Dim, data: &'a mut [f32]) -> Self {
        assert_eq!(dim.size(), data.len(), "view dim {dim} over {} elements", data.len());
        Self { dim, data }
    }

    /// Mutable batch element `b`; an unbatched view returns its only element.
    pub fn batch_mut(&mut self, b: usize) -> &mut [f32] {
        let n = self.dim.batch_size();
        let b = if self.dim.batch_elems() == 1 { 0 } else { b };
        &mut self.data[b * n..(b + 1) * n]
    }

    /// Shared view of the same memory.
    pub fn as_view(&self) -> TensorView<'_> {
        TensorView {
            dim: self.dim,
            data: &self.data[..],
        }
    }
}

/// Defines a tensor from nested literal arrays, written row by row.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use fusegraph::tensor;
/// let v = tensor!([1.0, -2.0, 3.0]);
/// assert_eq!(v.dim.dims(), &[3]);
/// let m = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
/// assert_eq!(m.dim.dims(), &[2, 3]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($($body:tt)+) => {{
        let (shape, data) = $crate::__tensor_parts!($($body)+);
        $crate::tensors::Tensor::from_row_major(&shape, data)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __tensor_parts {
    ([ $( [ $($inner:tt)* ] ),+ $(,)? ]) => {{
        let children: ::std::vec::Vec<(::std::vec::Vec<usize>, ::std::vec::Vec<f32>)> =
            vec![ $( $crate::__tensor_parts!([ $($inner)* ]) ),+ ];
        let first_shape = children[0].0.clone();
        assert!(
            children.iter().all(|c| c.0 == first_shape),
            "ragged tensor literal (rows have mismatched shapes)"
        );
        let mut shape = vec![children.len()];
        shape.extend_from_slice(&first_shape);
        let mut data = ::std::vec::Vec::new();
        for c in children {
            data.extend(c.1);
        }
        (shape, data)
    }};

    ([ $( $x:expr ),+ $(,)? ]) => {{
        let data: ::std::vec::Vec<f32> = vec![ $( $x as f32 ),+ ];
        (vec![data.len()], data)
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dim_counts_batches() {
        let d = Dim::batched(&[3, 4], 2);
        assert_eq!(d.batch_size(), 12);
        assert_eq!(d.size(), 24);
        assert_eq!(d.rows(), 3);
        assert_eq!(d.cols(), 4);
        assert_eq!(d.to_string(), "{3,4}X2");
        assert_eq!(Dim::new(&[5]).cols(), 1);
    }

    #[test]
    fn row_major_literals_are_stored_column_major() {
        let t = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        assert_eq!(t.data, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
        assert_eq!(t.view().at(1, 2), 6.0);
        assert_eq!(t.view().at(0, 1), 2.0);
    }

    #[test]
    fn unbatched_view_broadcasts_over_batches() {
        let t = Tensor::new(Dim::new(&[2]), vec![1.0, 2.0]);
        assert_eq!(t.view().batch(3), &[1.0, 2.0]);
        let b = Tensor::new(Dim::batched(&[2], 2), vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(b.view().batch(1), &[3.0, 4.0]);
    }

    #[test]
    #[should_panic(expected = "incompatible")]
    fn tensor_shape_mismatch_panics() {
        let _ = Tensor::new(Dim::new(&[2, 2]), vec![1.0, 2.0, 3.0]);
    }
}
