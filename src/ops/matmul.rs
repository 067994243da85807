//! Matrix multiplication `C = A × B`.
//!
//! Operands are column-major. `A` is `m×k`, `B` is `k×n` (a `{k}` vector counts
//! as `k×1`), and either side may be batched; an unbatched operand is reused
//! for every batch element of the other.
//!
//! ## Optimizations
//! - Uses `rayon` to compute output columns in parallel
//! - Every size is read from the views, so a fused call over `n` concatenated
//!   right-hand vectors is just a wider `B`

use rayon::prelude::*;

use crate::graph::{NodeType, Op};
use crate::tensors::{Dim, TensorView, TensorViewMut};

/// Node computing `xs[0] * xs[1]`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatrixMultiply;

impl Op for MatrixMultiply {
    fn node_type(&self) -> NodeType {
        NodeType::MatrixMultiply
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        let (a, b) = (xs[0], xs[1]);
        let bd = a.batch_elems().max(b.batch_elems());
        if b.ndims() == 1 {
            Dim::batched(&[a.rows()], bd)
        } else {
            Dim::batched(&[a.rows(), b.cols()], bd)
        }
    }

    fn forward(&self, xs: &[TensorView<'_>], mut fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        let (a, b) = (xs[0], xs[1]);
        let m = a.dim.rows();
        let k = a.dim.cols();
        if m == 0 || k == 0 {
            fx.data.fill(0.0);
            return;
        }
        for batch in 0..fx.dim.batch_elems() {
            let (a, b) = (a.batch(batch), b.batch(batch));
            fx.batch_mut(batch)
                .par_chunks_mut(m)
                .enumerate()
                .for_each(|(j, col)| {
                    col.fill(0.0);
                    for l in 0..k {
                        let blj = b[l + j * k];
                        for (c, &alr) in col.iter_mut().zip(&a[l * m..(l + 1) * m]) {
                            *c += alr * blj;
                        }
                    }
                });
        }
    }

    fn backward(
        &self,
        xs: &[TensorView<'_>],
        _fx: TensorView<'_>,
        dedf: TensorView<'_>,
        i: usize,
        mut dedxi: TensorViewMut<'_>,
        _aux: &[f32],
    ) {
        let (a, b) = (xs[0], xs[1]);
        let m = a.dim.rows();
        let k = a.dim.cols();
        if m == 0 || k == 0 {
            return;
        }
        let n = dedf.dim.batch_size() / m;
        // an unbatched operand receives the sum over all batch elements
        for batch in 0..dedf.dim.batch_elems() {
            let dy = dedf.batch(batch);
            if i == 0 {
                // dA += dY * B^T
                let b = b.batch(batch);
                dedxi
                    .batch_mut(batch)
                    .par_chunks_mut(m)
                    .enumerate()
                    .for_each(|(l, col)| {
                        for j in 0..n {
                            let blj = b[l + j * k];
                            for (g, &d) in col.iter_mut().zip(&dy[j * m..(j + 1) * m]) {
                                *g += d * blj;
                            }
                        }
                    });
            } else {
                // dB += A^T * dY
                let a = a.batch(batch);
                dedxi
                    .batch_mut(batch)
                    .par_chunks_mut(k)
                    .enumerate()
                    .for_each(|(j, col)| {
                        let dyj = &dy[j * m..(j + 1) * m];
                        for (l, g) in col.iter_mut().enumerate() {
                            *g += a[l * m..(l + 1) * m]
                                .iter()
                                .zip(dyj)
                                .map(|(x, y)| x * y)
                                .sum::<f32>();
                        }
                    });
            }
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("{} * {}", args[0], args[1])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;
    use crate::tensors::Tensor;

    fn run(a: &Tensor, b: &Tensor) -> Tensor {
        let dim = MatrixMultiply.dim_forward(&[a.dim, b.dim]);
        let mut out = Tensor::zeros(dim);
        MatrixMultiply.forward(
            &[a.view(), b.view()],
            TensorViewMut::new(dim, &mut out.data),
            &mut [],
        );
        out
    }

    #[test]
    fn matrix_times_matrix() {
        let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let b = tensor!([[5.0, 6.0], [7.0, 8.0]]);
        assert_eq!(run(&a, &b), tensor!([[19.0, 22.0], [43.0, 50.0]]));
    }

    #[test]
    fn matrix_times_vector() {
        let a = tensor!([[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let x = tensor!([1.0, 0.0, -1.0]);
        let y = run(&a, &x);
        assert_eq!(y.dim, Dim::new(&[2]));
        assert_eq!(y.data, vec![-2.0, -2.0]);
    }

    #[test]
    fn unbatched_left_operand_broadcasts() {
        let a = tensor!([[2.0, 0.0], [0.0, 3.0]]);
        let x = Tensor::new(Dim::batched(&[2], 2), vec![1.0, 1.0, 2.0, -1.0]);
        let y = run(&a, &x);
        assert_eq!(y.dim, Dim::batched(&[2], 2));
        assert_eq!(y.data, vec![2.0, 3.0, 4.0, -3.0]);
    }

    #[test]
    fn gradients_of_both_operands() {
        let a = tensor!([[1.0, 2.0], [3.0, 4.0]]);
        let b = tensor!([[5.0, 6.0], [7.0, 8.0]]);
        let y = run(&a, &b);
        let ones = Tensor::new(y.dim, vec![1.0; 4]);
        let mut da = Tensor::zeros(a.dim);
        let mut db = Tensor::zeros(b.dim);
        MatrixMultiply.backward(&[a.view(), b.view()], y.view(), ones.view(), 0, TensorViewMut::new(a.dim, &mut da.data), &[]);
        MatrixMultiply.backward(&[a.view(), b.view()], y.view(), ones.view(), 1, TensorViewMut::new(b.dim, &mut db.data), &[]);
        // dA = 1 * B^T: row sums of B; dB = A^T * 1: column sums of A
        assert_eq!(da, tensor!([[11.0, 15.0], [11.0, 15.0]]));
        assert_eq!(db, tensor!([[4.0, 4.0], [6.0, 6.0]]));
    }

    #[test]
    fn batched_gradient_sums_into_unbatched_weight() {
        let a = tensor!([[1.0, 1.0]]);
        let x = Tensor::new(Dim::batched(&[2], 2), vec![1.0, 2.0, 3.0, 4.0]);
        let y = run(&a, &x);
        assert_eq!(y.data, vec![3.0, 7.0]);
        let dy = Tensor::new(y.dim, vec![1.0, 1.0]);
        let mut da = Tensor::zeros(a.dim);
        MatrixMultiply.backward(&[a.view(), x.view()], y.view(), dy.view(), 0, TensorViewMut::new(a.dim, &mut da.data), &[]);
        assert_eq!(da.data, vec![4.0, 6.0]);
    }
}
