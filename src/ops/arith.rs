//! Element-wise arithmetic.

use crate::graph::{NodeType, Op};
use crate::tensors::{Dim, TensorView, TensorViewMut};

/// Element-wise sum of all arguments. Unbatched arguments are added to every
/// batch element.
#[derive(Debug, Clone, Copy, Default)]
pub struct CwiseSum;

impl Op for CwiseSum {
    fn node_type(&self) -> NodeType {
        NodeType::CwiseSum
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        let bd = xs.iter().map(Dim::batch_elems).max().unwrap_or(1);
        let first = xs.first().copied().unwrap_or_default();
        Dim::batched(first.dims(), bd)
    }

    fn forward(&self, xs: &[TensorView<'_>], mut fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        fx.data.fill(0.0);
        for batch in 0..fx.dim.batch_elems() {
            let out = fx.batch_mut(batch);
            for x in xs {
                for (y, v) in out.iter_mut().zip(x.batch(batch)) {
                    *y += v;
                }
            }
        }
    }

    fn backward(
        &self,
        _xs: &[TensorView<'_>],
        _fx: TensorView<'_>,
        dedf: TensorView<'_>,
        _i: usize,
        mut dedxi: TensorViewMut<'_>,
        _aux: &[f32],
    ) {
        for batch in 0..dedf.dim.batch_elems() {
            for (g, d) in dedxi.batch_mut(batch).iter_mut().zip(dedf.batch(batch)) {
                *g += d;
            }
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        args.join(" + ")
    }
}

/// Multiplies every element by a constant.
#[derive(Debug, Clone, Copy)]
pub struct ConstScalarMultiply {
    c: f32,
}

impl ConstScalarMultiply {
    pub fn new(c: f32) -> Self {
        Self { c }
    }
}

impl Op for ConstScalarMultiply {
    fn node_type(&self) -> NodeType {
        NodeType::ConstScalarMultiply
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        xs[0]
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        for (y, x) in fx.data.iter_mut().zip(xs[0].data) {
            *y = x * self.c;
        }
    }

    fn backward(
        &self,
        _xs: &[TensorView<'_>],
        _fx: TensorView<'_>,
        dedf: TensorView<'_>,
        _i: usize,
        dedxi: TensorViewMut<'_>,
        _aux: &[f32],
    ) {
        for (g, d) in dedxi.data.iter_mut().zip(dedf.data) {
            *g += d * self.c;
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("{} * {}", args[0], self.c)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::Tensor;

    #[test]
    fn sum_broadcasts_unbatched_arguments() {
        let a = Tensor::new(Dim::batched(&[2], 2), vec![1.0, 2.0, 3.0, 4.0]);
        let b = Tensor::new(Dim::new(&[2]), vec![10.0, 20.0]);
        let dim = CwiseSum.dim_forward(&[a.dim, b.dim]);
        assert_eq!(dim, Dim::batched(&[2], 2));
        let mut out = Tensor::zeros(dim);
        CwiseSum.forward(&[a.view(), b.view()], TensorViewMut::new(dim, &mut out.data), &mut []);
        assert_eq!(out.data, vec![11.0, 22.0, 13.0, 24.0]);

        let mut db = Tensor::zeros(b.dim);
        let dy = Tensor::new(dim, vec![1.0, 1.0, 1.0, 1.0]);
        CwiseSum.backward(&[a.view(), b.view()], out.view(), dy.view(), 1, TensorViewMut::new(b.dim, &mut db.data), &[]);
        assert_eq!(db.data, vec![2.0, 2.0]);
    }

    #[test]
    fn scalar_multiply_scales_gradient() {
        let op = ConstScalarMultiply::new(-3.0);
        let x = Tensor::new(Dim::new(&[2]), vec![1.0, 2.0]);
        let mut y = Tensor::zeros(x.dim);
        op.forward(&[x.view()], TensorViewMut::new(x.dim, &mut y.data), &mut []);
        assert_eq!(y.data, vec![-3.0, -6.0]);
        let mut g = vec![1.0, 1.0];
        op.backward(&[x.view()], y.view(), Tensor::new(x.dim, vec![1.0, 2.0]).view(), 0, TensorViewMut::new(x.dim, &mut g), &[]);
        assert_eq!(g, vec![-2.0, -5.0]);
        assert_eq!(op.as_string(&["v0".to_string()]), "v0 * -3");
    }
}
