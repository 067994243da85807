//! Reductions to one value per batch element.

use crate::graph::{NodeType, Op};
use crate::tensors::{Dim, TensorView, TensorViewMut};

fn per_batch_scalar(x: Dim) -> Dim {
    Dim::batched(&[1], x.batch_elems())
}

/// Sum of all elements of each batch element.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumElements;

impl Op for SumElements {
    fn node_type(&self) -> NodeType {
        NodeType::SumElements
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        per_batch_scalar(xs[0])
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        for (b, y) in fx.data.iter_mut().enumerate() {
            *y = xs[0].batch(b).iter().sum();
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
        for (b, &d) in dedf.data.iter().enumerate() {
            dedxi.batch_mut(b).iter_mut().for_each(|g| *g += d);
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("sum_elems({})", args[0])
    }
}

/// Sum over the batch axis.
#[derive(Debug, Clone, Copy, Default)]
pub struct SumBatches;

impl Op for SumBatches {
    fn node_type(&self) -> NodeType {
        NodeType::SumBatches
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        xs[0].single_batch()
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        fx.data.fill(0.0);
        for b in 0..xs[0].dim.batch_elems() {
            for (y, x) in fx.data.iter_mut().zip(xs[0].batch(b)) {
                *y += x;
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
        for b in 0..dedxi.dim.batch_elems() {
            for (g, d) in dedxi.batch_mut(b).iter_mut().zip(dedf.data) {
                *g += d;
            }
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("sum_batches({})", args[0])
    }
}

/// `||a - b||^2` for each batch element.
#[derive(Debug, Clone, Copy, Default)]
pub struct SquaredDistance;

impl Op for SquaredDistance {
    fn node_type(&self) -> NodeType {
        NodeType::SquaredDistance
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        Dim::batched(&[1], xs[0].batch_elems().max(xs[1].batch_elems()))
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        for (b, y) in fx.data.iter_mut().enumerate() {
            *y = xs[0]
                .batch(b)
                .iter()
                .zip(xs[1].batch(b))
                .map(|(p, q)| (p - q) * (p - q))
                .sum();
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
        let sign = if i == 0 { 2.0 } else { -2.0 };
        for (b, &d) in dedf.data.iter().enumerate() {
            let diff = xs[0].batch(b).iter().zip(xs[1].batch(b));
            for (g, (p, q)) in dedxi.batch_mut(b).iter_mut().zip(diff) {
                *g += sign * d * (p - q);
            }
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("|| {} - {} ||^2", args[0], args[1])
    }
}

/// Largest element of each batch element.
///
/// The winning position of each batch element is kept in aux storage for the
/// backward pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxElements;

impl Op for MaxElements {
    fn node_type(&self) -> NodeType {
        NodeType::MaxElements
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        per_batch_scalar(xs[0])
    }

    fn aux_storage_size(&self, dim: &Dim) -> usize {
        dim.batch_elems()
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, aux: &mut [f32]) {
        for (b, (y, arg)) in fx.data.iter_mut().zip(aux.iter_mut()).enumerate() {
            let (pos, best) = xs[0]
                .batch(b)
                .iter()
                .copied()
                .enumerate()
                .fold((0, f32::NEG_INFINITY), |acc, (p, v)| if v > acc.1 { (p, v) } else { acc });
            *y = best;
            *arg = pos as f32;
        }
    }

    fn backward(
        &self,
        _xs: &[TensorView<'_>],
        _fx: TensorView<'_>,
        dedf: TensorView<'_>,
        _i: usize,
        mut dedxi: TensorViewMut<'_>,
        aux: &[f32],
    ) {
        for (b, (&d, &arg)) in dedf.data.iter().zip(aux).enumerate() {
            dedxi.batch_mut(b)[arg as usize] += d;
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("max_elems({})", args[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensors::Tensor;

    fn forward(op: &dyn Op, xs: &[&Tensor]) -> (Tensor, Vec<f32>) {
        let dims: Vec<Dim> = xs.iter().map(|x| x.dim).collect();
        let dim = op.dim_forward(&dims);
        let views: Vec<TensorView<'_>> = xs.iter().map(|x| x.view()).collect();
        let mut out = Tensor::zeros(dim);
        let mut aux = vec![0.0; op.aux_storage_size(&dim)];
        op.forward(&views, TensorViewMut::new(dim, &mut out.data), &mut aux);
        (out, aux)
    }

    #[test]
    fn sums_per_batch_element() {
        let x = Tensor::new(Dim::batched(&[3], 2), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        let (y, _) = forward(&SumElements, &[&x]);
        assert_eq!(y.data, vec![6.0, 15.0]);
        let (s, _) = forward(&SumBatches, &[&x]);
        assert_eq!(s.dim, Dim::new(&[3]));
        assert_eq!(s.data, vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn squared_distance_and_gradients() {
        let a = Tensor::new(Dim::new(&[2]), vec![1.0, 3.0]);
        let b = Tensor::new(Dim::new(&[2]), vec![0.0, 1.0]);
        let (y, _) = forward(&SquaredDistance, &[&a, &b]);
        assert_eq!(y.as_scalar(), 5.0);
        let one = Tensor::scalar(1.0);
        let mut da = vec![0.0; 2];
        let mut db = vec![0.0; 2];
        SquaredDistance.backward(&[a.view(), b.view()], y.view(), one.view(), 0, TensorViewMut::new(a.dim, &mut da), &[]);
        SquaredDistance.backward(&[a.view(), b.view()], y.view(), one.view(), 1, TensorViewMut::new(b.dim, &mut db), &[]);
        assert_eq!(da, vec![2.0, 4.0]);
        assert_eq!(db, vec![-2.0, -4.0]);
    }

    #[test]
    fn max_routes_gradient_through_recorded_position() {
        let x = Tensor::new(Dim::batched(&[3], 2), vec![1.0, 7.0, 2.0, 9.0, -1.0, 0.0]);
        let (y, aux) = forward(&MaxElements, &[&x]);
        assert_eq!(y.data, vec![7.0, 9.0]);
        assert_eq!(aux, vec![1.0, 0.0]);
        let mut g = vec![0.0; 6];
        let dy = Tensor::new(y.dim, vec![1.0, 2.0]);
        MaxElements.backward(&[x.view()], y.view(), dy.view(), 0, TensorViewMut::new(x.dim, &mut g), &aux);
        assert_eq!(g, vec![0.0, 1.0, 0.0, 2.0, 0.0, 0.0]);
    }
}
