//! Cross-device copies.

use crate::device::DeviceId;
use crate::graph::{NodeType, Op};
use crate::tensors::{Dim, TensorView, TensorViewMut};

/// Copies its argument onto another device. The gradient flows back unchanged.
#[derive(Debug, Clone, Copy)]
pub struct ToDevice {
    device: DeviceId,
}

impl ToDevice {
    pub fn new(device: DeviceId) -> Self {
        Self { device }
    }
}

impl Op for ToDevice {
    fn node_type(&self) -> NodeType {
        NodeType::ToDevice
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        xs[0]
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        fx.data.copy_from_slice(xs[0].data);
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
            *g += d;
        }
    }

    fn as_string(&self, args: &[String]) -> String {
        format!("to_device({}, {})", args[0], self.device)
    }
}
