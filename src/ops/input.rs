//! Leaf nodes: inputs and parameters.

use std::sync::{Arc, PoisonError, RwLock};

use crate::graph::{NodeType, Op};
use crate::params::Parameter;
use crate::tensors::{Dim, Tensor, TensorView, TensorViewMut};

/// Shared, replaceable input data.
///
/// Replacing the data does not invalidate cached values; call
/// `invalidate` (or `forward`) on the engine afterwards.
#[derive(Debug, Clone)]
pub struct InputValue(Arc<RwLock<Tensor>>);

impl InputValue {
    pub fn new(value: Tensor) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    /// Replaces the data.
    ///
    /// # Panics
    /// Panics if the shape differs from the current one.
    pub fn set(&self, value: Tensor) {
        self.0.write().unwrap_or_else(PoisonError::into_inner).update(value);
    }

    /// Shape of the data.
    pub fn dim(&self) -> Dim {
        self.0.read().unwrap_or_else(PoisonError::into_inner).dim
    }

    fn copy_into(&self, out: &mut [f32]) {
        out.copy_from_slice(&self.0.read().unwrap_or_else(PoisonError::into_inner).data);
    }
}

/// Copies an [`InputValue`] into the graph.
#[derive(Debug)]
pub struct Input {
    value: InputValue,
}

impl Input {
    pub fn new(value: InputValue) -> Self {
        Self { value }
    }
}

impl Op for Input {
    fn node_type(&self) -> NodeType {
        NodeType::Input
    }

    fn dim_forward(&self, _xs: &[Dim]) -> Dim {
        self.value.dim()
    }

    fn forward(&self, _xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        self.value.copy_into(fx.data);
    }

    fn backward(&self, _: &[TensorView<'_>], _: TensorView<'_>, _: TensorView<'_>, _: usize, _: TensorViewMut<'_>, _: &[f32]) {}

    fn as_string(&self, _args: &[String]) -> String {
        format!("input {}", self.value.dim())
    }
}

/// Copies a [`Parameter`]'s value into the graph.
#[derive(Debug)]
pub struct ParameterOp {
    param: Parameter,
}

impl ParameterOp {
    pub fn new(param: Parameter) -> Self {
        Self { param }
    }
}

impl Op for ParameterOp {
    fn node_type(&self) -> NodeType {
        NodeType::Parameter
    }

    fn dim_forward(&self, _xs: &[Dim]) -> Dim {
        self.param.dim()
    }

    fn forward(&self, _xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        self.param.copy_value_into(fx.data);
    }

    fn backward(&self, _: &[TensorView<'_>], _: TensorView<'_>, _: TensorView<'_>, _: usize, _: TensorViewMut<'_>, _: &[f32]) {}

    fn as_string(&self, _args: &[String]) -> String {
        format!("parameter {}", self.param.dim())
    }

    fn parameter(&self) -> Option<&Parameter> {
        Some(&self.param)
    }
}
