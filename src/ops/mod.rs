//! Reference CPU kernels
//!
//! # Kernels
//!
//! This module provides the [`Op`] implementations the engine is exercised
//! with, together with expression helpers on [`Graph`] that append them.
//!
//! ## Implemented Ops
//!
//! - leaves: [`Input`], [`ParameterOp`]
//! - elementwise unary: [`Unary`] (tanh, rectify, sigmoid, erf, sqrt, exp, log-gamma, log, negate)
//! - [`MatrixMultiply`]: column-major, batched, parallel over output columns using [`rayon`](https://docs.rs/rayon)
//! - arithmetic: [`CwiseSum`], [`ConstScalarMultiply`]
//! - reductions: [`SumElements`], [`SumBatches`], [`SquaredDistance`], [`MaxElements`]
//! - [`ToDevice`]: copies a value onto another device
//!
//! ## Notes
//!
//! - Kernels read every size from their views, so the engine can call them on
//!   fused, reshaped buffers.
//! - Backward kernels add into the gradient buffer; they never overwrite it.
//! - Shapes are trusted, not validated.
//!
//! [`Op`]: crate::graph::Op

mod arith;
mod input;
mod matmul;
mod reduce;
mod transfer;
mod unary;

pub use self::arith::{ConstScalarMultiply, CwiseSum};
pub use self::input::{Input, InputValue, ParameterOp};
pub use self::matmul::MatrixMultiply;
pub use self::reduce::{MaxElements, SquaredDistance, SumBatches, SumElements};
pub use self::transfer::ToDevice;
pub use self::unary::{Unary, UnaryFn};

use crate::device::DeviceId;
use crate::error::Result;
use crate::graph::{Graph, VariableIndex};
use crate::params::Parameter;
use crate::tensors::Tensor;

/// Expression helpers, one per reference kernel.
impl Graph {
    /// A constant input holding `value`.
    pub fn input(&mut self, value: Tensor) -> Result<VariableIndex> {
        self.input_value(&InputValue::new(value))
    }

    /// An input whose value can be replaced between passes.
    pub fn input_value(&mut self, value: &InputValue) -> Result<VariableIndex> {
        self.add(Input::new(value.clone()), &[])
    }

    /// A learnable parameter.
    pub fn parameter(&mut self, param: &Parameter) -> Result<VariableIndex> {
        self.add(ParameterOp::new(param.clone()), &[])
    }

    /// Applies an elementwise function.
    pub fn unary(&mut self, f: UnaryFn, x: VariableIndex) -> Result<VariableIndex> {
        self.add(Unary::new(f), &[x])
    }

    pub fn tanh(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Tanh, x)
    }

    pub fn rectify(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Rectify, x)
    }

    pub fn sigmoid(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Sigmoid, x)
    }

    pub fn erf(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Erf, x)
    }

    pub fn sqrt(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Sqrt, x)
    }

    pub fn exp(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Exp, x)
    }

    pub fn lgamma(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::LogGamma, x)
    }

    pub fn log(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Log, x)
    }

    pub fn negate(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.unary(UnaryFn::Negate, x)
    }

    /// Matrix product `a * b`.
    pub fn matmul(&mut self, a: VariableIndex, b: VariableIndex) -> Result<VariableIndex> {
        self.add(MatrixMultiply, &[a, b])
    }

    /// Element-wise sum of any number of same-shaped values.
    pub fn add_all(&mut self, xs: &[VariableIndex]) -> Result<VariableIndex> {
        self.add(CwiseSum, xs)
    }

    /// `x * c` for a constant `c`.
    pub fn scale(&mut self, x: VariableIndex, c: f32) -> Result<VariableIndex> {
        self.add(ConstScalarMultiply::new(c), &[x])
    }

    /// Sum of all elements of each batch element.
    pub fn sum_elements(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.add(SumElements, &[x])
    }

    /// Sum over the batch axis.
    pub fn sum_batches(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.add(SumBatches, &[x])
    }

    /// `||a - b||^2` per batch element.
    pub fn squared_distance(&mut self, a: VariableIndex, b: VariableIndex) -> Result<VariableIndex> {
        self.add(SquaredDistance, &[a, b])
    }

    /// Largest element of each batch element.
    pub fn max_elements(&mut self, x: VariableIndex) -> Result<VariableIndex> {
        self.add(MaxElements, &[x])
    }

    /// Copies `x` onto `device`.
    pub fn to_device(&mut self, x: VariableIndex, device: DeviceId) -> Result<VariableIndex> {
        self.add_on(ToDevice::new(device), &[x], device)
    }
}
