//! Elementwise unary functions.
//!
//! Every function here maps each input element to one output element, with no
//! dependence on shape. That is what lets the engine evaluate a large group of
//! them as one call over a concatenated buffer.

use std::f32::consts::PI;

use crate::graph::{NodeType, Op};
use crate::tensors::{Dim, TensorView, TensorViewMut};

/// The supported elementwise functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryFn {
    Tanh,
    Rectify,
    Sigmoid,
    Erf,
    Sqrt,
    Exp,
    LogGamma,
    Log,
    Negate,
}

impl UnaryFn {
    /// `f(x)`.
    pub fn apply(self, x: f32) -> f32 {
        match self {
            Self::Tanh => libm::tanhf(x),
            Self::Rectify => x.max(0.0),
            Self::Sigmoid => 1.0 / (1.0 + libm::expf(-x)),
            Self::Erf => libm::erff(x),
            Self::Sqrt => libm::sqrtf(x),
            Self::Exp => libm::expf(x),
            Self::LogGamma => libm::lgammaf(x),
            Self::Log => libm::logf(x),
            Self::Negate => -x,
        }
    }

    /// `dy * f'(x)`, where `y = f(x)`.
    pub fn derivative(self, x: f32, y: f32, dy: f32) -> f32 {
        match self {
            Self::Tanh => dy * (1.0 - y * y),
            Self::Rectify => {
                if y > 0.0 {
                    dy
                } else {
                    0.0
                }
            }
            Self::Sigmoid => dy * y * (1.0 - y),
            Self::Erf => dy * 2.0 / PI.sqrt() * libm::expf(-x * x),
            Self::Sqrt => dy * 0.5 / y,
            Self::Exp => dy * y,
            Self::LogGamma => dy * digamma(x),
            Self::Log => dy / x,
            Self::Negate => -dy,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Tanh => "tanh",
            Self::Rectify => "ReLU",
            Self::Sigmoid => "\\sigma",
            Self::Erf => "erf",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::LogGamma => "lgamma",
            Self::Log => "log",
            Self::Negate => "-",
        }
    }
}

/// Derivative of `ln Γ(x)` for positive `x`.
///
/// Shifts `x` above 6 with the recurrence `ψ(x) = ψ(x + 1) - 1/x`, then uses
/// the asymptotic series.
fn digamma(mut x: f32) -> f32 {
    let mut acc = 0.0;
    while x < 6.0 {
        acc -= 1.0 / x;
        x += 1.0;
    }
    let inv = 1.0 / x;
    let inv2 = inv * inv;
    acc + libm::logf(x) - 0.5 * inv - inv2 * (1.0 / 12.0 - inv2 * (1.0 / 120.0 - inv2 / 252.0))
}

/// Node applying a [`UnaryFn`] to every element of its argument.
#[derive(Debug, Clone, Copy)]
pub struct Unary {
    f: UnaryFn,
}

impl Unary {
    pub fn new(f: UnaryFn) -> Self {
        Self { f }
    }

    pub fn function(&self) -> UnaryFn {
        self.f
    }
}

impl Op for Unary {
    fn node_type(&self) -> NodeType {
        match self.f {
            UnaryFn::Tanh => NodeType::Tanh,
            UnaryFn::Rectify => NodeType::Rectify,
            UnaryFn::Sigmoid => NodeType::Sigmoid,
            UnaryFn::Erf => NodeType::Erf,
            UnaryFn::Sqrt => NodeType::Sqrt,
            UnaryFn::Exp => NodeType::Exp,
            UnaryFn::LogGamma => NodeType::LogGamma,
            UnaryFn::Log => NodeType::Log,
            UnaryFn::Negate => NodeType::Negate,
        }
    }

    fn dim_forward(&self, xs: &[Dim]) -> Dim {
        xs[0]
    }

    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, _aux: &mut [f32]) {
        fx.data
            .iter_mut()
            .zip(xs[0].data)
            .for_each(|(y, &x)| *y = self.f.apply(x));
    }

    fn backward(
        &self,
        xs: &[TensorView<'_>],
        fx: TensorView<'_>,
        dedf: TensorView<'_>,
        _i: usize,
        dedxi: TensorViewMut<'_>,
        _aux: &[f32],
    ) {
        dedxi
            .data
            .iter_mut()
            .zip(xs[0].data.iter().zip(fx.data).zip(dedf.data))
            .for_each(|(g, ((&x, &y), &dy))| *g += self.f.derivative(x, y, dy));
    }

    fn as_string(&self, args: &[String]) -> String {
        match self.f {
            UnaryFn::Negate => format!("-{}", args[0]),
            f => format!("{}({})", f.name(), args[0]),
        }
    }
}
