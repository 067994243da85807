//! Learnable parameters.
//!
//! A [`Parameter`] is a shared handle to a value and its persistent gradient.
//! Graphs reference it through parameter nodes; every backward pass adds the
//! gradient it computed into the handle, and [`sgd`] consumes and clears it.
//!
//! Handles are cheap to clone and safe to share across threads.
//!
//! ## Example
//!
//! ```rust
//! use fusegraph::params::{Parameter, sgd};
//! use fusegraph::tensor;
//!
//! let w = Parameter::new(tensor!([3.0, 5.0, 4.0]));
//! w.accumulate_grad(&[1.0, 1.0, 2.0]);
//! sgd(&w, 0.5);
//! assert_eq!(w.value().data, vec![2.5, 4.5, 3.0]);
//! assert_eq!(w.grad().data, vec![0.0, 0.0, 0.0]);
//! ```

use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::tensors::{Dim, Tensor};

/// A value paired with its gradient.
///
/// Typically used as `WithGrad<Tensor>`.
#[derive(Debug, Clone, PartialEq)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl WithGrad<Tensor> {
    /// Pairs `value` with a zero gradient of the same shape.
    pub fn new(value: Tensor) -> Self {
        let grad = Tensor::zeros(value.dim);
        Self { value, grad }
    }
}

/// Shared handle to a learnable tensor.
#[derive(Debug, Clone)]
pub struct Parameter(Arc<RwLock<WithGrad<Tensor>>>);

impl Parameter {
    /// Creates a parameter with a zero gradient.
    pub fn new(value: Tensor) -> Self {
        Self(Arc::new(RwLock::new(WithGrad::new(value))))
    }

    /// Shape of the value.
    pub fn dim(&self) -> Dim {
        self.read().value.dim
    }

    /// Copy of the current value.
    pub fn value(&self) -> Tensor {
        self.read().value.clone()
    }

    /// Copy of the accumulated gradient.
    pub fn grad(&self) -> Tensor {
        self.read().grad.clone()
    }

    /// Replaces the value.
    ///
    /// # Panics
    /// Panics if the new value has a different shape.
    pub fn set_value(&self, value: Tensor) {
        self.write().value.update(value);
    }

    /// Adds `grad` element-wise into the persistent gradient.
    ///
    /// # Panics
    /// Panics if `grad` has a different number of elements than the value.
    pub fn accumulate_grad(&self, grad: &[f32]) {
        let mut guard = self.write();
        assert_eq!(guard.grad.data.len(), grad.len(), "gradient size mismatch");
        for (g, d) in guard.grad.data.iter_mut().zip(grad) {
            *g += d;
        }
    }

    /// Clears the persistent gradient.
    pub fn zero_grad(&self) {
        self.write().grad.data.fill(0.0);
    }

    /// Copies the value into `out`.
    pub(crate) fn copy_value_into(&self, out: &mut [f32]) {
        out.copy_from_slice(&self.read().value.data);
    }

    /// Whether two handles refer to the same storage.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    fn read(&self) -> RwLockReadGuard<'_, WithGrad<Tensor>> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, WithGrad<Tensor>> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Performs one plain gradient-descent step and clears the gradient.
///
/// # Example
/// ```rust
/// use fusegraph::params::{Parameter, sgd};
/// use fusegraph::tensor;
///
/// let w = Parameter::new(tensor!([1.0]));
/// sgd(&w, 0.01);
/// assert_eq!(w.value().data, vec![1.0]);
/// ```
pub fn sgd(param: &Parameter, lr: f32) {
    let mut w = param.write();
    let WithGrad { value, grad } = &mut *w;
    for (p, g) in value.data.iter_mut().zip(&mut grad.data) {
        *p -= lr * *g;
        *g = 0.0;
    }
}
