//! fusegraph: an incremental execution engine for tensor dataflow graphs.
//!
//! A [`Graph`](graph::Graph) records tensor operations as it is built; an
//! [`ExecutionEngine`](exec::ExecutionEngine) evaluates it on demand, caching
//! every value it computes, and differentiates scalar results with respect to
//! learnable [`Parameter`](params::Parameter)s.
//!
//! # Features
//!
//! - Depth scheduling that runs every node as late as its consumers allow.
//! - Arena memory: one contiguous allocation per node type and rank, released
//!   in bulk, no per-node frees.
//! - Bulk dispatch that fuses large groups of elementwise nodes, and
//!   matrix-vector products sharing a weight, into single kernel calls.
//! - Incremental evaluation of append-only graphs.
//! - Reverse-mode differentiation that skips constant and unreachable nodes.
//!
//! # Modules
//!
//! - [`tensors`]: shapes, owned tensors, borrowed views and the `tensor!` macro.
//! - [`graph`]: nodes, the [`Op`](graph::Op) kernel trait and the graph itself.
//! - [`ops`]: reference CPU kernels and graph-building helpers.
//! - [`params`]: learnable parameters and SGD.
//! - [`pool`] / [`device`]: stack-discipline arenas and the devices owning them.
//! - [`exec`]: the scheduler, planner, dispatcher and both executors.
//! - [`config`] / [`error`]: settings and the crate's error type.
//!
//! # Logging
//!
//! The crate reports through the [`log`](https://docs.rs/log) facade and never
//! installs a logger itself.
//!
//! # Example
//!
//! ```rust
//! use fusegraph::exec::ExecutionEngine;
//! use fusegraph::graph::Graph;
//! use fusegraph::params::{Parameter, sgd};
//! use fusegraph::tensor;
//!
//! let w = Parameter::new(tensor!([[0.5, -0.5]]));
//! let mut g = Graph::new();
//! let x = g.input(tensor!([1.0, 2.0])).unwrap();
//! let pw = g.parameter(&w).unwrap();
//! let y = g.matmul(pw, x).unwrap();
//! let target = g.input(tensor!([1.0])).unwrap();
//! let loss = g.squared_distance(y, target).unwrap();
//!
//! let mut engine = ExecutionEngine::cpu();
//! assert_eq!(engine.forward(&g, loss).unwrap().as_scalar(), 2.25);
//! engine.backward(&g, loss).unwrap();
//! assert_eq!(w.grad().data, vec![-3.0, -6.0]);
//! sgd(&w, 0.1);
//! ```

pub mod approx;
pub mod config;
pub mod device;
pub mod error;
pub mod exec;
pub mod graph;
pub mod ops;
pub mod params;
pub mod pool;
pub mod tensors;

pub use crate::error::{ExecError, Result};
pub use crate::exec::ExecutionEngine;
pub use crate::graph::{Graph, VariableIndex};
pub use crate::tensors::{Dim, Tensor};
