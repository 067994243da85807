//! Append-only computation graphs.
//!
//! A [`Graph`] is an ordered list of [`Node`]s. Each node names its arguments by
//! index, and every argument must be a strictly earlier node, so the graph is a
//! DAG by construction and its insertion order is a valid topological order.
//!
//! The math of a node lives behind the [`Op`] trait. The engine never looks at
//! an op's internals: it only asks for the [`NodeType`] tag (used to group and
//! fuse nodes), the aux scratch size, and the forward/backward kernels.
//!
//! # Example
//!
//! ```
//! use fusegraph::graph::Graph;
//! use fusegraph::tensor;
//!
//! let mut g = Graph::new();
//! let x = g.input(tensor!([1.0, 2.0])).unwrap();
//! let y = g.tanh(x).unwrap();
//! assert_eq!(g.len(), 2);
//! assert_eq!(g.node(y).unwrap().args(), &[x]);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use smallvec::SmallVec;

use crate::device::DeviceId;
use crate::error::{ExecError, Result};
use crate::params::Parameter;
use crate::tensors::{Dim, TensorView, TensorViewMut};

/// Stable index of a node in its graph.
pub type VariableIndex = usize;

/// Tag identifying what a node computes.
///
/// Nodes sharing a tag within one rank are allocated and dispatched as a group.
/// The ordering is only used to make grouping deterministic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NodeType {
    Input,
    Parameter,
    Tanh,
    Rectify,
    Sigmoid,
    Erf,
    Sqrt,
    Exp,
    LogGamma,
    Log,
    Negate,
    MatrixMultiply,
    CwiseSum,
    ConstScalarMultiply,
    SumElements,
    SumBatches,
    SquaredDistance,
    MaxElements,
    ToDevice,
    /// User-defined op kinds.
    Custom(u16),
}

impl NodeType {
    /// Whether a group of this type can be evaluated by one kernel call over the
    /// concatenation of its members' inputs.
    pub fn is_elementwise_unary(self) -> bool {
        matches!(
            self,
            Self::Tanh
                | Self::Rectify
                | Self::Sigmoid
                | Self::Erf
                | Self::Sqrt
                | Self::Exp
                | Self::LogGamma
                | Self::Log
                | Self::Negate
        )
    }
}

/// Forward and backward kernels of one node.
///
/// Kernels must take every size they need from the views they are given, not
/// from state captured at construction: the engine may call them on fused,
/// reshaped views.
pub trait Op: Send + Sync + fmt::Debug {
    /// Grouping tag.
    fn node_type(&self) -> NodeType;

    /// Output shape for the given argument shapes.
    fn dim_forward(&self, xs: &[Dim]) -> Dim;

    /// Elements of private scratch memory needed for an output of shape `dim`.
    fn aux_storage_size(&self, _dim: &Dim) -> usize {
        0
    }

    /// Computes the output into `fx`.
    fn forward(&self, xs: &[TensorView<'_>], fx: TensorViewMut<'_>, aux: &mut [f32]);

    /// Adds `dE/dx_i` into `dedxi`, given the output `fx` and its gradient `dedf`.
    fn backward(
        &self,
        xs: &[TensorView<'_>],
        fx: TensorView<'_>,
        dedf: TensorView<'_>,
        i: usize,
        dedxi: TensorViewMut<'_>,
        aux: &[f32],
    );

    /// Human readable form, given the names of the arguments.
    fn as_string(&self, args: &[String]) -> String;

    /// The learnable storage behind a parameter node.
    fn parameter(&self) -> Option<&Parameter> {
        None
    }
}

/// One vertex of the graph.
#[derive(Debug)]
pub struct Node {
    args: SmallVec<[VariableIndex; 4]>,
    dim: Dim,
    device: DeviceId,
    aux_size: usize,
    op: Box<dyn Op>,
}

impl Node {
    /// Argument indices, all lower than this node's own index.
    pub fn args(&self) -> &[VariableIndex] {
        &self.args
    }

    /// Output shape.
    pub fn dim(&self) -> Dim {
        self.dim
    }

    /// Device holding the output.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Grouping tag.
    pub fn node_type(&self) -> NodeType {
        self.op.node_type()
    }

    /// Elements of aux scratch memory.
    pub fn aux_size(&self) -> usize {
        self.aux_size
    }

    /// The node's kernels.
    pub fn op(&self) -> &dyn Op {
        self.op.as_ref()
    }
}

/// Process-unique identity of a [`Graph`], used to tell cached state apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GraphId(u64);

impl GraphId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

/// An append-only DAG of tensor operations.
#[derive(Debug)]
pub struct Graph {
    id: GraphId,
    nodes: Vec<Node>,
    parameter_nodes: Vec<VariableIndex>,
    device: DeviceId,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty graph placing leaves on device `#0`.
    pub fn new() -> Self {
        Self {
            id: GraphId::next(),
            nodes: Vec::new(),
            parameter_nodes: Vec::new(),
            device: DeviceId::default(),
        }
    }

    /// Identity of this graph; distinct for every graph built in the process.
    pub fn id(&self) -> GraphId {
        self.id
    }

    /// Sets the device that argument-less nodes are placed on.
    pub fn set_default_device(&mut self, device: DeviceId) {
        self.device = device;
    }

    /// Device that argument-less nodes are placed on.
    pub fn default_device(&self) -> DeviceId {
        self.device
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the most recently added node.
    pub fn last(&self) -> Option<VariableIndex> {
        self.nodes.len().checked_sub(1)
    }

    /// The node at `index`.
    ///
    /// # Errors
    /// [`ExecError::IndexOutOfRange`] if there is no such node.
    pub fn node(&self, index: VariableIndex) -> Result<&Node> {
        self.nodes.get(index).ok_or(ExecError::IndexOutOfRange {
            index,
            len: self.nodes.len(),
        })
    }

    /// All nodes in insertion order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Indices of parameter nodes, in insertion order.
    pub fn parameter_nodes(&self) -> &[VariableIndex] {
        &self.parameter_nodes
    }

    /// Appends a node on the device of its first argument, or on the default
    /// device if it has none.
    ///
    /// # Errors
    /// [`ExecError::InvalidArgument`] if an argument is not an existing node.
    pub fn add(&mut self, op: impl Op + 'static, args: &[VariableIndex]) -> Result<VariableIndex> {
        let device = match args.first() {
            Some(&a) => self.node(a).map_err(|_| self.invalid(a))?.device,
            None => self.device,
        };
        self.add_on(op, args, device)
    }

    /// Appends a node on an explicit device.
    ///
    /// # Errors
    /// [`ExecError::InvalidArgument`] if an argument is not an existing node.
    pub fn add_on(&mut self, op: impl Op + 'static, args: &[VariableIndex], device: DeviceId) -> Result<VariableIndex> {
        if let Some(&bad) = args.iter().find(|&&a| a >= self.nodes.len()) {
            return Err(self.invalid(bad));
        }
        let dims: SmallVec<[Dim; 4]> = args.iter().map(|&a| self.nodes[a].dim).collect();
        let dim = op.dim_forward(&dims);
        let index = self.nodes.len();
        if op.parameter().is_some() {
            self.parameter_nodes.push(index);
        }
        self.nodes.push(Node {
            args: args.iter().copied().collect(),
            dim,
            device,
            aux_size: op.aux_storage_size(&dim),
            op: Box::new(op),
        });
        Ok(index)
    }

    /// Renders node `index` as `v{index} = <op>`.
    pub fn describe(&self, index: VariableIndex) -> String {
        match self.nodes.get(index) {
            Some(node) => {
                let names: Vec<String> = node.args.iter().map(|a| format!("v{a}")).collect();
                format!("v{index} = {}", node.op.as_string(&names))
            }
            None => format!("v{index} = <missing>"),
        }
    }

    fn invalid(&self, arg: VariableIndex) -> ExecError {
        ExecError::InvalidArgument {
            node: self.nodes.len(),
            arg,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor;

    #[test]
    fn arguments_must_be_earlier_nodes() {
        let mut g = Graph::new();
        let x = g.input(tensor!([1.0, 2.0])).unwrap();
        assert_eq!(g.negate(x + 1), Err(ExecError::InvalidArgument { node: 1, arg: 1 }));
        assert_eq!(g.len(), 1);
    }

    #[test]
    fn nodes_inherit_first_argument_device() {
        let mut g = Graph::new();
        g.set_default_device(DeviceId(1));
        let x = g.input(tensor!([1.0])).unwrap();
        let y = g.exp(x).unwrap();
        let z = g.to_device(y, DeviceId(0)).unwrap();
        assert_eq!(g.node(y).unwrap().device(), DeviceId(1));
        assert_eq!(g.node(z).unwrap().device(), DeviceId(0));
    }

    #[test]
    fn parameters_are_recorded_in_order() {
        let mut g = Graph::new();
        let w = Parameter::new(tensor!([[1.0, 2.0]]));
        let b = Parameter::new(tensor!([0.5]));
        let x = g.input(tensor!([1.0, 1.0])).unwrap();
        let pw = g.parameter(&w).unwrap();
        let pb = g.parameter(&b).unwrap();
        let y = g.matmul(pw, x).unwrap();
        g.add_all(&[y, pb]).unwrap();
        assert_eq!(g.parameter_nodes(), &[pw, pb]);
        assert_eq!(g.node(y).unwrap().dim(), Dim::new(&[1]));
        assert_eq!(g.describe(y), "v3 = v1 * v0");
    }

    #[test]
    fn elementwise_unary_tags() {
        assert!(NodeType::Tanh.is_elementwise_unary());
        assert!(NodeType::Negate.is_elementwise_unary());
        assert!(!NodeType::MatrixMultiply.is_elementwise_unary());
        assert!(!NodeType::Custom(3).is_elementwise_unary());
    }
}
