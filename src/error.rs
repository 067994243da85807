//! Error types shared by the engine, the pools and the graph.
//!
//! Every failure the engine can hit is one of these variants. None of them is
//! recoverable inside a pass: the engine reports the error, abandons the pass
//! and forgets its evaluated prefix, so the next request starts from a fresh
//! pool reset.

use crate::device::DeviceId;
use crate::graph::VariableIndex;
use crate::pool::PoolKind;
use crate::tensors::Dim;

/// All errors produced by `fusegraph`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecError {
    /// A pool could not satisfy an allocation.
    #[error(
        "{pool} pool of device {device} exhausted: requested {requested} elements with {used} of {capacity} in use"
    )]
    PoolExhausted {
        pool: PoolKind,
        device: DeviceId,
        requested: usize,
        used: usize,
        capacity: usize,
    },

    /// `backward` was asked to start from a node whose value is not a scalar.
    #[error("backward() called on non-scalar node {index} with dim {dim}")]
    NonScalarTarget { index: VariableIndex, dim: Dim },

    /// A node index beyond the end of the graph.
    #[error("node index {index} out of range for graph of {len} nodes")]
    IndexOutOfRange { index: VariableIndex, len: usize },

    /// A node argument that does not reference a strictly earlier node.
    #[error("node {node} takes argument {arg}, which is not an earlier node")]
    InvalidArgument { node: VariableIndex, arg: VariableIndex },

    /// A node was placed on a device the engine does not know about.
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),

    /// A fused matrix multiply met a member whose left operand differs from its group key.
    #[error("fused matmul group keyed on node {expected} contains node {node} with left operand {found}")]
    FusionInvariant {
        node: VariableIndex,
        expected: VariableIndex,
        found: VariableIndex,
    },

    /// A fused matrix multiply met a vector whose length is not the shared weight's column count.
    #[error("fused matmul group keyed on node {weight} needs vectors of {expected} elements, node {node} has {found}")]
    FusionShape {
        node: VariableIndex,
        weight: VariableIndex,
        expected: usize,
        found: usize,
    },

    /// The evaluated prefix belongs to another graph or no longer fits this one.
    #[error("evaluated prefix of {evaluated} nodes is stale for a graph of {len} nodes")]
    StaleState { evaluated: usize, len: usize },
}

/// Convenience result type used throughout the crate.
pub type Result<T> = std::result::Result<T, ExecError>;
