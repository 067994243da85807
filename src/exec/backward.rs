//! Reverse-mode differentiation over evaluated values.
//!
//! Gradients live in each device's gradient pool, one region per node of
//! `0..=target`, rebuilt on every call. Which nodes do work is decided by a
//! small per-node state machine:
//!
//! - a forward sweep marks [`GradState::NeedsGradient`] on parameter nodes and
//!   on every node with an argument that needs one
//! - a backward sweep from the target upgrades those reachable through
//!   argument edges to [`GradState::Participates`]
//! - the kernel loop walks from the target down to node 0 and moves each
//!   participating node to [`GradState::Done`] once it has pushed its gradient
//!   into its arguments
//!
//! Walking in decreasing index order means every consumer of a node has added
//! its contribution before the node itself propagates further.

use smallvec::SmallVec;

use crate::device::{DeviceId, Devices, ValueSlot};
use crate::error::Result;
use crate::graph::{Graph, VariableIndex};
use crate::pool::{Pool, PoolKind, Region};
use crate::tensors::{TensorView, TensorViewMut};

/// Progress of one node through a backward pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradState {
    NotVisited,
    NeedsGradient,
    Participates,
    Done,
}

/// Computes gradients of `target` and flushes them into the parameters.
///
/// `slots` must hold values for every node in `0..=target`, and the target
/// must be a one-element value. Returns the gradient region of every node.
pub(crate) fn run(
    graph: &Graph,
    target: VariableIndex,
    devices: &mut Devices,
    slots: &[ValueSlot],
) -> Result<Vec<Region>> {
    devices.free_all(PoolKind::Grads);
    let mut grads = Vec::with_capacity(target + 1);
    for slot in &slots[..=target] {
        grads.push(devices.get_mut(slot.device)?.grads.allocate(slot.dim.size())?);
    }
    devices.zero_all(PoolKind::Grads);
    devices.get_mut(slots[target].device)?.grads.slice_mut(grads[target])[0] = 1.0;

    let states = mark(graph, target)?;
    let participating = states.iter().filter(|s| **s == GradState::Participates).count();
    log::debug!("backward from node {target}: {participating} of {} nodes participate", target + 1);

    let states = propagate(graph, target, devices, slots, &grads, states)?;

    let (_, pools) = devices.values_and_grads();
    for &p in graph.parameter_nodes().iter().take_while(|&&p| p <= target) {
        if states[p] != GradState::Done {
            continue;
        }
        if let Some(param) = graph.node(p)?.op().parameter() {
            param.accumulate_grad(pools[slots[p].device.0].slice(grads[p]));
        }
    }
    Ok(grads)
}

/// Runs both marking sweeps.
fn mark(graph: &Graph, target: VariableIndex) -> Result<Vec<GradState>> {
    let mut states = vec![GradState::NotVisited; target + 1];
    for (i, node) in graph.nodes()[..=target].iter().enumerate() {
        if node.op().parameter().is_some() || node.args().iter().any(|&a| states[a] == GradState::NeedsGradient) {
            states[i] = GradState::NeedsGradient;
        }
    }

    if states[target] == GradState::NeedsGradient {
        states[target] = GradState::Participates;
    }
    for i in (0..=target).rev() {
        if states[i] != GradState::Participates {
            continue;
        }
        for &a in graph.node(i)?.args() {
            if states[a] == GradState::NeedsGradient {
                states[a] = GradState::Participates;
            }
        }
    }
    Ok(states)
}

fn propagate(
    graph: &Graph,
    target: VariableIndex,
    devices: &mut Devices,
    slots: &[ValueSlot],
    grads: &[Region],
    mut states: Vec<GradState>,
) -> Result<Vec<GradState>> {
    let (reader, mut pools) = devices.values_and_grads();
    for i in (0..=target).rev() {
        if states[i] != GradState::Participates {
            continue;
        }
        let node = graph.node(i)?;
        let xs: SmallVec<[TensorView<'_>; 4]> = node.args().iter().map(|&a| reader.view(&slots[a])).collect();
        let fx = reader.view(&slots[i]);
        let aux = reader.aux(&slots[i]);
        for (pos, &a) in node.args().iter().enumerate() {
            if states[a] != GradState::Participates {
                continue;
            }
            let (dedf, dedx) = grad_pair(
                &mut pools,
                (slots[i].device, grads[i]),
                (slots[a].device, grads[a]),
            );
            node.op().backward(
                &xs,
                fx,
                TensorView::new(slots[i].dim, dedf),
                pos,
                TensorViewMut::new(slots[a].dim, dedx),
                aux,
            );
        }
        states[i] = GradState::Done;
    }
    Ok(states)
}

/// Borrows a node's gradient for reading next to an argument's gradient for
/// writing. Arguments have lower indices, so on a shared pool they sit lower.
fn grad_pair<'p>(
    pools: &'p mut [&mut Pool],
    src: (DeviceId, Region),
    dst: (DeviceId, Region),
) -> (&'p [f32], &'p mut [f32]) {
    let (s, d) = (src.0.0, dst.0.0);
    if s == d {
        let (lower, upper) = pools[s].split_at_mut(src.1.offset);
        (&upper[..src.1.len], &mut lower[dst.1.offset..dst.1.end()])
    } else if s < d {
        let (lower, upper) = pools.split_at_mut(d);
        (lower[s].slice(src.1), upper[0].slice_mut(dst.1))
    } else {
        let (lower, upper) = pools.split_at_mut(s);
        (upper[0].slice(src.1), lower[d].slice_mut(dst.1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Parameter;
    use crate::tensor;

    #[test]
    fn constant_branches_are_skipped() {
        let mut g = Graph::new();
        let w = Parameter::new(tensor!([1.0]));
        let x = g.input(tensor!([2.0])).unwrap();
        let cx = g.exp(x).unwrap();
        let pw = g.parameter(&w).unwrap();
        let y = g.add_all(&[cx, pw]).unwrap();
        let unused = g.tanh(pw).unwrap();
        let z = g.add_all(&[y, x]).unwrap();

        let states = mark(&g, z).unwrap();
        assert_eq!(states[x], GradState::NotVisited);
        assert_eq!(states[cx], GradState::NotVisited);
        assert_eq!(states[pw], GradState::Participates);
        assert_eq!(states[y], GradState::Participates);
        assert_eq!(states[unused], GradState::NeedsGradient);
        assert_eq!(states[z], GradState::Participates);
    }

    #[test]
    fn target_without_parameters_does_nothing() {
        let mut g = Graph::new();
        let x = g.input(tensor!([2.0])).unwrap();
        let y = g.exp(x).unwrap();
        let states = mark(&g, y).unwrap();
        assert!(states.iter().all(|s| *s == GradState::NotVisited));
    }
}
