//! Group dispatch, with elementwise and matrix-multiply fusion.
//!
//! Every planned [`Group`] takes one of three paths:
//!
//! - **elementwise-unary fusion**: inputs are copied into one temporary, and
//!   the first member's kernel runs once over the whole concatenation, writing
//!   straight into the group block (which already holds the outputs in member
//!   order, so nothing needs scattering)
//! - **matrix-multiply fusion**: members computing `W * x` with the same `W`
//!   have their vectors packed into the columns of one matrix, are multiplied
//!   in one call, and get their columns copied back
//! - **individual**: each member's kernel writes into its own output region,
//!   optionally on rayon's thread pool
//!
//! Fusion temporaries are allocated above the bucket's blocks and released by
//! a watermark restore right after the fused call.
//!
//! ## Notes
//!
//! - All pool mutation happens on the calling thread; parallel members only
//!   write into the disjoint slices carved out for them.
//! - Fused kernels get flat or `k x n` views; kernels read sizes from views.

use std::collections::BTreeMap;

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::config::EngineConfig;
use crate::device::{DeviceId, Devices, ValueSlot};
use crate::error::{ExecError, Result};
use crate::graph::{Graph, NodeType, VariableIndex};
use crate::pool::Region;
use crate::tensors::{Dim, TensorView, TensorViewMut};

use super::planner::Group;

/// Counters of the work the dispatcher has done.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Forward kernel invocations, fused calls counting once.
    pub kernel_calls: u64,
    /// Nodes whose value was computed.
    pub nodes_dispatched: u64,
    /// Elementwise-unary groups run as one call.
    pub fused_unary_groups: u64,
    /// Shared-weight matrix-multiply sub-groups run as one call.
    pub fused_matmul_groups: u64,
}

/// Runs every member of `group`, whose memory has already been planned.
///
/// # Errors
/// - [`ExecError::PoolExhausted`] if a fusion temporary does not fit
/// - [`ExecError::FusionInvariant`] if a matmul sub-group has a foreign member
pub fn dispatch_group(
    graph: &Graph,
    group: &Group,
    devices: &mut Devices,
    slots: &[ValueSlot],
    config: &EngineConfig,
    stats: &mut DispatchStats,
) -> Result<()> {
    let size = group.members.len();
    if group.node_type.is_elementwise_unary() && config.fuse_unary && size > config.unary_fusion_threshold {
        log::trace!("fusing {size} {:?} nodes", group.node_type);
        return fuse_unary(graph, group, devices, slots, stats);
    }
    if group.node_type == NodeType::MatrixMultiply && config.fuse_matmul && size > config.matmul_fusion_threshold {
        return fuse_matmul(graph, group, devices, slots, config, stats);
    }
    log::trace!("dispatching {size} {:?} nodes individually", group.node_type);
    run_individually(graph, group.device, group.floor, &group.members, devices, slots, config.parallel, stats);
    Ok(())
}

/// Splits `rest`, which starts at pool offset `base`, into one slice per region.
///
/// Non-empty regions must be ascending and disjoint; empty ones yield empty slices.
fn carve<'a>(mut rest: &'a mut [f32], base: usize, regions: &[Region]) -> Vec<&'a mut [f32]> {
    let mut cursor = base;
    let mut out = Vec::with_capacity(regions.len());
    for r in regions {
        if r.len == 0 {
            out.push(<&mut [f32]>::default());
            continue;
        }
        let (_, tail) = std::mem::take(&mut rest).split_at_mut(r.offset - cursor);
        let (head, tail) = tail.split_at_mut(r.len);
        out.push(head);
        rest = tail;
        cursor = r.end();
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn run_individually(
    graph: &Graph,
    device: DeviceId,
    floor: usize,
    members: &[VariableIndex],
    devices: &mut Devices,
    slots: &[ValueSlot],
    parallel: bool,
    stats: &mut DispatchStats,
) {
    if members.is_empty() {
        return;
    }
    let (reader, upper) = devices.split_values(device, floor);
    // aux regions sit below the block, so this order is ascending
    let regions: Vec<Region> = members
        .iter()
        .map(|&j| slots[j].aux)
        .chain(members.iter().map(|&j| slots[j].region))
        .collect();
    let mut auxes = carve(upper, floor, &regions);
    let outs = auxes.split_off(members.len());

    let run = |(j, aux, out): (VariableIndex, &mut [f32], &mut [f32])| {
        let node = &graph.nodes()[j];
        let xs: SmallVec<[TensorView<'_>; 4]> = node.args().iter().map(|&a| reader.view(&slots[a])).collect();
        node.op().forward(&xs, TensorViewMut::new(slots[j].dim, out), aux);
    };
    let work = members.iter().copied().zip(auxes).zip(outs).map(|((j, aux), out)| (j, aux, out));
    if parallel {
        work.collect::<Vec<_>>().into_par_iter().for_each(run);
    } else {
        work.for_each(run);
    }

    stats.kernel_calls += members.len() as u64;
    stats.nodes_dispatched += members.len() as u64;
}

fn fuse_unary(
    graph: &Graph,
    group: &Group,
    devices: &mut Devices,
    slots: &[ValueSlot],
    stats: &mut DispatchStats,
) -> Result<()> {
    let first = graph.node(group.members[0])?;
    let (mark, temp) = {
        let pool = &mut devices.get_mut(group.device)?.values;
        let mark = pool.watermark();
        (mark, pool.allocate(group.block.len)?)
    };

    let mut offset = 0;
    for &j in &group.members {
        let input = slots[graph.node(j)?.args()[0]];
        debug_assert_eq!(input.region.len, slots[j].region.len);
        devices.copy_values(input.device, input.region, group.device, temp.offset + offset);
        offset += input.region.len;
    }

    let pool = &mut devices.get_mut(group.device)?.values;
    {
        let (lower, upper) = pool.split_at_mut(temp.offset);
        let flat = Dim::new(&[group.block.len]);
        first.op().forward(
            &[TensorView::new(flat, &upper[..temp.len])],
            TensorViewMut::new(flat, &mut lower[group.block.offset..group.block.end()]),
            &mut [],
        );
    }
    pool.restore(mark);

    stats.kernel_calls += 1;
    stats.nodes_dispatched += group.members.len() as u64;
    stats.fused_unary_groups += 1;
    Ok(())
}

fn fuse_matmul(
    graph: &Graph,
    group: &Group,
    devices: &mut Devices,
    slots: &[ValueSlot],
    config: &EngineConfig,
    stats: &mut DispatchStats,
) -> Result<()> {
    let mut individual = Vec::new();
    let mut by_weight: BTreeMap<VariableIndex, Vec<VariableIndex>> = BTreeMap::new();
    for &j in &group.members {
        let args = graph.node(j)?.args();
        let (a, b) = (slots[args[0]].dim, slots[args[1]].dim);
        if a.ndims() == 2 && b.ndims() == 1 && a.batch_elems() == 1 && b.batch_elems() == 1 {
            by_weight.entry(args[0]).or_default().push(j);
        } else {
            individual.push(j);
        }
    }
    // a lone member gains nothing from packing
    by_weight.retain(|_, members| {
        if members.len() == 1 {
            individual.extend(members.iter().copied());
            false
        } else {
            true
        }
    });
    individual.sort_unstable();

    log::trace!(
        "matmul group of {}: {} shared-weight sub-groups, {} individual",
        group.members.len(),
        by_weight.len(),
        individual.len()
    );
    run_individually(graph, group.device, group.floor, &individual, devices, slots, config.parallel, stats);
    for (weight, members) in &by_weight {
        fuse_shared_weight(graph, group.device, *weight, members, devices, slots, stats)?;
    }
    Ok(())
}

fn fuse_shared_weight(
    graph: &Graph,
    device: DeviceId,
    weight: VariableIndex,
    members: &[VariableIndex],
    devices: &mut Devices,
    slots: &[ValueSlot],
    stats: &mut DispatchStats,
) -> Result<()> {
    let w = slots[weight];
    let (m, k, n) = (w.dim.rows(), w.dim.cols(), members.len());
    for &j in members {
        let args = graph.node(j)?.args();
        let found = args[0];
        if found != weight {
            log::warn!("matmul node {j} uses weight {found}, grouped under {weight}");
            return Err(ExecError::FusionInvariant {
                node: j,
                expected: weight,
                found,
            });
        }
        let len = slots[args[1]].dim.size();
        if len != k {
            log::warn!("matmul node {j} multiplies a vector of {len} by weight {weight} with {k} columns");
            return Err(ExecError::FusionShape {
                node: j,
                weight,
                expected: k,
                found: len,
            });
        }
    }

    let (mark, packed, result) = {
        let pool = &mut devices.get_mut(device)?.values;
        let mark = pool.watermark();
        let packed = pool.allocate(k * n)?;
        let result = pool.allocate(m * n)?;
        (mark, packed, result)
    };

    for (c, &j) in members.iter().enumerate() {
        let x = slots[graph.node(j)?.args()[1]];
        devices.copy_values(x.device, x.region, device, packed.offset + c * k);
    }

    {
        let (reader, upper) = devices.split_values(device, result.offset);
        let xs = [
            reader.view(&w),
            TensorView::new(Dim::new(&[k, n]), reader.slice(device, packed)),
        ];
        graph.node(members[0])?.op().forward(
            &xs,
            TensorViewMut::new(Dim::new(&[m, n]), &mut upper[..result.len]),
            &mut [],
        );
    }

    let pool = &mut devices.get_mut(device)?.values;
    for (c, &j) in members.iter().enumerate() {
        pool.copy_within(result.sub(c * m, m), slots[j].region.offset);
    }
    pool.restore(mark);

    stats.kernel_calls += 1;
    stats.nodes_dispatched += n as u64;
    stats.fused_matmul_groups += 1;
    Ok(())
}
