//! Bulk memory planning for one rank bucket.
//!
//! Nodes of a bucket are grouped by `(NodeType, DeviceId)`. Each group gets:
//!
//! 1. one aux region per member that asks for scratch memory,
//! 2. then one contiguous block holding every member's output back to back,
//!    in group order.
//!
//! Groups are visited in key order, so the same graph always produces the same
//! layout and the same pool high-water marks.

use std::collections::BTreeMap;

use crate::device::{DeviceId, Devices, ValueSlot};
use crate::error::Result;
use crate::graph::{Graph, NodeType, VariableIndex};
use crate::pool::Region;

/// Same-type, same-device nodes of one bucket, with their shared output block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub node_type: NodeType,
    pub device: DeviceId,
    pub members: Vec<VariableIndex>,
    /// Pool usage before the group's first allocation.
    pub floor: usize,
    /// All member outputs, contiguous.
    pub block: Region,
}

/// Allocates aux and output memory for every node of `bucket`, recording each
/// node's location in `slots`.
///
/// # Errors
/// - [`ExecError::UnknownDevice`](crate::error::ExecError::UnknownDevice) if a node sits on a device not in `devices`
/// - [`ExecError::PoolExhausted`](crate::error::ExecError::PoolExhausted) if a value pool runs out
pub fn plan_bucket(
    graph: &Graph,
    bucket: &[VariableIndex],
    devices: &mut Devices,
    slots: &mut [ValueSlot],
) -> Result<Vec<Group>> {
    let mut keyed: BTreeMap<(NodeType, DeviceId), Vec<VariableIndex>> = BTreeMap::new();
    for &j in bucket {
        let node = graph.node(j)?;
        keyed.entry((node.node_type(), node.device())).or_default().push(j);
    }

    let mut groups = Vec::with_capacity(keyed.len());
    for ((node_type, device), members) in keyed {
        let pool = &mut devices.get_mut(device)?.values;
        let floor = pool.used();

        for &j in &members {
            let node = graph.node(j)?;
            slots[j] = ValueSlot {
                device,
                dim: node.dim(),
                region: Region::default(),
                aux: match node.aux_size() {
                    0 => Region::default(),
                    n => pool.allocate(n)?,
                },
            };
        }

        let total = members.iter().map(|&j| slots[j].dim.size()).sum();
        let block = pool.allocate(total)?;
        let mut offset = 0;
        for &j in &members {
            let len = slots[j].dim.size();
            slots[j].region = block.sub(offset, len);
            offset += len;
        }

        log::trace!(
            "planned {node_type:?} x{} on device {device}: block {}..{}",
            members.len(),
            block.offset,
            block.end()
        );
        groups.push(Group {
            node_type,
            device,
            members,
            floor,
            block,
        });
    }
    Ok(groups)
}
