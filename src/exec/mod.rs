//! The execution engine.
//!
//! [`ExecutionEngine`] evaluates a [`Graph`] incrementally. It keeps the values
//! of an *evaluated prefix* of the graph: `evaluated == n` means nodes `0..n`
//! are cached in the value pools. Asking for a cached node costs nothing;
//! asking for a later one evaluates only the missing suffix.
//!
//! A forward pass over a suffix runs in three stages per rank bucket:
//!
//! 1. [`schedule`] ranks the new nodes and buckets them by latest rank
//! 2. [`planner`] allocates one contiguous output block per node type
//! 3. [`dispatch`] runs each group, fusing large elementwise and shared-weight
//!    matrix-multiply groups into single kernel calls
//!
//! [`backward`] then differentiates a scalar node with respect to every
//! parameter it depends on.
//!
//! # Errors
//!
//! A failure in the middle of a pass (exhausted pool, unknown device, fusion
//! invariant) is logged and returned, and the engine forgets its evaluated
//! prefix; the next call starts over from empty pools.
//!
//! # Example
//!
//! ```
//! use fusegraph::exec::ExecutionEngine;
//! use fusegraph::graph::Graph;
//! use fusegraph::tensor;
//!
//! let mut g = Graph::new();
//! let x = g.input(tensor!([1.0, -2.0])).unwrap();
//! let y = g.rectify(x).unwrap();
//! let s = g.sum_elements(y).unwrap();
//!
//! let mut engine = ExecutionEngine::cpu();
//! assert_eq!(engine.forward(&g, s).unwrap().as_scalar(), 1.0);
//! assert_eq!(engine.get_value(&g, y).unwrap().data, &[1.0, 0.0]);
//! ```

pub mod backward;
pub mod dispatch;
pub mod planner;
pub mod schedule;

pub use self::dispatch::DispatchStats;
pub use self::schedule::DepthScheduler;

use crate::config::{DeviceConfig, EngineConfig};
use crate::device::{Devices, ValueSlot};
use crate::error::{ExecError, Result};
use crate::graph::{Graph, GraphId, VariableIndex};
use crate::pool::{PoolKind, Region};
use crate::tensors::{Tensor, TensorView};

/// Incremental forward and backward evaluation of a graph.
#[derive(Debug)]
pub struct ExecutionEngine {
    config: EngineConfig,
    devices: Devices,
    scheduler: DepthScheduler,
    slots: Vec<ValueSlot>,
    grads: Vec<Region>,
    evaluated: usize,
    graph: Option<GraphId>,
    stats: DispatchStats,
}

impl ExecutionEngine {
    /// An engine allocating from `devices`.
    pub fn new(devices: Devices, config: EngineConfig) -> Self {
        Self {
            config,
            devices,
            scheduler: DepthScheduler::new(),
            slots: Vec::new(),
            grads: Vec::new(),
            evaluated: 0,
            graph: None,
            stats: DispatchStats::default(),
        }
    }

    /// An engine with one default-sized CPU device and default settings.
    pub fn cpu() -> Self {
        Self::new(Devices::single(DeviceConfig::default()), EngineConfig::default())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn devices(&self) -> &Devices {
        &self.devices
    }

    pub fn scheduler(&self) -> &DepthScheduler {
        &self.scheduler
    }

    /// Work counters since the engine was created.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Number of nodes whose values are cached.
    pub fn evaluated(&self) -> usize {
        self.evaluated
    }

    /// Forgets every cached value.
    pub fn invalidate(&mut self) {
        self.invalidate_from(0);
    }

    /// Forgets cached values of nodes `index..`. Never extends the prefix.
    ///
    /// Value memory above the highest surviving buffer of each device is
    /// handed back, so repeated invalidate and recompute cycles reuse the same
    /// space.
    pub fn invalidate_from(&mut self, index: VariableIndex) {
        self.evaluated = self.evaluated.min(index);
        self.scheduler.rewind(self.evaluated);
        self.slots.truncate(self.evaluated);
        self.grads.clear();
        self.release_values();
    }

    /// Truncates each value pool to the end of its highest cached buffer.
    fn release_values(&mut self) {
        let mut tops = vec![0; self.devices.len()];
        for slot in &self.slots {
            if let Some(top) = tops.get_mut(slot.device.0) {
                *top = (*top).max(slot.region.end()).max(slot.aux.end());
            }
        }
        for (device, top) in self.devices.iter_mut().zip(tops) {
            device.values.truncate(top);
        }
    }

    /// Re-evaluates the graph from scratch up to `upto`.
    ///
    /// # Errors
    /// As [`incremental_forward`](Self::incremental_forward).
    pub fn forward(&mut self, graph: &Graph, upto: VariableIndex) -> Result<TensorView<'_>> {
        self.invalidate();
        self.incremental_forward(graph, upto)
    }

    /// [`forward`](Self::forward) up to the last node.
    ///
    /// # Errors
    /// [`ExecError::IndexOutOfRange`] on an empty graph, otherwise as
    /// [`incremental_forward`](Self::incremental_forward).
    pub fn forward_all(&mut self, graph: &Graph) -> Result<TensorView<'_>> {
        let last = last_node(graph)?;
        self.forward(graph, last)
    }

    /// Evaluates the nodes past the cached prefix up to `upto` and returns the
    /// value of `upto`. A cached node is returned without any work.
    ///
    /// # Errors
    /// - [`ExecError::IndexOutOfRange`] if `upto` is not a node of `graph`
    /// - [`ExecError::StaleState`] if the cached prefix does not fit `graph`
    /// - [`ExecError::PoolExhausted`], [`ExecError::UnknownDevice`] or
    ///   [`ExecError::FusionInvariant`] from the pass itself; the cache is dropped
    pub fn incremental_forward(&mut self, graph: &Graph, upto: VariableIndex) -> Result<TensorView<'_>> {
        self.check_state(graph)?;
        check_index(graph, upto)?;
        if upto >= self.evaluated {
            if let Err(err) = self.run_forward(graph, upto) {
                log::error!("forward pass up to node {upto} failed: {err}");
                self.invalidate();
                return Err(err);
            }
        }
        self.view(upto)
    }

    /// [`incremental_forward`](Self::incremental_forward) up to the last node.
    ///
    /// # Errors
    /// As [`forward_all`](Self::forward_all).
    pub fn incremental_forward_all(&mut self, graph: &Graph) -> Result<TensorView<'_>> {
        let last = last_node(graph)?;
        self.incremental_forward(graph, last)
    }

    /// The value of `index`, evaluating the rest of the graph first if needed.
    ///
    /// # Errors
    /// As [`incremental_forward`](Self::incremental_forward).
    pub fn get_value(&mut self, graph: &Graph, index: VariableIndex) -> Result<TensorView<'_>> {
        self.check_state(graph)?;
        check_index(graph, index)?;
        if index >= self.evaluated {
            self.incremental_forward(graph, graph.len() - 1)?;
        }
        self.view(index)
    }

    /// Owned copy of [`get_value`](Self::get_value).
    ///
    /// # Errors
    /// As [`incremental_forward`](Self::incremental_forward).
    pub fn value_tensor(&mut self, graph: &Graph, index: VariableIndex) -> Result<Tensor> {
        self.get_value(graph, index).map(|v| v.to_tensor())
    }

    /// Gradient of node `index` from the last backward pass, if it took part.
    pub fn gradient(&self, index: VariableIndex) -> Option<TensorView<'_>> {
        let region = *self.grads.get(index)?;
        let slot = self.slots.get(index)?;
        let pool = self.devices.get(slot.device).ok()?.pool(PoolKind::Grads);
        Some(TensorView::new(slot.dim, pool.slice(region)))
    }

    /// Accumulates `d target / d p` into every parameter `p` the target depends
    /// on, evaluating up to `target` first if needed.
    ///
    /// # Errors
    /// - [`ExecError::NonScalarTarget`] if the target has more than one element
    /// - [`ExecError::PoolExhausted`] if a gradient pool runs out; the cache is dropped
    /// - any error of [`incremental_forward`](Self::incremental_forward)
    pub fn backward(&mut self, graph: &Graph, target: VariableIndex) -> Result<()> {
        self.check_state(graph)?;
        check_index(graph, target)?;
        if target >= self.evaluated {
            self.incremental_forward(graph, target)?;
        }
        let dim = self.slots[target].dim;
        if dim.size() != 1 {
            let err = ExecError::NonScalarTarget { index: target, dim };
            log::error!("{err}");
            return Err(err);
        }
        match backward::run(graph, target, &mut self.devices, &self.slots) {
            Ok(grads) => {
                self.grads = grads;
                Ok(())
            }
            Err(err) => {
                log::error!("backward pass from node {target} failed: {err}");
                self.invalidate();
                Err(err)
            }
        }
    }

    /// [`backward`](Self::backward) from the last node.
    ///
    /// # Errors
    /// As [`backward`](Self::backward).
    pub fn backward_all(&mut self, graph: &Graph) -> Result<()> {
        let last = last_node(graph)?;
        self.backward(graph, last)
    }

    fn run_forward(&mut self, graph: &Graph, upto: VariableIndex) -> Result<()> {
        if self.evaluated == 0 {
            self.devices.free_all(PoolKind::Values);
            self.slots.clear();
            self.graph = Some(graph.id());
        }
        let start = self.evaluated;
        let buckets = self.scheduler.schedule(graph, start, upto)?;
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("schedule:\n{}", self.scheduler.describe(graph, &buckets));
        }
        self.slots.resize(upto + 1, ValueSlot::default());

        for bucket in &buckets {
            let groups = planner::plan_bucket(graph, &bucket.nodes, &mut self.devices, &mut self.slots)?;
            for group in &groups {
                dispatch::dispatch_group(graph, group, &mut self.devices, &self.slots, &self.config, &mut self.stats)?;
            }
        }
        self.evaluated = upto + 1;

        log::debug!(
            "evaluated nodes {start}..={upto} in {} ranks; value pools at {:?}",
            buckets.len(),
            self.devices.iter().map(|d| d.pool(PoolKind::Values).used()).collect::<Vec<_>>()
        );
        Ok(())
    }

    fn check_state(&self, graph: &Graph) -> Result<()> {
        let foreign = self.evaluated > 0 && self.graph != Some(graph.id());
        if foreign || self.evaluated > graph.len() || self.evaluated > self.slots.len() {
            log::warn!(
                "cached prefix of {} nodes does not fit graph {:?} of {}",
                self.evaluated,
                graph.id(),
                graph.len()
            );
            return Err(ExecError::StaleState {
                evaluated: self.evaluated,
                len: graph.len(),
            });
        }
        Ok(())
    }

    fn view(&self, index: VariableIndex) -> Result<TensorView<'_>> {
        let slot = &self.slots[index];
        let pool = self.devices.get(slot.device)?.pool(PoolKind::Values);
        Ok(TensorView::new(slot.dim, pool.slice(slot.region)))
    }
}

fn check_index(graph: &Graph, index: VariableIndex) -> Result<()> {
    if index >= graph.len() {
        return Err(ExecError::IndexOutOfRange {
            index,
            len: graph.len(),
        });
    }
    Ok(())
}

fn last_node(graph: &Graph) -> Result<VariableIndex> {
    graph.last().ok_or(ExecError::IndexOutOfRange { index: 0, len: 0 })
}
