//! Depth scheduling.
//!
//! Every node gets two ranks:
//!
//! - **earliest**: `1 + max(earliest of its arguments)`, or 0 for a leaf
//! - **latest**: `min(latest of its parents) - 1`, where a node with no parents
//!   sits at the deepest rank of the pass
//!
//! Nodes are bucketed by their latest rank, so every node runs as late as its
//! consumers allow. That packs more same-type nodes into each bucket, which is
//! what makes bulk allocation and fusion pay off.
//!
//! The rank arrays and parent lists only ever grow with the graph. A pass
//! schedules the nodes past the processed prefix; [`DepthScheduler::rewind`]
//! cuts the prefix back when cached values are invalidated.

use std::collections::BTreeMap;
use std::fmt::Write;

use smallvec::SmallVec;

use crate::error::{ExecError, Result};
use crate::graph::{Graph, VariableIndex};

/// Nodes of one rank, in increasing index order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub rank: usize,
    pub nodes: Vec<VariableIndex>,
}

/// Incremental rank bookkeeping for an append-only graph.
#[derive(Debug, Default, Clone)]
pub struct DepthScheduler {
    earliest: Vec<usize>,
    latest: Vec<usize>,
    parents: Vec<SmallVec<[VariableIndex; 4]>>,
}

impl DepthScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes with ranks assigned.
    pub fn processed(&self) -> usize {
        self.earliest.len()
    }

    /// Earliest rank of node `j`, if scheduled.
    pub fn earliest(&self, j: VariableIndex) -> Option<usize> {
        self.earliest.get(j).copied()
    }

    /// Latest rank of node `j`, if scheduled.
    pub fn latest(&self, j: VariableIndex) -> Option<usize> {
        self.latest.get(j).copied()
    }

    /// Consumers of node `j` among the scheduled nodes.
    pub fn parents(&self, j: VariableIndex) -> &[VariableIndex] {
        self.parents.get(j).map(|p| p.as_slice()).unwrap_or(&[])
    }

    /// Forgets every node at or after `n`, including parent links to them.
    pub fn rewind(&mut self, n: usize) {
        if n >= self.processed() {
            return;
        }
        self.earliest.truncate(n);
        self.latest.truncate(n);
        self.parents.truncate(n);
        for p in &mut self.parents {
            p.retain(|c| *c < n);
        }
    }

    /// Ranks nodes `start..=upto` and returns their buckets in increasing rank order.
    ///
    /// `start` must equal the processed prefix; anything scheduled beyond it is
    /// forgotten first.
    ///
    /// # Errors
    /// - [`ExecError::StaleState`] if `start` lies beyond the processed prefix
    /// - [`ExecError::IndexOutOfRange`] if `upto` is not a node of `graph`
    pub fn schedule(&mut self, graph: &Graph, start: usize, upto: VariableIndex) -> Result<Vec<Bucket>> {
        if start > self.processed() {
            return Err(ExecError::StaleState {
                evaluated: start,
                len: self.processed(),
            });
        }
        if upto >= graph.len() {
            return Err(ExecError::IndexOutOfRange {
                index: upto,
                len: graph.len(),
            });
        }
        self.rewind(start);
        if upto < start {
            return Ok(Vec::new());
        }

        let mut max_rank = 0;
        for j in start..=upto {
            let node = graph.node(j)?;
            let mut rank = 0;
            for &arg in node.args() {
                rank = rank.max(self.earliest[arg] + 1);
                self.parents[arg].push(j);
            }
            max_rank = max_rank.max(rank);
            self.earliest.push(rank);
            self.latest.push(0);
            self.parents.push(SmallVec::new());
        }

        let mut buckets: BTreeMap<usize, Vec<VariableIndex>> = BTreeMap::new();
        for j in (start..=upto).rev() {
            let bound = self.parents[j]
                .iter()
                .map(|&p| self.latest[p])
                .min()
                .unwrap_or(max_rank + 1);
            self.latest[j] = bound - 1;
            buckets.entry(bound - 1).or_default().push(j);
        }

        Ok(buckets
            .into_iter()
            .map(|(rank, mut nodes)| {
                nodes.reverse();
                Bucket { rank, nodes }
            })
            .collect())
    }

    /// Renders buckets one line per node, for trace logs.
    pub fn describe(&self, graph: &Graph, buckets: &[Bucket]) -> String {
        let mut out = String::new();
        for bucket in buckets {
            let _ = writeln!(out, "rank {}:", bucket.rank);
            for &j in &bucket.nodes {
                let dim = graph.node(j).map(|n| n.dim().to_string()).unwrap_or_default();
                let _ = writeln!(out, "  {} {}", graph.describe(j), dim);
            }
        }
        out
    }
}
