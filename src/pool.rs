//! Stack-discipline memory pools.
//!
//! A [`Pool`] is a fixed-capacity arena of `f32` elements with a single bump
//! pointer. It supports exactly four operations on its allocation state:
//!
//! - [`Pool::allocate`]: bump the pointer (aligned), returning a [`Region`]
//! - [`Pool::watermark`] / [`Pool::restore`]: save and roll back the pointer
//! - [`Pool::free`]: drop every allocation at once
//! - [`Pool::zero_allocated`]: clear everything handed out so far
//!
//! There is no way to free one region on its own. Regions are plain offsets,
//! so they stay meaningful as long as the pool is not reset or rolled back
//! below them.

use std::fmt;

use crate::device::DeviceId;
use crate::error::{ExecError, Result};

/// Which of a device's pools a region lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PoolKind {
    /// Forward values, aux scratch and fusion temporaries.
    Values,
    /// Per-node gradients of the current backward pass.
    Grads,
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Values => write!(f, "value"),
            Self::Grads => write!(f, "gradient"),
        }
    }
}

/// A contiguous range of a pool, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    /// One past the last element.
    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    /// The `len`-element region starting `offset` elements into this one.
    pub fn sub(&self, offset: usize, len: usize) -> Region {
        debug_assert!(offset + len <= self.len, "sub-region out of bounds");
        Region {
            offset: self.offset + offset,
            len,
        }
    }
}

/// A saved allocation pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(usize);

/// Snapshot of a pool's usage counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    /// Elements currently allocated, alignment padding included.
    pub used: usize,
    /// Highest `used` ever observed.
    pub high_water: usize,
    /// Total capacity in elements.
    pub capacity: usize,
    /// Number of successful allocations since creation.
    pub allocations: u64,
}

/// Fixed-capacity bump allocator over `f32` storage.
pub struct Pool {
    kind: PoolKind,
    device: DeviceId,
    data: Vec<f32>,
    used: usize,
    high_water: usize,
    alignment: usize,
    allocations: u64,
}

impl Pool {
    /// Creates a pool of `capacity` elements whose allocations start on
    /// multiples of `alignment` elements.
    pub fn new(kind: PoolKind, device: DeviceId, capacity: usize, alignment: usize) -> Self {
        Self {
            kind,
            device,
            data: vec![0.0; capacity],
            used: 0,
            high_water: 0,
            alignment: alignment.max(1),
            allocations: 0,
        }
    }

    /// Which pool this is.
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Reserves `len` elements.
    ///
    /// # Errors
    /// [`ExecError::PoolExhausted`] if the aligned request does not fit; the
    /// pool is left unchanged.
    pub fn allocate(&mut self, len: usize) -> Result<Region> {
        let offset = self.used.next_multiple_of(self.alignment);
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or(ExecError::PoolExhausted {
                pool: self.kind,
                device: self.device,
                requested: len,
                used: self.used,
                capacity: self.data.len(),
            })?;
        self.used = end;
        self.high_water = self.high_water.max(end);
        self.allocations += 1;
        Ok(Region { offset, len })
    }

    /// Elements in use, alignment padding included.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Current allocation pointer.
    pub fn watermark(&self) -> Watermark {
        Watermark(self.used)
    }

    /// Rolls the allocation pointer back to `mark`, releasing everything
    /// allocated after it.
    pub fn restore(&mut self, mark: Watermark) {
        debug_assert!(mark.0 <= self.used, "restoring a watermark above the pool pointer");
        self.used = mark.0.min(self.used);
    }

    /// Releases everything above offset `end`. Never grows the pool.
    pub fn truncate(&mut self, end: usize) {
        self.used = self.used.min(end);
    }

    /// Releases every allocation.
    pub fn free(&mut self) {
        self.used = 0;
    }

    /// Zero-fills all memory handed out so far.
    pub fn zero_allocated(&mut self) {
        self.data[..self.used].fill(0.0);
    }

    /// Highest usage ever reached.
    pub fn high_water_mark(&self) -> usize {
        self.high_water
    }

    /// Usage counters.
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            used: self.used,
            high_water: self.high_water,
            capacity: self.data.len(),
            allocations: self.allocations,
        }
    }

    /// Memory of an allocated region.
    pub fn slice(&self, region: Region) -> &[f32] {
        &self.data[region.offset..region.end()]
    }

    /// Mutable memory of an allocated region.
    pub fn slice_mut(&mut self, region: Region) -> &mut [f32] {
        &mut self.data[region.offset..region.end()]
    }

    /// Everything allocated so far.
    pub fn allocated(&self) -> &[f32] {
        &self.data[..self.used]
    }

    /// Splits the allocated memory at `at`: everything below stays readable,
    /// everything from `at` up to the pool pointer becomes writable.
    pub fn split_at(&mut self, at: usize) -> (&[f32], &mut [f32]) {
        let (lo, hi) = self.split_at_mut(at);
        (lo, hi)
    }

    /// Splits the allocated memory at `at` into two writable halves.
    pub fn split_at_mut(&mut self, at: usize) -> (&mut [f32], &mut [f32]) {
        self.data[..self.used].split_at_mut(at)
    }

    /// Copies `src` to `dst` within the pool. The ranges may not overlap.
    pub fn copy_within(&mut self, src: Region, dst: usize) {
        debug_assert!(src.end() <= dst || dst + src.len <= src.offset, "overlapping copy");
        self.data.copy_within(src.offset..src.end(), dst);
    }
}

impl fmt::Debug for Pool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("kind", &self.kind)
            .field("device", &self.device)
            .field("used", &self.used)
            .field("high_water", &self.high_water)
            .field("capacity", &self.data.len())
            .finish()
    }
}
