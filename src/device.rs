//! Devices and their memory pools.
//!
//! Every node lives on one device. A [`Device`] owns two arenas:
//!
//! - the **value** pool, holding forward outputs, aux scratch and fusion temporaries
//! - the **gradient** pool, rebuilt by every backward call
//!
//! Devices are collected in a [`Devices`] context that is handed to the engine
//! when it is built; there is no process-wide registry to switch at runtime.
//!
//! # Example
//!
//! ```
//! use fusegraph::config::DeviceConfig;
//! use fusegraph::device::Devices;
//!
//! let mut devices = Devices::new();
//! let cpu = devices.add(DeviceConfig::named("CPU"));
//! let gpu = devices.add(DeviceConfig::named("GPU:0"));
//! assert_ne!(cpu, gpu);
//! assert_eq!(devices.get(gpu).unwrap().name(), "GPU:0");
//! ```

use std::fmt;

use crate::config::DeviceConfig;
use crate::error::{ExecError, Result};
use crate::pool::{Pool, PoolKind, Region};
use crate::tensors::{Dim, TensorView};

/// Index of a device inside its [`Devices`] context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct DeviceId(pub usize);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One compute device with its two pools.
#[derive(Debug)]
pub struct Device {
    id: DeviceId,
    name: String,
    pub(crate) values: Pool,
    pub(crate) grads: Pool,
}

impl Device {
    /// Builds a device and allocates its pools.
    pub fn new(id: DeviceId, config: &DeviceConfig) -> Self {
        Self {
            id,
            name: config.name.clone(),
            values: Pool::new(PoolKind::Values, id, config.value_capacity, config.alignment),
            grads: Pool::new(PoolKind::Grads, id, config.grad_capacity, config.alignment),
        }
    }

    /// This device's id.
    pub fn id(&self) -> DeviceId {
        self.id
    }

    /// This device's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The requested pool.
    pub fn pool(&self, kind: PoolKind) -> &Pool {
        match kind {
            PoolKind::Values => &self.values,
            PoolKind::Grads => &self.grads,
        }
    }

    /// The requested pool, mutably.
    pub fn pool_mut(&mut self, kind: PoolKind) -> &mut Pool {
        match kind {
            PoolKind::Values => &mut self.values,
            PoolKind::Grads => &mut self.grads,
        }
    }
}

/// The set of devices an engine allocates from.
#[derive(Debug, Default)]
pub struct Devices {
    devices: Vec<Device>,
}

impl Devices {
    /// An empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// A context holding one device built from `config`.
    pub fn single(config: DeviceConfig) -> Self {
        let mut devices = Self::new();
        devices.add(config);
        devices
    }

    /// Adds a device and returns its id.
    pub fn add(&mut self, config: DeviceConfig) -> DeviceId {
        let id = DeviceId(self.devices.len());
        self.devices.push(Device::new(id, &config));
        id
    }

    /// Number of devices.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether there are no devices.
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Looks up a device.
    ///
    /// # Errors
    /// [`ExecError::UnknownDevice`] if `id` is not part of this context.
    pub fn get(&self, id: DeviceId) -> Result<&Device> {
        self.devices.get(id.0).ok_or(ExecError::UnknownDevice(id))
    }

    /// Looks up a device mutably.
    ///
    /// # Errors
    /// [`ExecError::UnknownDevice`] if `id` is not part of this context.
    pub fn get_mut(&mut self, id: DeviceId) -> Result<&mut Device> {
        self.devices.get_mut(id.0).ok_or(ExecError::UnknownDevice(id))
    }

    /// Iterates over all devices.
    pub fn iter(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Device> {
        self.devices.iter_mut()
    }

    /// Fully resets one kind of pool on every device.
    pub fn free_all(&mut self, kind: PoolKind) {
        for device in &mut self.devices {
            device.pool_mut(kind).free();
        }
    }

    /// Zero-fills the allocated part of one kind of pool on every device.
    pub fn zero_all(&mut self, kind: PoolKind) {
        for device in &mut self.devices {
            device.pool_mut(kind).zero_allocated();
        }
    }

    /// Splits value memory for writing on `target` from offset `at` upwards.
    ///
    /// The returned reader sees every other device's allocated values and the
    /// part of `target`'s value pool below `at`; the returned slice covers
    /// `target`'s values from `at` to its pool pointer.
    pub(crate) fn split_values(&mut self, target: DeviceId, at: usize) -> (ValueReader<'_>, &mut [f32]) {
        let mut pools = Vec::with_capacity(self.devices.len());
        let mut upper: &mut [f32] = &mut [];
        for device in &mut self.devices {
            if device.id == target {
                let (lo, hi) = device.values.split_at(at);
                pools.push(lo);
                upper = hi;
            } else {
                let device: &Device = device;
                pools.push(device.values.allocated());
            }
        }
        (ValueReader { pools }, upper)
    }

    /// Copies `region` of `src`'s values to `offset` in `dst`'s values.
    pub(crate) fn copy_values(&mut self, src: DeviceId, region: Region, dst: DeviceId, offset: usize) {
        if src == dst {
            self.devices[src.0].values.copy_within(region, offset);
            return;
        }
        let (from, to) = if src.0 < dst.0 {
            let (lo, hi) = self.devices.split_at_mut(dst.0);
            (&lo[src.0], &mut hi[0])
        } else {
            let (lo, hi) = self.devices.split_at_mut(src.0);
            (&hi[0], &mut lo[dst.0])
        };
        to.values
            .slice_mut(Region {
                offset,
                len: region.len,
            })
            .copy_from_slice(from.values.slice(region));
    }

    /// Value pools read-only next to gradient pools writable, one entry per device.
    pub(crate) fn values_and_grads(&mut self) -> (ValueReader<'_>, Vec<&mut Pool>) {
        let (pools, grads) = self
            .devices
            .iter_mut()
            .map(|d| (&d.values, &mut d.grads))
            .map(|(v, g)| (v.allocated(), g))
            .unzip();
        (ValueReader { pools }, grads)
    }
}

/// Location of a value in pool memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValueSlot {
    pub device: DeviceId,
    pub dim: Dim,
    pub region: Region,
    pub aux: Region,
}

/// Read-only access to value memory across devices.
#[derive(Debug)]
pub(crate) struct ValueReader<'a> {
    pools: Vec<&'a [f32]>,
}

impl<'a> ValueReader<'a> {
    /// The value stored in `slot`.
    pub(crate) fn view(&self, slot: &ValueSlot) -> TensorView<'a> {
        TensorView::new(slot.dim, &self.pools[slot.device.0][slot.region.offset..slot.region.end()])
    }

    /// Raw memory of `region` on `device`.
    pub(crate) fn slice(&self, device: DeviceId, region: Region) -> &'a [f32] {
        &self.pools[device.0][region.offset..region.end()]
    }

    /// The aux scratch of `slot`.
    pub(crate) fn aux(&self, slot: &ValueSlot) -> &'a [f32] {
        &self.pools[slot.device.0][slot.aux.offset..slot.aux.end()]
    }
}
