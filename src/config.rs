//! Engine and device configuration.
//!
//! Both configs are plain values built with `Default` plus `with_*` setters.
//! Nothing here is global: a [`DeviceConfig`] is turned into a
//! [`Device`](crate::device::Device) and handed to the engine together with an
//! [`EngineConfig`].

/// Elements per allocation boundary (8 x `f32` = 32 bytes).
pub const DEFAULT_ALIGNMENT: usize = 8;

/// Default value-pool capacity, in `f32` elements (16 MiB).
pub const DEFAULT_VALUE_CAPACITY: usize = 1 << 22;

/// Default gradient-pool capacity, in `f32` elements (16 MiB).
pub const DEFAULT_GRAD_CAPACITY: usize = 1 << 22;

/// Tunables of the execution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Elementwise-unary groups larger than this run as one fused kernel call.
    pub unary_fusion_threshold: usize,
    /// Matrix-multiply groups larger than this are considered for fusion.
    pub matmul_fusion_threshold: usize,
    /// Enables elementwise-unary fusion.
    pub fuse_unary: bool,
    /// Enables matrix-multiply fusion.
    pub fuse_matmul: bool,
    /// Dispatch the individually-run members of a group on rayon's thread pool.
    pub parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            unary_fusion_threshold: 10,
            matmul_fusion_threshold: 5,
            fuse_unary: true,
            fuse_matmul: true,
            parallel: false,
        }
    }
}

impl EngineConfig {
    /// Turns both fusion paths on or off.
    #[must_use]
    pub fn with_fusion(mut self, enabled: bool) -> Self {
        self.fuse_unary = enabled;
        self.fuse_matmul = enabled;
        self
    }

    /// Sets the group size above which elementwise-unary groups are fused.
    #[must_use]
    pub fn with_unary_fusion_threshold(mut self, threshold: usize) -> Self {
        self.unary_fusion_threshold = threshold;
        self
    }

    /// Sets the group size above which matrix-multiply groups are fused.
    #[must_use]
    pub fn with_matmul_fusion_threshold(mut self, threshold: usize) -> Self {
        self.matmul_fusion_threshold = threshold;
        self
    }

    /// Enables parallel dispatch inside a group.
    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Sizing of one device's pools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Human readable name, used in logs.
    pub name: String,
    /// Capacity of the forward-value pool in `f32` elements.
    pub value_capacity: usize,
    /// Capacity of the gradient pool in `f32` elements.
    pub grad_capacity: usize,
    /// Every allocation starts on a multiple of this many elements.
    pub alignment: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            name: "CPU".to_string(),
            value_capacity: DEFAULT_VALUE_CAPACITY,
            grad_capacity: DEFAULT_GRAD_CAPACITY,
            alignment: DEFAULT_ALIGNMENT,
        }
    }
}

impl DeviceConfig {
    /// Creates a config with default sizes and the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Sets the value-pool capacity.
    #[must_use]
    pub fn with_value_capacity(mut self, elements: usize) -> Self {
        self.value_capacity = elements;
        self
    }

    /// Sets the gradient-pool capacity.
    #[must_use]
    pub fn with_grad_capacity(mut self, elements: usize) -> Self {
        self.grad_capacity = elements;
        self
    }

    /// Sets the allocation alignment; zero is treated as one.
    #[must_use]
    pub fn with_alignment(mut self, elements: usize) -> Self {
        self.alignment = elements.max(1);
        self
    }
}
