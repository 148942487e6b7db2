// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Device description: architecture capabilities and driver configuration.
//!
//! Hardware generations differ in which layout features they implement. Rather than comparing
//! architecture numbers throughout the planner and transition code, the generation is resolved
//! once into a [`DeviceCaps`] value. Debug overrides live in [`DeviceConfig`], an immutable
//! value handed to the device at construction, so every policy can be unit-tested by building
//! a different config.

use std::fmt::Debug;
use std::sync::Arc;

use crate::imp::{Allocator, Queue};

/// Mali GPU architecture generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Architecture {
    /// Midgard (T600, T720)
    V4,
    /// Midgard (T760, T860, T880)
    V5,
    /// Bifrost (G31, G51, G71, G72)
    V6,
    /// Bifrost (G52, G76)
    V7,
    /// Valhall (G57, G77, G78)
    V9,
    /// Valhall CSF (G310, G610, G710)
    V10,
}

impl Architecture {
    pub const fn version(self) -> u32 {
        match self {
            Architecture::V4 => 4,
            Architecture::V5 => 5,
            Architecture::V6 => 6,
            Architecture::V7 => 7,
            Architecture::V9 => 9,
            Architecture::V10 => 10,
        }
    }
}

/// Layout features implemented by a hardware generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceCaps {
    /// AFBC block compression is available at all.
    pub has_afbc: bool,
    /// AFBC headers may be arranged in 8×8 superblock tiles.
    pub afbc_tiled_headers: bool,
    /// 3D textures may be AFBC-compressed.
    pub afbc_3d: bool,
    /// Largest bytes-per-pixel the transaction-elimination checksum unit handles.
    pub max_checksum_bpp: u32,
    /// Per-tile enable bitmap for partial updates.
    pub tile_enable_map: bool,
    /// Largest sample count that may be AFBC-compressed.
    pub max_afbc_samples: u32,
}

impl DeviceCaps {
    pub const fn for_arch(arch: Architecture) -> Self {
        let v = arch.version();
        DeviceCaps {
            has_afbc: v >= 5,
            afbc_tiled_headers: v >= 7,
            afbc_3d: v >= 7,
            max_checksum_bpp: if v == 6 { 6 } else { 4 },
            // later generations implement partial updates with frame shaders instead
            tile_enable_map: v == 5,
            max_afbc_samples: 1,
        }
    }

    pub const fn supports_tiled_compression_headers(&self) -> bool {
        self.afbc_tiled_headers
    }

    pub const fn supports_checksum_with_bpp(&self, bytes_per_pixel: u32) -> bool {
        bytes_per_pixel <= self.max_checksum_bpp
    }

    pub const fn max_samples_for_compression(&self) -> u32 {
        self.max_afbc_samples
    }
}

/// Number of full-surface CPU overwrites after which a 2D resource is considered streamed.
pub const DEFAULT_STREAMING_THRESHOLD: u32 = 8;

/// Largest `new_size * 100 / old_size` for which AFBC packing is carried out.
pub const DEFAULT_MAX_AFBC_PACKING_RATIO: u32 = 90;

/// Driver debug overrides and tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Every resource is linear.
    pub force_linear: bool,
    /// Never pick AFBC.
    pub no_afbc: bool,
    /// Pack AFBC resources eagerly; implies untiled headers so packing is possible.
    pub force_pack: bool,
    /// Never allocate transaction-elimination checksums.
    pub no_crc: bool,
    pub max_afbc_packing_ratio: u32,
    pub streaming_threshold: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            force_linear: false,
            no_afbc: false,
            force_pack: false,
            no_crc: false,
            max_afbc_packing_ratio: DEFAULT_MAX_AFBC_PACKING_RATIO,
            streaming_threshold: DEFAULT_STREAMING_THRESHOLD,
        }
    }
}

impl DeviceConfig {
    /// Reads `PAN_MESA_DEBUG` and `PAN_MAX_AFBC_PACKING_RATIO`.
    pub fn from_env() -> Self {
        let mut config = std::env::var("PAN_MESA_DEBUG")
            .map(|flags| Self::from_debug_flags(&flags))
            .unwrap_or_default();
        if let Some(ratio) = std::env::var("PAN_MAX_AFBC_PACKING_RATIO")
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
        {
            config.max_afbc_packing_ratio = ratio;
        }
        config
    }

    /// Parses a comma separated debug flag list such as `"linear,nocrc"`.
    pub fn from_debug_flags(flags: &str) -> Self {
        let mut config = DeviceConfig::default();
        for flag in flags.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            match flag {
                "linear" => config.force_linear = true,
                "noafbc" => config.no_afbc = true,
                "forcepack" => config.force_pack = true,
                "nocrc" => config.no_crc = true,
                other => {
                    logwise::warn_sync!(
                        "Ignoring unknown debug flag {flag}",
                        flag = logwise::privacy::LogIt(&other)
                    );
                }
            }
        }
        config
    }
}

/// A GPU device: its capabilities, configuration and memory allocator.
pub struct Device {
    arch: Architecture,
    caps: DeviceCaps,
    config: DeviceConfig,
    allocator: Arc<dyn Allocator>,
}

impl Device {
    pub fn new(arch: Architecture, config: DeviceConfig, allocator: Arc<dyn Allocator>) -> Self {
        Device {
            arch,
            caps: DeviceCaps::for_arch(arch),
            config,
            allocator,
        }
    }

    /// Overrides the capabilities derived from the architecture.
    pub fn with_caps(mut self, caps: DeviceCaps) -> Self {
        self.caps = caps;
        self
    }

    pub fn arch(&self) -> Architecture {
        self.arch
    }

    pub fn caps(&self) -> &DeviceCaps {
        &self.caps
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub(crate) fn allocator(&self) -> &dyn Allocator {
        &*self.allocator
    }
}

impl Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("arch", &self.arch)
            .field("caps", &self.caps)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// A device together with the command-batching subsystem that submits work to it.
///
/// Transitions and CPU access need both: the device to allocate, the queue to blit and to
/// synchronize with in-flight batches.
#[derive(Clone)]
pub struct Context {
    device: Arc<Device>,
    queue: Arc<dyn Queue>,
}

impl Context {
    pub fn new(device: Arc<Device>, queue: Arc<dyn Queue>) -> Self {
        Context { device, queue }
    }

    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn queue(&self) -> &dyn Queue {
        &*self.queue
    }
}

impl Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
