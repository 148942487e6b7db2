// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Resource visibility and usage declarations.
//!
//! When creating resources, callers declare how the resource will be bound and how often the
//! CPU will touch it. The layout planner uses these declarations to pick between linear, tiled
//! and compressed layouts: a resource only sampled and rendered to can be compressed, while one
//! bound as a vertex buffer must stay linear.
//!
//! # Examples
//!
//! ```
//! use pan_resource::bindings::visible_to::{BindFlags, Usage};
//!
//! // A texture that is rendered to and later sampled
//! let bind = BindFlags::RENDER_TARGET | BindFlags::SAMPLER_VIEW;
//! assert!(BindFlags::COMPRESSIBLE.contains(bind));
//!
//! // Uploaded once per frame from the CPU
//! let usage = Usage::Stream;
//! assert!(usage.is_stream());
//! ```

bitflags::bitflags! {
    /// How the GPU pipeline binds a resource.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BindFlags: u32 {
        const DEPTH_STENCIL = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const BLENDABLE = 1 << 2;
        const SAMPLER_VIEW = 1 << 3;
        const DISPLAY_TARGET = 1 << 4;
        const SCANOUT = 1 << 5;
        /// Shared with another process.
        const SHARED = 1 << 6;
        const VERTEX_BUFFER = 1 << 7;
        const INDEX_BUFFER = 1 << 8;
        const CONSTANT_BUFFER = 1 << 9;
        const SHADER_BUFFER = 1 << 10;
        const SHADER_IMAGE = 1 << 11;
        /// The caller requires a linear layout.
        const LINEAR = 1 << 12;

        /// Bindings under which a resource may still be AFBC-compressed.
        const COMPRESSIBLE = Self::DEPTH_STENCIL.bits()
            | Self::RENDER_TARGET.bits()
            | Self::BLENDABLE.bits()
            | Self::SAMPLER_VIEW.bits()
            | Self::DISPLAY_TARGET.bits()
            | Self::SCANOUT.bits()
            | Self::SHARED.bits();

        /// Bindings under which a resource may still be u-interleaved.
        const TILEABLE = Self::DEPTH_STENCIL.bits()
            | Self::RENDER_TARGET.bits()
            | Self::BLENDABLE.bits()
            | Self::SAMPLER_VIEW.bits()
            | Self::DISPLAY_TARGET.bits()
            | Self::SCANOUT.bits()
            | Self::SHARED.bits();
    }
}

/// How often the CPU is expected to touch a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    /// Written occasionally by the CPU, mostly used by the GPU.
    #[default]
    Default,
    /// Never written after creation.
    Immutable,
    /// Written regularly by the CPU.
    Dynamic,
    /// Rewritten by the CPU for nearly every use.
    Stream,
    /// Used as a CPU transfer intermediary.
    Staging,
}

impl Usage {
    pub const fn is_stream(self) -> bool {
        matches!(self, Usage::Stream)
    }
}

/// The kind of resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Buffer,
    Texture1D,
    Texture1DArray,
    Texture2D,
    Texture2DArray,
    /// Non-normalized-coordinate 2D texture.
    TextureRect,
    Texture3D,
    /// Array size is 6.
    TextureCube,
    /// Array size is a multiple of 6.
    TextureCubeArray,
}

impl Target {
    /// Targets whose layers are two-dimensional surfaces.
    pub const fn is_2d_family(self) -> bool {
        matches!(
            self,
            Target::Texture2D
                | Target::Texture2DArray
                | Target::TextureRect
                | Target::TextureCube
                | Target::TextureCubeArray
        )
    }

    pub const fn is_3d(self) -> bool {
        matches!(self, Target::Texture3D)
    }
}

bitflags::bitflags! {
    /// Requested CPU access for a map.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MapFlags: u32 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        /// Pointer into the backing allocation with no staging.
        const DIRECTLY = 1 << 2;
        /// The mapped range will be fully overwritten.
        const DISCARD_RANGE = 1 << 3;
        /// The whole resource may be thrown away.
        const DISCARD_WHOLE_RESOURCE = 1 << 4;
        /// Do not synchronize with in-flight GPU work.
        const UNSYNCHRONIZED = 1 << 5;
        /// The mapping stays valid while the GPU uses the resource.
        const PERSISTENT = 1 << 6;
    }
}

impl MapFlags {
    pub const fn reads(&self) -> bool {
        self.contains(MapFlags::READ)
    }

    pub const fn writes(&self) -> bool {
        self.contains(MapFlags::WRITE)
    }
}
