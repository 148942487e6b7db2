// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Builder for resource templates to reduce parameter count.

use crate::bindings::visible_to::{BindFlags, Target, Usage};
use crate::error::{Error, Result};
use crate::pixel_formats::PixelFormat;

/// Logical description of a resource: everything except its physical layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTemplate {
    pub(crate) target: Target,
    pub(crate) format: PixelFormat,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) depth: u32,
    pub(crate) array_size: u32,
    pub(crate) nr_samples: u32,
    pub(crate) mip_levels: u32,
    pub(crate) bind: BindFlags,
    pub(crate) usage: Usage,
    pub(crate) label: String,
}

impl ResourceTemplate {
    /// A single-level, single-sample 2D texture.
    pub fn texture_2d(format: PixelFormat, width: u32, height: u32) -> Self {
        ResourceTemplate {
            target: Target::Texture2D,
            format,
            width,
            height,
            depth: 1,
            array_size: 1,
            nr_samples: 1,
            mip_levels: 1,
            bind: BindFlags::SAMPLER_VIEW,
            usage: Usage::Default,
            label: String::from("texture"),
        }
    }

    /// A byte buffer of `size` bytes.
    pub fn buffer(size: u32) -> Self {
        ResourceTemplate {
            target: Target::Buffer,
            format: PixelFormat::R8Uint,
            width: size,
            height: 1,
            depth: 1,
            array_size: 1,
            nr_samples: 1,
            mip_levels: 1,
            bind: BindFlags::VERTEX_BUFFER,
            usage: Usage::Default,
            label: String::from("buffer"),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.target = target;
        self
    }

    pub fn with_depth(mut self, depth: u32) -> Self {
        self.depth = depth;
        self
    }

    pub fn with_array_size(mut self, array_size: u32) -> Self {
        self.array_size = array_size;
        self
    }

    pub fn with_samples(mut self, nr_samples: u32) -> Self {
        self.nr_samples = nr_samples;
        self
    }

    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels;
        self
    }

    pub fn with_bind(mut self, bind: BindFlags) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn target(&self) -> Target {
        self.target
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn array_size(&self) -> u32 {
        self.array_size
    }

    pub fn nr_samples(&self) -> u32 {
        self.nr_samples
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    /// Index of the smallest mip level.
    pub fn last_level(&self) -> u32 {
        self.mip_levels - 1
    }

    pub fn bind(&self) -> BindFlags {
        self.bind
    }

    pub fn usage(&self) -> Usage {
        self.usage
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Checks the template describes something representable.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 || self.depth == 0 || self.array_size == 0 {
            return Err(Error::InvalidTemplate(format!(
                "zero extent {}x{}x{} with {} layers",
                self.width, self.height, self.depth, self.array_size
            )));
        }
        if self.nr_samples == 0 || !self.nr_samples.is_power_of_two() {
            return Err(Error::InvalidTemplate(format!(
                "{} samples",
                self.nr_samples
            )));
        }
        let max_levels = 32 - self.width.max(self.height).max(self.depth).leading_zeros();
        if self.mip_levels == 0 || self.mip_levels > max_levels {
            return Err(Error::InvalidTemplate(format!(
                "{} mip levels for a {}x{}x{} image",
                self.mip_levels, self.width, self.height, self.depth
            )));
        }
        match self.target {
            Target::Buffer | Target::Texture1D | Target::Texture1DArray if self.height != 1 => {
                Err(Error::InvalidTemplate(String::from(
                    "one-dimensional resources have height 1",
                )))
            }
            Target::Texture3D if self.array_size != 1 => Err(Error::InvalidTemplate(
                String::from("3D textures cannot be arrays"),
            )),
            Target::TextureCube if self.array_size != 6 => Err(Error::InvalidTemplate(
                String::from("cube maps have 6 faces"),
            )),
            Target::TextureCubeArray if self.array_size % 6 != 0 => Err(Error::InvalidTemplate(
                String::from("cube arrays have a multiple of 6 faces"),
            )),
            _ if self.depth != 1 && !self.target.is_3d() => Err(Error::InvalidTemplate(
                String::from("only 3D textures have depth"),
            )),
            _ => Ok(()),
        }
    }
}
