// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Pixel format definitions for GPU resources.
//!
//! Every format the resource layer handles is described by a fixed table entry encoding:
//!
//! - Bytes per block (a block is one pixel for ordinary formats)
//! - Block width and height (1×1, or 4×4 for block-compressed formats)
//! - Number of channels and colorspace (linear RGB, sRGB, depth/stencil)
//! - Whether the format can be rendered to and filtered
//!
//! The tiling codec never looks inside a block: it only needs [`PixelFormat::bytes_per_block`]
//! and [`PixelFormat::block_size`]. The layout planner additionally asks which AFBC
//! compression class a format belongs to, since two formats may only alias the same
//! compressed data when their classes match.
//!
//! # Examples
//!
//! ```
//! use pan_resource::pixel_formats::PixelFormat;
//!
//! assert_eq!(PixelFormat::R8G8B8A8Unorm.bytes_per_block(), 4);
//! assert_eq!(PixelFormat::Etc2Rgba8.block_size(), (4, 4));
//! assert!(PixelFormat::Etc2Rgba8.is_compressed());
//! ```

/*
Quick note on type design.  Formats arrive at runtime from the API layer (a template, an imported
buffer, a view that reinterprets a resource), so unlike a typed texture API we can't lift them
into the type system.  A flat enum plus a const table keeps the lookup a single index.
 */

use crate::device::Architecture;

/// How the channels of a format are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Colorspace {
    Rgb,
    Srgb,
    DepthStencil,
}

/// AFBC compression class.
///
/// Two formats whose classes are equal produce bit-identical compressed payloads, so a
/// compressed resource may be reinterpreted between them without decompressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AfbcClass {
    R8,
    R8G8,
    R5G6B5,
    R4G4B4A4,
    R5G5B5A1,
    R8G8B8,
    R8G8B8A8,
    R10G10B10A2,
    R11G11B10,
    S8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    R8Unorm,
    R8Uint,
    R8G8Unorm,
    R5G6B5Unorm,
    R4G4B4A4Unorm,
    R5G5B5A1Unorm,
    R8G8B8Unorm,
    R8G8B8A8Unorm,
    R8G8B8A8Srgb,
    B8G8R8A8Unorm,
    B8G8R8A8Srgb,
    R10G10B10A2Unorm,
    R11G11B10Float,
    R16Float,
    R16G16Float,
    R16G16B16Unorm,
    R16G16B16A16Float,
    R32Float,
    R32Uint,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    Z16Unorm,
    Z24UnormS8Uint,
    Z32Float,
    S8Uint,
    Etc2Rgb8,
    Etc2Rgba8,
    Bc1Rgba,
    Bc3Rgba,
    Astc4x4,
}

#[derive(Debug, Clone, Copy)]
struct FormatDescription {
    block_bytes: u8,
    block_width: u8,
    block_height: u8,
    channels: u8,
    colorspace: Colorspace,
    renderable: bool,
    filterable: bool,
}

const fn plain(block_bytes: u8, channels: u8, colorspace: Colorspace) -> FormatDescription {
    FormatDescription {
        block_bytes,
        block_width: 1,
        block_height: 1,
        channels,
        colorspace,
        renderable: true,
        filterable: true,
    }
}

const fn compressed(block_bytes: u8, channels: u8) -> FormatDescription {
    FormatDescription {
        block_bytes,
        block_width: 4,
        block_height: 4,
        channels,
        colorspace: Colorspace::Rgb,
        renderable: false,
        filterable: true,
    }
}

const fn unfiltered(mut d: FormatDescription) -> FormatDescription {
    d.filterable = false;
    d
}

const fn unrenderable(mut d: FormatDescription) -> FormatDescription {
    d.renderable = false;
    d
}

impl PixelFormat {
    /// Every format in the table, in declaration order.
    pub const ALL: [PixelFormat; 31] = [
        PixelFormat::R8Unorm,
        PixelFormat::R8Uint,
        PixelFormat::R8G8Unorm,
        PixelFormat::R5G6B5Unorm,
        PixelFormat::R4G4B4A4Unorm,
        PixelFormat::R5G5B5A1Unorm,
        PixelFormat::R8G8B8Unorm,
        PixelFormat::R8G8B8A8Unorm,
        PixelFormat::R8G8B8A8Srgb,
        PixelFormat::B8G8R8A8Unorm,
        PixelFormat::B8G8R8A8Srgb,
        PixelFormat::R10G10B10A2Unorm,
        PixelFormat::R11G11B10Float,
        PixelFormat::R16Float,
        PixelFormat::R16G16Float,
        PixelFormat::R16G16B16Unorm,
        PixelFormat::R16G16B16A16Float,
        PixelFormat::R32Float,
        PixelFormat::R32Uint,
        PixelFormat::R32G32Float,
        PixelFormat::R32G32B32Float,
        PixelFormat::R32G32B32A32Float,
        PixelFormat::Z16Unorm,
        PixelFormat::Z24UnormS8Uint,
        PixelFormat::Z32Float,
        PixelFormat::S8Uint,
        PixelFormat::Etc2Rgb8,
        PixelFormat::Etc2Rgba8,
        PixelFormat::Bc1Rgba,
        PixelFormat::Bc3Rgba,
        PixelFormat::Astc4x4,
    ];

    const fn description(self) -> FormatDescription {
        use Colorspace::*;
        match self {
            PixelFormat::R8Unorm => plain(1, 1, Rgb),
            PixelFormat::R8Uint => unfiltered(plain(1, 1, Rgb)),
            PixelFormat::R8G8Unorm => plain(2, 2, Rgb),
            PixelFormat::R5G6B5Unorm => plain(2, 3, Rgb),
            PixelFormat::R4G4B4A4Unorm => plain(2, 4, Rgb),
            PixelFormat::R5G5B5A1Unorm => plain(2, 4, Rgb),
            PixelFormat::R8G8B8Unorm => unrenderable(plain(3, 3, Rgb)),
            PixelFormat::R8G8B8A8Unorm => plain(4, 4, Rgb),
            PixelFormat::R8G8B8A8Srgb => plain(4, 4, Srgb),
            PixelFormat::B8G8R8A8Unorm => plain(4, 4, Rgb),
            PixelFormat::B8G8R8A8Srgb => plain(4, 4, Srgb),
            PixelFormat::R10G10B10A2Unorm => plain(4, 4, Rgb),
            PixelFormat::R11G11B10Float => plain(4, 3, Rgb),
            PixelFormat::R16Float => plain(2, 1, Rgb),
            PixelFormat::R16G16Float => plain(4, 2, Rgb),
            PixelFormat::R16G16B16Unorm => unrenderable(plain(6, 3, Rgb)),
            PixelFormat::R16G16B16A16Float => plain(8, 4, Rgb),
            PixelFormat::R32Float => unfiltered(plain(4, 1, Rgb)),
            PixelFormat::R32Uint => unfiltered(plain(4, 1, Rgb)),
            PixelFormat::R32G32Float => unfiltered(plain(8, 2, Rgb)),
            PixelFormat::R32G32B32Float => unrenderable(unfiltered(plain(12, 3, Rgb))),
            PixelFormat::R32G32B32A32Float => unfiltered(plain(16, 4, Rgb)),
            PixelFormat::Z16Unorm => plain(2, 1, DepthStencil),
            PixelFormat::Z24UnormS8Uint => plain(4, 2, DepthStencil),
            PixelFormat::Z32Float => unfiltered(plain(4, 1, DepthStencil)),
            PixelFormat::S8Uint => unfiltered(plain(1, 1, DepthStencil)),
            PixelFormat::Etc2Rgb8 => compressed(8, 3),
            PixelFormat::Etc2Rgba8 => compressed(16, 4),
            PixelFormat::Bc1Rgba => compressed(8, 4),
            PixelFormat::Bc3Rgba => compressed(16, 4),
            PixelFormat::Astc4x4 => compressed(16, 4),
        }
    }

    /// Bytes per block. For ordinary formats this is bytes per pixel.
    pub const fn bytes_per_block(self) -> u32 {
        self.description().block_bytes as u32
    }

    /// Block dimensions in pixels as `(width, height)`.
    pub const fn block_size(self) -> (u32, u32) {
        let d = self.description();
        (d.block_width as u32, d.block_height as u32)
    }

    pub const fn is_compressed(self) -> bool {
        let d = self.description();
        d.block_width > 1 || d.block_height > 1
    }

    pub const fn channels(self) -> u32 {
        self.description().channels as u32
    }

    pub const fn colorspace(self) -> Colorspace {
        self.description().colorspace
    }

    pub const fn is_renderable(self) -> bool {
        self.description().renderable
    }

    pub const fn is_filterable(self) -> bool {
        self.description().filterable
    }

    pub const fn is_depth_stencil(self) -> bool {
        matches!(self.description().colorspace, Colorspace::DepthStencil)
    }

    /// Whether the u-interleaved tiling unit handles this block size.
    ///
    /// The hardware tiler only understands power-of-two blocks plus 24 and 96 bit ones.
    pub const fn is_tileable(self) -> bool {
        matches!(self.bytes_per_block() * 8, 8 | 16 | 24 | 32 | 64 | 96 | 128)
    }

    /// The UNORM equivalent of an sRGB format, or the format itself.
    pub const fn linear(self) -> PixelFormat {
        match self {
            PixelFormat::R8G8B8A8Srgb => PixelFormat::R8G8B8A8Unorm,
            PixelFormat::B8G8R8A8Srgb => PixelFormat::B8G8R8A8Unorm,
            other => other,
        }
    }

    /// The AFBC compression class of this format on `arch`, if it can be compressed at all.
    ///
    /// sRGB conversion and channel swizzles happen outside the compressor, so sRGB and BGRA
    /// variants share the class of their linear RGBA counterpart.
    pub fn afbc_class(self, arch: Architecture) -> Option<AfbcClass> {
        match self.linear() {
            PixelFormat::R8Unorm => Some(AfbcClass::R8),
            PixelFormat::R8G8Unorm => Some(AfbcClass::R8G8),
            PixelFormat::R5G6B5Unorm => Some(AfbcClass::R5G6B5),
            PixelFormat::R4G4B4A4Unorm => Some(AfbcClass::R4G4B4A4),
            PixelFormat::R5G5B5A1Unorm => Some(AfbcClass::R5G5B5A1),
            PixelFormat::R8G8B8Unorm => Some(AfbcClass::R8G8B8),
            PixelFormat::R8G8B8A8Unorm | PixelFormat::B8G8R8A8Unorm => Some(AfbcClass::R8G8B8A8),
            PixelFormat::R10G10B10A2Unorm => Some(AfbcClass::R10G10B10A2),
            PixelFormat::R11G11B10Float => Some(AfbcClass::R11G11B10),
            PixelFormat::Z16Unorm => Some(AfbcClass::R8G8),
            PixelFormat::Z24UnormS8Uint => Some(AfbcClass::R8G8B8A8),
            PixelFormat::S8Uint if arch.version() >= 9 => Some(AfbcClass::S8),
            _ => None,
        }
    }

    /// Whether the AFBC lossless YUV-like color transform (YTR) is defined for this format.
    ///
    /// YTR only exists for 3 and 4 channel formats in the RGB colorspace; a fourth channel
    /// is carried through untouched.
    pub const fn supports_ytr(self) -> bool {
        let d = self.description();
        (d.channels == 3 || d.channels == 4) && matches!(d.colorspace, Colorspace::Rgb)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_is_consistent() {
        for format in PixelFormat::ALL {
            assert!(format.bytes_per_block() > 0, "{format:?}");
            let (bw, bh) = format.block_size();
            assert_eq!(format.is_compressed(), bw > 1 || bh > 1, "{format:?}");
            assert!(!(format.is_compressed() && format.is_renderable()), "{format:?}");
        }
    }

    #[test]
    fn srgb_shares_afbc_class_with_unorm() {
        let arch = Architecture::V7;
        assert_eq!(
            PixelFormat::R8G8B8A8Srgb.afbc_class(arch),
            PixelFormat::R8G8B8A8Unorm.afbc_class(arch)
        );
        assert_eq!(
            PixelFormat::B8G8R8A8Srgb.afbc_class(arch),
            Some(AfbcClass::R8G8B8A8)
        );
        assert_ne!(
            PixelFormat::R8G8Unorm.afbc_class(arch),
            PixelFormat::R8G8B8A8Unorm.afbc_class(arch)
        );
    }

    #[test]
    fn stencil_compresses_only_on_valhall_v9() {
        assert_eq!(PixelFormat::S8Uint.afbc_class(Architecture::V7), None);
        assert_eq!(
            PixelFormat::S8Uint.afbc_class(Architecture::V9),
            Some(AfbcClass::S8)
        );
    }

    #[test]
    fn tileable_block_sizes() {
        assert!(PixelFormat::R8G8B8Unorm.is_tileable());
        assert!(PixelFormat::R32G32B32Float.is_tileable());
        assert!(PixelFormat::Etc2Rgba8.is_tileable());
        assert!(!PixelFormat::R16G16B16Unorm.is_tileable());
    }

    #[test]
    fn ytr_requires_rgb_colorspace() {
        assert!(PixelFormat::R8G8B8A8Unorm.supports_ytr());
        assert!(PixelFormat::R5G6B5Unorm.supports_ytr());
        assert!(!PixelFormat::R8G8B8A8Srgb.supports_ytr());
        assert!(!PixelFormat::R8G8Unorm.supports_ytr());
        assert!(!PixelFormat::Z24UnormS8Uint.supports_ytr());
    }
}
