// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Layout modifiers and their DRM format-modifier encoding.

use std::fmt::{Display, Formatter};

/// Footprint of an AFBC superblock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Superblock {
    Basic16x16,
    Wide32x8,
}

impl Superblock {
    /// Width and height in pixels.
    pub const fn size(self) -> (u32, u32) {
        match self {
            Superblock::Basic16x16 => (16, 16),
            Superblock::Wide32x8 => (32, 8),
        }
    }

    pub const fn pixels(self) -> u32 {
        let (w, h) = self.size();
        w * h
    }
}

/// Options of the AFBC (Arm frame buffer compression) layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AfbcModifier {
    pub superblock: Superblock,
    /// Headers are grouped into 8×8 superblock tiles. Implies solid-colour blocks.
    pub tiled_headers: bool,
    /// Every superblock has a fixed body slot, so partial writes never move other blocks.
    pub sparse: bool,
    /// Lossless YUV-like colour transform (YTR).
    pub color_transform: bool,
}

impl AfbcModifier {
    /// The layout used for fresh resources: 16×16, sparse, untiled, no transform.
    pub const fn new() -> Self {
        AfbcModifier {
            superblock: Superblock::Basic16x16,
            tiled_headers: false,
            sparse: true,
            color_transform: false,
        }
    }

    pub const fn with_sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    pub const fn with_tiled_headers(mut self, tiled: bool) -> Self {
        self.tiled_headers = tiled;
        self
    }

    pub const fn with_color_transform(mut self, ytr: bool) -> Self {
        self.color_transform = ytr;
        self
    }

    /// Side, in superblocks, of a header tile.
    pub const fn header_tile_size(&self) -> u32 {
        if self.tiled_headers { 8 } else { 1 }
    }
}

impl Default for AfbcModifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Physical arrangement of an image in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// Row-major, directly CPU-legible.
    Linear,
    /// 16×16 u-interleaved tiles.
    TiledInterleaved,
    /// Block compressed with per-superblock headers.
    Afbc(AfbcModifier),
}

const DRM_FORMAT_MOD_VENDOR_ARM: u64 = 0x08;
const DRM_VENDOR_SHIFT: u32 = 56;
const DRM_ARM_TYPE_SHIFT: u32 = 52;
const DRM_ARM_TYPE_AFBC: u64 = 0x00;
const DRM_ARM_TYPE_MISC: u64 = 0x01;
const DRM_ARM_VALUE_MASK: u64 = 0x000f_ffff_ffff_ffff;

const fn arm_code(ty: u64, value: u64) -> u64 {
    (DRM_FORMAT_MOD_VENDOR_ARM << DRM_VENDOR_SHIFT)
        | (ty << DRM_ARM_TYPE_SHIFT)
        | (value & DRM_ARM_VALUE_MASK)
}

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
pub const DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED: u64 = arm_code(DRM_ARM_TYPE_MISC, 1);

pub mod afbc_flags {
    pub const BLOCK_SIZE_16X16: u64 = 1;
    pub const BLOCK_SIZE_32X8: u64 = 2;
    pub const BLOCK_SIZE_MASK: u64 = 0xf;
    pub const YTR: u64 = 1 << 4;
    pub const SPLIT: u64 = 1 << 5;
    pub const SPARSE: u64 = 1 << 6;
    pub const CBR: u64 = 1 << 7;
    pub const TILED: u64 = 1 << 8;
    pub const SC: u64 = 1 << 9;
}

impl Modifier {
    pub const fn is_linear(&self) -> bool {
        matches!(self, Modifier::Linear)
    }

    pub const fn is_tiled(&self) -> bool {
        matches!(self, Modifier::TiledInterleaved)
    }

    pub const fn afbc(&self) -> Option<AfbcModifier> {
        match self {
            Modifier::Afbc(afbc) => Some(*afbc),
            _ => None,
        }
    }

    pub const fn is_afbc(&self) -> bool {
        matches!(self, Modifier::Afbc(_))
    }

    /// Short human-readable name of the layout family.
    pub const fn family(&self) -> &'static str {
        match self {
            Modifier::Linear => "linear",
            Modifier::TiledInterleaved => "u-interleaved",
            Modifier::Afbc(_) => "AFBC",
        }
    }

    /// Encodes as a DRM format modifier for sharing with other processes.
    pub const fn to_drm(&self) -> u64 {
        match self {
            Modifier::Linear => DRM_FORMAT_MOD_LINEAR,
            Modifier::TiledInterleaved => DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED,
            Modifier::Afbc(afbc) => {
                let mut flags = match afbc.superblock {
                    Superblock::Basic16x16 => afbc_flags::BLOCK_SIZE_16X16,
                    Superblock::Wide32x8 => afbc_flags::BLOCK_SIZE_32X8,
                };
                if afbc.color_transform {
                    flags |= afbc_flags::YTR;
                }
                if afbc.sparse {
                    flags |= afbc_flags::SPARSE;
                }
                if afbc.tiled_headers {
                    flags |= afbc_flags::TILED | afbc_flags::SC;
                }
                arm_code(DRM_ARM_TYPE_AFBC, flags)
            }
        }
    }

    /// Decodes a DRM format modifier. Returns `None` for modifiers this driver cannot lay out.
    pub const fn from_drm(drm: u64) -> Option<Modifier> {
        if drm == DRM_FORMAT_MOD_LINEAR {
            return Some(Modifier::Linear);
        }
        if drm == DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED {
            return Some(Modifier::TiledInterleaved);
        }
        if drm >> DRM_VENDOR_SHIFT != DRM_FORMAT_MOD_VENDOR_ARM {
            return None;
        }
        if (drm >> DRM_ARM_TYPE_SHIFT) & 0xf != DRM_ARM_TYPE_AFBC {
            return None;
        }
        let flags = drm & DRM_ARM_VALUE_MASK;
        let known = afbc_flags::BLOCK_SIZE_MASK
            | afbc_flags::YTR
            | afbc_flags::SPARSE
            | afbc_flags::TILED
            | afbc_flags::SC;
        if flags & !known != 0 {
            return None;
        }
        let superblock = match flags & afbc_flags::BLOCK_SIZE_MASK {
            afbc_flags::BLOCK_SIZE_16X16 => Superblock::Basic16x16,
            afbc_flags::BLOCK_SIZE_32X8 => Superblock::Wide32x8,
            _ => return None,
        };
        Some(Modifier::Afbc(AfbcModifier {
            superblock,
            tiled_headers: flags & afbc_flags::TILED != 0,
            sparse: flags & afbc_flags::SPARSE != 0,
            color_transform: flags & afbc_flags::YTR != 0,
        }))
    }
}

impl Display for Modifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Modifier::Linear | Modifier::TiledInterleaved => f.write_str(self.family()),
            Modifier::Afbc(afbc) => {
                let (w, h) = afbc.superblock.size();
                write!(f, "AFBC {w}x{h}")?;
                if afbc.sparse {
                    f.write_str(" sparse")?;
                }
                if afbc.tiled_headers {
                    f.write_str(" tiled")?;
                }
                if afbc.color_transform {
                    f.write_str(" ytr")?;
                }
                Ok(())
            }
        }
    }
}
