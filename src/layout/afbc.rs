// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! AFBC slice geometry.
//!
//! An AFBC surface is a header array followed by a body. Each superblock owns a 16-byte header;
//! in a sparse layout each superblock also owns a fixed-size body slot large enough for its
//! uncompressed payload. Packed (dense) layouts instead place bodies back to back, sized by what
//! the hardware actually produced.

use crate::bittricks::{align_pot, interleave_4};
use crate::layout::modifier::AfbcModifier;
use crate::pixel_formats::PixelFormat;

/// Bytes of header per superblock.
pub const HEADER_BYTES_PER_SUPERBLOCK: u32 = 16;
/// Alignment of the header region, and of the body that follows it, for untiled headers.
pub const HEADER_ALIGN: u64 = 64;
/// Alignment of the header region for tiled headers.
pub const TILED_HEADER_ALIGN: u64 = 4096;
/// Alignment of each sparse body slot.
pub const BODY_SLOT_ALIGN: u32 = 128;
/// Alignment of each body in a packed layout.
pub const PACKED_BODY_ALIGN: u64 = 16;

/// Geometry of one AFBC surface within a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AfbcSliceLayout {
    /// Size of the header region, aligned.
    pub header_size: u64,
    /// Size of the body region.
    pub body_size: u64,
    /// Superblocks per row.
    pub stride_sb: u32,
    /// Superblocks in the surface.
    pub nr_blocks: u32,
    /// Distance between consecutive surfaces (3D slices or samples).
    pub surface_stride: u64,
}

impl AfbcSliceLayout {
    /// Sparse geometry for a surface of `width × height` pixels.
    pub fn sparse(width: u32, height: u32, format: PixelFormat, afbc: AfbcModifier) -> Self {
        let (sb_w, sb_h) = afbc.superblock.size();
        let align_sb = afbc.header_tile_size();
        let stride_sb = width.div_ceil(sb_w).next_multiple_of(align_sb);
        let rows_sb = height.div_ceil(sb_h).next_multiple_of(align_sb);
        let nr_blocks = stride_sb * rows_sb;
        let header_size = align_pot(
            nr_blocks as u64 * HEADER_BYTES_PER_SUPERBLOCK as u64,
            header_align(afbc),
        );
        let body_size = nr_blocks as u64 * body_slot_size(format, afbc) as u64;
        AfbcSliceLayout {
            header_size,
            body_size,
            stride_sb,
            nr_blocks,
            surface_stride: header_size + body_size,
        }
    }

    /// Geometry for an explicit header row stride, as imported from another process.
    pub fn with_row_stride(
        row_stride: u32,
        height: u32,
        format: PixelFormat,
        afbc: AfbcModifier,
    ) -> Self {
        let (_, sb_h) = afbc.superblock.size();
        let align_sb = afbc.header_tile_size();
        let stride_sb = row_stride / (HEADER_BYTES_PER_SUPERBLOCK * align_sb);
        let rows_sb = height.div_ceil(sb_h).next_multiple_of(align_sb);
        let nr_blocks = stride_sb * rows_sb;
        let header_size = align_pot(
            nr_blocks as u64 * HEADER_BYTES_PER_SUPERBLOCK as u64,
            header_align(afbc),
        );
        let body_size = nr_blocks as u64 * body_slot_size(format, afbc) as u64;
        AfbcSliceLayout {
            header_size,
            body_size,
            stride_sb,
            nr_blocks,
            surface_stride: header_size + body_size,
        }
    }

    /// Bytes of header per row of superblocks (or per row of header tiles when tiled).
    pub fn row_stride(&self, afbc: AfbcModifier) -> u32 {
        self.stride_sb * HEADER_BYTES_PER_SUPERBLOCK * afbc.header_tile_size()
    }

    pub fn rows_sb(&self) -> u32 {
        self.nr_blocks / self.stride_sb
    }
}

pub const fn header_align(afbc: AfbcModifier) -> u64 {
    if afbc.tiled_headers {
        TILED_HEADER_ALIGN
    } else {
        HEADER_ALIGN
    }
}

/// Bytes of an uncompressed superblock payload.
pub const fn payload_size(format: PixelFormat, afbc: AfbcModifier) -> u32 {
    afbc.superblock.pixels() * format.bytes_per_block()
}

/// Size of the fixed body slot each superblock owns in a sparse layout.
pub const fn body_slot_size(format: PixelFormat, afbc: AfbcModifier) -> u32 {
    payload_size(format, afbc).next_multiple_of(BODY_SLOT_ALIGN)
}

/// Index of superblock `(sb_x, sb_y)`'s header in the header array.
///
/// Tiled headers group superblocks into 8×8 tiles, walked in interleaved order within a tile.
pub fn header_index(sb_x: u32, sb_y: u32, stride_sb: u32, afbc: AfbcModifier) -> u32 {
    if afbc.tiled_headers {
        let tiles_per_row = stride_sb / 8;
        let tile = (sb_y / 8) * tiles_per_row + sb_x / 8;
        tile * 64 + interleave_4(sb_x & 7, sb_y & 7)
    } else {
        sb_y * stride_sb + sb_x
    }
}

/// One level of a packed layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedLevel {
    /// Offset of the level from the start of the allocation.
    pub offset: u64,
    pub header_size: u64,
    pub body_size: u64,
    /// Offset of each superblock's body relative to the start of the level, in header order.
    pub body_offsets: Vec<u32>,
}

/// Lays out packed levels given the measured payload size of every superblock of every level.
///
/// Superblocks of each level are listed in raster order; the resulting headers are untiled.
/// Returns the levels and the total size, aligned to the end-of-resource alignment.
pub fn pack_levels(levels: &[Vec<u32>]) -> (Vec<PackedLevel>, u64) {
    let mut offset = 0u64;
    let mut packed = Vec::with_capacity(levels.len());
    for sizes in levels {
        offset = align_pot(offset, HEADER_ALIGN);
        let header_size = align_pot(
            sizes.len() as u64 * HEADER_BYTES_PER_SUPERBLOCK as u64,
            HEADER_ALIGN,
        );
        let mut body = header_size;
        let mut body_offsets = Vec::with_capacity(sizes.len());
        for &size in sizes {
            body_offsets.push(body as u32);
            body = align_pot(body + size as u64, PACKED_BODY_ALIGN);
        }
        packed.push(PackedLevel {
            offset,
            header_size,
            body_size: body - header_size,
            body_offsets,
        });
        offset += body;
    }
    (packed, align_pot(offset, super::AFBC_END_ALIGN))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::modifier::Superblock;

    #[test]
    fn sparse_geometry() {
        let afbc = AfbcModifier::new();
        let l = AfbcSliceLayout::sparse(100, 40, PixelFormat::R8G8B8A8Unorm, afbc);
        assert_eq!(l.stride_sb, 7);
        assert_eq!(l.rows_sb(), 3);
        assert_eq!(l.nr_blocks, 21);
        assert_eq!(l.header_size, 384);
        assert_eq!(l.body_size, 21 * 1024);
        assert_eq!(l.row_stride(afbc), 7 * 16);
    }

    #[test]
    fn tiled_geometry() {
        let afbc = AfbcModifier::new().with_tiled_headers(true);
        let l = AfbcSliceLayout::sparse(256, 130, PixelFormat::R8G8B8A8Unorm, afbc);
        assert_eq!(l.stride_sb, 16);
        assert_eq!(l.rows_sb(), 16);
        assert_eq!(l.header_size, 4096);
        assert_eq!(l.row_stride(afbc), 16 * 16 * 8);

        assert_eq!(header_index(0, 0, 16, afbc), 0);
        assert_eq!(header_index(1, 0, 16, afbc), 1);
        assert_eq!(header_index(0, 1, 16, afbc), 2);
        assert_eq!(header_index(8, 0, 16, afbc), 64);
        assert_eq!(header_index(0, 8, 16, afbc), 128);
    }

    #[test]
    fn wide_superblocks_pad_rgb565_slots() {
        let afbc = AfbcModifier {
            superblock: Superblock::Wide32x8,
            ..AfbcModifier::new()
        };
        assert_eq!(payload_size(PixelFormat::R5G6B5Unorm, afbc), 512);
        assert_eq!(body_slot_size(PixelFormat::R8G8B8Unorm, afbc), 768);
        assert_eq!(body_slot_size(PixelFormat::R8Unorm, AfbcModifier::new()), 256);
    }

    #[test]
    fn packing_is_dense() {
        let (levels, total) = pack_levels(&[vec![100, 0, 17], vec![3]]);
        assert_eq!(levels[0].offset, 0);
        assert_eq!(levels[0].header_size, 64);
        assert_eq!(levels[0].body_offsets, vec![64, 176, 176]);
        assert_eq!(levels[0].body_size, 112 + 32);
        assert_eq!(levels[1].offset, 256);
        assert_eq!(levels[1].body_offsets, vec![64]);
        assert_eq!(total, 4096);
    }
}
