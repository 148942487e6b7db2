// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Image layout planning.

A layout maps every (level, layer, sample, z) surface of an image to a byte range of one
allocation. Levels of a single layer are laid out back to back; layers repeat that run at
`array_stride`. Within a level, the 3D slices and samples of a surface repeat at the level's
`surface_stride`.

```text
 layer 0                                    layer 1
┌─────────┬──────┬────┬──┐ ┌─ ─ ─ ─ ─ ─ ─┌─────────┬──────┬ ─ ─
│ level 0 │  1   │ 2  │..│ │   padding    │ level 0 │  1
└─────────┴──────┴────┴──┘ └─ ─ ─ ─ ─ ─ ─└─────────┴──────┴ ─ ─
◀──────────────── array_stride ─────────▶
```

Which [`Modifier`] to use is decided by [`choose_modifier`]; the geometry by [`compute_layout`].
*/

mod afbc;
mod choose;
mod modifier;

pub use afbc::{
    AfbcSliceLayout, HEADER_BYTES_PER_SUPERBLOCK, PackedLevel, body_slot_size, header_index,
    pack_levels, payload_size,
};
pub use choose::{choose_modifier, choose_modifier_from, should_afbc, should_tile};
pub use modifier::{
    AfbcModifier, DRM_FORMAT_MOD_ARM_16X16_BLOCK_U_INTERLEAVED, DRM_FORMAT_MOD_LINEAR, Modifier,
    Superblock, afbc_flags,
};

use crate::bindings::visible_to::Target;
use crate::bittricks::{align_pot, minify};
use crate::device::DeviceCaps;
use crate::error::{Error, Result};
use crate::pixel_formats::PixelFormat;
use crate::tiling;

/// Alignment of every slice start.
pub const SLICE_ALIGN: u64 = 64;
/// Alignment of the end of an AFBC resource, keeping header regions of adjacent resources apart.
pub const AFBC_END_ALIGN: u64 = 4096;
/// Side of a transaction-elimination checksum tile, in pixels.
pub const CHECKSUM_TILE_SIZE: u32 = 16;
/// Bytes of checksum per tile.
pub const CHECKSUM_BYTES_PER_TILE: u32 = 8;

/// Placement of the checksum (CRC) buffer of a level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumLayout {
    /// Offset from the start of the allocation.
    pub offset: u64,
    /// Bytes per row of checksum tiles.
    pub stride: u32,
    pub size: u64,
}

/// Placement of one mip level (of layer 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceLayout {
    /// Offset from the start of the allocation.
    pub offset: u64,
    /// Bytes per row of pixels (linear), per row of tiles (u-interleaved), or per row of
    /// superblock headers (AFBC).
    pub row_stride: u32,
    /// Distance between consecutive surfaces of the level (3D slices or samples).
    pub surface_stride: u64,
    /// Bytes covered by the level, every surface included.
    pub size: u64,
    pub afbc: Option<AfbcSliceLayout>,
    pub checksum: Option<ChecksumLayout>,
}

/// A row stride and offset supplied by an external producer of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExplicitLayout {
    pub offset: u64,
    pub row_stride: u32,
}

/// Input of [`compute_layout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRequest {
    pub modifier: Modifier,
    pub format: PixelFormat,
    pub target: Target,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub nr_samples: u32,
    pub mip_levels: u32,
    /// Reserve transaction-elimination checksums for level 0.
    pub checksum: bool,
}

/// Physical arrangement of one logical image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageLayout {
    pub modifier: Modifier,
    pub format: PixelFormat,
    pub target: Target,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub array_size: u32,
    pub nr_samples: u32,
    pub slices: Vec<SliceLayout>,
    pub array_stride: u64,
    pub total_size: u64,
}

impl ImageLayout {
    pub fn level_count(&self) -> u32 {
        self.slices.len() as u32
    }

    pub fn slice(&self, level: u32) -> &SliceLayout {
        &self.slices[level as usize]
    }

    /// Pixel extent `(width, height, depth)` of `level`.
    pub fn level_extent(&self, level: u32) -> (u32, u32, u32) {
        let depth = if self.target.is_3d() {
            minify(self.depth, level)
        } else {
            1
        };
        (
            minify(self.width, level),
            minify(self.height, level),
            depth,
        )
    }

    /// Layers addressed at `level`: array layers, or depth slices of a 3D image.
    pub fn layer_count(&self, level: u32) -> u32 {
        if self.target.is_3d() {
            minify(self.depth, level)
        } else {
            self.array_size
        }
    }

    /// Byte offset of surface `layer` of `level`.
    ///
    /// For 3D images `layer` is a z slice.
    pub fn surface_offset(&self, level: u32, layer: u32) -> u64 {
        let slice = self.slice(level);
        if self.target.is_3d() {
            slice.offset + layer as u64 * slice.surface_stride
        } else {
            slice.offset + layer as u64 * self.array_stride
        }
    }

    /// Distance between consecutive layers at `level`.
    pub fn layer_stride(&self, level: u32) -> u64 {
        if self.target.is_3d() {
            self.slice(level).surface_stride
        } else {
            self.array_stride
        }
    }

    /// Whether `(width, height, depth)` at `level` describes the whole level.
    pub fn covers_level(&self, level: u32, width: u32, height: u32, layers: u32) -> bool {
        let (w, h, _) = self.level_extent(level);
        width == w && height == h && layers == self.layer_count(level)
    }
}

/// Minimum number of bytes per row of pixels for `width` pixels.
fn linear_row_bytes(width: u32, format: PixelFormat) -> u32 {
    let (bw, _) = format.block_size();
    width.div_ceil(bw) * format.bytes_per_block()
}

/// Bytes per row of tiles for `width` pixels.
fn tiled_row_bytes(width: u32, format: PixelFormat) -> u32 {
    let (bw, _) = format.block_size();
    let ts = tiling::tile_size(format);
    width.div_ceil(bw).next_multiple_of(ts) * ts * format.bytes_per_block()
}

/// Smallest row stride the modifier accepts for `width` pixels of `format`, and the granule a
/// stride must be a multiple of.
fn stride_requirements(modifier: Modifier, width: u32, format: PixelFormat) -> (u32, u32) {
    match modifier {
        Modifier::Linear => (linear_row_bytes(width, format), 1),
        Modifier::TiledInterleaved => {
            let ts = tiling::tile_size(format);
            (
                tiled_row_bytes(width, format),
                ts * ts * format.bytes_per_block(),
            )
        }
        Modifier::Afbc(afbc) => {
            let (sb_w, _) = afbc.superblock.size();
            let ht = afbc.header_tile_size();
            let stride_sb = width.div_ceil(sb_w).next_multiple_of(ht);
            (
                stride_sb * HEADER_BYTES_PER_SUPERBLOCK * ht,
                HEADER_BYTES_PER_SUPERBLOCK * ht * ht,
            )
        }
    }
}

fn checksum_wanted(caps: &DeviceCaps, request: &LayoutRequest) -> bool {
    if !request.checksum {
        return false;
    }
    let simple = request.mip_levels == 1
        && request.array_size == 1
        && request.depth == 1
        && request.nr_samples == 1
        && request.target.is_2d_family();
    if !simple {
        logwise::trace_sync!("Checksums only cover single-surface 2D images");
        return false;
    }
    let bpp = request.format.bytes_per_block();
    if request.format.is_compressed() || !caps.supports_checksum_with_bpp(bpp) {
        logwise::warn_sync!(
            "Checksum rejected for {bpp} bytes per pixel",
            bpp = bpp
        );
        return false;
    }
    true
}

/// Computes the byte layout of an image under `request.modifier`.
///
/// With `explicit`, the level 0 offset and row stride come from an external producer. Explicit
/// layouts describe a single surface: one level, one layer, one sample.
pub fn compute_layout(
    caps: &DeviceCaps,
    request: &LayoutRequest,
    explicit: Option<ExplicitLayout>,
) -> Result<ImageLayout> {
    let format = request.format;
    let modifier = request.modifier;
    if let Some(afbc) = modifier.afbc() {
        if !caps.has_afbc || format.is_compressed() {
            return Err(Error::InvalidTemplate(format!(
                "{modifier} is not available for {format:?}"
            )));
        }
        if afbc.tiled_headers && !caps.supports_tiled_compression_headers() {
            return Err(Error::InvalidTemplate(String::from(
                "tiled AFBC headers are not supported on this device",
            )));
        }
    }
    if modifier.is_tiled() && !format.is_tileable() {
        return Err(Error::InvalidTemplate(format!(
            "{format:?} cannot be u-interleaved"
        )));
    }

    if let Some(explicit) = explicit {
        if request.mip_levels != 1
            || request.array_size != 1
            || request.depth != 1
            || request.nr_samples != 1
        {
            return Err(Error::InvalidExternalLayout(String::from(
                "explicit layouts describe a single surface",
            )));
        }
        let (min, granule) = stride_requirements(modifier, request.width, format);
        if explicit.row_stride < min {
            return Err(Error::InvalidExternalLayout(format!(
                "row stride {} below the minimum {min} for {} pixels of {format:?}",
                explicit.row_stride, request.width
            )));
        }
        if explicit.row_stride % granule != 0 {
            return Err(Error::InvalidExternalLayout(format!(
                "row stride {} is not a multiple of {granule}",
                explicit.row_stride
            )));
        }
        if modifier.is_afbc() && explicit.offset % SLICE_ALIGN != 0 {
            return Err(Error::InvalidExternalLayout(format!(
                "AFBC offset {} is not {SLICE_ALIGN}-byte aligned",
                explicit.offset
            )));
        }
    }

    let checksum = checksum_wanted(caps, request);
    let (_, bh) = format.block_size();
    let mut offset = explicit.map_or(0, |e| e.offset);
    let mut slices = Vec::with_capacity(request.mip_levels as usize);
    for level in 0..request.mip_levels {
        let width = minify(request.width, level);
        let height = minify(request.height, level);
        let depth = if request.target.is_3d() {
            minify(request.depth, level)
        } else {
            1
        };
        if explicit.is_none() {
            offset = align_pot(offset, SLICE_ALIGN);
        }

        let (row_stride, surface_stride, afbc) = match modifier {
            Modifier::Linear => {
                let row_stride = explicit.map_or(linear_row_bytes(width, format), |e| e.row_stride);
                let rows = height.div_ceil(bh);
                (row_stride, row_stride as u64 * rows as u64, None)
            }
            Modifier::TiledInterleaved => {
                let row_stride = explicit.map_or(tiled_row_bytes(width, format), |e| e.row_stride);
                let ts = tiling::tile_size(format);
                let tile_rows = height.div_ceil(bh).div_ceil(ts);
                (row_stride, row_stride as u64 * tile_rows as u64, None)
            }
            Modifier::Afbc(afbc_mod) => {
                let geometry = match explicit {
                    Some(e) => {
                        AfbcSliceLayout::with_row_stride(e.row_stride, height, format, afbc_mod)
                    }
                    None => AfbcSliceLayout::sparse(width, height, format, afbc_mod),
                };
                (
                    geometry.row_stride(afbc_mod),
                    geometry.surface_stride,
                    Some(geometry),
                )
            }
        };

        let surfaces = depth as u64 * request.nr_samples as u64;
        let mut size = surface_stride * surfaces;
        let checksum_layout = if checksum && level == 0 {
            let tiles_x = width.div_ceil(CHECKSUM_TILE_SIZE);
            let tiles_y = height.div_ceil(CHECKSUM_TILE_SIZE);
            let stride = tiles_x * CHECKSUM_BYTES_PER_TILE;
            let crc_offset = align_pot(offset + size, SLICE_ALIGN);
            let crc_size = stride as u64 * tiles_y as u64;
            size = crc_offset + crc_size - offset;
            Some(ChecksumLayout {
                offset: crc_offset,
                stride,
                size: crc_size,
            })
        } else {
            None
        };

        slices.push(SliceLayout {
            offset,
            row_stride,
            surface_stride,
            size,
            afbc,
            checksum: checksum_layout,
        });
        offset += size;
    }

    let array_stride = align_pot(offset, SLICE_ALIGN);
    let array_size = if request.target.is_3d() {
        1
    } else {
        request.array_size
    };
    let mut total_size = if array_size > 1 {
        array_stride * array_size as u64
    } else {
        offset
    };
    if modifier.is_afbc() {
        total_size = align_pot(total_size, AFBC_END_ALIGN);
    }

    Ok(ImageLayout {
        modifier,
        format,
        target: request.target,
        width: request.width,
        height: request.height,
        depth: request.depth,
        array_size: request.array_size,
        nr_samples: request.nr_samples,
        slices,
        array_stride,
        total_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::Architecture;

    fn request(modifier: Modifier, format: PixelFormat, width: u32, height: u32) -> LayoutRequest {
        LayoutRequest {
            modifier,
            format,
            target: Target::Texture2D,
            width,
            height,
            depth: 1,
            array_size: 1,
            nr_samples: 1,
            mip_levels: 1,
            checksum: false,
        }
    }

    fn caps() -> DeviceCaps {
        DeviceCaps::for_arch(Architecture::V7)
    }

    #[test]
    fn linear_is_tight() {
        let l = compute_layout(
            &caps(),
            &request(Modifier::Linear, PixelFormat::R8G8B8Unorm, 23, 17),
            None,
        )
        .unwrap();
        assert_eq!(l.slices[0].row_stride, 69);
        assert_eq!(l.total_size, 69 * 17);
    }

    #[test]
    fn tiled_rounds_to_whole_tiles() {
        let l = compute_layout(
            &caps(),
            &request(Modifier::TiledInterleaved, PixelFormat::R8Uint, 23, 17),
            None,
        )
        .unwrap();
        assert_eq!(l.slices[0].row_stride, 32 * 16);
        assert_eq!(l.total_size, 32 * 32);
    }

    #[test]
    fn compressed_formats_tile_in_blocks() {
        let l = compute_layout(
            &caps(),
            &request(Modifier::TiledInterleaved, PixelFormat::Bc1Rgba, 40, 40),
            None,
        )
        .unwrap();
        // 10 blocks → 12 (3 tiles of 4), 16 rows of blocks per tile row, 8 bytes per block
        assert_eq!(l.slices[0].row_stride, 12 * 4 * 8);
        assert_eq!(l.total_size, 12 * 4 * 8 * 3);
    }

    #[test]
    fn mip_chain_offsets_are_aligned_and_ordered() {
        let mut r = request(Modifier::TiledInterleaved, PixelFormat::R8G8B8A8Unorm, 100, 60);
        r.mip_levels = 7;
        r.array_size = 3;
        r.target = Target::Texture2DArray;
        let l = compute_layout(&caps(), &r, None).unwrap();
        assert_eq!(l.level_count(), 7);
        let mut end = 0;
        for s in &l.slices {
            assert_eq!(s.offset % SLICE_ALIGN, 0);
            assert!(s.offset >= end);
            end = s.offset + s.size;
        }
        assert!(l.array_stride >= end);
        assert_eq!(l.total_size, l.array_stride * 3);
        assert_eq!(l.surface_offset(2, 1), l.array_stride + l.slices[2].offset);
        assert_eq!(l.level_extent(6), (1, 1, 1));
    }

    #[test]
    fn three_d_levels_minify_depth() {
        let mut r = request(Modifier::Linear, PixelFormat::R8Unorm, 8, 8);
        r.target = Target::Texture3D;
        r.depth = 4;
        r.mip_levels = 3;
        let l = compute_layout(&caps(), &r, None).unwrap();
        assert_eq!(l.layer_count(0), 4);
        assert_eq!(l.layer_count(1), 2);
        assert_eq!(l.slices[0].size, 8 * 8 * 4);
        assert_eq!(l.surface_offset(0, 3), 8 * 8 * 3);
        assert_eq!(l.layer_stride(1), 16);
    }

    #[test]
    fn afbc_end_alignment() {
        let afbc = Modifier::Afbc(AfbcModifier::new());
        let l = compute_layout(
            &caps(),
            &request(afbc, PixelFormat::R8G8B8A8Unorm, 100, 40),
            None,
        )
        .unwrap();
        let slice = l.slices[0];
        let geometry = slice.afbc.unwrap();
        assert_eq!(geometry.header_size, 384);
        assert_eq!(l.total_size % AFBC_END_ALIGN, 0);
        assert!(l.total_size >= 100 * 40 * 4);
    }

    #[test]
    fn afbc_needs_hardware() {
        let afbc = Modifier::Afbc(AfbcModifier::new());
        let v4 = DeviceCaps::for_arch(Architecture::V4);
        assert!(compute_layout(&v4, &request(afbc, PixelFormat::R8G8B8A8Unorm, 64, 64), None).is_err());
        let tiled = Modifier::Afbc(AfbcModifier::new().with_tiled_headers(true));
        let v6 = DeviceCaps::for_arch(Architecture::V6);
        assert!(compute_layout(&v6, &request(tiled, PixelFormat::R8G8B8A8Unorm, 256, 256), None).is_err());
    }

    #[test]
    fn explicit_stride_validation() {
        let r = request(Modifier::Linear, PixelFormat::R8G8B8A8Unorm, 100, 10);
        let ok = compute_layout(
            &caps(),
            &r,
            Some(ExplicitLayout {
                offset: 128,
                row_stride: 512,
            }),
        )
        .unwrap();
        assert_eq!(ok.slices[0].offset, 128);
        assert_eq!(ok.slices[0].row_stride, 512);
        assert_eq!(ok.total_size, 128 + 512 * 10);

        let too_small = compute_layout(
            &caps(),
            &r,
            Some(ExplicitLayout {
                offset: 0,
                row_stride: 399,
            }),
        );
        assert!(matches!(too_small, Err(Error::InvalidExternalLayout(_))));

        let tiled = request(Modifier::TiledInterleaved, PixelFormat::R8G8B8A8Unorm, 100, 10);
        let misaligned = compute_layout(
            &caps(),
            &tiled,
            Some(ExplicitLayout {
                offset: 0,
                row_stride: 112 * 16 * 4 + 4,
            }),
        );
        assert!(matches!(misaligned, Err(Error::InvalidExternalLayout(_))));

        let mut mipped = r;
        mipped.mip_levels = 2;
        let refused = compute_layout(
            &caps(),
            &mipped,
            Some(ExplicitLayout {
                offset: 0,
                row_stride: 512,
            }),
        );
        assert!(matches!(refused, Err(Error::InvalidExternalLayout(_))));
    }

    #[test]
    fn checksum_soft_degrades() {
        let mut r = request(Modifier::TiledInterleaved, PixelFormat::R8G8B8A8Unorm, 64, 48);
        r.checksum = true;
        let l = compute_layout(&caps(), &r, None).unwrap();
        let crc = l.slices[0].checksum.unwrap();
        assert_eq!(crc.stride, 4 * 8);
        assert_eq!(crc.size, 4 * 8 * 3);
        assert!(crc.offset + crc.size <= l.total_size);

        let mut wide = request(Modifier::TiledInterleaved, PixelFormat::R16G16B16A16Float, 64, 48);
        wide.checksum = true;
        let l = compute_layout(&caps(), &wide, None).unwrap();
        assert_eq!(l.slices[0].checksum, None);

        let v5 = DeviceCaps::for_arch(Architecture::V5);
        let v6 = DeviceCaps::for_arch(Architecture::V6);
        // 48-bit pixels cannot be u-interleaved but can be checksummed when linear
        let mut rgb16 = request(Modifier::Linear, PixelFormat::R16G16B16Unorm, 64, 48);
        rgb16.checksum = true;
        assert_eq!(compute_layout(&v5, &rgb16, None).unwrap().slices[0].checksum, None);
        assert!(compute_layout(&v6, &rgb16, None).unwrap().slices[0].checksum.is_some());
        assert_eq!(compute_layout(&caps(), &rgb16, None).unwrap().slices[0].checksum, None);
    }

    #[test]
    fn compressed_layouts_carry_checksums() {
        let afbc = Modifier::Afbc(AfbcModifier::new().with_tiled_headers(true));
        let mut r = request(afbc, PixelFormat::R8G8B8A8Unorm, 256, 256);
        r.checksum = true;
        let l = compute_layout(&caps(), &r, None).unwrap();
        let slice = l.slices[0];
        let crc = slice.checksum.unwrap();
        assert_eq!(crc.stride, 16 * 8);
        assert_eq!(crc.size, 16 * 8 * 16);
        assert!(crc.offset >= slice.offset + slice.surface_stride);
        assert!(crc.offset + crc.size <= l.total_size);
        assert_eq!(l.total_size % AFBC_END_ALIGN, 0);

        let mut wide = request(afbc, PixelFormat::R32G32B32A32Float, 256, 256);
        wide.checksum = true;
        assert_eq!(compute_layout(&caps(), &wide, None).unwrap().slices[0].checksum, None);
    }

    proptest::proptest! {
        #[test]
        fn layouts_hold_every_pixel(
            format_index in 0usize..256,
            width in 1u32..300,
            height in 1u32..300,
            mip_levels in 1u32..4,
            afbc_variant in 0u8..3,
        ) {
            let format = PixelFormat::ALL[format_index % PixelFormat::ALL.len()];
            let (bw, bh) = format.block_size();
            let min_bytes = width.div_ceil(bw) as u64
                * height.div_ceil(bh) as u64
                * format.bytes_per_block() as u64;
            let afbc = match afbc_variant {
                0 => AfbcModifier::new(),
                1 => AfbcModifier::new().with_tiled_headers(true),
                _ => AfbcModifier {
                    superblock: Superblock::Wide32x8,
                    ..AfbcModifier::new()
                },
            };

            let mut modifiers = vec![Modifier::Linear];
            if format.is_tileable() {
                modifiers.push(Modifier::TiledInterleaved);
            }
            if !format.is_compressed() {
                modifiers.push(Modifier::Afbc(afbc));
            }
            for modifier in modifiers {
                let mut r = request(modifier, format, width, height);
                r.mip_levels = mip_levels;
                let l = compute_layout(&caps(), &r, None).unwrap();
                proptest::prop_assert!(l.total_size >= min_bytes, "{modifier} {format:?}");
                for slice in &l.slices {
                    proptest::prop_assert!(slice.offset + slice.size <= l.total_size);
                    proptest::prop_assert_eq!(slice.offset % SLICE_ALIGN, 0);
                }
            }

            if format.is_tileable() {
                let linear = compute_layout(&caps(), &request(Modifier::Linear, format, width, height), None).unwrap();
                let tiled = compute_layout(
                    &caps(),
                    &request(Modifier::TiledInterleaved, format, width, height),
                    None,
                )
                .unwrap();
                proptest::prop_assert!(linear.slices[0].row_stride <= tiled.slices[0].row_stride);
                proptest::prop_assert!(linear.total_size <= tiled.total_size);
            }
        }
    }
}
