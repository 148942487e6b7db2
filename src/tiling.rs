// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
The u-interleaved tiling codec.

Tiled images are stored as rows of square tiles. A tile is 16×16 elements, or 4×4 elements for
block-compressed formats where an element is a whole compressed block. Tiles in a row are laid
out one after another; a row of tiles occupies `stride` bytes.

Within a tile, the element at local `(x, y)` sits at the index obtained by interleaving the bits
of x and y, least significant first, starting with x:

```text
index = x0 | y0 << 1 | x1 << 2 | y1 << 3 | x2 << 4 | y2 << 5 | x3 << 6 | y3 << 7
```

so the low six bits walk an 8×8 sub-block and the top two pick one of the four sub-blocks.

Elements are copied as opaque groups of `bytes_per_block` bytes, which is why the same routine
serves both ordinary pixel formats and compressed formats.

The linear side of a copy only holds the region: its first row corresponds to `region.y` and its
first element to `region.x`. The tiled side is addressed in absolute image coordinates.

Regions must be aligned to the format's block size; the edges of the image are the only place a
region may end mid-block. Neither direction can fail. Out-of-range strides panic on the slice
bounds check rather than writing out of bounds.
*/

use crate::bindings::coordinates::Rect;
use crate::bittricks::spread_4;
use crate::pixel_formats::PixelFormat;

/// Tile side, in elements, for uncompressed formats.
pub const TILE_SIZE: u32 = 16;
/// Tile side, in compressed blocks, for block-compressed formats.
pub const COMPRESSED_TILE_SIZE: u32 = 4;

/// Tile side in elements for `format`.
#[inline]
pub const fn tile_size(format: PixelFormat) -> u32 {
    if format.is_compressed() {
        COMPRESSED_TILE_SIZE
    } else {
        TILE_SIZE
    }
}

/// Tile side in pixels for `format`.
#[inline]
pub const fn tile_size_px(format: PixelFormat) -> (u32, u32) {
    let (bw, bh) = format.block_size();
    let ts = tile_size(format);
    (ts * bw, ts * bh)
}

/// Byte offset of the element containing pixel `(x, y)` in a tiled image with the given row-of-tiles stride.
pub fn tiled_offset(x: u32, y: u32, stride: u32, format: PixelFormat) -> usize {
    let (bw, bh) = format.block_size();
    let bpe = format.bytes_per_block() as usize;
    let ts = tile_size(format);
    let (bx, by) = (x / bw, y / bh);
    let mask = ts - 1;
    let index = spread_4(bx & mask) | (spread_4(by & mask) << 1);
    (by / ts) as usize * stride as usize
        + (bx / ts) as usize * (ts * ts) as usize * bpe
        + index as usize * bpe
}

/// Region expressed in elements rather than pixels.
#[derive(Debug, Clone, Copy)]
struct BlockRegion {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    tile_size: u32,
}

impl BlockRegion {
    fn new(region: Rect, format: PixelFormat) -> Self {
        let (bw, bh) = format.block_size();
        let x = region.x / bw;
        let y = region.y / bh;
        BlockRegion {
            x,
            y,
            width: region.max_x().div_ceil(bw) - x,
            height: region.max_y().div_ceil(bh) - y,
            tile_size: tile_size(format),
        }
    }

    /// Calls `f(tiled_offset, linear_offset)` for every element of the region, row by row.
    #[inline(always)]
    fn for_each<const BPE: usize>(
        &self,
        tiled_stride: usize,
        linear_stride: usize,
        mut f: impl FnMut(usize, usize),
    ) {
        let ts = self.tile_size;
        let mask = ts - 1;
        let tile_bytes = (ts * ts) as usize * BPE;
        for row in 0..self.height {
            let y = self.y + row;
            let tile_row = (y / ts) as usize * tiled_stride;
            let y_bits = spread_4(y & mask) << 1;
            let linear_row = row as usize * linear_stride;
            for col in 0..self.width {
                let x = self.x + col;
                let index = (spread_4(x & mask) | y_bits) as usize;
                let tiled = tile_row + (x / ts) as usize * tile_bytes + index * BPE;
                f(tiled, linear_row + col as usize * BPE);
            }
        }
    }
}

fn load_bpe<const BPE: usize>(
    dst: &mut [u8],
    src: &[u8],
    region: BlockRegion,
    dst_stride: usize,
    src_stride: usize,
) {
    region.for_each::<BPE>(src_stride, dst_stride, |tiled, linear| {
        dst[linear..linear + BPE].copy_from_slice(&src[tiled..tiled + BPE]);
    });
}

fn store_bpe<const BPE: usize>(
    dst: &mut [u8],
    src: &[u8],
    region: BlockRegion,
    dst_stride: usize,
    src_stride: usize,
) {
    region.for_each::<BPE>(dst_stride, src_stride, |tiled, linear| {
        dst[tiled..tiled + BPE].copy_from_slice(&src[linear..linear + BPE]);
    });
}

macro_rules! dispatch_bpe {
    ($f:ident, $bpe:expr, $($args:expr),*) => {
        match $bpe {
            1 => $f::<1>($($args),*),
            2 => $f::<2>($($args),*),
            3 => $f::<3>($($args),*),
            4 => $f::<4>($($args),*),
            6 => $f::<6>($($args),*),
            8 => $f::<8>($($args),*),
            12 => $f::<12>($($args),*),
            16 => $f::<16>($($args),*),
            other => unreachable!("no format has {other} bytes per block"),
        }
    };
}

/// Detiles `region` of the tiled image `src` into the linear buffer `dst`.
///
/// `dst_stride` is the linear row stride, `src_stride` the tiled row-of-tiles stride, both in bytes.
pub fn load_tiled_image(
    dst: &mut [u8],
    src: &[u8],
    region: Rect,
    dst_stride: u32,
    src_stride: u32,
    format: PixelFormat,
) {
    if region.is_empty() {
        return;
    }
    let blocks = BlockRegion::new(region, format);
    dispatch_bpe!(
        load_bpe,
        format.bytes_per_block(),
        dst,
        src,
        blocks,
        dst_stride as usize,
        src_stride as usize
    )
}

/// Tiles the linear buffer `src` into `region` of the tiled image `dst`.
///
/// `dst_stride` is the tiled row-of-tiles stride, `src_stride` the linear row stride, both in bytes.
pub fn store_tiled_image(
    dst: &mut [u8],
    src: &[u8],
    region: Rect,
    dst_stride: u32,
    src_stride: u32,
    format: PixelFormat,
) {
    if region.is_empty() {
        return;
    }
    let blocks = BlockRegion::new(region, format);
    dispatch_bpe!(
        store_bpe,
        format.bytes_per_block(),
        dst,
        src,
        blocks,
        dst_stride as usize,
        src_stride as usize
    )
}
