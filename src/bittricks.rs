// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
bit packing and alignment arithmetic.

Shared by the tiling codec (bit interleaving) and the layout planner (alignment, mip minification).
*/

/// Spreads the low 4 bits of the index into the even bit positions.
///
/// `SPACE_4[0b1011] == 0b01_00_01_01`.
const SPACE_4: [u32; 16] = [
    0x00, 0x01, 0x04, 0x05, 0x10, 0x11, 0x14, 0x15, 0x40, 0x41, 0x44, 0x45, 0x50, 0x51, 0x54, 0x55,
];

/// Spreads the low 4 bits of `v` so that bit `n` lands on bit `2n`.
#[inline]
pub const fn spread_4(v: u32) -> u32 {
    SPACE_4[(v & 0xF) as usize]
}

/// Interleaves the low 4 bits of `x` and `y`, x taking the even positions.
#[inline]
pub const fn interleave_4(x: u32, y: u32) -> u32 {
    spread_4(x) | (spread_4(y) << 1)
}

/// Rounds `v` up to a multiple of `align`, which must be a power of two.
#[inline]
pub const fn align_pot(v: u64, align: u64) -> u64 {
    debug_assert!(align.is_power_of_two());
    (v + align - 1) & !(align - 1)
}

/// Rounds `v` up to a multiple of `align` (any non-zero value).
#[inline]
pub const fn align_up(v: u32, align: u32) -> u32 {
    v.div_ceil(align) * align
}

/// Size of mip `level` along an axis of base size `base`.
#[inline]
pub const fn minify(base: u32, level: u32) -> u32 {
    let v = base >> level;
    if v == 0 { 1 } else { v }
}
