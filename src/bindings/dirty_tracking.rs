// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Damage tracking for partial redraws.

A window system tells us which parts of a surface changed since the last present. The renderer
uses that to avoid reloading and redrawing untouched pixels. Damage is always tracked as a
bounding box; on hardware with a per-tile enable map, multi-rectangle damage is also tracked at
32×32 pixel tile granularity so that disjoint rectangles don't drag in everything between them.

A tile map is only worth its bookkeeping when it is sparse. When fewer than
[`TILE_MAP_MIN_SAVINGS`] tiles of the bounding box are left untouched, it is dropped and the
bounding box alone is used.
*/

use bitvec::prelude::{BitVec, Lsb0};

use crate::bindings::coordinates::{DamageRect, Rect};
use crate::bittricks::align_up;
use crate::error::{Error, Result};

/// Side of a damage tile, in pixels.
pub const DAMAGE_TILE_SIZE: u32 = 32;
/// Alignment of a tile map row, in bytes.
pub const TILE_MAP_ROW_ALIGN: u32 = 64;
/// A tile map must save at least this many tiles over the bounding box to be kept.
pub const TILE_MAP_MIN_SAVINGS: u32 = 10;

/// One bit per 32×32 tile, rows padded to 64 bytes as the hardware reads them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileMap {
    bits: BitVec<u8, Lsb0>,
    stride: u32,
    width_tiles: u32,
    height_tiles: u32,
    enabled: u32,
}

impl TileMap {
    /// An empty map covering a `width × height` pixel surface.
    pub fn new(width: u32, height: u32) -> Result<Self> {
        let width_tiles = width.div_ceil(DAMAGE_TILE_SIZE);
        let height_tiles = height.div_ceil(DAMAGE_TILE_SIZE);
        let stride = align_up(width.div_ceil(DAMAGE_TILE_SIZE * 8), TILE_MAP_ROW_ALIGN);
        let len = stride as usize * height_tiles as usize;
        let mut raw = Vec::new();
        raw.try_reserve_exact(len)
            .map_err(|_| Error::OutOfMemory(format!("{len} byte damage tile map")))?;
        raw.resize(len, 0u8);
        Ok(TileMap {
            bits: BitVec::from_vec(raw),
            stride,
            width_tiles,
            height_tiles,
            enabled: 0,
        })
    }

    fn index(&self, tile_x: u32, tile_y: u32) -> usize {
        tile_y as usize * self.stride as usize * 8 + tile_x as usize
    }

    /// Enables a tile. Returns whether it was newly enabled.
    pub fn set(&mut self, tile_x: u32, tile_y: u32) -> bool {
        debug_assert!(tile_x < self.width_tiles && tile_y < self.height_tiles);
        let index = self.index(tile_x, tile_y);
        let was = self.bits.replace(index, true);
        if !was {
            self.enabled += 1;
        }
        !was
    }

    pub fn test(&self, tile_x: u32, tile_y: u32) -> bool {
        if tile_x >= self.width_tiles || tile_y >= self.height_tiles {
            return false;
        }
        self.bits[self.index(tile_x, tile_y)]
    }

    /// Number of enabled tiles.
    pub fn count_set(&self) -> u32 {
        self.enabled
    }

    /// Bytes per row of tiles.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn width_tiles(&self) -> u32 {
        self.width_tiles
    }

    pub fn height_tiles(&self) -> u32 {
        self.height_tiles
    }

    /// The map in the layout the tiler consumes.
    pub fn as_bytes(&self) -> &[u8] {
        self.bits.as_raw_slice()
    }

    /// Enables every tile touched by `rect`. Returns the number of newly enabled tiles.
    fn set_rect(&mut self, rect: Rect) -> u32 {
        let mut added = 0;
        for ty in rect.y / DAMAGE_TILE_SIZE..rect.max_y().div_ceil(DAMAGE_TILE_SIZE) {
            for tx in rect.x / DAMAGE_TILE_SIZE..rect.max_x().div_ceil(DAMAGE_TILE_SIZE) {
                if self.set(tx, ty) {
                    added += 1;
                }
            }
        }
        added
    }
}

/// Number of damage tiles a rectangle touches.
fn tiles_covered(rect: Rect) -> u32 {
    if rect.is_empty() {
        return 0;
    }
    let w = rect.max_x().div_ceil(DAMAGE_TILE_SIZE) - rect.x / DAMAGE_TILE_SIZE;
    let h = rect.max_y().div_ceil(DAMAGE_TILE_SIZE) - rect.y / DAMAGE_TILE_SIZE;
    w * h
}

/// The damaged part of a surface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Damage {
    extent: Rect,
    tile_map: Option<TileMap>,
}

impl Damage {
    /// Everything damaged.
    pub fn full(width: u32, height: u32) -> Self {
        Damage {
            extent: Rect::new(0, 0, width, height),
            tile_map: None,
        }
    }

    /// Bounding box of the damage, top-left origin. Empty when nothing is damaged.
    pub fn extent(&self) -> Rect {
        self.extent
    }

    pub fn tile_map(&self) -> Option<&TileMap> {
        self.tile_map.as_ref()
    }

    /// Replaces the damage with `rects`, given with a bottom-left origin.
    ///
    /// No rectangles means the whole surface is damaged. A tile map is built only for more
    /// than one rectangle and only when `use_tile_map` is set. On allocation failure the
    /// previous damage is kept.
    pub fn set_region(
        &mut self,
        width: u32,
        height: u32,
        rects: &[DamageRect],
        use_tile_map: bool,
    ) -> Result<()> {
        if rects.is_empty() {
            *self = Damage::full(width, height);
            return Ok(());
        }
        let mut tile_map = if use_tile_map && rects.len() > 1 {
            Some(TileMap::new(width, height)?)
        } else {
            None
        };

        let (mut minx, mut miny, mut maxx, mut maxy) = (width, height, 0, 0);
        for rect in rects {
            let Some(clipped) = rect.flip_y(height).clip(width, height) else {
                continue;
            };
            minx = minx.min(clipped.x);
            miny = miny.min(clipped.y);
            maxx = maxx.max(clipped.max_x());
            maxy = maxy.max(clipped.max_y());
            if let Some(map) = tile_map.as_mut() {
                map.set_rect(clipped);
            }
        }
        let extent = if maxx > minx && maxy > miny {
            Rect::new(minx, miny, maxx - minx, maxy - miny)
        } else {
            Rect::default()
        };

        if let Some(map) = &tile_map {
            let savings = tiles_covered(extent) - map.count_set();
            if savings < TILE_MAP_MIN_SAVINGS {
                logwise::trace_sync!(
                    "Damage tile map dropped, saves only {savings} tiles",
                    savings = savings
                );
                tile_map = None;
            }
        }

        self.extent = extent;
        self.tile_map = tile_map;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tile_map_stride_is_padded() {
        let map = TileMap::new(100, 70).unwrap();
        assert_eq!(map.width_tiles(), 4);
        assert_eq!(map.height_tiles(), 3);
        assert_eq!(map.stride(), 64);
        assert_eq!(map.as_bytes().len(), 64 * 3);

        let wide = TileMap::new(32 * 8 * 65, 32).unwrap();
        assert_eq!(wide.stride(), 128);
    }

    #[test]
    fn setting_counts_new_tiles_only() {
        let mut map = TileMap::new(128, 128).unwrap();
        assert!(map.set(1, 2));
        assert!(!map.set(1, 2));
        assert!(map.test(1, 2));
        assert!(!map.test(2, 1));
        assert!(!map.test(100, 100));
        assert_eq!(map.count_set(), 1);
        assert_eq!(map.set_rect(Rect::new(0, 0, 40, 40)), 4);
        assert_eq!(map.set_rect(Rect::new(0, 0, 40, 40)), 0);
        assert_eq!(map.count_set(), 5);
        // tile (1, 2) lives in byte 2 * 64, bit 1
        assert_eq!(map.as_bytes()[2 * 64], 0b10);
    }

    #[test]
    fn no_rects_means_full_surface() {
        let mut d = Damage::full(10, 10);
        d.set_region(640, 480, &[DamageRect::new(0, 0, 8, 8)], true)
            .unwrap();
        assert_eq!(d.extent(), Rect::new(0, 472, 8, 8));
        d.set_region(640, 480, &[], true).unwrap();
        assert_eq!(d.extent(), Rect::new(0, 0, 640, 480));
        assert!(d.tile_map().is_none());
    }

    #[test]
    fn sparse_damage_keeps_tile_map() {
        let mut d = Damage::full(1024, 1024);
        let rects = [
            DamageRect::new(0, 0, 16, 16),
            DamageRect::new(1000, 1000, 16, 16),
        ];
        d.set_region(1024, 1024, &rects, true).unwrap();
        assert_eq!(d.extent(), Rect::new(0, 8, 1016, 1016));
        let map = d.tile_map().unwrap();
        assert_eq!(map.count_set(), 2);
        assert!(map.test(0, 31));
        assert!(map.test(31, 0));
        assert!(!map.test(15, 15));

        // single rectangle: bounding box only
        d.set_region(1024, 1024, &rects[..1], true).unwrap();
        assert!(d.tile_map().is_none());

        // no tile enable map on this hardware
        d.set_region(1024, 1024, &rects, false).unwrap();
        assert!(d.tile_map().is_none());
    }

    #[test]
    fn dense_damage_drops_tile_map() {
        let mut d = Damage::full(256, 256);
        let rects = [
            DamageRect::new(0, 0, 128, 256),
            DamageRect::new(128, 0, 100, 256),
        ];
        d.set_region(256, 256, &rects, true).unwrap();
        assert_eq!(d.extent(), Rect::new(0, 0, 228, 256));
        assert!(d.tile_map().is_none());
    }

    #[test]
    fn rects_outside_surface_are_ignored() {
        let mut d = Damage::full(64, 64);
        d.set_region(
            64,
            64,
            &[DamageRect::new(100, 100, 5, 5), DamageRect::new(-10, 60, 20, 20)],
            true,
        )
        .unwrap();
        // second rectangle flipped: y = 64 - 80 = -16, clipped to the top edge
        assert_eq!(d.extent(), Rect::new(0, 0, 10, 4));
    }

    #[test]
    fn rects_at_the_integer_limits_are_ignored() {
        let mut d = Damage::full(64, 64);
        d.set_region(
            64,
            64,
            &[
                DamageRect::new(0, i32::MAX - 5, 10, 10),
                DamageRect::new(i32::MAX, i32::MIN, i32::MAX, i32::MAX),
            ],
            true,
        )
        .unwrap();
        assert_eq!(d.extent(), Rect::default());
    }

    fn coordinate() -> impl proptest::strategy::Strategy<Value = i32> {
        proptest::prop_oneof![
            4 => -40i32..300,
            1 => i32::MAX - 200..=i32::MAX,
            1 => i32::MIN..i32::MIN + 200,
        ]
    }

    fn extent() -> impl proptest::strategy::Strategy<Value = i32> {
        proptest::prop_oneof![
            4 => 0i32..120,
            1 => i32::MAX - 100..=i32::MAX,
        ]
    }

    proptest::proptest! {
        #[test]
        fn extent_is_the_tight_bounding_box(
            rects in proptest::collection::vec((coordinate(), coordinate(), extent(), extent()), 1..8),
        ) {
            let (width, height) = (256, 192);
            let rects: Vec<DamageRect> = rects
                .into_iter()
                .map(|(x, y, w, h)| DamageRect::new(x, y, w, h))
                .collect();
            let mut d = Damage::full(width, height);
            d.set_region(width, height, &rects, true).unwrap();
            let extent = d.extent();

            let clipped: Vec<Rect> = rects
                .iter()
                .filter_map(|r| r.flip_y(height).clip(width, height))
                .collect();
            if clipped.is_empty() {
                proptest::prop_assert_eq!(extent, Rect::default());
            } else {
                for r in &clipped {
                    proptest::prop_assert!(r.x >= extent.x && r.y >= extent.y);
                    proptest::prop_assert!(r.max_x() <= extent.max_x());
                    proptest::prop_assert!(r.max_y() <= extent.max_y());
                }
                proptest::prop_assert_eq!(clipped.iter().map(|r| r.x).min(), Some(extent.x));
                proptest::prop_assert_eq!(clipped.iter().map(|r| r.y).min(), Some(extent.y));
                proptest::prop_assert_eq!(clipped.iter().map(|r| r.max_x()).max(), Some(extent.max_x()));
                proptest::prop_assert_eq!(clipped.iter().map(|r| r.max_y()).max(), Some(extent.max_y()));
            }
            if let Some(map) = d.tile_map() {
                for r in &clipped {
                    proptest::prop_assert!(map.test(r.x / DAMAGE_TILE_SIZE, r.y / DAMAGE_TILE_SIZE));
                }
            }
        }
    }
}
