// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Coordinate types for addressing surfaces.

Unless stated otherwise, coordinates use the top-left origin convention:

```text
           x
      0 ────────▶
      │ ┌───────┐
    y │ │       │
      │ │       │
      │ │       │
      ▼ └───────┘
 ```

[`DamageRect`] is the exception: damage declarations arrive from window systems with the origin
at the bottom-left and are flipped with [`DamageRect::flip_y`].
*/

/// A 2D pixel rectangle, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Rect {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub const fn max_x(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge.
    pub const fn max_y(&self) -> u32 {
        self.y + self.height
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// A 3D pixel box. For array and cube targets `z` selects the layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Box3D {
    pub x: u32,
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl Box3D {
    pub const fn new(x: u32, y: u32, z: u32, width: u32, height: u32, depth: u32) -> Self {
        Box3D {
            x,
            y,
            z,
            width,
            height,
            depth,
        }
    }

    /// A single-layer box covering `rect`.
    pub const fn from_rect(rect: Rect) -> Self {
        Box3D::new(rect.x, rect.y, 0, rect.width, rect.height, 1)
    }

    pub const fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    /// Whether this box covers `[0, width) × [0, height) × [0, depth)` entirely.
    pub const fn covers(&self, width: u32, height: u32, depth: u32) -> bool {
        self.x == 0
            && self.y == 0
            && self.z == 0
            && self.width == width
            && self.height == height
            && self.depth == depth
    }
}

/// A damage rectangle as declared by a window system: origin at the bottom-left.
///
/// Signed because callers may pass rectangles partially outside the surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DamageRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl DamageRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        DamageRect {
            x,
            y,
            width,
            height,
        }
    }

    /// Converts to a top-left origin rectangle on a surface `surface_height` pixels tall.
    ///
    /// The result is not clipped. Rectangles far outside the surface saturate at the `i32`
    /// range, which keeps them outside.
    pub fn flip_y(&self, surface_height: u32) -> DamageRect {
        let top = surface_height as i64 - (self.y as i64 + self.height as i64);
        DamageRect {
            x: self.x,
            y: top.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
            width: self.width,
            height: self.height,
        }
    }

    /// Clips to `[0, width) × [0, height)`. Returns `None` when nothing remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Rect> {
        let minx = self.x.clamp(0, width as i32);
        let miny = self.y.clamp(0, height as i32);
        let maxx = self.x.saturating_add(self.width).clamp(0, width as i32);
        let maxy = self.y.saturating_add(self.height).clamp(0, height as i32);
        if maxx <= minx || maxy <= miny {
            None
        } else {
            Some(Rect::new(
                minx as u32,
                miny as u32,
                (maxx - minx) as u32,
                (maxy - miny) as u32,
            ))
        }
    }
}
