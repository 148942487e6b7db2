// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! pan_resource is the resource layer of a driver for Mali GPUs: how images and buffers are laid
out in GPU memory, and how that layout changes as they are used.

A GPU image can live in memory in one of three arrangements, each identified by a *modifier*:

| Modifier      | Arrangement                                  | CPU readable | GPU bandwidth |
|---------------|----------------------------------------------|--------------|---------------|
| Linear        | row after row                                | directly     | worst         |
| U-interleaved | 16×16 tiles, Morton order inside each tile   | via codec    | good          |
| AFBC          | compressed superblocks with per-block headers | via GPU blit | best          |

The crate picks one when a resource is created, tracks which mip levels hold data and which
parts of the surface were damaged, moves resources between arrangements when their use changes,
and mediates CPU access to all three.

# Layers

- [`tiling`]: the u-interleaved codec, pure functions over byte slices
- [`layout`]: modifier selection and the byte layout of every level, layer and sample
- [`resource`]: resources, their validity and damage, import and export
- [`transition`]: moving a resource to another modifier without losing data
- [`access`]: mapping resources for the CPU

The kernel driver and the command stream are out of scope. They are reached through the traits
in [`imp`], and [`imp::soft`] (behind the `testing` feature) implements them in memory.

# Example

```
# #[cfg(feature = "testing")]
# fn main() -> Result<(), pan_resource::error::Error> {
use pan_resource::bindings::coordinates::Box3D;
use pan_resource::bindings::texture_builder::ResourceTemplate;
use pan_resource::bindings::visible_to::MapFlags;
use pan_resource::imp::soft::SoftBackend;
use pan_resource::pixel_formats::PixelFormat;

let backend = SoftBackend::for_testing();
let template = ResourceTemplate::texture_2d(PixelFormat::R8G8B8A8Unorm, 64, 64);
let mut texture = backend.device().create_resource(&template)?;

let ctx = &backend.context;
let mut upload = ctx.begin_access(&mut texture, 0, MapFlags::WRITE, Box3D::new(0, 0, 0, 64, 64, 1))?;
upload.map()?.fill(0xff);
ctx.end_access(&mut texture, upload)?;
assert!(texture.is_valid(0));
# Ok(())
# }
# #[cfg(not(feature = "testing"))]
# fn main() {}
```
*/

logwise::declare_logging_domain!();

pub mod access;
pub mod bindings;
mod bittricks;
pub mod device;
pub mod error;
pub mod imp;
pub mod layout;
pub mod pixel_formats;
pub mod resource;
pub mod tiling;
pub mod transition;

pub use access::{Transfer, TransferMap};
pub use device::{Architecture, Context, Device, DeviceCaps, DeviceConfig};
pub use error::{Error, Result};
pub use layout::{ImageLayout, Modifier};
pub use pixel_formats::PixelFormat;
pub use resource::{ExportInfo, Resource, ResourceId};
