// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
CPU access to resources.

An access runs `begin_access → Transfer::map → end_access`. What the caller gets to touch
depends on the layout:

| layout         | CPU sees                                  | written back by          |
|----------------|-------------------------------------------|--------------------------|
| linear         | the BO itself, at the region's offset     | nothing, already in place |
| u-interleaved  | a scratch buffer holding only the region  | the tiling codec         |
| AFBC           | a linear staging resource for the region  | a GPU blit               |

Before the CPU touches the BO, in-flight GPU work on it is dealt with. A write to a BO the GPU
is still reading is redirected to a fresh BO rather than stalling, unless the BO is shared with
another process or no memory is left, in which case the access flushes and waits.
*/

use std::ops::{Deref, DerefMut, Range};

use crate::bindings::coordinates::Box3D;
use crate::bindings::texture_builder::ResourceTemplate;
use crate::bindings::visible_to::{BindFlags, MapFlags, Target, Usage};
use crate::device::Context;
use crate::error::{Error, Result};
use crate::imp::{BlitInfo, BoFlags, BoHandle, CpuMapping, Filter, Timeout};
use crate::layout::{Modifier, compute_layout};
use crate::resource::{Resource, ResourceId, init_afbc_headers, layout_request};
use crate::tiling;

/// An access in progress. End it with [`Context::end_access`].
#[derive(Debug)]
#[must_use]
pub struct Transfer {
    resource: ResourceId,
    level: u32,
    usage: MapFlags,
    region: Box3D,
    stride: u32,
    layer_stride: u64,
    backing: Backing,
}

#[derive(Debug)]
enum Backing {
    Direct {
        bo: BoHandle,
        range: Range<usize>,
    },
    Scratch {
        data: Vec<u8>,
        /// Whether the BO was already synchronized for writing when the access began.
        synchronized: bool,
    },
    Staging(Box<Resource>),
}

impl Transfer {
    pub fn level(&self) -> u32 {
        self.level
    }

    pub fn usage(&self) -> MapFlags {
        self.usage
    }

    pub fn region(&self) -> Box3D {
        self.region
    }

    /// Bytes between rows of blocks in the mapped memory.
    pub fn stride(&self) -> u32 {
        self.stride
    }

    /// Bytes between layers (or depth slices) in the mapped memory.
    pub fn layer_stride(&self) -> u64 {
        self.layer_stride
    }

    /// The bytes of the region. Row `r` of layer `l` starts at `l * layer_stride + r * stride`.
    pub fn map(&mut self) -> Result<TransferMap<'_>> {
        match &mut self.backing {
            Backing::Direct { bo, range } => {
                let mapping = bo.map()?;
                if range.end > mapping.len() {
                    return Err(Error::Device(format!(
                        "mapping of {} bytes cannot hold {range:?}",
                        mapping.len()
                    )));
                }
                Ok(TransferMap(MapInner::Mapped {
                    mapping,
                    range: range.clone(),
                }))
            }
            Backing::Scratch { data, .. } => Ok(TransferMap(MapInner::Scratch(data))),
            Backing::Staging(staging) => {
                let range = 0..staging.layout().total_size as usize;
                Ok(TransferMap(MapInner::Mapped {
                    mapping: staging.bo().map()?,
                    range,
                }))
            }
        }
    }
}

/// CPU view of a [`Transfer`]'s region.
#[derive(Debug)]
pub struct TransferMap<'a>(MapInner<'a>);

#[derive(Debug)]
enum MapInner<'a> {
    Mapped {
        mapping: CpuMapping<'a>,
        range: Range<usize>,
    },
    Scratch(&'a mut [u8]),
}

impl Deref for TransferMap<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &self.0 {
            MapInner::Mapped { mapping, range } => &mapping[range.clone()],
            MapInner::Scratch(data) => data,
        }
    }
}

impl DerefMut for TransferMap<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        match &mut self.0 {
            MapInner::Mapped { mapping, range } => &mut mapping[range.clone()],
            MapInner::Scratch(data) => data,
        }
    }
}

fn wait_idle(bo: &BoHandle, wait_readers: bool) -> Result<()> {
    if bo.wait(Timeout::Forever, wait_readers)? {
        Ok(())
    } else {
        Err(Error::Timeout(format!("BO {}", bo.label())))
    }
}

/// Blocks covered by `region`, `(columns, rows)`.
fn region_blocks(resource: &Resource, region: Box3D) -> (u32, u32) {
    let (bw, bh) = resource.format().block_size();
    let rect = region.rect();
    (
        rect.max_x().div_ceil(bw) - rect.x / bw,
        rect.max_y().div_ceil(bh) - rect.y / bh,
    )
}

fn zeroed(len: usize) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    data.try_reserve_exact(len)
        .map_err(|_| Error::OutOfMemory(format!("{len} byte scratch buffer")))?;
    data.resize(len, 0);
    Ok(data)
}

/// Whether a write to `region` may throw the rest of the resource away.
fn can_discard(resource: &Resource, level: u32, region: Box3D, usage: MapFlags) -> bool {
    usage.contains(MapFlags::DISCARD_RANGE)
        && !usage.intersects(MapFlags::UNSYNCHRONIZED | MapFlags::PERSISTENT)
        && resource.box_covers_resource(level, region)
        && !resource.bo().is_shared()
}

fn staging_template(resource: &Resource, region: Box3D) -> ResourceTemplate {
    let template = ResourceTemplate::texture_2d(resource.format(), region.width, region.height)
        .with_bind(BindFlags::LINEAR)
        .with_usage(Usage::Staging)
        .with_label("AFBC staging");
    if region.depth == 1 {
        template
    } else if resource.template().target().is_3d() {
        template
            .with_target(Target::Texture3D)
            .with_depth(region.depth)
    } else {
        template
            .with_target(Target::Texture2DArray)
            .with_array_size(region.depth)
    }
}

impl Context {
    /// Starts CPU access to `region` of `level`. For 3D images `region.z` and `region.depth`
    /// select depth slices, otherwise array layers.
    pub fn begin_access(
        &self,
        resource: &mut Resource,
        level: u32,
        usage: MapFlags,
        region: Box3D,
    ) -> Result<Transfer> {
        let layout = resource.layout();
        if level >= layout.level_count() {
            return Err(Error::InvalidAccess(format!(
                "level {level} of a {} level resource",
                layout.level_count()
            )));
        }
        let (w, h, _) = layout.level_extent(level);
        let layers = layout.layer_count(level);
        let rect = region.rect();
        if region.depth == 0
            || rect.is_empty()
            || rect.max_x() > w
            || rect.max_y() > h
            || region.z + region.depth > layers
        {
            return Err(Error::InvalidAccess(format!(
                "{region:?} outside level {level} of {w}x{h} with {layers} layers"
            )));
        }

        let modifier = resource.modifier();
        if usage.contains(MapFlags::DIRECTLY) && !modifier.is_linear() {
            return Err(Error::UnsupportedDirectAccess(modifier.family()));
        }
        if modifier.is_afbc() {
            return self.begin_staged(resource, level, usage, region);
        }

        // a write-only scratch access does not touch the BO until it ends
        let deferred = modifier.is_tiled() && !usage.reads();
        let usage = if deferred {
            usage
        } else {
            self.synchronize(resource, level, usage, region)?
        };

        let format = resource.format();
        let bpe = format.bytes_per_block();
        let (cols, rows) = region_blocks(resource, region);
        let layout = resource.layout();
        let row_stride = layout.slice(level).row_stride;

        let transfer = if modifier.is_tiled() {
            let stride = cols * bpe;
            let layer_stride = stride as u64 * rows as u64;
            let mut data = zeroed(layer_stride as usize * region.depth as usize)?;
            if usage.reads() {
                let bytes = resource.bo().map()?;
                for (i, plane) in data.chunks_exact_mut(layer_stride as usize).enumerate() {
                    let base = layout.surface_offset(level, region.z + i as u32) as usize;
                    tiling::load_tiled_image(plane, &bytes[base..], rect, stride, row_stride, format);
                }
            }
            Transfer {
                resource: resource.id(),
                level,
                usage,
                region,
                stride,
                layer_stride,
                backing: Backing::Scratch {
                    data,
                    synchronized: !deferred,
                },
            }
        } else {
            let (bw, bh) = format.block_size();
            let layer_stride = layout.layer_stride(level);
            let start = layout.surface_offset(level, region.z)
                + (rect.y / bh) as u64 * row_stride as u64
                + (rect.x / bw) as u64 * bpe as u64;
            let len = (region.depth as u64 - 1) * layer_stride
                + (rows as u64 - 1) * row_stride as u64
                + cols as u64 * bpe as u64;
            let transfer = Transfer {
                resource: resource.id(),
                level,
                usage,
                region,
                stride: row_stride,
                layer_stride,
                backing: Backing::Direct {
                    bo: resource.bo().clone(),
                    range: start as usize..(start + len) as usize,
                },
            };
            // direct persistent writes land without an end_access to mark them
            if usage.writes() && usage.contains(MapFlags::DIRECTLY) {
                resource.mark_valid(level);
            }
            transfer
        };
        resource.transfers_mut().begin();
        Ok(transfer)
    }

    /// Ends an access, writing back what the CPU changed.
    pub fn end_access(&self, resource: &mut Resource, transfer: Transfer) -> Result<()> {
        if transfer.resource != resource.id() {
            return Err(Error::InvalidAccess(format!(
                "transfer of resource {} ended on resource {}",
                transfer.resource.get(),
                resource.id().get()
            )));
        }
        resource.transfers_mut().end();
        let Transfer {
            level,
            usage,
            region,
            stride,
            backing,
            ..
        } = transfer;
        if !usage.writes() {
            return Ok(());
        }
        match backing {
            Backing::Direct { .. } => {
                resource.mark_valid(level);
                Ok(())
            }
            Backing::Scratch { data, synchronized } => {
                if !synchronized {
                    self.synchronize(resource, level, usage, region)?;
                }
                if self.should_linear_convert(resource, level, region) {
                    self.adopt_linear_scratch(resource, &data, stride, region)?;
                } else {
                    let format = resource.format();
                    let layout = resource.layout();
                    let row_stride = layout.slice(level).row_stride;
                    let mut bytes = resource.bo().map()?;
                    let plane_len = stride as usize * region_blocks(resource, region).1 as usize;
                    for (i, plane) in data.chunks_exact(plane_len).enumerate() {
                        let base = layout.surface_offset(level, region.z + i as u32) as usize;
                        tiling::store_tiled_image(
                            &mut bytes[base..],
                            plane,
                            region.rect(),
                            row_stride,
                            stride,
                            format,
                        );
                    }
                }
                resource.mark_valid(level);
                Ok(())
            }
            Backing::Staging(staging) => self.finish_staged(resource, level, usage, region, *staging),
        }
    }

    /// Flushes and waits on whatever GPU work touches `resource`, then reports whether its BO is
    /// idle within `timeout`.
    pub fn wait_resource(
        &self,
        resource: &Resource,
        timeout: Timeout,
        wait_readers: bool,
    ) -> Result<bool> {
        self.queue()
            .flush_accessing(resource.id(), "explicit wait")?;
        resource.bo().wait(timeout, wait_readers)
    }

    fn begin_staged(
        &self,
        resource: &mut Resource,
        level: u32,
        usage: MapFlags,
        region: Box3D,
    ) -> Result<Transfer> {
        let template = staging_template(resource, region);
        let staging = Resource::allocate(self.device(), &template, Modifier::Linear, false)?;
        let id = resource.id();
        if usage.reads() && (resource.is_valid(level) || self.queue().any_batch_writes(id)) {
            self.queue().flush_writer(id, "AFBC read staging")?;
            self.queue().blit(&BlitInfo {
                src: resource.surface(),
                src_level: level,
                src_box: region,
                dst: staging.surface(),
                dst_level: 0,
                dst_box: Box3D::new(0, 0, 0, region.width, region.height, region.depth),
                filter: Filter::Nearest,
            })?;
            self.queue()
                .flush_writer(staging.id(), "AFBC read staging blit")?;
            wait_idle(staging.bo(), false)?;
        }
        resource.transfers_mut().begin();
        Ok(Transfer {
            resource: id,
            level,
            usage,
            region,
            stride: staging.stride(0),
            layer_stride: staging.layer_stride(0),
            backing: Backing::Staging(Box::new(staging)),
        })
    }

    fn finish_staged(
        &self,
        resource: &mut Resource,
        level: u32,
        usage: MapFlags,
        region: Box3D,
        staging: Resource,
    ) -> Result<()> {
        if self.should_linear_convert(resource, level, region) {
            // the staging image covers the whole surface and is already linear
            let request = layout_request(resource.template(), Modifier::Linear, false);
            let layout = compute_layout(self.device().caps(), &request, None)?;
            let (bo, _) = staging.into_backing();
            if bo.size() < layout.total_size {
                return Err(Error::Device(format!(
                    "staging BO of {} bytes cannot hold a {} byte linear image",
                    bo.size(),
                    layout.total_size
                )));
            }
            logwise::info_sync!("Adopting staging BO as linear backing");
            let old = resource.replace_backing(bo, layout);
            drop(old);
            resource.mark_valid(level);
            return Ok(());
        }

        let discard = can_discard(resource, level, region, usage);
        let format = resource.format();
        self.legalize_afbc_format(resource, format, true, discard)?;
        self.queue().blit(&BlitInfo {
            src: staging.surface(),
            src_level: 0,
            src_box: Box3D::new(0, 0, 0, region.width, region.height, region.depth),
            dst: resource.surface(),
            dst_level: level,
            dst_box: region,
            filter: Filter::Nearest,
        })?;
        self.queue()
            .flush_accessing(staging.id(), "AFBC write staging blit")?;
        // sampling a compressed level before its write-back lands can fault the GPU
        wait_idle(staging.bo(), true)?;
        resource.mark_valid(level);

        if self.device().config().force_pack {
            self.pack_afbc(resource)?;
        }
        Ok(())
    }

    /// Makes the BO safe for the CPU to touch, returning the effective usage.
    fn synchronize(
        &self,
        resource: &mut Resource,
        level: u32,
        usage: MapFlags,
        region: Box3D,
    ) -> Result<MapFlags> {
        let id = resource.id();
        let unsynchronized = usage.intersects(MapFlags::UNSYNCHRONIZED | MapFlags::PERSISTENT);
        let covers = resource.box_covers_resource(level, region);
        let mut usage = usage;
        if can_discard(resource, level, region, usage) {
            usage |= MapFlags::DISCARD_WHOLE_RESOURCE;
        }

        let mut create_new_bo = usage.contains(MapFlags::DISCARD_WHOLE_RESOURCE);
        let mut copy_resource = false;
        if !create_new_bo && !unsynchronized && usage.writes() && self.queue().any_batch_reads(id)
        {
            // copying the BO is usually cheaper than splitting the frame
            self.queue().flush_writer(id, "shadow resource creation")?;
            wait_idle(resource.bo(), false)?;
            create_new_bo = true;
            copy_resource = !covers;
        }

        if create_new_bo {
            let busy =
                self.queue().any_batch_reads(id) || !resource.bo().wait(Timeout::Poll, true)?;
            if busy && !self.shadow_bo(resource, copy_resource)? {
                self.queue()
                    .flush_accessing(id, "resource access with high memory pressure")?;
                wait_idle(resource.bo(), true)?;
            }
        } else if !unsynchronized {
            if usage.writes() {
                self.queue().flush_accessing(id, "synchronized write")?;
                wait_idle(resource.bo(), true)?;
            } else if usage.reads() {
                self.queue().flush_writer(id, "synchronized read")?;
                wait_idle(resource.bo(), false)?;
            }
        }
        Ok(usage)
    }

    /// Redirects `resource` to a fresh BO so the busy one can retire on its own.
    ///
    /// Returns `false` when that is impossible: shared BOs must stay put for the other process
    /// to see the write, and allocation may fail.
    fn shadow_bo(&self, resource: &mut Resource, copy: bool) -> Result<bool> {
        let old = resource.bo();
        if old.is_shared() {
            return Ok(false);
        }
        let flags = old.flags() - BoFlags::DELAY_MMAP;
        let bo = match self.device().allocator().create(old.size(), flags, old.label()) {
            Ok(bo) => bo,
            Err(err) => {
                logwise::warn_sync!(
                    "Shadow BO allocation failed, waiting instead: {err}",
                    err = logwise::privacy::LogIt(&err)
                );
                return Ok(false);
            }
        };
        if copy {
            let src = old.map()?;
            let mut dst = bo.map()?;
            dst[..src.len()].copy_from_slice(&src);
        } else {
            init_afbc_headers(&bo, resource.layout())?;
        }
        logwise::trace_sync!(
            "Shadowing busy BO, copy={copy}",
            copy = copy
        );
        let previous = resource.replace_bo(bo);
        drop(previous);
        Ok(true)
    }

    /// Moves a u-interleaved resource to linear in place, using the whole-surface scratch
    /// contents as the new level 0.
    fn adopt_linear_scratch(
        &self,
        resource: &mut Resource,
        data: &[u8],
        stride: u32,
        region: Box3D,
    ) -> Result<()> {
        let request = layout_request(
            resource.template(),
            Modifier::Linear,
            resource.wants_checksum(),
        );
        let layout = compute_layout(self.device().caps(), &request, None)?;
        let bo = if layout.total_size > resource.bo().size() {
            self.device().allocator().create(
                layout.total_size,
                resource.bo().flags(),
                resource.bo().label(),
            )?
        } else {
            resource.bo().clone()
        };
        {
            let mut bytes = bo.map()?;
            let slice = layout.slice(0);
            let (cols, rows) = region_blocks(resource, region);
            let row_bytes = (cols * resource.format().bytes_per_block()) as usize;
            for row in 0..rows as usize {
                let dst = slice.offset as usize + row * slice.row_stride as usize;
                let src = row * stride as usize;
                bytes[dst..dst + row_bytes].copy_from_slice(&data[src..src + row_bytes]);
            }
        }
        logwise::info_sync!("Detiling streamed resource in place");
        let old = resource.replace_backing(bo, layout);
        drop(old);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imp::soft::{QueueEvent, SoftBackend};
    use crate::imp::Queue;
    use crate::pixel_formats::PixelFormat;

    fn linear(width: u32, height: u32) -> ResourceTemplate {
        ResourceTemplate::texture_2d(PixelFormat::R8Unorm, width, height)
            .with_bind(BindFlags::SAMPLER_VIEW | BindFlags::LINEAR)
    }

    #[test]
    fn linear_maps_into_the_bo() {
        let backend = SoftBackend::for_testing();
        let ctx = &backend.context;
        let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
        let mut t = ctx
            .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(2, 3, 0, 4, 2, 1))
            .unwrap();
        assert_eq!(t.stride(), 16);
        {
            let mut map = t.map().unwrap();
            assert_eq!(map.len(), 16 + 4);
            map[0] = 1;
            map[16] = 2;
        }
        assert!(r.transfers().is_mapped());
        ctx.end_access(&mut r, t).unwrap();
        assert!(!r.transfers().is_mapped());
        assert!(r.is_valid(0));
        let bytes = r.bo().map().unwrap();
        assert_eq!(bytes[3 * 16 + 2], 1);
        assert_eq!(bytes[4 * 16 + 2], 2);
    }

    #[test]
    fn out_of_range_regions_are_rejected() {
        let backend = SoftBackend::for_testing();
        let ctx = &backend.context;
        let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
        for region in [
            Box3D::new(10, 0, 0, 8, 1, 1),
            Box3D::new(0, 0, 0, 0, 1, 1),
            Box3D::new(0, 0, 1, 1, 1, 1),
        ] {
            assert!(matches!(
                ctx.begin_access(&mut r, 0, MapFlags::READ, region),
                Err(Error::InvalidAccess(_))
            ));
        }
        assert!(ctx
            .begin_access(&mut r, 1, MapFlags::READ, Box3D::new(0, 0, 0, 1, 1, 1))
            .is_err());
        assert!(!r.transfers().is_mapped());
    }

    #[test]
    fn transfers_belong_to_their_resource() {
        let backend = SoftBackend::for_testing();
        let ctx = &backend.context;
        let mut a = backend.device().create_resource(&linear(16, 16)).unwrap();
        let mut b = backend.device().create_resource(&linear(16, 16)).unwrap();
        let t = ctx
            .begin_access(&mut a, 0, MapFlags::READ, Box3D::new(0, 0, 0, 1, 1, 1))
            .unwrap();
        assert!(matches!(
            ctx.end_access(&mut b, t),
            Err(Error::InvalidAccess(_))
        ));
    }

    #[test]
    fn reads_flush_only_the_writer() {
        let backend = SoftBackend::for_testing();
        let ctx = &backend.context;
        let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
        backend.queue.record_read(r.id());
        backend.queue.record_write(r.id());
        let t = ctx
            .begin_access(&mut r, 0, MapFlags::READ, Box3D::new(0, 0, 0, 16, 16, 1))
            .unwrap();
        ctx.end_access(&mut r, t).unwrap();
        assert_eq!(backend.queue.events(), vec![QueueEvent::FlushWriter(r.id())]);
        assert!(backend.queue.any_batch_reads(r.id()));
    }

    #[test]
    fn unsynchronized_access_skips_waiting() {
        let backend = SoftBackend::for_testing();
        let ctx = &backend.context;
        let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
        backend.queue.record_write(r.id());
        let t = ctx
            .begin_access(
                &mut r,
                0,
                MapFlags::WRITE | MapFlags::UNSYNCHRONIZED,
                Box3D::new(0, 0, 0, 4, 4, 1),
            )
            .unwrap();
        ctx.end_access(&mut r, t).unwrap();
        assert!(backend.queue.events().is_empty());
    }

    #[test]
    fn explicit_wait_reports_timeouts() {
        let backend = SoftBackend::for_testing();
        let r = backend.device().create_resource(&linear(16, 16)).unwrap();
        let bo = crate::imp::soft::SoftBo::of(r.bo()).unwrap();
        bo.set_busy(true);
        assert!(!backend.context.wait_resource(&r, Timeout::Poll, true).unwrap());
        bo.set_hung(true);
        assert!(matches!(
            backend.context.wait_resource(&r, Timeout::Forever, true),
            Err(Error::DeviceLost(_))
        ));
    }
}
