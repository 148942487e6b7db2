// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
GPU resources: an image or buffer, the memory behind it, and what is known about its contents.

A [`Resource`] owns exactly one reference to its backing BO and one [`ImageLayout`] describing
how the image sits in that BO. Both change together when the layout is transitioned (see
[`crate::transition`]); nothing else replaces them.

# Layout stability

Resources created by the policy are free to change layout behind the caller's back. Once a
specific layout has been promised to someone outside the driver (the caller asked for an
explicit modifier, the memory was imported, or it was exported) the layout is *fixed* and every
transition refuses to touch it.

# Validity

Each mip level carries a valid bit. A level that was never written has undefined content, and
copies that would preserve it are skipped.
*/

use std::sync::atomic::{AtomicU64, Ordering};

use crate::bindings::coordinates::{Box3D, DamageRect};
use crate::bindings::dirty_tracking::Damage;
use crate::bindings::resource_tracking::{LevelMask, TransferTracker};
use crate::bindings::texture_builder::ResourceTemplate;
use crate::bindings::visible_to::BindFlags;
use crate::device::{Context, Device};
use crate::error::{Error, Result};
use crate::imp::{BlitInfo, BoFlags, BoHandle, ExportHandle, Filter, OwnedBo, Surface};
use crate::layout::{
    ExplicitLayout, ImageLayout, LayoutRequest, Modifier, choose_modifier, choose_modifier_from,
    compute_layout,
};
use crate::pixel_formats::PixelFormat;

/// Process-unique identity of a resource, used to name it to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u64);

impl ResourceId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        ResourceId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// What another process needs to reinterpret an exported resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportInfo {
    pub handle: ExportHandle,
    pub offset: u64,
    pub row_stride: u32,
    pub drm_modifier: u64,
}

#[derive(Debug)]
pub struct Resource {
    id: ResourceId,
    template: ResourceTemplate,
    layout: ImageLayout,
    bo: OwnedBo,
    valid: LevelMask,
    damage: Damage,
    layout_fixed: bool,
    /// Whole-surface CPU overwrites seen so far.
    streaming_overwrites: u32,
    transfers: TransferTracker,
    wants_checksum: bool,
}

pub(crate) fn layout_request(
    template: &ResourceTemplate,
    modifier: Modifier,
    checksum: bool,
) -> LayoutRequest {
    LayoutRequest {
        modifier,
        format: template.format(),
        target: template.target(),
        width: template.width(),
        height: template.height(),
        depth: template.depth(),
        array_size: template.array_size(),
        nr_samples: template.nr_samples(),
        mip_levels: template.mip_levels(),
        checksum,
    }
}

fn bo_flags(template: &ResourceTemplate) -> BoFlags {
    let mut flags = BoFlags::DELAY_MMAP;
    if template
        .bind()
        .intersects(BindFlags::SHARED | BindFlags::SCANOUT | BindFlags::DISPLAY_TARGET)
    {
        flags |= BoFlags::SHARED;
    }
    flags
}

/// Zeroes every AFBC header array in `bo`. A zeroed header decodes as an all-zero superblock,
/// so a fresh AFBC image reads back as transparent black instead of garbage.
pub(crate) fn init_afbc_headers(bo: &BoHandle, layout: &ImageLayout) -> Result<()> {
    if !layout.modifier.is_afbc() {
        return Ok(());
    }
    let mut bytes = bo.map()?;
    for level in 0..layout.level_count() {
        let slice = layout.slice(level);
        let Some(afbc) = slice.afbc else {
            continue;
        };
        for layer in 0..layout.layer_count(level) {
            let samples = if layout.target.is_3d() {
                1
            } else {
                layout.nr_samples
            };
            for sample in 0..samples {
                let start = (layout.surface_offset(level, layer)
                    + sample as u64 * slice.surface_stride) as usize;
                let end = start + afbc.header_size as usize;
                let headers = bytes.get_mut(start..end).ok_or_else(|| {
                    Error::Device(format!(
                        "AFBC headers at {start}..{end} outside a {} byte BO",
                        bo.size()
                    ))
                })?;
                headers.fill(0);
            }
        }
    }
    Ok(())
}

impl Resource {
    /// Computes a layout, allocates its BO and prepares the headers.
    pub(crate) fn allocate(
        device: &Device,
        template: &ResourceTemplate,
        modifier: Modifier,
        layout_fixed: bool,
    ) -> Result<Resource> {
        template.validate()?;
        let wants_checksum =
            template.bind().contains(BindFlags::RENDER_TARGET) && !device.config().no_crc;
        let request = layout_request(template, modifier, wants_checksum);
        let layout = compute_layout(device.caps(), &request, None)?;
        logwise::debuginternal_sync!(
            "level 0 layout is {slice}",
            slice = logwise::privacy::LogIt(layout.slice(0))
        );
        let bo = device
            .allocator()
            .create(layout.total_size, bo_flags(template), template.label())?;
        init_afbc_headers(&bo, &layout)?;
        logwise::trace_sync!(
            "Created {modifier} resource of {size} bytes",
            modifier = logwise::privacy::LogIt(&modifier),
            size = layout.total_size
        );
        Ok(Resource {
            id: ResourceId::next(),
            template: template.clone(),
            valid: LevelMask::new(layout.level_count()),
            damage: Damage::full(template.width(), template.height()),
            layout,
            bo: OwnedBo::new(bo),
            layout_fixed,
            streaming_overwrites: 0,
            transfers: TransferTracker::default(),
            wants_checksum,
        })
    }

    pub fn id(&self) -> ResourceId {
        self.id
    }

    pub fn template(&self) -> &ResourceTemplate {
        &self.template
    }

    pub fn format(&self) -> PixelFormat {
        self.template.format()
    }

    pub fn layout(&self) -> &ImageLayout {
        &self.layout
    }

    pub fn modifier(&self) -> Modifier {
        self.layout.modifier
    }

    pub fn drm_modifier(&self) -> u64 {
        self.layout.modifier.to_drm()
    }

    pub fn bo(&self) -> &BoHandle {
        self.bo.handle()
    }

    /// Whether the layout was promised to an outside party and may no longer change.
    pub fn is_layout_fixed(&self) -> bool {
        self.layout_fixed
    }

    pub fn streaming_overwrites(&self) -> u32 {
        self.streaming_overwrites
    }

    pub fn transfers(&self) -> &TransferTracker {
        &self.transfers
    }

    pub fn stride(&self, level: u32) -> u32 {
        self.layout.slice(level).row_stride
    }

    pub fn offset(&self, level: u32) -> u64 {
        self.layout.slice(level).offset
    }

    pub fn layer_stride(&self, level: u32) -> u64 {
        self.layout.layer_stride(level)
    }

    pub fn mark_valid(&mut self, level: u32) {
        self.valid.set(level);
    }

    pub fn is_valid(&self, level: u32) -> bool {
        self.valid.test(level)
    }

    pub fn valid_levels(&self) -> &LevelMask {
        &self.valid
    }

    pub fn damage(&self) -> &Damage {
        &self.damage
    }

    /// Records which parts of the surface the next frame redraws, bottom-left origin.
    ///
    /// An empty list damages everything.
    pub fn set_damage_region(&mut self, device: &Device, rects: &[DamageRect]) -> Result<()> {
        self.damage.set_region(
            self.template.width(),
            self.template.height(),
            rects,
            device.caps().tile_enable_map,
        )
    }

    /// Declares the contents garbage: every level becomes invalid and pending resolves into the
    /// resource are dropped.
    pub fn invalidate(&mut self, ctx: &Context) {
        self.invalidate_levels();
        ctx.queue().discard_pending_resolve(self.id);
    }

    /// Regenerates levels `base + 1 ..= last` from `base` by successive downscaling blits.
    pub fn generate_mipmap(&mut self, ctx: &Context, base: u32, last: u32) -> Result<()> {
        if last >= self.layout.level_count() || base > last {
            return Err(Error::InvalidTemplate(format!(
                "mip range {base}..={last} outside {} levels",
                self.layout.level_count()
            )));
        }
        // whatever was in the destination levels is about to be replaced
        for level in base + 1..=last {
            self.valid.clear(level);
        }
        let format = self.format();
        ctx.legalize_afbc_format(self, format, true, false)?;
        for level in base + 1..=last {
            let (sw, sh, _) = self.layout.level_extent(level - 1);
            let (dw, dh, _) = self.layout.level_extent(level);
            let layers = self.layout.layer_count(level).min(self.layout.layer_count(level - 1));
            let surface = self.surface();
            ctx.queue().blit(&BlitInfo {
                src: surface,
                src_level: level - 1,
                src_box: Box3D::new(0, 0, 0, sw, sh, layers),
                dst: surface,
                dst_level: level,
                dst_box: Box3D::new(0, 0, 0, dw, dh, layers),
                filter: Filter::Linear,
            })?;
            self.valid.set(level);
        }
        Ok(())
    }

    /// Whether `region` of `level` is the whole of a single-level resource.
    pub fn box_covers_resource(&self, level: u32, region: Box3D) -> bool {
        if self.layout.level_count() != 1 || level != 0 {
            return false;
        }
        let layers = self.layout.layer_count(0);
        let (w, h, _) = self.layout.level_extent(0);
        region.covers(w, h, layers)
    }

    pub(crate) fn surface(&self) -> Surface<'_> {
        Surface {
            resource: self.id,
            bo: self.bo.handle(),
            layout: &self.layout,
            format: self.layout.format,
        }
    }

    pub(crate) fn wants_checksum(&self) -> bool {
        self.wants_checksum
    }

    /// Installs new backing storage and layout together, returning the previous BO.
    #[must_use]
    pub(crate) fn replace_backing(&mut self, bo: BoHandle, layout: ImageLayout) -> BoHandle {
        self.layout = layout;
        self.bo.replace(bo)
    }

    /// Installs a new BO under the same layout, returning the previous one.
    #[must_use]
    pub(crate) fn replace_bo(&mut self, bo: BoHandle) -> BoHandle {
        self.bo.replace(bo)
    }

    pub(crate) fn into_backing(self) -> (BoHandle, ImageLayout) {
        (self.bo.into_handle(), self.layout)
    }

    pub(crate) fn invalidate_levels(&mut self) {
        self.valid.clear_all();
    }

    pub(crate) fn transfers_mut(&mut self) -> &mut TransferTracker {
        &mut self.transfers
    }

    pub(crate) fn count_streaming_overwrite(&mut self) -> u32 {
        self.streaming_overwrites += 1;
        self.streaming_overwrites
    }
}

impl Device {
    /// Creates a resource in whatever layout the policy prefers. The layout may change later.
    pub fn create_resource(&self, template: &ResourceTemplate) -> Result<Resource> {
        let modifier = choose_modifier(self, template);
        Resource::allocate(self, template, modifier, false)
    }

    /// Creates a resource in exactly `modifier`. The layout is fixed from then on.
    pub fn create_resource_with_modifier(
        &self,
        template: &ResourceTemplate,
        modifier: Modifier,
    ) -> Result<Resource> {
        Resource::allocate(self, template, modifier, true)
    }

    /// Creates a resource in the best of the caller's `acceptable` layouts. The layout is fixed.
    pub fn create_resource_with_modifiers(
        &self,
        template: &ResourceTemplate,
        acceptable: &[Modifier],
    ) -> Result<Resource> {
        let modifier = choose_modifier_from(self, template, acceptable)?;
        Resource::allocate(self, template, modifier, true)
    }

    /// Wraps memory produced elsewhere. Level 0 is taken to hold defined content.
    pub fn import_resource(
        &self,
        template: &ResourceTemplate,
        handle: ExportHandle,
        modifier: Modifier,
        explicit: ExplicitLayout,
    ) -> Result<Resource> {
        template.validate()?;
        let request = layout_request(template, modifier, false);
        let layout = compute_layout(self.caps(), &request, Some(explicit))?;
        let bo = self.allocator().import(handle)?;
        if bo.size() < layout.total_size {
            return Err(Error::InvalidExternalLayout(format!(
                "layout needs {} bytes, imported BO has {}",
                layout.total_size,
                bo.size()
            )));
        }
        bo.mark_shared();
        let mut valid = LevelMask::new(layout.level_count());
        valid.set(0);
        logwise::info_sync!(
            "Imported {modifier} resource",
            modifier = logwise::privacy::LogIt(&modifier)
        );
        Ok(Resource {
            id: ResourceId::next(),
            template: template.clone(),
            valid,
            damage: Damage::full(template.width(), template.height()),
            layout,
            bo: OwnedBo::new(bo),
            layout_fixed: true,
            streaming_overwrites: 0,
            transfers: TransferTracker::default(),
            wants_checksum: false,
        })
    }

    /// Shares `resource` with another process. Its layout is fixed from then on.
    pub fn export_resource(&self, resource: &mut Resource) -> Result<ExportInfo> {
        let handle = resource.bo().export()?;
        resource.layout_fixed = true;
        Ok(ExportInfo {
            handle,
            offset: resource.offset(0),
            row_stride: resource.stride(0),
            drm_modifier: resource.drm_modifier(),
        })
    }
}
