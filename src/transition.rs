// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Layout transitions.

A resource whose layout is not fixed may be moved to another layout when the current one stops
serving the way it is used:

- reinterpreting an AFBC image as a format of another compression class moves it to
  u-interleaved, since AFBC payloads are only meaningful in their own class
- writing to a packed AFBC image moves it back to a sparse layout
- repeated whole-surface CPU uploads move it to linear
- a finished, fully valid sparse AFBC image may be packed into a smaller BO

Every transition allocates the destination first and only swaps it in once the copy succeeded.
On any error the resource keeps its original BO, layout and validity.
*/

use crate::bindings::coordinates::Box3D;
use crate::bindings::visible_to::Target;
use crate::device::Context;
use crate::error::{Error, Result};
use crate::imp::{BlitInfo, Filter, Surface};
use crate::layout::{
    AfbcSliceLayout, ImageLayout, Modifier, SliceLayout, compute_layout, pack_levels,
};
use crate::pixel_formats::PixelFormat;
use crate::resource::{Resource, layout_request};

impl Context {
    /// Moves `resource` to `modifier`, copying every valid level when `preserve` is set.
    ///
    /// Without `preserve` every level becomes invalid; the caller is expected to overwrite
    /// what it needs before reading.
    pub fn convert(
        &self,
        resource: &mut Resource,
        modifier: Modifier,
        preserve: bool,
        reason: &str,
    ) -> Result<()> {
        if resource.is_layout_fixed() {
            return Err(Error::LayoutFixed(resource.drm_modifier()));
        }
        let _g = logwise::perfwarn_begin!("layout conversion");
        logwise::warn_sync!(
            "Converting {from} to {to}: {reason}",
            from = logwise::privacy::LogIt(&resource.modifier()),
            to = logwise::privacy::LogIt(&modifier),
            reason = logwise::privacy::LogIt(reason)
        );

        let device = self.device();
        let request = layout_request(resource.template(), modifier, resource.wants_checksum());
        let layout = compute_layout(device.caps(), &request, None)?;
        let bo = device
            .allocator()
            .create(layout.total_size, resource.bo().flags(), resource.bo().label())?;
        crate::resource::init_afbc_headers(&bo, &layout)?;

        if preserve && resource.valid_levels().any() {
            self.queue()
                .flush_writer(resource.id(), "layout conversion")?;
            let dst = Surface {
                resource: resource.id(),
                bo: &bo,
                layout: &layout,
                format: resource.format(),
            };
            let src = resource.surface();
            for level in resource.valid_levels().iter_valid() {
                let (w, h, _) = layout.level_extent(level);
                let whole = Box3D::new(0, 0, 0, w, h, layout.layer_count(level));
                self.queue().blit(&BlitInfo {
                    src,
                    src_level: level,
                    src_box: whole,
                    dst,
                    dst_level: level,
                    dst_box: whole,
                    filter: Filter::Nearest,
                })?;
            }
        }

        let old = resource.replace_backing(bo, layout);
        drop(old);
        if !preserve {
            resource.invalidate_levels();
        }
        Ok(())
    }

    /// Makes `resource` usable as `format` and, with `write`, writable by the GPU.
    ///
    /// With `discard` the current contents are not needed and no copy is made.
    pub fn legalize_afbc_format(
        &self,
        resource: &mut Resource,
        format: PixelFormat,
        write: bool,
        discard: bool,
    ) -> Result<()> {
        let Some(afbc) = resource.modifier().afbc() else {
            return Ok(());
        };
        let arch = self.device().arch();
        if resource.format().afbc_class(arch) != format.afbc_class(arch) {
            return self.convert(
                resource,
                Modifier::TiledInterleaved,
                !discard,
                "reinterpreting AFBC surface as an incompatible format",
            );
        }
        if write && !afbc.sparse {
            return self.convert(
                resource,
                Modifier::Afbc(afbc.with_sparse(true)),
                !discard,
                "legalizing packed AFBC for writing",
            );
        }
        Ok(())
    }

    /// Records a CPU write of `region` at `level` and reports whether the resource now looks
    /// streamed, meaning it should move to linear.
    ///
    /// Only whole-surface overwrites of single-level, single-layer 2D resources count. Linear and
    /// fixed resources never convert.
    pub fn should_linear_convert(
        &self,
        resource: &mut Resource,
        level: u32,
        region: Box3D,
    ) -> bool {
        if resource.is_layout_fixed() || resource.modifier().is_linear() {
            return false;
        }
        let template = resource.template();
        let single_2d = matches!(template.target(), Target::Texture2D | Target::TextureRect)
            && template.array_size() == 1
            && template.mip_levels() == 1;
        if !single_2d || !resource.box_covers_resource(level, region) {
            return false;
        }
        let seen = resource.count_streaming_overwrite();
        let threshold = self.device().config().streaming_threshold;
        if seen >= threshold {
            logwise::info_sync!(
                "Resource overwritten {seen} times, treating as streamed",
                seen = seen
            );
            return true;
        }
        false
    }

    /// Compacts a fully valid sparse AFBC resource into a packed BO.
    ///
    /// Returns whether the resource was packed. Nothing happens when the layout is fixed, not
    /// sparse AFBC, not a single surface, not fully valid, or when packing would not shrink the
    /// BO below the device's packing ratio.
    pub fn pack_afbc(&self, resource: &mut Resource) -> Result<bool> {
        let Some(afbc) = resource.modifier().afbc() else {
            return Ok(false);
        };
        let template = resource.template();
        let single = template.target().is_2d_family()
            && !template.target().is_3d()
            && template.array_size() == 1
            && template.nr_samples() == 1;
        if resource.is_layout_fixed() || !afbc.sparse || !single {
            return Ok(false);
        }
        // packing only to unpack for the next upload is a loss
        if !resource.valid_levels().all() {
            return Ok(false);
        }

        self.queue()
            .flush_accessing(resource.id(), "AFBC before size measurement")?;
        let surface = resource.surface();
        let mut sizes = Vec::with_capacity(resource.layout().level_count() as usize);
        for level in 0..resource.layout().level_count() {
            sizes.push(self.queue().afbc_superblock_sizes(&surface, level)?);
        }
        let (packed, new_size) = pack_levels(&sizes);
        let old_size = resource.bo().size();
        let ratio = new_size.saturating_mul(100) / old_size.max(1);
        let max_ratio = self.device().config().max_afbc_packing_ratio;
        if ratio > max_ratio as u64 {
            logwise::trace_sync!(
                "Skipping AFBC pack, {ratio}% of the original size",
                ratio = ratio
            );
            return Ok(false);
        }

        let _g = logwise::perfwarn_begin!("AFBC pack");
        let dst = self.device().allocator().create(
            new_size,
            resource.bo().flags(),
            "AFBC compact texture",
        )?;
        self.queue().afbc_pack(&surface, &dst, &packed)?;

        let old = resource.layout();
        let packed_afbc = afbc.with_sparse(false).with_tiled_headers(false);
        let modifier = Modifier::Afbc(packed_afbc);
        let slices = old
            .slices
            .iter()
            .zip(&packed)
            .map(|(slice, level)| {
                let surface_stride = level.header_size + level.body_size;
                let geometry = slice.afbc.map(|g| AfbcSliceLayout {
                    header_size: level.header_size,
                    body_size: level.body_size,
                    surface_stride,
                    ..g
                });
                SliceLayout {
                    offset: level.offset,
                    // header rows shrink once the headers are no longer tiled
                    row_stride: geometry.map_or(slice.row_stride, |g| g.row_stride(packed_afbc)),
                    surface_stride,
                    size: surface_stride,
                    afbc: geometry,
                    checksum: None,
                }
            })
            .collect();
        let layout = ImageLayout {
            modifier,
            slices,
            array_stride: new_size,
            total_size: new_size,
            ..old.clone()
        };
        logwise::info_sync!(
            "Packed AFBC resource from {old_size} to {new_size} bytes",
            old_size = old_size,
            new_size = new_size
        );
        let previous = resource.replace_backing(dst, layout);
        drop(previous);
        Ok(true)
    }
}
