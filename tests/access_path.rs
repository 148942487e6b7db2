// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! CPU map/unmap across the three layouts, and how accesses synchronize with the GPU.

use pan_resource::bindings::coordinates::{Box3D, Rect};
use pan_resource::bindings::texture_builder::ResourceTemplate;
use pan_resource::bindings::visible_to::{BindFlags, MapFlags, Target};
use pan_resource::imp::soft::{QueueEvent, SoftBackend, SoftBo};
use pan_resource::tiling;
use pan_resource::{Error, Modifier, PixelFormat};

fn linear(width: u32, height: u32) -> ResourceTemplate {
    ResourceTemplate::texture_2d(PixelFormat::R8G8B8A8Unorm, width, height)
        .with_bind(BindFlags::SAMPLER_VIEW | BindFlags::LINEAR)
}

fn render_target(width: u32, height: u32) -> ResourceTemplate {
    ResourceTemplate::texture_2d(PixelFormat::R8G8B8A8Unorm, width, height)
        .with_bind(BindFlags::RENDER_TARGET | BindFlags::SAMPLER_VIEW)
}

#[test]
fn direct_access_needs_linear() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let region = Box3D::new(0, 0, 0, 8, 8, 1);

    let mut afbc = backend.device().create_resource(&render_target(64, 64)).unwrap();
    assert_eq!(
        ctx.begin_access(&mut afbc, 0, MapFlags::READ | MapFlags::DIRECTLY, region)
            .unwrap_err(),
        Error::UnsupportedDirectAccess("AFBC")
    );
    let mut tiled = backend
        .device()
        .create_resource(&ResourceTemplate::texture_2d(PixelFormat::R32Float, 64, 64))
        .unwrap();
    assert_eq!(
        ctx.begin_access(&mut tiled, 0, MapFlags::WRITE | MapFlags::DIRECTLY, region)
            .unwrap_err(),
        Error::UnsupportedDirectAccess("u-interleaved")
    );
    assert!(!tiled.transfers().is_mapped());

    let mut flat = backend.device().create_resource(&linear(64, 64)).unwrap();
    let t = ctx
        .begin_access(&mut flat, 0, MapFlags::WRITE | MapFlags::DIRECTLY, region)
        .unwrap();
    // persistent mappings may never be ended, so the level counts as written right away
    assert!(flat.is_valid(0));
    ctx.end_access(&mut flat, t).unwrap();
}

#[test]
fn tiled_scratch_holds_only_the_region() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let template = ResourceTemplate::texture_2d(PixelFormat::R32Float, 64, 64);
    let mut r = backend.device().create_resource(&template).unwrap();
    assert_eq!(r.modifier(), Modifier::TiledInterleaved);

    let region = Box3D::new(5, 18, 0, 3, 2, 1);
    let mut t = ctx.begin_access(&mut r, 0, MapFlags::WRITE, region).unwrap();
    assert_eq!(t.stride(), 3 * 4);
    assert_eq!(t.layer_stride(), 3 * 4 * 2);
    {
        let mut map = t.map().unwrap();
        assert_eq!(map.len(), 24);
        for (i, b) in map.iter_mut().enumerate() {
            *b = i as u8 + 1;
        }
    }
    ctx.end_access(&mut r, t).unwrap();
    assert!(r.is_valid(0));

    let bytes = r.bo().map().unwrap();
    let offset = tiling::tiled_offset(6, 19, r.stride(0), PixelFormat::R32Float);
    // element (1, 1) of the region is the fifth pixel written
    assert_eq!(&bytes[offset..offset + 4], &[17, 18, 19, 20]);
    drop(bytes);

    let mut t = ctx
        .begin_access(&mut r, 0, MapFlags::READ, Box3D::new(6, 19, 0, 1, 1, 1))
        .unwrap();
    assert_eq!(&*t.map().unwrap(), &[17, 18, 19, 20]);
    ctx.end_access(&mut r, t).unwrap();
}

#[test]
fn tiled_array_layers_are_separate() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let template = ResourceTemplate::texture_2d(PixelFormat::R32Float, 32, 32)
        .with_target(Target::Texture2DArray)
        .with_array_size(3);
    let mut r = backend.device().create_resource(&template).unwrap();
    assert_eq!(r.modifier(), Modifier::TiledInterleaved);

    let mut t = ctx
        .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(0, 0, 1, 32, 32, 2))
        .unwrap();
    let layer = t.layer_stride() as usize;
    {
        let mut map = t.map().unwrap();
        map[..layer].fill(1);
        map[layer..].fill(2);
    }
    ctx.end_access(&mut r, t).unwrap();

    for (z, expected) in [(0u32, 0u8), (1, 1), (2, 2)] {
        let mut t = ctx
            .begin_access(&mut r, 0, MapFlags::READ, Box3D::new(0, 0, z, 32, 32, 1))
            .unwrap();
        assert!(t.map().unwrap().iter().all(|b| *b == expected), "layer {z}");
        ctx.end_access(&mut r, t).unwrap();
    }
}

#[test]
fn compressed_reads_skip_invalid_levels() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&render_target(64, 64)).unwrap();
    let region = Box3D::new(0, 0, 0, 16, 16, 1);

    let mut t = ctx.begin_access(&mut r, 0, MapFlags::READ, region).unwrap();
    assert_eq!(t.stride(), 16 * 4);
    assert!(t.map().unwrap().iter().all(|b| *b == 0));
    ctx.end_access(&mut r, t).unwrap();
    assert!(!backend
        .queue
        .events()
        .iter()
        .any(|e| matches!(e, QueueEvent::Blit { .. })));

    r.mark_valid(0);
    let t = ctx.begin_access(&mut r, 0, MapFlags::READ, region).unwrap();
    ctx.end_access(&mut r, t).unwrap();
    assert!(backend
        .queue
        .events()
        .iter()
        .any(|e| matches!(e, QueueEvent::Blit { dst, .. } if *dst != r.id())));
}

#[test]
fn compressed_writes_land_on_end() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&render_target(64, 64)).unwrap();
    let region = Box3D::new(16, 16, 0, 16, 16, 1);
    let mut t = ctx.begin_access(&mut r, 0, MapFlags::WRITE, region).unwrap();
    t.map().unwrap().fill(0x30);
    assert!(!r.is_valid(0));
    ctx.end_access(&mut r, t).unwrap();
    assert!(r.is_valid(0));
    assert!(r.modifier().is_afbc());

    let mut t = ctx.begin_access(&mut r, 0, MapFlags::READ, region).unwrap();
    assert!(t.map().unwrap().iter().all(|b| *b == 0x30));
    ctx.end_access(&mut r, t).unwrap();
}

#[test]
fn busy_bo_is_shadowed_with_a_copy() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
    r.bo().map().unwrap().fill(0xab);
    let old = r.bo().clone();
    backend.queue.record_read(r.id());

    let mut t = ctx
        .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(0, 0, 0, 4, 4, 1))
        .unwrap();
    assert!(!r.bo().same_bo(&old));
    t.map().unwrap().fill(0);
    ctx.end_access(&mut r, t).unwrap();

    // the part outside the region came along, the GPU keeps reading the old BO
    let bytes = r.bo().map().unwrap();
    assert_eq!(bytes[0], 0);
    assert_eq!(bytes[r.stride(0) as usize * 8], 0xab);
    assert!(old.map().unwrap().iter().all(|b| *b == 0xab));
    assert_eq!(old.ref_count(), 1);
}

#[test]
fn whole_discard_of_a_busy_bo_skips_the_copy() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
    r.bo().map().unwrap().fill(0xab);
    let old = r.bo().clone();
    SoftBo::of(&old).unwrap().set_busy(true);

    let t = ctx
        .begin_access(
            &mut r,
            0,
            MapFlags::WRITE | MapFlags::DISCARD_RANGE,
            Box3D::new(0, 0, 0, 16, 16, 1),
        )
        .unwrap();
    assert!(t.usage().contains(MapFlags::DISCARD_WHOLE_RESOURCE));
    assert!(!r.bo().same_bo(&old));
    assert!(r.bo().map().unwrap().iter().all(|b| *b == 0));
    ctx.end_access(&mut r, t).unwrap();
}

#[test]
fn shared_bo_waits_instead_of_shadowing() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let device = backend.device();
    let mut r = device.create_resource(&linear(16, 16)).unwrap();
    device.export_resource(&mut r).unwrap();
    let old = r.bo().clone();
    backend.queue.record_read(r.id());

    let t = ctx
        .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(0, 0, 0, 4, 4, 1))
        .unwrap();
    assert!(r.bo().same_bo(&old));
    assert!(backend
        .queue
        .events()
        .contains(&QueueEvent::FlushAccessing(r.id())));
    ctx.end_access(&mut r, t).unwrap();
}

#[test]
fn allocation_failure_falls_back_to_waiting() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
    let old = r.bo().clone();
    backend.queue.record_read(r.id());
    backend.allocator.fail_next(1);

    let t = ctx
        .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(0, 0, 0, 4, 4, 1))
        .unwrap();
    assert!(r.bo().same_bo(&old));
    assert!(backend
        .queue
        .events()
        .contains(&QueueEvent::FlushAccessing(r.id())));
    ctx.end_access(&mut r, t).unwrap();
}

#[test]
fn device_loss_during_a_wait_fails_the_access() {
    let backend = SoftBackend::for_testing();
    let ctx = &backend.context;
    let mut r = backend.device().create_resource(&linear(16, 16)).unwrap();
    let bo = SoftBo::of(r.bo()).unwrap();
    bo.set_busy(true);
    bo.set_hung(true);

    let err = ctx
        .begin_access(&mut r, 0, MapFlags::WRITE, Box3D::new(0, 0, 0, 4, 4, 1))
        .unwrap_err();
    assert!(matches!(err, Error::DeviceLost(_)));
    assert!(!r.transfers().is_mapped());
    assert!(!r.is_valid(0));
}

#[test]
fn rect_helpers_match_regions() {
    let region = Box3D::new(1, 2, 0, 3, 4, 1);
    assert_eq!(region.rect(), Rect::new(1, 2, 3, 4));
}
