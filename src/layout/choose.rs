// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Modifier selection policy.

use crate::bindings::texture_builder::ResourceTemplate;
use crate::bindings::visible_to::{BindFlags, Target};
use crate::device::Device;
use crate::error::{Error, Result};
use crate::layout::modifier::{AfbcModifier, Modifier};
use crate::tiling;

/// Whether AFBC may be used for `template` on `device`.
pub fn should_afbc(device: &Device, template: &ResourceTemplate) -> bool {
    let caps = device.caps();
    if !caps.has_afbc || device.config().no_afbc {
        return false;
    }
    if !BindFlags::COMPRESSIBLE.contains(template.bind()) {
        return false;
    }
    if template.usage().is_stream() {
        return false;
    }
    if template.format().afbc_class(device.arch()).is_none() {
        return false;
    }
    if template.nr_samples() > caps.max_samples_for_compression() {
        return false;
    }
    let target_ok = match template.target() {
        t if t.is_2d_family() => true,
        Target::Texture3D => caps.afbc_3d,
        _ => false,
    };
    if !target_ok {
        return false;
    }
    // a single superblock compresses too little to pay for its header
    let (tw, th) = tiling::tile_size_px(template.format());
    !(template.width() <= tw && template.height() <= th)
}

/// Whether the u-interleaved layout may be used for `template`.
pub fn should_tile(template: &ResourceTemplate) -> bool {
    template.target() != Target::Buffer
        && BindFlags::TILEABLE.contains(template.bind())
        && template.format().is_tileable()
        && !template.usage().is_stream()
        && template.width().min(template.height()) >= 2
}

/// The AFBC variant preferred for `template`, assuming [`should_afbc`] holds.
fn preferred_afbc(device: &Device, template: &ResourceTemplate) -> AfbcModifier {
    let tiled = device.caps().supports_tiled_compression_headers()
        && template.width() >= 128
        && template.height() >= 128
        && !device.config().force_pack;
    AfbcModifier::new()
        .with_color_transform(template.format().supports_ytr())
        .with_tiled_headers(tiled)
}

/// Picks the layout for a new resource, first match wins:
///
/// 1. forced linear, by debug flag or by the caller's bindings
/// 2. AFBC when eligible
/// 3. u-interleaved when eligible
/// 4. linear
pub fn choose_modifier(device: &Device, template: &ResourceTemplate) -> Modifier {
    if device.config().force_linear || template.bind().contains(BindFlags::LINEAR) {
        return Modifier::Linear;
    }
    if should_afbc(device, template) {
        return Modifier::Afbc(preferred_afbc(device, template));
    }
    if should_tile(template) {
        return Modifier::TiledInterleaved;
    }
    Modifier::Linear
}

fn acceptable_afbc(device: &Device, template: &ResourceTemplate, afbc: AfbcModifier) -> bool {
    (!afbc.color_transform || template.format().supports_ytr())
        && (!afbc.tiled_headers || device.caps().supports_tiled_compression_headers())
}

/// Picks the best layout out of the caller's `acceptable` list.
///
/// The policy choice wins when it is listed. Otherwise any usable AFBC variant, then
/// u-interleaved, then linear, in that order.
pub fn choose_modifier_from(
    device: &Device,
    template: &ResourceTemplate,
    acceptable: &[Modifier],
) -> Result<Modifier> {
    let preferred = choose_modifier(device, template);
    if acceptable.contains(&preferred) {
        return Ok(preferred);
    }
    let forced_linear =
        device.config().force_linear || template.bind().contains(BindFlags::LINEAR);
    if !forced_linear {
        if should_afbc(device, template) {
            let afbc = acceptable.iter().find(|m| {
                m.afbc()
                    .is_some_and(|afbc| acceptable_afbc(device, template, afbc))
            });
            if let Some(m) = afbc {
                return Ok(*m);
            }
        }
        if should_tile(template) && acceptable.contains(&Modifier::TiledInterleaved) {
            return Ok(Modifier::TiledInterleaved);
        }
    }
    if acceptable.contains(&Modifier::Linear) {
        return Ok(Modifier::Linear);
    }
    Err(Error::InvalidTemplate(format!(
        "none of {} modifiers fits {:?} {}x{}",
        acceptable.len(),
        template.format(),
        template.width(),
        template.height()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::visible_to::Usage;
    use crate::device::{Architecture, DeviceConfig};
    use crate::imp::soft::SoftAllocator;
    use crate::pixel_formats::PixelFormat;
    use std::sync::Arc;

    fn device(arch: Architecture, config: DeviceConfig) -> Device {
        Device::new(arch, config, Arc::new(SoftAllocator::new()))
    }

    fn rt(width: u32, height: u32) -> ResourceTemplate {
        ResourceTemplate::texture_2d(PixelFormat::R8G8B8A8Unorm, width, height)
            .with_bind(BindFlags::RENDER_TARGET | BindFlags::SAMPLER_VIEW)
    }

    #[test]
    fn force_linear_wins() {
        let config = DeviceConfig {
            force_linear: true,
            ..DeviceConfig::default()
        };
        let d = device(Architecture::V7, config);
        assert_eq!(choose_modifier(&d, &rt(256, 256)), Modifier::Linear);
        let d = device(Architecture::V7, DeviceConfig::default());
        assert_eq!(
            choose_modifier(&d, &rt(256, 256).with_bind(BindFlags::SAMPLER_VIEW | BindFlags::LINEAR)),
            Modifier::Linear
        );
    }

    #[test]
    fn large_render_targets_get_tiled_headers() {
        let d = device(Architecture::V7, DeviceConfig::default());
        let m = choose_modifier(&d, &rt(256, 256));
        let afbc = m.afbc().unwrap();
        assert!(afbc.tiled_headers);
        assert!(afbc.sparse);
        assert!(afbc.color_transform);

        let small = choose_modifier(&d, &rt(100, 256)).afbc().unwrap();
        assert!(!small.tiled_headers);

        let v6 = device(Architecture::V6, DeviceConfig::default());
        assert!(!choose_modifier(&v6, &rt(256, 256)).afbc().unwrap().tiled_headers);

        let pack = device(
            Architecture::V7,
            DeviceConfig {
                force_pack: true,
                ..DeviceConfig::default()
            },
        );
        assert!(!choose_modifier(&pack, &rt(256, 256)).afbc().unwrap().tiled_headers);
    }

    #[test]
    fn afbc_exclusions_fall_back_to_tiling() {
        let d = device(Architecture::V7, DeviceConfig::default());
        // one superblock
        assert_eq!(choose_modifier(&d, &rt(16, 16)), Modifier::TiledInterleaved);
        assert!(choose_modifier(&d, &rt(17, 16)).is_afbc());
        // multisampled
        assert_eq!(
            choose_modifier(&d, &rt(64, 64).with_samples(4)),
            Modifier::TiledInterleaved
        );
        // bound as a shader image
        assert_eq!(
            choose_modifier(&d, &rt(64, 64).with_bind(BindFlags::SHADER_IMAGE)),
            Modifier::Linear
        );
        // a format with no compression class
        let float = ResourceTemplate::texture_2d(PixelFormat::R32Float, 64, 64);
        assert_eq!(choose_modifier(&d, &float), Modifier::TiledInterleaved);
        // no AFBC on Midgard T600
        let v4 = device(Architecture::V4, DeviceConfig::default());
        assert_eq!(choose_modifier(&v4, &rt(64, 64)), Modifier::TiledInterleaved);
    }

    #[test]
    fn three_d_afbc_needs_v7() {
        let cube = rt(64, 64).with_target(Target::Texture3D).with_depth(4);
        let v6 = device(Architecture::V6, DeviceConfig::default());
        assert_eq!(choose_modifier(&v6, &cube), Modifier::TiledInterleaved);
        let v7 = device(Architecture::V7, DeviceConfig::default());
        assert!(choose_modifier(&v7, &cube).is_afbc());
    }

    #[test]
    fn streaming_and_thin_surfaces_stay_linear() {
        let d = device(Architecture::V7, DeviceConfig::default());
        assert_eq!(
            choose_modifier(&d, &rt(64, 64).with_usage(Usage::Stream)),
            Modifier::Linear
        );
        assert_eq!(choose_modifier(&d, &rt(1, 64)), Modifier::Linear);
        assert_eq!(
            choose_modifier(&d, &ResourceTemplate::buffer(4096)),
            Modifier::Linear
        );
    }

    #[test]
    fn acceptable_list() {
        let d = device(Architecture::V7, DeviceConfig::default());
        let t = rt(256, 256);
        let untiled = Modifier::Afbc(AfbcModifier::new().with_color_transform(true));
        assert_eq!(
            choose_modifier_from(&d, &t, &[Modifier::Linear, untiled]).unwrap(),
            untiled
        );
        assert_eq!(
            choose_modifier_from(&d, &t, &[Modifier::Linear, Modifier::TiledInterleaved]).unwrap(),
            Modifier::TiledInterleaved
        );
        // YTR on a format without it is refused
        let r8 = ResourceTemplate::texture_2d(PixelFormat::R8Unorm, 64, 64);
        assert_eq!(
            choose_modifier_from(&d, &r8, &[untiled, Modifier::Linear]).unwrap(),
            Modifier::Linear
        );
        assert!(choose_modifier_from(&d, &r8, &[untiled]).is_err());
    }
}
