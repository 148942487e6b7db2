// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Memory-backed reference backend.

BOs are plain byte vectors and the queue executes every copy immediately on the CPU, so the
resource layer can be exercised without hardware. The queue keeps a log of what it was asked to
do, and both halves accept injected failures.

AFBC is emulated rather than implemented: a superblock header holds the body offset (relative
to the start of the surface) in its first word and the payload size in its second. Payloads are
stored uncompressed, row-major within the superblock. A superblock whose pixels are all zero is
stored as an all-zero header with no payload, which is also how a freshly zeroed header array
decodes.

CPU blits always sample nearest, whatever filter is requested.
*/

use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::bindings::coordinates::Rect;
use crate::device::{Architecture, Context, Device, DeviceConfig};
use crate::error::{Error, Result};
use crate::imp::{
    Allocator, BlitInfo, Bo, BoFlags, BoHandle, CpuMapping, ExportHandle, Queue, Surface, Timeout,
};
use crate::layout::{
    HEADER_BYTES_PER_SUPERBLOCK, ImageLayout, Modifier, PackedLevel, header_index, payload_size,
};
use crate::resource::ResourceId;
use crate::tiling;

struct MappedBytes<'a>(MutexGuard<'a, Vec<u8>>);

impl Deref for MappedBytes<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl DerefMut for MappedBytes<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.0
    }
}

/// A BO backed by a byte vector.
pub struct SoftBo {
    id: u64,
    label: String,
    size: u64,
    flags: AtomicU32,
    data: Mutex<Vec<u8>>,
    busy: AtomicBool,
    hung: AtomicBool,
}

impl SoftBo {
    /// The soft BO behind `handle`, if it is one.
    pub fn of(handle: &BoHandle) -> Option<&SoftBo> {
        let bo: &dyn Bo = &**handle;
        let any: &dyn Any = bo;
        any.downcast_ref::<SoftBo>()
    }

    /// Simulates GPU work in flight on this BO. Waits other than polls complete it.
    pub fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::Relaxed);
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Relaxed)
    }

    /// Simulates GPU work that never completes: finite waits time out, infinite waits report a
    /// lost device.
    pub fn set_hung(&self, hung: bool) {
        self.hung.store(hung, Ordering::Relaxed);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<u8>>> {
        self.data
            .lock()
            .map_err(|_| Error::Device(format!("BO {} poisoned", self.label)))
    }
}

impl Debug for SoftBo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftBo")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("flags", &self.flags())
            .finish_non_exhaustive()
    }
}

impl Bo for SoftBo {
    fn size(&self) -> u64 {
        self.size
    }

    fn flags(&self) -> BoFlags {
        BoFlags::from_bits_truncate(self.flags.load(Ordering::Relaxed))
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn mark_shared(&self) {
        self.flags
            .fetch_or(BoFlags::SHARED.bits(), Ordering::Relaxed);
    }

    fn map(&self) -> Result<CpuMapping<'_>> {
        Ok(CpuMapping::new(MappedBytes(self.lock()?)))
    }

    fn wait(&self, timeout: Timeout, _wait_readers: bool) -> Result<bool> {
        if !self.is_busy() {
            return Ok(true);
        }
        if self.hung.load(Ordering::Relaxed) {
            return match timeout {
                Timeout::Forever => Err(Error::DeviceLost(format!(
                    "job on BO {} faulted",
                    self.label
                ))),
                _ => Ok(false),
            };
        }
        match timeout {
            Timeout::Poll => Ok(false),
            Timeout::After(_) | Timeout::Forever => {
                self.set_busy(false);
                Ok(true)
            }
        }
    }

    fn export(&self) -> Result<ExportHandle> {
        self.mark_shared();
        Ok(ExportHandle(self.id))
    }
}

/// Allocates [`SoftBo`]s, with optional injected failures.
#[derive(Default)]
pub struct SoftAllocator {
    next_id: AtomicU64,
    registry: Mutex<HashMap<u64, Weak<SoftBo>>>,
    fail_next: AtomicU32,
    created: AtomicU32,
}

impl SoftAllocator {
    pub fn new() -> Self {
        SoftAllocator::default()
    }

    /// Makes the next `count` allocations fail with [`Error::OutOfMemory`].
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::Relaxed);
    }

    /// Number of successful allocations so far.
    pub fn created(&self) -> u32 {
        self.created.load(Ordering::Relaxed)
    }

    fn registry(&self) -> Result<MutexGuard<'_, HashMap<u64, Weak<SoftBo>>>> {
        self.registry
            .lock()
            .map_err(|_| Error::Device(String::from("allocator registry poisoned")))
    }
}

impl Allocator for SoftAllocator {
    fn create(&self, size: u64, flags: BoFlags, label: &str) -> Result<BoHandle> {
        let injected = self
            .fail_next
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(Error::OutOfMemory(format!("{size} bytes for {label}")));
        }
        let mut data = Vec::new();
        data.try_reserve_exact(size as usize)
            .map_err(|_| Error::OutOfMemory(format!("{size} bytes for {label}")))?;
        data.resize(size as usize, 0);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let bo = Arc::new(SoftBo {
            id,
            label: label.to_string(),
            size,
            flags: AtomicU32::new(flags.bits()),
            data: Mutex::new(data),
            busy: AtomicBool::new(false),
            hung: AtomicBool::new(false),
        });
        let mut registry = self.registry()?;
        registry.retain(|_, weak| weak.strong_count() > 0);
        registry.insert(id, Arc::downgrade(&bo));
        self.created.fetch_add(1, Ordering::Relaxed);
        Ok(BoHandle::new(bo))
    }

    fn import(&self, handle: ExportHandle) -> Result<BoHandle> {
        let bo = self
            .registry()?
            .get(&handle.0)
            .and_then(Weak::upgrade)
            .ok_or_else(|| Error::Device(format!("no BO exported as {}", handle.0)))?;
        bo.mark_shared();
        Ok(BoHandle::new(bo))
    }
}

/// Something the queue was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Blit { src: ResourceId, dst: ResourceId },
    FlushWriter(ResourceId),
    FlushAccessing(ResourceId),
    DiscardResolve(ResourceId),
    Measure(ResourceId),
    Pack(ResourceId),
}

#[derive(Debug, Default, Clone, Copy)]
struct BatchAccess {
    reads: bool,
    writes: bool,
}

/// Executes queue work immediately on the CPU.
#[derive(Default)]
pub struct SoftQueue {
    batches: Mutex<HashMap<ResourceId, BatchAccess>>,
    events: Mutex<Vec<QueueEvent>>,
    fail_blits: AtomicBool,
}

/// One surface decoded to row-major blocks.
struct Plane {
    data: Vec<u8>,
    width: u32,
    height: u32,
    bpe: usize,
}

impl Plane {
    fn stride(&self) -> usize {
        self.width as usize * self.bpe
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(word)
}

fn write_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn check_fits(surface: &Surface<'_>, bytes: &[u8]) -> Result<()> {
    if surface.layout.total_size > bytes.len() as u64 {
        return Err(Error::Device(format!(
            "layout of {} bytes does not fit BO {} of {} bytes",
            surface.layout.total_size,
            surface.bo.label(),
            bytes.len()
        )));
    }
    Ok(())
}

fn read_plane(surface: &Surface<'_>, bytes: &[u8], level: u32, layer: u32) -> Result<Plane> {
    check_fits(surface, bytes)?;
    let layout: &ImageLayout = surface.layout;
    let format = surface.format;
    let (bw, bh) = format.block_size();
    let (w, h, _) = layout.level_extent(level);
    let mut plane = Plane {
        data: Vec::new(),
        width: w.div_ceil(bw),
        height: h.div_ceil(bh),
        bpe: format.bytes_per_block() as usize,
    };
    plane.data = vec![0u8; plane.stride() * plane.height as usize];
    let base = layout.surface_offset(level, layer) as usize;
    let slice = layout.slice(level);
    match layout.modifier {
        Modifier::Linear => {
            let stride = plane.stride();
            for y in 0..plane.height as usize {
                let src = base + y * slice.row_stride as usize;
                plane.data[y * stride..(y + 1) * stride].copy_from_slice(&bytes[src..src + stride]);
            }
        }
        Modifier::TiledInterleaved => {
            let stride = plane.stride() as u32;
            tiling::load_tiled_image(
                &mut plane.data,
                &bytes[base..],
                Rect::new(0, 0, w, h),
                stride,
                slice.row_stride,
                format,
            );
        }
        Modifier::Afbc(afbc) => {
            let geometry = slice
                .afbc
                .ok_or_else(|| Error::Device(String::from("AFBC slice without geometry")))?;
            let (sb_w, sb_h) = afbc.superblock.size();
            let payload = payload_size(format, afbc) as usize;
            for sb_y in 0..geometry.rows_sb() {
                for sb_x in 0..geometry.stride_sb {
                    let header = base
                        + header_index(sb_x, sb_y, geometry.stride_sb, afbc) as usize
                            * HEADER_BYTES_PER_SUPERBLOCK as usize;
                    let body = read_u32(bytes, header) as usize;
                    let size = read_u32(bytes, header + 4) as usize;
                    if size == 0 {
                        continue;
                    }
                    let block = &bytes[base + body..base + body + payload];
                    for row in 0..sb_h {
                        let y = sb_y * sb_h + row;
                        if y >= plane.height {
                            break;
                        }
                        let x0 = sb_x * sb_w;
                        if x0 >= plane.width {
                            break;
                        }
                        let n = (sb_w.min(plane.width - x0)) as usize * plane.bpe;
                        let src = row as usize * sb_w as usize * plane.bpe;
                        let dst = y as usize * plane.stride() + x0 as usize * plane.bpe;
                        plane.data[dst..dst + n].copy_from_slice(&block[src..src + n]);
                    }
                }
            }
        }
    }
    Ok(plane)
}

fn write_plane(
    surface: &Surface<'_>,
    bytes: &mut [u8],
    level: u32,
    layer: u32,
    plane: &Plane,
) -> Result<()> {
    check_fits(surface, bytes)?;
    let layout = surface.layout;
    let format = surface.format;
    let (w, h, _) = layout.level_extent(level);
    let base = layout.surface_offset(level, layer) as usize;
    let slice = layout.slice(level);
    match layout.modifier {
        Modifier::Linear => {
            let stride = plane.stride();
            for y in 0..plane.height as usize {
                let dst = base + y * slice.row_stride as usize;
                bytes[dst..dst + stride].copy_from_slice(&plane.data[y * stride..(y + 1) * stride]);
            }
        }
        Modifier::TiledInterleaved => {
            tiling::store_tiled_image(
                &mut bytes[base..],
                &plane.data,
                Rect::new(0, 0, w, h),
                slice.row_stride,
                plane.stride() as u32,
                format,
            );
        }
        Modifier::Afbc(afbc) => {
            if !afbc.sparse {
                return Err(Error::Device(String::from(
                    "packed AFBC cannot be written in place",
                )));
            }
            let geometry = slice
                .afbc
                .ok_or_else(|| Error::Device(String::from("AFBC slice without geometry")))?;
            let (sb_w, sb_h) = afbc.superblock.size();
            let payload = payload_size(format, afbc) as usize;
            let slot = crate::layout::body_slot_size(format, afbc) as usize;
            let mut block = vec![0u8; payload];
            for sb_y in 0..geometry.rows_sb() {
                for sb_x in 0..geometry.stride_sb {
                    block.fill(0);
                    for row in 0..sb_h {
                        let y = sb_y * sb_h + row;
                        let x0 = sb_x * sb_w;
                        if y >= plane.height || x0 >= plane.width {
                            break;
                        }
                        let n = (sb_w.min(plane.width - x0)) as usize * plane.bpe;
                        let dst = row as usize * sb_w as usize * plane.bpe;
                        let src = y as usize * plane.stride() + x0 as usize * plane.bpe;
                        block[dst..dst + n].copy_from_slice(&plane.data[src..src + n]);
                    }
                    let index = header_index(sb_x, sb_y, geometry.stride_sb, afbc) as usize;
                    let header = base + index * HEADER_BYTES_PER_SUPERBLOCK as usize;
                    bytes[header..header + HEADER_BYTES_PER_SUPERBLOCK as usize].fill(0);
                    if block.iter().all(|&b| b == 0) {
                        continue;
                    }
                    let body = geometry.header_size as usize + index * slot;
                    bytes[base + body..base + body + payload].copy_from_slice(&block);
                    write_u32(bytes, header, body as u32);
                    write_u32(bytes, header + 4, payload as u32);
                }
            }
        }
    }
    Ok(())
}

/// Nearest-neighbour copy of `src_rect` of `src` onto `dst_rect` of `dst`, in blocks.
fn copy_scaled(src: &Plane, src_rect: Rect, dst: &mut Plane, dst_rect: Rect) {
    for dy in 0..dst_rect.height {
        let sy = src_rect.y + dy * src_rect.height / dst_rect.height;
        for dx in 0..dst_rect.width {
            let sx = src_rect.x + dx * src_rect.width / dst_rect.width;
            let s = sy as usize * src.stride() + sx as usize * src.bpe;
            let d = (dst_rect.y + dy) as usize * dst.stride() + (dst_rect.x + dx) as usize * dst.bpe;
            dst.data[d..d + dst.bpe].copy_from_slice(&src.data[s..s + src.bpe]);
        }
    }
}

fn block_rect(rect: Rect, surface: &Surface<'_>) -> Rect {
    let (bw, bh) = surface.format.block_size();
    let x = rect.x / bw;
    let y = rect.y / bh;
    Rect::new(
        x,
        y,
        rect.max_x().div_ceil(bw) - x,
        rect.max_y().div_ceil(bh) - y,
    )
}

impl SoftQueue {
    pub fn new() -> Self {
        SoftQueue::default()
    }

    /// Records an unsubmitted batch reading `resource`.
    pub fn record_read(&self, resource: ResourceId) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.entry(resource).or_default().reads = true;
        }
    }

    /// Records an unsubmitted batch writing `resource`.
    pub fn record_write(&self, resource: ResourceId) {
        if let Ok(mut batches) = self.batches.lock() {
            batches.entry(resource).or_default().writes = true;
        }
    }

    /// Makes every following blit fail.
    pub fn fail_blits(&self, fail: bool) {
        self.fail_blits.store(fail, Ordering::Relaxed);
    }

    pub fn events(&self) -> Vec<QueueEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn clear_events(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }

    fn log(&self, event: QueueEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    fn with_batch<R>(&self, resource: ResourceId, f: impl FnOnce(&mut BatchAccess) -> R) -> R {
        match self.batches.lock() {
            Ok(mut batches) => f(batches.entry(resource).or_default()),
            Err(poisoned) => f(poisoned.into_inner().entry(resource).or_default()),
        }
    }
}

impl Queue for SoftQueue {
    fn blit(&self, info: &BlitInfo<'_>) -> Result<()> {
        if self.fail_blits.load(Ordering::Relaxed) {
            return Err(Error::Device(String::from("injected blit failure")));
        }
        if info.src.format.bytes_per_block() != info.dst.format.bytes_per_block()
            || info.src.format.block_size() != info.dst.format.block_size()
        {
            return Err(Error::Device(format!(
                "cannot blit {:?} to {:?}",
                info.src.format, info.dst.format
            )));
        }
        if info.src_box.depth != info.dst_box.depth {
            return Err(Error::Device(String::from("blits cannot scale depth")));
        }
        let src_rect = block_rect(info.src_box.rect(), &info.src);
        let dst_rect = block_rect(info.dst_box.rect(), &info.dst);
        for i in 0..info.src_box.depth {
            let src = {
                let bytes = info.src.bo.map()?;
                read_plane(&info.src, &bytes, info.src_level, info.src_box.z + i)?
            };
            let mut bytes = info.dst.bo.map()?;
            let mut dst = read_plane(&info.dst, &bytes, info.dst_level, info.dst_box.z + i)?;
            copy_scaled(&src, src_rect, &mut dst, dst_rect);
            write_plane(&info.dst, &mut bytes, info.dst_level, info.dst_box.z + i, &dst)?;
        }
        self.log(QueueEvent::Blit {
            src: info.src.resource,
            dst: info.dst.resource,
        });
        Ok(())
    }

    fn flush_writer(&self, resource: ResourceId, _reason: &str) -> Result<()> {
        let flushed = self.with_batch(resource, |b| std::mem::take(&mut b.writes));
        if flushed {
            self.log(QueueEvent::FlushWriter(resource));
        }
        Ok(())
    }

    fn flush_accessing(&self, resource: ResourceId, _reason: &str) -> Result<()> {
        let flushed = self.with_batch(resource, |b| {
            let any = b.reads || b.writes;
            *b = BatchAccess::default();
            any
        });
        if flushed {
            self.log(QueueEvent::FlushAccessing(resource));
        }
        Ok(())
    }

    fn any_batch_reads(&self, resource: ResourceId) -> bool {
        self.with_batch(resource, |b| b.reads)
    }

    fn any_batch_writes(&self, resource: ResourceId) -> bool {
        self.with_batch(resource, |b| b.writes)
    }

    fn discard_pending_resolve(&self, resource: ResourceId) {
        let pending = self.with_batch(resource, |b| std::mem::take(&mut b.writes));
        if pending {
            self.log(QueueEvent::DiscardResolve(resource));
        }
    }

    fn afbc_superblock_sizes(&self, src: &Surface<'_>, level: u32) -> Result<Vec<u32>> {
        let afbc = src
            .layout
            .modifier
            .afbc()
            .ok_or_else(|| Error::Device(String::from("measuring a non-AFBC surface")))?;
        let geometry = src
            .layout
            .slice(level)
            .afbc
            .ok_or_else(|| Error::Device(String::from("AFBC slice without geometry")))?;
        let bytes = src.bo.map()?;
        check_fits(src, &bytes)?;
        let base = src.layout.surface_offset(level, 0) as usize;
        let mut sizes = Vec::with_capacity(geometry.nr_blocks as usize);
        for sb_y in 0..geometry.rows_sb() {
            for sb_x in 0..geometry.stride_sb {
                let header = base
                    + header_index(sb_x, sb_y, geometry.stride_sb, afbc) as usize
                        * HEADER_BYTES_PER_SUPERBLOCK as usize;
                sizes.push(read_u32(&bytes, header + 4));
            }
        }
        drop(bytes);
        self.log(QueueEvent::Measure(src.resource));
        Ok(sizes)
    }

    fn afbc_pack(&self, src: &Surface<'_>, dst: &BoHandle, levels: &[PackedLevel]) -> Result<()> {
        let afbc = src
            .layout
            .modifier
            .afbc()
            .ok_or_else(|| Error::Device(String::from("packing a non-AFBC surface")))?;
        let mut blocks: Vec<Vec<Option<Vec<u8>>>> = Vec::with_capacity(levels.len());
        {
            let bytes = src.bo.map()?;
            check_fits(src, &bytes)?;
            for level in 0..levels.len() as u32 {
                let geometry = src.layout.slice(level).afbc.ok_or_else(|| {
                    Error::Device(String::from("AFBC slice without geometry"))
                })?;
                let base = src.layout.surface_offset(level, 0) as usize;
                let mut level_blocks = Vec::with_capacity(geometry.nr_blocks as usize);
                for sb_y in 0..geometry.rows_sb() {
                    for sb_x in 0..geometry.stride_sb {
                        let header = base
                            + header_index(sb_x, sb_y, geometry.stride_sb, afbc) as usize
                                * HEADER_BYTES_PER_SUPERBLOCK as usize;
                        let body = read_u32(&bytes, header) as usize;
                        let size = read_u32(&bytes, header + 4) as usize;
                        level_blocks.push(
                            (size > 0).then(|| bytes[base + body..base + body + size].to_vec()),
                        );
                    }
                }
                blocks.push(level_blocks);
            }
        }
        let mut bytes = dst.map()?;
        for (level, level_blocks) in levels.iter().zip(&blocks) {
            let base = level.offset as usize;
            for (i, block) in level_blocks.iter().enumerate() {
                let header = base + i * HEADER_BYTES_PER_SUPERBLOCK as usize;
                bytes[header..header + HEADER_BYTES_PER_SUPERBLOCK as usize].fill(0);
                if let Some(payload) = block {
                    let body = level.body_offsets[i] as usize;
                    bytes[base + body..base + body + payload.len()].copy_from_slice(payload);
                    write_u32(&mut bytes, header, body as u32);
                    write_u32(&mut bytes, header + 4, payload.len() as u32);
                }
            }
        }
        drop(bytes);
        self.log(QueueEvent::Pack(src.resource));
        Ok(())
    }
}

/// A device and context wired to the soft backend, with handles for fault injection.
pub struct SoftBackend {
    pub allocator: Arc<SoftAllocator>,
    pub queue: Arc<SoftQueue>,
    pub context: Context,
}

impl SoftBackend {
    pub fn new(arch: Architecture, config: DeviceConfig) -> Self {
        let allocator = Arc::new(SoftAllocator::new());
        let queue = Arc::new(SoftQueue::new());
        let device = Arc::new(Device::new(arch, config, allocator.clone()));
        let context = Context::new(device, queue.clone());
        SoftBackend {
            allocator,
            queue,
            context,
        }
    }

    pub fn for_testing() -> Self {
        SoftBackend::new(Architecture::V7, DeviceConfig::default())
    }

    pub fn device(&self) -> &Arc<Device> {
        self.context.device()
    }
}
