// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*!
Collaborator interfaces the resource layer is built on.

The resource layer never talks to the kernel or the command stream directly. It allocates
through an [`Allocator`], touches memory through a [`Bo`], and asks a [`Queue`] to copy pixels
and to synchronize with in-flight batches. A real driver implements these over its kernel
interface; [`soft`] implements them in memory for tests.
*/

use std::any::Any;
use std::fmt::Debug;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use crate::bindings::coordinates::Box3D;
use crate::error::Result;
use crate::layout::{ImageLayout, PackedLevel};
use crate::pixel_formats::PixelFormat;
use crate::resource::ResourceId;

#[cfg(any(test, feature = "testing"))]
pub mod soft;

bitflags::bitflags! {
    /// Allocation properties of a BO.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BoFlags: u32 {
        /// Not mapped until the CPU first asks.
        const DELAY_MMAP = 1 << 0;
        /// Never accessed by the CPU.
        const INVISIBLE = 1 << 1;
        /// Visible to another process through import or export.
        const SHARED = 1 << 2;
    }
}

/// How long a CPU wait on GPU completion may block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Only check whether the work is already done.
    Poll,
    After(Duration),
    Forever,
}

/// A handle another process can import, standing in for a dma-buf file descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExportHandle(pub u64);

/// CPU view of a BO's contents. The BO stays mapped while this is alive.
pub struct CpuMapping<'a>(Box<dyn DerefMut<Target = [u8]> + 'a>);

impl<'a> CpuMapping<'a> {
    pub fn new(inner: impl DerefMut<Target = [u8]> + 'a) -> Self {
        CpuMapping(Box::new(inner))
    }
}

impl Deref for CpuMapping<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &**self.0
    }
}

impl DerefMut for CpuMapping<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut **self.0
    }
}

impl Debug for CpuMapping<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpuMapping").field("len", &self.len()).finish()
    }
}

/// A GPU-visible memory allocation.
pub trait Bo: Any + Send + Sync + Debug {
    fn size(&self) -> u64;
    fn flags(&self) -> BoFlags;
    fn label(&self) -> &str;
    /// Marks the BO as visible to another process.
    fn mark_shared(&self);
    fn map(&self) -> Result<CpuMapping<'_>>;
    /// Waits for the GPU to finish writing the BO, and with `wait_readers` also reading it.
    ///
    /// Returns `Ok(false)` if the timeout expired first.
    fn wait(&self, timeout: Timeout, wait_readers: bool) -> Result<bool>;
    fn export(&self) -> Result<ExportHandle>;
}

/// A reference to a BO. Cloning takes another reference; dropping releases it.
#[derive(Clone, Debug)]
pub struct BoHandle(Arc<dyn Bo>);

impl BoHandle {
    pub fn new(bo: Arc<dyn Bo>) -> Self {
        BoHandle(bo)
    }

    /// Number of live references to the BO.
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn same_bo(&self, other: &BoHandle) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_shared(&self) -> bool {
        self.flags().contains(BoFlags::SHARED)
    }
}

impl Deref for BoHandle {
    type Target = dyn Bo;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// The single owning reference a resource holds on its backing BO.
///
/// Swapping the backing storage goes through [`OwnedBo::replace`], which hands back the
/// previous reference so the caller decides when it is released.
#[derive(Debug)]
pub struct OwnedBo(BoHandle);

impl OwnedBo {
    pub fn new(handle: BoHandle) -> Self {
        OwnedBo(handle)
    }

    pub fn handle(&self) -> &BoHandle {
        &self.0
    }

    #[must_use]
    pub fn replace(&mut self, handle: BoHandle) -> BoHandle {
        std::mem::replace(&mut self.0, handle)
    }

    pub fn into_handle(self) -> BoHandle {
        self.0
    }
}

impl Deref for OwnedBo {
    type Target = dyn Bo;
    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

/// Creates and imports BOs.
pub trait Allocator: Send + Sync {
    fn create(&self, size: u64, flags: BoFlags, label: &str) -> Result<BoHandle>;
    fn import(&self, handle: ExportHandle) -> Result<BoHandle>;
}

/// What the queue needs to know about one side of a copy.
#[derive(Debug, Clone, Copy)]
pub struct Surface<'a> {
    pub resource: ResourceId,
    pub bo: &'a BoHandle,
    pub layout: &'a ImageLayout,
    /// Format to interpret the data as; may differ from `layout.format` when reinterpreting.
    pub format: PixelFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Filter {
    Nearest,
    Linear,
}

/// A rectangular copy between two surfaces. `z` of each box selects the first layer.
#[derive(Debug, Clone, Copy)]
pub struct BlitInfo<'a> {
    pub src: Surface<'a>,
    pub src_level: u32,
    pub src_box: Box3D,
    pub dst: Surface<'a>,
    pub dst_level: u32,
    pub dst_box: Box3D,
    pub filter: Filter,
}

/// The command-batching subsystem: GPU copies plus knowledge of in-flight batches.
pub trait Queue: Send + Sync {
    fn blit(&self, info: &BlitInfo<'_>) -> Result<()>;

    /// Submits the batch writing `resource`, if any.
    fn flush_writer(&self, resource: ResourceId, reason: &str) -> Result<()>;

    /// Submits every batch reading or writing `resource`.
    fn flush_accessing(&self, resource: ResourceId, reason: &str) -> Result<()>;

    fn any_batch_reads(&self, resource: ResourceId) -> bool;

    fn any_batch_writes(&self, resource: ResourceId) -> bool;

    /// Drops pending resolves of `resource` from unsubmitted batches; its contents are garbage.
    fn discard_pending_resolve(&self, resource: ResourceId);

    /// Measures the compressed payload size of every superblock of `level`, raster order.
    fn afbc_superblock_sizes(&self, src: &Surface<'_>, level: u32) -> Result<Vec<u32>>;

    /// Copies every level of `src` into `dst` with the packed placement `levels`.
    fn afbc_pack(&self, src: &Surface<'_>, dst: &BoHandle, levels: &[PackedLevel]) -> Result<()>;
}
