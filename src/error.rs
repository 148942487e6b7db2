// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Errors surfaced by resource operations.

/// Failure of a resource, transition or access operation.
///
/// Codec functions in [`crate::tiling`] never fail; everything above them propagates one of
/// these to the immediate caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A BO, staging resource or tracking bitmap could not be allocated.
    #[error("out of memory allocating {0}")]
    OutOfMemory(String),
    /// An imported layout does not fit the declared width and format.
    #[error("invalid external layout: {0}")]
    InvalidExternalLayout(String),
    /// Raw CPU access was requested on a layout the CPU cannot read directly.
    #[error("direct CPU access is not supported for {0} layouts")]
    UnsupportedDirectAccess(&'static str),
    /// A wait on GPU completion failed because the device faulted.
    #[error("device lost: {0}")]
    DeviceLost(String),
    /// A CPU access names a level or region outside the resource, or a transfer is ended on
    /// the wrong resource.
    #[error("invalid access: {0}")]
    InvalidAccess(String),
    /// A finite wait on GPU completion expired.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The operation would change the layout of a resource whose layout is fixed.
    #[error("layout of resource {0} is fixed")]
    LayoutFixed(u64),
    /// The resource description is not something the hardware can represent.
    #[error("invalid resource template: {0}")]
    InvalidTemplate(String),
    /// A backend-specific failure.
    #[error("backend error: {0}")]
    Device(String),
}

pub type Result<T> = std::result::Result<T, Error>;
