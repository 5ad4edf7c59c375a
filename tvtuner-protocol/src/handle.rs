//! Resource handle codec.
//!
//! Clients never see driver objects directly. They hold an opaque 32-bit
//! handle handed out by the resource manager, and the broker recovers the
//! driver-side resource id from it.
//!
//! ```text
//!  31        24 23        16 15                     0
//! +------------+------------+------------------------+
//! |  reserved  | resource id|        reserved        |
//! +------------+------------+------------------------+
//! ```
//!
//! Only bits 16..=23 are decoded. Everything else is carried through
//! untouched.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::HandleError;

/// Mask selecting the resource id field of a handle.
pub const RESOURCE_ID_MASK: u32 = 0x00FF_0000;

/// Bit offset of the resource id field.
pub const RESOURCE_ID_SHIFT: u32 = 16;

/// Largest id that fits in the handle field.
pub const MAX_RESOURCE_ID: u32 = RESOURCE_ID_MASK >> RESOURCE_ID_SHIFT;

/// Kind of tuner resource a handle refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    Frontend,
    Lnb,
    Demux,
    Descrambler,
}

impl ResourceKind {
    /// Lower-case name used in logs and error messages.
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Frontend => "frontend",
            ResourceKind::Lnb => "lnb",
            ResourceKind::Demux => "demux",
            ResourceKind::Descrambler => "descrambler",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Driver-side resource identifier decoded from a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub u32);

impl ResourceId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for ResourceId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Opaque client-supplied resource handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Returns a handle carrying `id` in the resource id field.
    ///
    /// All bits outside the field are kept as they are.
    pub fn with_resource_id(self, id: ResourceId) -> Result<Self, HandleError> {
        if id.get() > MAX_RESOURCE_ID {
            return Err(HandleError::IdOutOfRange(id.get()));
        }
        Ok(Self(
            (self.0 & !RESOURCE_ID_MASK) | (id.get() << RESOURCE_ID_SHIFT),
        ))
    }

    /// Decode the resource id of this handle.
    pub fn resource_id(self, kind: ResourceKind) -> ResourceId {
        resolve_resource_id(self, kind)
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl From<u32> for ResourceHandle {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<i32> for ResourceHandle {
    fn from(value: i32) -> Self {
        Self(value as u32)
    }
}

/// Extract the resource id carried in bits 16..=23 of `handle`.
///
/// `kind` does not influence the extraction yet; every kind shares the same
/// field. Any 32-bit value decodes. Ids that name no live resource are
/// rejected later by whoever looks them up.
pub fn resolve_resource_id(handle: ResourceHandle, _kind: ResourceKind) -> ResourceId {
    ResourceId((handle.raw() & RESOURCE_ID_MASK) >> RESOURCE_ID_SHIFT)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ResourceKind; 4] = [
        ResourceKind::Frontend,
        ResourceKind::Lnb,
        ResourceKind::Demux,
        ResourceKind::Descrambler,
    ];

    #[test]
    fn test_resolve_extracts_bits_16_to_23() {
        let handle = ResourceHandle::from_raw(0x00AB_0000);
        assert_eq!(
            resolve_resource_id(handle, ResourceKind::Frontend),
            ResourceId(0xAB)
        );
    }

    #[test]
    fn test_resolve_ignores_kind() {
        for raw in [0u32, 0x0001_0000, 0xFFFF_FFFF, 0x12AB_CDEF, 0x8000_0001] {
            let handle = ResourceHandle::from_raw(raw);
            let expected = ResourceId((raw >> 16) & 0xFF);
            for kind in ALL_KINDS {
                assert_eq!(resolve_resource_id(handle, kind), expected);
            }
        }
    }

    #[test]
    fn test_reserved_bits_do_not_leak_into_id() {
        let handle = ResourceHandle::from_raw(0xFF00_FFFF);
        assert_eq!(handle.resource_id(ResourceKind::Lnb), ResourceId(0));
    }

    #[test]
    fn test_with_resource_id_preserves_other_bits() {
        let handle = ResourceHandle::from_raw(0x7E12_3456);
        let updated = handle.with_resource_id(ResourceId(0x05)).unwrap();
        assert_eq!(updated.raw(), 0x7E05_3456);
        assert_eq!(updated.resource_id(ResourceKind::Frontend), ResourceId(5));
    }

    #[test]
    fn test_with_resource_id_rejects_wide_ids() {
        let handle = ResourceHandle::from_raw(0);
        assert_eq!(
            handle.with_resource_id(ResourceId(0x100)),
            Err(HandleError::IdOutOfRange(0x100))
        );
    }

    #[test]
    fn test_negative_aidl_handle() {
        // Handles arrive as i32 over the service interface.
        let handle = ResourceHandle::from(-1i32);
        assert_eq!(handle.resource_id(ResourceKind::Demux), ResourceId(0xFF));
    }
}
