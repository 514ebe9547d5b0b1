//! Opaque identities for runtime-visible entities.

use std::fmt::{Debug, Display, Formatter};

use static_assertions::assert_eq_size;

/// Sentinel identity denoting "no entity".
///
/// Never appears in a workpile and never resolves to metadata.
pub const NULL_GUID: Guid = Guid(0);

/// Sentinel identity for an allocated but not yet bound slot.
pub const UNINITIALIZED_GUID: Guid = Guid(u64::MAX - 1);

/// An opaque 64-bit identity.
///
/// Every runtime-visible entity (worker, task, data block, event, template)
/// carries one. Identity and kind are immutable once the guid has been
/// minted by a guid provider.
#[repr(transparent)]
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Guid(u64);

assert_eq_size!(Guid, u64);

impl Guid {
    /// Reinterprets a raw 64-bit value as a guid.
    ///
    /// The value is only meaningful if it was previously produced by a guid
    /// provider; resolving an arbitrary value is a provider-contract
    /// violation.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit representation.
    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Whether this is [`NULL_GUID`].
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == NULL_GUID.0
    }

    /// Whether this is [`UNINITIALIZED_GUID`].
    #[inline]
    pub const fn is_uninitialized(self) -> bool {
        self.0 == UNINITIALIZED_GUID.0
    }

    /// Whether this guid refers to an entity.
    #[inline]
    pub const fn is_valid(self) -> bool {
        !self.is_null() && !self.is_uninitialized()
    }
}

impl Debug for Guid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Guid({:#x})", self.0)
    }
}

impl Display for Guid {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Kind of the entity a guid refers to.
///
/// The kind determines which metadata layout the resolved pointer
/// addresses.
#[repr(u32)]
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum GuidKind {
    /// No entity.
    None,
    /// A data block.
    Db,
    /// An event-driven task.
    Edt,
    /// A task template.
    EdtTemplate,
    /// An event.
    Event,
    /// A worker.
    Worker,
}

/// A guid paired with a direct pointer to its metadata.
///
/// The pointer is an advisory cache used to avoid re-resolution on hot
/// paths; when both fields are present the pointer must be a valid
/// resolution of the identity at the time the value is passed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FatGuid {
    /// The entity's identity.
    pub guid: Guid,
    /// Cached metadata pointer, or null when not resolved.
    pub metadata: *mut u8,
}

// SAFETY: A `FatGuid` is a value, not a borrow; ownership of the pointee
// travels with it. The at-most-once take discipline of the workpiles
// guarantees that a task's metadata is accessed by one worker at a time.
unsafe impl Send for FatGuid {}
// SAFETY: See the `Send` impl; shared access never dereferences the cached
// pointer without holding the take-side exclusivity.
unsafe impl Sync for FatGuid {}

impl FatGuid {
    /// A fat guid referring to nothing.
    pub const NULL: FatGuid = FatGuid {
        guid: NULL_GUID,
        metadata: std::ptr::null_mut(),
    };

    /// A fat guid for an allocated but unbound slot.
    pub const UNINITIALIZED: FatGuid = FatGuid {
        guid: UNINITIALIZED_GUID,
        metadata: std::ptr::null_mut(),
    };

    /// Creates a fat guid from an identity and its resolved metadata.
    #[inline]
    pub const fn new(guid: Guid, metadata: *mut u8) -> Self {
        Self { guid, metadata }
    }

    /// Whether the identity is [`NULL_GUID`].
    #[inline]
    pub const fn is_null(self) -> bool {
        self.guid.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_are_distinct() {
        assert!(NULL_GUID.is_null());
        assert!(UNINITIALIZED_GUID.is_uninitialized());
        assert_ne!(NULL_GUID, UNINITIALIZED_GUID);
        assert!(!NULL_GUID.is_valid());
        assert!(!UNINITIALIZED_GUID.is_valid());
        assert!(Guid::from_raw(0xdead_beef).is_valid());
    }

    #[test]
    fn raw_round_trip() {
        let guid = Guid::from_raw(42);
        assert_eq!(guid.as_raw(), 42);
        assert_eq!(format!("{guid}"), "0x2a");
    }

    #[test]
    fn null_fat_guid() {
        assert!(FatGuid::NULL.is_null());
        assert!(FatGuid::NULL.metadata.is_null());
        assert!(!FatGuid::UNINITIALIZED.is_null());
    }
}
