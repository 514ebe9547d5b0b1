//! Pointer-based guid provider.
//!
//! Identities are the addresses of small headers minted through the
//! policy-domain bus: resolving a guid is a single pointer read.

use std::fmt::Debug;
use std::mem;
use std::ptr::NonNull;
use std::sync::{Arc, Weak};

use log::trace;
use parking_lot::Mutex;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::guid::{FatGuid, Guid, GuidKind};
use strand_tasks_int::message::{MemType, PolicyMessage};

use crate::policy::PolicyDomain;

/// Minting and resolution of opaque identities.
///
/// Guids handed to the resolution operations must have been minted by the
/// same provider and must still be live; anything else is a contract
/// violation the provider is free to treat as fatal.
pub trait GuidProvider: Send + Sync + Debug {
    /// First lifecycle phase.
    fn begin(&self) -> Result<()>;
    /// Binds the provider to its policy domain; it serves requests
    /// afterwards.
    fn start(&self, policy: &Arc<PolicyDomain>) -> Result<()>;
    /// Begins teardown.
    fn stop(&self);
    /// Final teardown phase.
    fn finish(&self);

    /// Mints a guid whose identity payload is the caller-supplied `val`.
    fn get_guid(&self, val: u64, kind: GuidKind) -> Result<Guid>;

    /// Mints a guid together with a fresh metadata payload of `size` bytes,
    /// allocated in the same chunk as the identity header.
    fn create_guid(&self, size: usize, kind: GuidKind) -> Result<FatGuid>;

    /// Resolves a guid to its identity payload and kind.
    ///
    /// For guids minted by [`get_guid`] the payload is the caller's `val`;
    /// for guids minted by [`create_guid`] it is the metadata address.
    ///
    /// [`get_guid`]: GuidProvider::get_guid
    /// [`create_guid`]: GuidProvider::create_guid
    fn get_val(&self, guid: Guid) -> (u64, GuidKind);

    /// Resolves a guid to its kind.
    fn get_kind(&self, guid: Guid) -> GuidKind;

    /// Releases a guid, returning its header (and, with `release_val`, the
    /// metadata suffixed to it) to the memory platform.
    fn release_guid(&self, fguid: FatGuid, release_val: bool) -> Result<()>;
}

/// Identity header; the guid of an entity is this header's address.
#[repr(C)]
struct GuidHeader {
    ident: u64,
    kind: GuidKind,
}

/// Size of the identity header prefixed to every minted guid.
const GUID_HEADER_SIZE: usize = mem::size_of::<GuidHeader>();

static_assertions::const_assert_eq!(GUID_HEADER_SIZE, 16);

/// The pointer-based [`GuidProvider`] implementation.
///
/// A header of (identity, kind) is allocated over the bus for every minted
/// guid; `create_guid` suffixes the metadata payload to the header in one
/// allocation, so releasing the header releases the metadata with it.
#[derive(Debug)]
pub struct PtrGuidProvider {
    policy: Mutex<Weak<PolicyDomain>>,
}

impl PtrGuidProvider {
    /// Creates an unbound provider; it serves requests after [`start`].
    ///
    /// [`start`]: GuidProvider::start
    pub fn new() -> Self {
        Self {
            policy: Mutex::new(Weak::new()),
        }
    }

    fn policy(&self) -> Result<Arc<PolicyDomain>> {
        self.policy
            .lock()
            .upgrade()
            .ok_or_else(|| Error::new(ErrorKind::Unavailable, "guid provider is not started"))
    }

    fn alloc_chunk(&self, size: usize) -> Result<NonNull<u8>> {
        let policy = self.policy()?;
        let mut msg = PolicyMessage::MemAlloc {
            size: size as u64,
            properties: 0,
            mem_type: MemType::GuidMemtype,
            ptr: None,
        };
        policy.process_message(&mut msg, true)?;
        match msg {
            PolicyMessage::MemAlloc { ptr: Some(ptr), .. } => Ok(ptr),
            _ => Err(Error::new(
                ErrorKind::Internal,
                "allocation response carries no pointer",
            )),
        }
    }
}

impl Default for PtrGuidProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl GuidProvider for PtrGuidProvider {
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self, policy: &Arc<PolicyDomain>) -> Result<()> {
        *self.policy.lock() = Arc::downgrade(policy);
        Ok(())
    }

    fn stop(&self) {}

    fn finish(&self) {}

    fn get_guid(&self, val: u64, kind: GuidKind) -> Result<Guid> {
        let chunk = self.alloc_chunk(GUID_HEADER_SIZE)?;
        let header = chunk.as_ptr().cast::<GuidHeader>();
        // SAFETY: the chunk is a fresh allocation of header size, aligned
        // to `CHUNK_ALIGN` >= the header's alignment.
        unsafe { header.write(GuidHeader { ident: val, kind }) };
        let guid = Guid::from_raw(header as u64);
        trace!("minted {guid} ({kind:?})");
        Ok(guid)
    }

    fn create_guid(&self, size: usize, kind: GuidKind) -> Result<FatGuid> {
        let chunk = self.alloc_chunk(GUID_HEADER_SIZE + size)?;
        let header = chunk.as_ptr().cast::<GuidHeader>();
        let metadata = chunk.as_ptr() as u64 + GUID_HEADER_SIZE as u64;
        // The identity payload points forward to the metadata, unlike
        // `get_guid` where it is the caller's value.
        //
        // SAFETY: the chunk is a fresh allocation of at least header size,
        // aligned to `CHUNK_ALIGN` >= the header's alignment.
        unsafe {
            header.write(GuidHeader {
                ident: metadata,
                kind,
            });
        }
        let fguid = FatGuid::new(Guid::from_raw(header as u64), metadata as usize as *mut u8);
        trace!("minted {} ({kind:?}, {size} payload bytes)", fguid.guid);
        Ok(fguid)
    }

    fn get_val(&self, guid: Guid) -> (u64, GuidKind) {
        let header = guid.as_raw() as usize as *const GuidHeader;
        // SAFETY: live guids minted by this provider address a valid
        // header; passing anything else violates the provider contract.
        unsafe { ((*header).ident, (*header).kind) }
    }

    fn get_kind(&self, guid: Guid) -> GuidKind {
        let header = guid.as_raw() as usize as *const GuidHeader;
        // SAFETY: see `get_val`.
        unsafe { (*header).kind }
    }

    fn release_guid(&self, fguid: FatGuid, release_val: bool) -> Result<()> {
        if release_val {
            assert!(!fguid.metadata.is_null());
            assert_eq!(
                fguid.metadata as u64,
                fguid.guid.as_raw() + GUID_HEADER_SIZE as u64,
                "metadata of {} is not suffixed to its header",
                fguid.guid
            );
        }
        let policy = self.policy()?;
        let ptr = NonNull::new(fguid.guid.as_raw() as usize as *mut u8).ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, "cannot release the null guid")
        })?;
        let mut msg = PolicyMessage::MemUnalloc {
            ptr,
            mem_type: MemType::GuidMemtype,
        };
        policy.process_message(&mut msg, true)?;
        trace!("released {}", fguid.guid);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::Builder;

    #[test]
    fn get_guid_round_trip() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let provider = runtime.policy().guid_provider();

        let guid = provider.get_guid(42, GuidKind::Worker).unwrap();
        assert!(guid.is_valid());
        assert_eq!(provider.get_val(guid), (42, GuidKind::Worker));
        assert_eq!(provider.get_kind(guid), GuidKind::Worker);

        provider
            .release_guid(FatGuid::new(guid, std::ptr::null_mut()), false)
            .unwrap();
    }

    #[test]
    fn create_guid_suffixes_metadata() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let provider = runtime.policy().guid_provider();

        let fguid = provider.create_guid(32, GuidKind::Db).unwrap();
        assert_eq!(
            fguid.metadata as u64,
            fguid.guid.as_raw() + GUID_HEADER_SIZE as u64
        );
        assert_eq!(provider.get_kind(fguid.guid), GuidKind::Db);
        // the identity payload of a created guid is its metadata address
        assert_eq!(provider.get_val(fguid.guid).0, fguid.metadata as u64);

        // the payload is writable until released
        // SAFETY: `create_guid` returned 32 exclusively owned bytes.
        unsafe { fguid.metadata.write_bytes(0xab, 32) };

        provider.release_guid(fguid, true).unwrap();
    }

    #[test]
    fn distinct_guids_use_distinct_memory() {
        let runtime = Builder::new().workers(Some(1)).build().unwrap();
        let provider = runtime.policy().guid_provider();

        let a = provider.create_guid(8, GuidKind::Db).unwrap();
        let b = provider.create_guid(8, GuidKind::Db).unwrap();
        assert_ne!(a.guid, b.guid);
        assert_ne!(a.metadata, b.metadata);

        provider.release_guid(a, true).unwrap();
        provider.release_guid(b, true).unwrap();
    }

    #[test]
    fn allocation_failure_propagates() {
        // too small for even one guid header
        let runtime = Builder::new()
            .workers(Some(1))
            .memory_limit(Some(8))
            .build()
            .unwrap();
        let provider = runtime.policy().guid_provider();

        let err = provider.get_guid(1, GuidKind::Worker).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceExhausted);
        // nothing was recorded for the failed mint
        assert_eq!(runtime.policy().mem_platform().live_chunks(), 0);
    }
}
