//! Memory platform backing the `MEM_ALLOC`/`MEM_UNALLOC` messages.

use std::alloc::{self, Layout};
use std::fmt::Debug;
use std::ptr::NonNull;

use log::{debug, trace, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use strand_tasks_int::error::{Error, ErrorKind, Result};
use strand_tasks_int::message::MemType;

/// Alignment of every chunk handed out by a memory platform.
///
/// Large enough for a guid header followed by any metadata payload the core
/// stores.
pub const CHUNK_ALIGN: usize = 16;

/// The allocation service behind the policy-domain bus.
///
/// All runtime allocations flow through this contract; no component calls a
/// raw allocator directly.
pub trait MemPlatform: Send + Sync + Debug {
    /// First lifecycle phase; no allocations may be outstanding yet.
    fn begin(&self) -> Result<()>;
    /// Second lifecycle phase; the platform must serve requests afterwards.
    fn start(&self) -> Result<()>;
    /// Begins teardown; outstanding chunks stay valid until returned or
    /// swept.
    fn stop(&self);
    /// Final teardown phase.
    fn finish(&self);

    /// Hands out a chunk of at least `size` bytes, aligned to
    /// [`CHUNK_ALIGN`].
    fn allocate(&self, size: u64, mem_type: MemType) -> Result<NonNull<u8>>;

    /// Returns a chunk previously obtained from [`allocate`].
    ///
    /// [`allocate`]: MemPlatform::allocate
    fn deallocate(&self, ptr: NonNull<u8>, mem_type: MemType) -> Result<()>;

    /// Diagnostic: number of chunks currently live.
    fn live_chunks(&self) -> usize;
}

#[derive(Debug, Default)]
struct AllocState {
    live: FxHashMap<usize, Layout>,
    in_use: usize,
}

/// Process-heap memory platform with an optional byte budget.
///
/// Tracks every live chunk so a double free is caught and anything still
/// outstanding at teardown is swept instead of leaked.
#[derive(Debug)]
pub struct PlatformAllocator {
    budget: Option<usize>,
    state: Mutex<AllocState>,
}

impl PlatformAllocator {
    /// Creates an allocator, optionally capped at `budget` bytes in use.
    pub fn new(budget: Option<usize>) -> Self {
        Self {
            budget,
            state: Mutex::new(AllocState::default()),
        }
    }

    /// Bytes currently in use.
    pub fn bytes_in_use(&self) -> usize {
        self.state.lock().in_use
    }
}

impl MemPlatform for PlatformAllocator {
    fn begin(&self) -> Result<()> {
        Ok(())
    }

    fn start(&self) -> Result<()> {
        debug!("memory platform started, budget {:?}", self.budget);
        Ok(())
    }

    fn stop(&self) {}

    fn finish(&self) {}

    fn allocate(&self, size: u64, mem_type: MemType) -> Result<NonNull<u8>> {
        if size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "zero-sized allocation",
            ));
        }
        let size = size as usize;
        let layout = Layout::from_size_align(size, CHUNK_ALIGN)
            .map_err(|e| Error::new(ErrorKind::InvalidArgument, e))?;

        let mut state = self.state.lock();
        if let Some(budget) = self.budget {
            if state.in_use + size > budget {
                warn!(
                    "memory budget exhausted: {} in use, {size} requested, {budget} allowed",
                    state.in_use
                );
                return Err(ErrorKind::ResourceExhausted.into());
            }
        }

        // SAFETY: `layout` has a non-zero size.
        let raw = unsafe { alloc::alloc(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            return Err(ErrorKind::ResourceExhausted.into());
        };
        state.live.insert(ptr.as_ptr() as usize, layout);
        state.in_use += size;
        trace!("allocated {size} bytes for {mem_type:?}");
        Ok(ptr)
    }

    fn deallocate(&self, ptr: NonNull<u8>, mem_type: MemType) -> Result<()> {
        let mut state = self.state.lock();
        let Some(layout) = state.live.remove(&(ptr.as_ptr() as usize)) else {
            return Err(Error::new(
                ErrorKind::NotFound,
                "pointer is not a live allocation",
            ));
        };
        state.in_use -= layout.size();
        // SAFETY: the chunk was allocated with exactly this layout and has
        // just been removed from the registry, so it cannot be freed twice.
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        trace!("released {} bytes for {mem_type:?}", layout.size());
        Ok(())
    }

    fn live_chunks(&self) -> usize {
        self.state.lock().live.len()
    }
}

impl Drop for PlatformAllocator {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        if !state.live.is_empty() {
            debug!("sweeping {} chunks still live at teardown", state.live.len());
        }
        for (&ptr, layout) in &state.live {
            // SAFETY: every registry entry was allocated with its recorded
            // layout and is freed exactly once by this sweep.
            unsafe { alloc::dealloc(ptr as *mut u8, *layout) };
        }
        state.live.clear();
        state.in_use = 0;
    }
}
