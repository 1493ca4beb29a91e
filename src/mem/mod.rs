//! Fixed-block memory partitions
//!
//! A partition serves blocks of one fixed size from caller-supplied
//! memory. The free list is threaded through the blocks themselves: the
//! first machine word of a free block holds the address of the next one.
//! No splitting, no merging, no fragmentation; a caller needing several
//! block sizes creates several partitions.

use core::mem::{align_of, size_of};
use core::ptr;

use crate::config::{CFG_ARG_CHK_EN, CFG_MAX_MEM_PART};
use crate::critical::critical_section;
use crate::error::{OsError, OsResult};
use crate::kernel::{self, OsState};
use crate::types::MemIdx;

/// Memory partition control block
pub struct OsMemPart {
    /// Partition base address; null while the control block is unused
    pub(crate) addr: *mut u8,
    /// Head of the free block list
    pub(crate) free_list: *mut u8,
    /// Size of each block in bytes
    pub(crate) blk_size: u32,
    /// Total number of blocks
    pub(crate) n_blks: u32,
    /// Number of blocks currently free
    pub(crate) n_free: u32,
    pub(crate) next_free: Option<MemIdx>,
}

unsafe impl Send for OsMemPart {}
unsafe impl Sync for OsMemPart {}

impl OsMemPart {
    pub const fn new() -> Self {
        OsMemPart {
            addr: ptr::null_mut(),
            free_list: ptr::null_mut(),
            blk_size: 0,
            n_blks: 0,
            n_free: 0,
            next_free: None,
        }
    }
}

/// Opaque handle to a pooled partition control block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OsMemHandle(pub(crate) MemIdx);

/// Snapshot of a partition, produced by [`os_mem_query`]
#[derive(Debug, Clone, Copy)]
pub struct OsMemInfo {
    pub addr: *mut u8,
    pub free_list: *mut u8,
    pub blk_size: u32,
    pub n_blks: u32,
    pub n_free: u32,
    pub n_used: u32,
}

fn mem_index(st: &OsState, h: OsMemHandle) -> OsResult<usize> {
    let i = h.0 as usize;
    if i >= CFG_MAX_MEM_PART || st.mems[i].addr.is_null() {
        return Err(OsError::MemInvalidPmem);
    }
    Ok(i)
}

impl OsState {
    /// Bind a free MCB to the partition memory and thread the free list
    /// through the blocks.
    ///
    /// # Safety
    /// `addr` must point to `nblks * blksize` bytes of writable memory
    /// owned by the partition for the kernel's lifetime.
    pub(crate) unsafe fn mem_create_core(
        &mut self,
        addr: *mut u8,
        nblks: u32,
        blksize: u32,
    ) -> OsResult<MemIdx> {
        let Some(i) = self.mem_free else {
            return Err(OsError::MemInvalidPart);
        };
        self.mem_free = self.mems[i as usize].next_free;

        let mut blk = addr;
        for _ in 0..nblks - 1 {
            let next = unsafe { blk.add(blksize as usize) };
            unsafe { blk.cast::<*mut u8>().write(next) };
            blk = next;
        }
        unsafe { blk.cast::<*mut u8>().write(ptr::null_mut()) };

        let part = &mut self.mems[i as usize];
        part.addr = addr;
        part.free_list = addr;
        part.blk_size = blksize;
        part.n_blks = nblks;
        part.n_free = nblks;
        part.next_free = None;
        Ok(i)
    }

    pub(crate) fn mem_get_core(&mut self, m: usize) -> OsResult<*mut u8> {
        let part = &mut self.mems[m];
        if part.n_free == 0 {
            return Err(OsError::MemNoFreeBlks);
        }
        let blk = part.free_list;
        // SAFETY: blocks on the free list store the next link in their
        // first word; the list was built by mem_create_core.
        part.free_list = unsafe { blk.cast::<*mut u8>().read() };
        part.n_free -= 1;
        Ok(blk)
    }

    /// # Safety
    /// `blk` must be a block obtained from this partition via
    /// [`mem_get_core`](Self::mem_get_core).
    pub(crate) unsafe fn mem_put_core(&mut self, m: usize, blk: *mut u8) -> OsResult<()> {
        let part = &mut self.mems[m];
        if part.n_free >= part.n_blks {
            return Err(OsError::MemFull);
        }
        unsafe { blk.cast::<*mut u8>().write(part.free_list) };
        part.free_list = blk;
        part.n_free += 1;
        Ok(())
    }
}

/// Create a fixed-block partition over `nblks` blocks of `blksize` bytes
/// starting at `addr`.
///
/// The block size must hold at least one pointer and be a multiple of the
/// pointer size, and `addr` must be pointer-aligned, so the free-list
/// links are aligned stores.
///
/// # Safety
/// `addr` must point to at least `nblks * blksize` bytes of memory that
/// the caller cedes to the partition for the kernel's lifetime.
pub unsafe fn os_mem_create(addr: *mut u8, nblks: u32, blksize: u32) -> OsResult<OsMemHandle> {
    if kernel::KERNEL.int_nesting() > 0 {
        return Err(OsError::CreateIsr);
    }
    if CFG_ARG_CHK_EN {
        if addr.is_null() || addr.align_offset(align_of::<*mut u8>()) != 0 {
            return Err(OsError::MemInvalidAddr);
        }
        if nblks < 2 {
            return Err(OsError::MemInvalidBlks);
        }
        if (blksize as usize) < size_of::<*mut u8>() || blksize as usize % size_of::<*mut u8>() != 0
        {
            return Err(OsError::MemInvalidSize);
        }
    }

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let i = unsafe { st.mem_create_core(addr, nblks, blksize)? };
        crate::trace!("mem partition created, slot {}, {} blocks", i, nblks);
        Ok(OsMemHandle(i))
    })
}

/// Take one block from the partition.
pub fn os_mem_get(h: OsMemHandle) -> OsResult<*mut u8> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let m = mem_index(st, h)?;
        st.mem_get_core(m)
    })
}

/// Return a block to the partition.
///
/// Returning more blocks than the partition holds fails with `MemFull`;
/// that is the double-free guard.
///
/// # Safety
/// `blk` must be a block obtained from this partition via [`os_mem_get`].
pub unsafe fn os_mem_put(h: OsMemHandle, blk: *mut u8) -> OsResult<()> {
    if CFG_ARG_CHK_EN && blk.is_null() {
        return Err(OsError::MemInvalidPblk);
    }

    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let m = mem_index(st, h)?;
        unsafe { st.mem_put_core(m, blk) }
    })
}

/// Snapshot the partition state.
pub fn os_mem_query(h: OsMemHandle) -> OsResult<OsMemInfo> {
    critical_section(|cs| {
        let st = kernel::OS.get(cs);
        let m = mem_index(st, h)?;
        let part = &st.mems[m];
        Ok(OsMemInfo {
            addr: part.addr,
            free_list: part.free_list,
            blk_size: part.blk_size,
            n_blks: part.n_blks,
            n_free: part.n_free,
            n_used: part.n_blks - part.n_free,
        })
    })
}
