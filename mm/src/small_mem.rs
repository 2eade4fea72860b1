//! First-fit small-heap allocator.
//!
//! A heap is one contiguous region partitioned into a doubly-linked chain of
//! variable-size blocks. Every block starts with a [`SmallMemItem`] header
//! carrying the owning pool (tagged with the used bit in bit 0) and the byte
//! offsets of its chain neighbours. The chain ends at a zero-size, always
//! "used" sentinel (`heap_end`) so searches terminate without bounds juggling.
//!
//! Allocation walks the chain first-fit starting at `lfree`, the cached
//! lowest-addressed free block, splitting when the remainder is big enough
//! to carry its own header plus a minimum payload. Free marks the block and
//! merges it with free neighbours in both directions, so the chain never
//! holds two adjacent free blocks.
//!
//! # Concurrency
//!
//! Every operation runs inside a `save_flags_cli`/`restore_flags` critical
//! section. Operations never block and never suspend, so they are callable
//! from interrupt context.
//!
//! # Multiple heaps
//!
//! The tag word in each header records the owning [`SmallMem`], so
//! [`smem_free`] needs only the payload pointer and debug tooling can walk
//! blocks across several heaps.

use core::ffi::c_void;
use core::mem;
use core::ptr;

use ternos_abi::OBJ_NAME_MAX;
use ternos_lib::object::{ObjectClass, object_detach, object_register};
use ternos_lib::string::{bytes_as_str, copy_name};
use ternos_lib::{align_down_usize, align_up_usize, cpu, klog_debug, klog_error, klog_info};

use crate::error::{MmError, MmResult};

/// Payload alignment; every block boundary and payload is a multiple of this.
pub const ALIGN_SIZE: usize = 8;

/// Smallest payload worth carving out as a separate block (64-bit layout).
const MIN_SIZE: usize = 24;

const MIN_SIZE_ALIGNED: usize = align_up_usize(MIN_SIZE, ALIGN_SIZE);

/// Size of one block header, rounded to the payload alignment.
pub const HEADER_SIZE: usize = align_up_usize(mem::size_of::<SmallMemItem>(), ALIGN_SIZE);

const USED_BIT: usize = 0x1;
const POOL_MASK: usize = !USED_BIT;

/// Per-block header. Lives at the start of every block, including the
/// `heap_end` sentinel. `next`/`prev` are byte offsets from `heap_ptr`, not
/// pointers, so the layout is position-independent within the region.
#[repr(C)]
pub struct SmallMemItem {
    /// Owning pool address with the used flag in bit 0.
    pool_ptr: usize,
    /// Offset of the next block header.
    next: usize,
    /// Offset of the previous block header.
    prev: usize,
}

impl SmallMemItem {
    #[inline]
    fn is_used(&self) -> bool {
        self.pool_ptr & USED_BIT != 0
    }

    #[inline]
    fn pool(&self) -> *mut SmallMem {
        (self.pool_ptr & POOL_MASK) as *mut SmallMem
    }
}

#[inline]
fn used_tag(pool: *mut SmallMem) -> usize {
    (pool as usize & POOL_MASK) | USED_BIT
}

#[inline]
fn free_tag(pool: *mut SmallMem) -> usize {
    pool as usize & POOL_MASK
}

/// Heap control structure, placed at the (aligned) start of the managed
/// region, in front of the first block.
#[repr(C)]
pub struct SmallMem {
    name: [u8; OBJ_NAME_MAX],
    algorithm: &'static str,
    address: usize,
    total: usize,
    used: usize,
    max: usize,
    heap_ptr: *mut u8,
    heap_end: *mut SmallMemItem,
    lfree: *mut SmallMemItem,
    size_aligned: usize,
}

impl SmallMem {
    #[inline]
    unsafe fn item(&self, offset: usize) -> *mut SmallMemItem {
        self.heap_ptr.add(offset) as *mut SmallMemItem
    }

    #[inline]
    fn offset_of(&self, item: *mut SmallMemItem) -> usize {
        item as usize - self.heap_ptr as usize
    }

    /// Offset of the `heap_end` sentinel, one header past the user region.
    #[inline]
    fn end_offset(&self) -> usize {
        self.size_aligned + HEADER_SIZE
    }

    pub fn name(&self) -> &str {
        bytes_as_str(&self.name)
    }

    pub fn algorithm(&self) -> &'static str {
        self.algorithm
    }

    /// Aligned base address of the managed region.
    pub fn address(&self) -> usize {
        self.address
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn used(&self) -> usize {
        self.used
    }

    /// High-water mark of `used`.
    pub fn max_used(&self) -> usize {
        self.max
    }
}

/// Initialize a small heap over the raw region `[begin, begin + size)`.
///
/// The control structure and two initial blocks (one free block covering
/// the whole user region, plus the `heap_end` sentinel) are carved out of
/// the region itself. Returns null if the region cannot hold the control
/// structure, two headers and a minimum payload.
///
/// The heap is registered as a kernel object of class `Memory`.
///
/// # Safety
///
/// `begin..begin + size` must be exclusively owned, writable memory that
/// outlives every allocation made from this heap.
pub unsafe fn smem_init(name: &str, begin: *mut u8, size: usize) -> *mut SmallMem {
    let small_mem = align_up_usize(begin as usize, ALIGN_SIZE) as *mut SmallMem;
    let start_addr = small_mem as usize + mem::size_of::<SmallMem>();
    let begin_align = align_up_usize(start_addr, ALIGN_SIZE);
    let end_align = align_down_usize(begin as usize + size, ALIGN_SIZE);

    if end_align <= 2 * HEADER_SIZE + MIN_SIZE_ALIGNED
        || end_align - 2 * HEADER_SIZE - MIN_SIZE_ALIGNED < begin_align
    {
        klog_error!("smem_init: region {:#x}+{:#x} too small", begin as usize, size);
        return ptr::null_mut();
    }
    let mem_size = end_align - begin_align - 2 * HEADER_SIZE;

    ptr::write(
        small_mem,
        SmallMem {
            name: copy_name::<OBJ_NAME_MAX>(name),
            algorithm: "small",
            address: begin_align,
            total: mem_size,
            used: 0,
            max: 0,
            heap_ptr: begin_align as *mut u8,
            heap_end: ptr::null_mut(),
            lfree: ptr::null_mut(),
            size_aligned: mem_size,
        },
    );
    let heap = &mut *small_mem;

    // First block: one free block spanning the whole user region.
    let first = heap.item(0);
    (*first).pool_ptr = free_tag(small_mem);
    (*first).next = mem_size + HEADER_SIZE;
    (*first).prev = 0;

    // Sentinel block: zero payload, permanently used, self-referencing.
    heap.heap_end = heap.item((*first).next);
    (*heap.heap_end).pool_ptr = used_tag(small_mem);
    (*heap.heap_end).next = mem_size + HEADER_SIZE;
    (*heap.heap_end).prev = mem_size + HEADER_SIZE;

    heap.lfree = first;

    if let Err(e) = object_register(ObjectClass::Memory, name, small_mem as *mut c_void) {
        klog_info!("smem_init: object registry rejected '{}': {:?}", name, e);
    }
    klog_debug!("smem_init: heap '{}' at {:#x}, {} bytes usable", name, begin_align, mem_size);

    small_mem
}

/// Remove a heap from the kernel object registry.
///
/// The backing region is not touched; outstanding allocations keep working
/// but the heap is no longer discoverable by name.
pub fn smem_detach(m: *mut SmallMem) -> MmResult {
    if m.is_null() {
        return Err(MmError::InvalidAddress);
    }
    object_detach(m as *mut c_void).map_err(|_| MmError::InvalidAddress)
}

/// Allocate at least `size` bytes from heap `m`.
///
/// First-fit from the cached lowest free block. Returns null for
/// `size == 0` or when no block fits.
///
/// # Safety
///
/// `m` must be a heap previously returned by [`smem_init`].
pub unsafe fn smem_alloc(m: *mut SmallMem, size: usize) -> *mut c_void {
    if size == 0 {
        return ptr::null_mut();
    }
    debug_assert!(!m.is_null());

    if size != align_up_usize(size, ALIGN_SIZE) {
        klog_debug!("smem_alloc: size {} rounded up to {}", size, align_up_usize(size, ALIGN_SIZE));
    }
    let size = align_up_usize(size, ALIGN_SIZE).max(MIN_SIZE_ALIGNED);

    let heap = &mut *m;
    if size > heap.size_aligned {
        klog_debug!("smem_alloc: {} bytes exceeds heap '{}'", size, heap.name());
        return ptr::null_mut();
    }

    let flags = cpu::save_flags_cli();

    let mut offset = heap.offset_of(heap.lfree);
    while offset <= heap.size_aligned - size {
        let item = heap.item(offset);

        if !(*item).is_used() && (*item).next - (offset + HEADER_SIZE) >= size {
            if (*item).next - (offset + HEADER_SIZE) >= size + HEADER_SIZE + MIN_SIZE_ALIGNED {
                // Split: a fresh free header goes right after the
                // allocated payload and inherits our old successor.
                let offset2 = offset + HEADER_SIZE + size;
                let item2 = heap.item(offset2);
                (*item2).pool_ptr = free_tag(m);
                (*item2).next = (*item).next;
                (*item2).prev = offset;
                (*item).next = offset2;
                if (*item2).next != heap.end_offset() {
                    (*heap.item((*item2).next)).prev = offset2;
                }
                heap.used += size + HEADER_SIZE;
            } else {
                // Remainder too small for a viable block; hand out the
                // whole thing (bounded internal fragmentation).
                heap.used += (*item).next - offset;
            }
            if heap.max < heap.used {
                heap.max = heap.used;
            }

            (*item).pool_ptr = used_tag(m);

            if item == heap.lfree {
                // Advance lfree past the block we just took.
                while (*heap.lfree).is_used() && heap.lfree != heap.heap_end {
                    heap.lfree = heap.item((*heap.lfree).next);
                }
                debug_assert!(heap.lfree == heap.heap_end || !(*heap.lfree).is_used());
            }

            cpu::restore_flags(flags);
            return (item as *mut u8).add(HEADER_SIZE) as *mut c_void;
        }

        offset = (*item).next;
    }

    cpu::restore_flags(flags);
    klog_debug!("smem_alloc: heap '{}' has no fit for {} bytes", heap.name(), size);
    ptr::null_mut()
}

/// Merge `item` with free chain neighbours in both directions.
///
/// Absorbed headers get their tag word cleared; `lfree` follows the merge
/// target downward. The `heap_end` sentinel never participates and keeps
/// its self-referencing links.
unsafe fn plug_holes(heap: &mut SmallMem, item: *mut SmallMemItem) {
    debug_assert!(item as *mut u8 >= heap.heap_ptr);
    debug_assert!((item as usize) < heap.heap_end as usize);

    // Forward: absorb the successor.
    let nitem = heap.item((*item).next);
    if item != nitem && !(*nitem).is_used() && nitem != heap.heap_end {
        if heap.lfree == nitem {
            heap.lfree = item;
        }
        (*nitem).pool_ptr = 0;
        (*item).next = (*nitem).next;
        if (*item).next != heap.end_offset() {
            (*heap.item((*item).next)).prev = heap.offset_of(item);
        }
    }

    // Backward: let the predecessor absorb us.
    let pitem = heap.item((*item).prev);
    if pitem != item && !(*pitem).is_used() {
        if heap.lfree == item {
            heap.lfree = pitem;
        }
        (*item).pool_ptr = 0;
        (*pitem).next = (*item).next;
        if (*item).next != heap.end_offset() {
            (*heap.item((*item).next)).prev = heap.offset_of(pitem);
        }
    }
}

/// Return a block to its owning heap.
///
/// Null is a no-op. The owning heap is recovered from the tag word in the
/// block header, so no heap handle is needed.
///
/// # Safety
///
/// `rmem` must be null or a live pointer previously returned by
/// [`smem_alloc`]/[`smem_realloc`] and not freed since.
pub unsafe fn smem_free(rmem: *mut c_void) {
    if rmem.is_null() {
        return;
    }

    let item = (rmem as *mut u8).sub(HEADER_SIZE) as *mut SmallMemItem;
    let m = (*item).pool();
    if m.is_null() || !(*item).is_used() {
        klog_error!("smem_free: invalid block or double free at {:p}", rmem);
        return;
    }
    let heap = &mut *m;
    debug_assert!(rmem as usize % ALIGN_SIZE == 0);
    debug_assert!(rmem as *mut u8 >= heap.heap_ptr);
    debug_assert!((item as usize) < heap.heap_end as usize);

    let flags = cpu::save_flags_cli();

    (*item).pool_ptr = free_tag(m);
    if item < heap.lfree {
        heap.lfree = item;
    }
    heap.used -= (*item).next - heap.offset_of(item);

    plug_holes(heap, item);

    cpu::restore_flags(flags);
}

/// Resize a previously allocated block.
///
/// `newsize == 0` frees the block; a null `rmem` allocates. Shrinking splits
/// the tail off in place (and coalesces it forward); growing always takes
/// the fresh-allocate-copy-free path, even when the forward neighbour is
/// free — absorbing it is deliberately not attempted.
///
/// # Safety
///
/// Same contract as [`smem_alloc`]/[`smem_free`]; `rmem` must belong to `m`.
pub unsafe fn smem_realloc(m: *mut SmallMem, rmem: *mut c_void, newsize: usize) -> *mut c_void {
    debug_assert!(!m.is_null());
    let heap = &mut *m;

    let newsize = align_up_usize(newsize, ALIGN_SIZE);
    if newsize > heap.size_aligned {
        klog_debug!("smem_realloc: {} bytes exceeds heap '{}'", newsize, heap.name());
        return ptr::null_mut();
    }
    if newsize == 0 {
        smem_free(rmem);
        return ptr::null_mut();
    }
    if rmem.is_null() {
        return smem_alloc(m, newsize);
    }

    debug_assert!(rmem as usize % ALIGN_SIZE == 0);
    debug_assert!(rmem as *mut u8 >= heap.heap_ptr);
    debug_assert!((rmem as usize) < heap.heap_end as usize);

    let flags = cpu::save_flags_cli();

    let item = (rmem as *mut u8).sub(HEADER_SIZE) as *mut SmallMemItem;
    let offset = heap.offset_of(item);
    let size = (*item).next - offset - HEADER_SIZE;
    if size == newsize {
        cpu::restore_flags(flags);
        return rmem;
    }

    if newsize + HEADER_SIZE + MIN_SIZE < size {
        // Shrink in place: split the tail into a new free block.
        heap.used -= size - newsize;

        let offset2 = offset + HEADER_SIZE + newsize;
        let item2 = heap.item(offset2);
        (*item2).pool_ptr = free_tag(m);
        (*item2).next = (*item).next;
        (*item2).prev = offset;
        (*item).next = offset2;
        if (*item2).next != heap.end_offset() {
            (*heap.item((*item2).next)).prev = offset2;
        }

        if item2 < heap.lfree {
            heap.lfree = item2;
        }
        plug_holes(heap, item2);

        cpu::restore_flags(flags);
        return rmem;
    }

    cpu::restore_flags(flags);

    let nmem = smem_alloc(m, newsize);
    if !nmem.is_null() {
        ptr::copy_nonoverlapping(rmem as *const u8, nmem as *mut u8, size.min(newsize));
        smem_free(rmem);
    }
    nmem
}

/// Walk the block chain and verify every structural invariant.
///
/// Checks block bounds, pool-tag ownership, `next`/`prev` agreement, the
/// absence of adjacent free blocks, the `lfree` cache, and that `used`
/// matches the sum over used blocks. Used by the test suites and debug
/// commands.
///
/// # Safety
///
/// `m` must be a heap previously returned by [`smem_init`].
pub unsafe fn smem_check(m: *mut SmallMem) -> MmResult {
    if m.is_null() {
        return Err(MmError::InvalidAddress);
    }
    let heap = &*m;

    let flags = cpu::save_flags_cli();
    let result = check_chain(heap);
    cpu::restore_flags(flags);

    if let Err(e) = result {
        klog_error!("smem_check: heap '{}': {}", heap.name(), e);
    }
    result
}

unsafe fn check_chain(heap: &SmallMem) -> MmResult {
    let mut offset = 0usize;
    let mut used_sum = 0usize;
    let mut lowest_free: Option<usize> = None;
    let mut prev_was_free = false;

    while offset != heap.end_offset() {
        if offset > heap.size_aligned {
            return Err(MmError::InvalidAddress);
        }
        let item = heap.item(offset);
        if (*item).pool() != heap as *const SmallMem as *mut SmallMem {
            return Err(MmError::ChainCorrupt);
        }

        let next = (*item).next;
        if next <= offset || next > heap.end_offset() {
            return Err(MmError::ChainCorrupt);
        }
        if next != heap.end_offset() && (*heap.item(next)).prev != offset {
            return Err(MmError::ChainCorrupt);
        }

        if (*item).is_used() {
            used_sum += next - offset;
            prev_was_free = false;
        } else {
            if prev_was_free {
                // Coalescing missed a pair of adjacent free blocks.
                return Err(MmError::ChainCorrupt);
            }
            if lowest_free.is_none() {
                lowest_free = Some(offset);
            }
            prev_was_free = true;
        }

        offset = next;
    }

    if used_sum != heap.used {
        return Err(MmError::ChainCorrupt);
    }
    let expected_lfree = match lowest_free {
        Some(off) => heap.item(off),
        None => heap.heap_end,
    };
    if heap.lfree != expected_lfree {
        return Err(MmError::ChainCorrupt);
    }
    if heap.max < heap.used {
        return Err(MmError::ChainCorrupt);
    }

    Ok(())
}

/// Log heap statistics, and the full block list at debug level.
///
/// # Safety
///
/// `m` must be a heap previously returned by [`smem_init`].
pub unsafe fn smem_log_stats(m: *mut SmallMem) {
    if m.is_null() {
        return;
    }
    let heap = &*m;

    klog_info!(
        "heap '{}' ({}): total {} used {} max {}",
        heap.name(),
        heap.algorithm(),
        heap.total(),
        heap.used(),
        heap.max_used()
    );

    let flags = cpu::save_flags_cli();
    let mut offset = 0usize;
    while offset != heap.end_offset() {
        let item = heap.item(offset);
        klog_debug!(
            "  [{:#x}] {} bytes {}",
            heap.heap_ptr as usize + offset,
            (*item).next - offset - HEADER_SIZE,
            if (*item).is_used() { "used" } else { "free" }
        );
        offset = (*item).next;
    }
    cpu::restore_flags(flags);
}
