#![no_std]
#![allow(unsafe_op_in_unsafe_fn)]
#![allow(static_mut_refs)]

pub mod error;
pub mod small_mem;

use core::alloc::{GlobalAlloc, Layout};
use core::ffi::c_void;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use ternos_lib::{align_up_usize, klog_info};

use crate::small_mem::{ALIGN_SIZE, SmallMem, smem_alloc, smem_free, smem_init, smem_realloc};

/// Size of the statically reserved system heap.
const SYSTEM_HEAP_SIZE: usize = 2 * 1024 * 1024;

/// Aligned backing store for the system heap. The array must be at least
/// 16-byte aligned so over-aligned `Layout` requests can be satisfied by
/// offsetting inside an 8-aligned block.
#[repr(C, align(16))]
struct AlignedHeap([u8; SYSTEM_HEAP_SIZE]);

#[unsafe(link_section = ".bss.heap")]
static mut SYSTEM_HEAP_REGION: AlignedHeap = AlignedHeap([0; SYSTEM_HEAP_SIZE]);

/// The system heap, once [`system_heap_init`] has run. Null before that.
static SYSTEM_HEAP: AtomicPtr<SmallMem> = AtomicPtr::new(ptr::null_mut());

/// Install the small-mem allocator over the static system heap region.
///
/// Idempotent: repeated calls keep the first heap.
pub fn system_heap_init() {
    if !SYSTEM_HEAP.load(Ordering::Acquire).is_null() {
        return;
    }
    let heap = unsafe {
        smem_init(
            "heap",
            SYSTEM_HEAP_REGION.0.as_mut_ptr(),
            SYSTEM_HEAP_SIZE,
        )
    };
    if heap.is_null() {
        panic!("system_heap_init: failed to initialize the system heap");
    }
    SYSTEM_HEAP.store(heap, Ordering::Release);
}

/// Handle of the system heap, or null before initialization.
pub fn system_heap() -> *mut SmallMem {
    SYSTEM_HEAP.load(Ordering::Acquire)
}

/// Allocate from the system heap. Null before init or on exhaustion.
pub fn kmalloc(size: usize) -> *mut c_void {
    let heap = system_heap();
    if heap.is_null() {
        klog_info!("kmalloc: system heap not initialized");
        return ptr::null_mut();
    }
    unsafe { smem_alloc(heap, size) }
}

/// Allocate zeroed memory from the system heap.
pub fn kzalloc(size: usize) -> *mut c_void {
    let out = kmalloc(size);
    if !out.is_null() {
        unsafe { ptr::write_bytes(out as *mut u8, 0, size) };
    }
    out
}

/// Resize a system-heap allocation.
pub fn krealloc(ptr_in: *mut c_void, new_size: usize) -> *mut c_void {
    let heap = system_heap();
    if heap.is_null() {
        klog_info!("krealloc: system heap not initialized");
        return ptr::null_mut();
    }
    unsafe { smem_realloc(heap, ptr_in, new_size) }
}

/// Free a block allocated from any small-mem heap.
pub fn kfree(ptr_in: *mut c_void) {
    if ptr_in.is_null() {
        return;
    }
    unsafe { smem_free(ptr_in) };
}

/// `GlobalAlloc` façade over the system heap, for `alloc::` containers in
/// kernel binaries.
///
/// Alignments up to [`ALIGN_SIZE`] come straight from the allocator;
/// over-aligned requests get a padded block with the raw base stashed in
/// the word before the returned pointer.
pub struct KernelAllocator;

impl KernelAllocator {
    pub const fn new() -> Self {
        Self
    }
}

unsafe impl GlobalAlloc for KernelAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let align = layout.align().max(ALIGN_SIZE);
        let size = layout.size();
        if align <= ALIGN_SIZE {
            return kmalloc(size) as *mut u8;
        }

        let extra = align_up_usize(mem::size_of::<usize>(), ALIGN_SIZE);
        let total = size.saturating_add(align).saturating_add(extra);
        let raw = kmalloc(total) as *mut u8;
        if raw.is_null() {
            return ptr::null_mut();
        }

        let base = raw as usize;
        let aligned = align_up_usize(base.saturating_add(extra), align);
        let slot = (aligned - mem::size_of::<usize>()) as *mut usize;
        *slot = base;
        aligned as *mut u8
    }

    unsafe fn dealloc(&self, ptr_in: *mut u8, layout: Layout) {
        if ptr_in.is_null() {
            return;
        }

        let align = layout.align().max(ALIGN_SIZE);
        if align <= ALIGN_SIZE {
            kfree(ptr_in as *mut c_void);
            return;
        }

        let slot = (ptr_in as usize).saturating_sub(mem::size_of::<usize>()) as *mut usize;
        let raw = *slot as *mut u8;
        if !raw.is_null() {
            kfree(raw as *mut c_void);
        }
    }
}
