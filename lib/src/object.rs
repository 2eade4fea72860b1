//! Kernel object registry.
//!
//! Every long-lived kernel object (timer, memory pool, thread) registers
//! here under a class tag and a NUL-padded name. The registry backs the
//! debug surface: finding an object by name and iterating all objects of a
//! class. It holds raw pointers only — ownership stays with the subsystem
//! that registered the object, and an object must detach itself before it
//! is destroyed.
//!
//! A fixed-size table under an [`IrqMutex`] keeps the registry usable from
//! any context. Optional take/put instrumentation hooks are nullable
//! function pointers with zero overhead when absent.

use core::ffi::c_void;
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use ternos_abi::OBJ_NAME_MAX;

use crate::spinlock::IrqMutex;
use crate::string::{bytes_as_str, copy_name};

/// Class tag of a registered kernel object.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectClass {
    Timer,
    Memory,
    Thread,
}

/// Capacity of the object table.
pub const OBJECT_TABLE_SIZE: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjectError {
    TableFull,
    NotFound,
}

#[derive(Clone, Copy)]
struct ObjectEntry {
    class: ObjectClass,
    name: [u8; OBJ_NAME_MAX],
    ptr: *mut c_void,
}

struct ObjectTable {
    entries: [Option<ObjectEntry>; OBJECT_TABLE_SIZE],
}

// SAFETY: the raw object pointers are opaque handles here; the registry
// never dereferences them.
unsafe impl Send for ObjectTable {}

static OBJECT_TABLE: IrqMutex<ObjectTable> = IrqMutex::new(ObjectTable {
    entries: [None; OBJECT_TABLE_SIZE],
});

/// Register an object under `class` and `name`.
///
/// Names are truncated to [`OBJ_NAME_MAX`] - 1 bytes. Duplicate names are
/// permitted (lookup returns the first match).
pub fn object_register(class: ObjectClass, name: &str, object: *mut c_void) -> Result<(), ObjectError> {
    let mut table = OBJECT_TABLE.lock();
    for slot in table.entries.iter_mut() {
        if slot.is_none() {
            *slot = Some(ObjectEntry {
                class,
                name: copy_name::<OBJ_NAME_MAX>(name),
                ptr: object,
            });
            return Ok(());
        }
    }
    Err(ObjectError::TableFull)
}

/// Remove an object from the registry.
pub fn object_detach(object: *mut c_void) -> Result<(), ObjectError> {
    let mut table = OBJECT_TABLE.lock();
    for slot in table.entries.iter_mut() {
        if let Some(entry) = slot {
            if entry.ptr == object {
                *slot = None;
                return Ok(());
            }
        }
    }
    Err(ObjectError::NotFound)
}

/// Find the first object of `class` registered under `name`.
///
/// Returns a null pointer if no such object exists.
pub fn object_find(class: ObjectClass, name: &str) -> *mut c_void {
    let table = OBJECT_TABLE.lock();
    for entry in table.entries.iter().flatten() {
        if entry.class == class && bytes_as_str(&entry.name) == name {
            return entry.ptr;
        }
    }
    ptr::null_mut()
}

/// Invoke `f` for every registered object of `class`.
///
/// The table lock is held across the iteration; `f` must not call back into
/// the registry.
pub fn object_each(class: ObjectClass, mut f: impl FnMut(&str, *mut c_void)) {
    let table = OBJECT_TABLE.lock();
    for entry in table.entries.iter().flatten() {
        if entry.class == class {
            f(bytes_as_str(&entry.name), entry.ptr);
        }
    }
}

// ---------------------------------------------------------------------------
// Instrumentation hooks
// ---------------------------------------------------------------------------

/// Hook signature: called with the object's class and raw pointer.
pub type ObjectHook = fn(ObjectClass, *mut c_void);

static TAKE_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());
static PUT_HOOK: AtomicPtr<()> = AtomicPtr::new(ptr::null_mut());

/// Install a hook invoked when a subsystem takes an object (e.g. timer start).
pub fn object_take_sethook(hook: ObjectHook) {
    TAKE_HOOK.store(hook as *mut (), Ordering::Release);
}

/// Install a hook invoked when a subsystem releases an object (e.g. timer stop).
pub fn object_put_sethook(hook: ObjectHook) {
    PUT_HOOK.store(hook as *mut (), Ordering::Release);
}

#[inline]
fn call_hook(slot: &AtomicPtr<()>, class: ObjectClass, object: *mut c_void) {
    let raw = slot.load(Ordering::Acquire);
    if !raw.is_null() {
        // SAFETY: only valid `ObjectHook` fn pointers are stored above.
        let hook: ObjectHook = unsafe { core::mem::transmute(raw) };
        hook(class, object);
    }
}

#[inline]
pub fn object_call_take_hook(class: ObjectClass, object: *mut c_void) {
    call_hook(&TAKE_HOOK, class, object);
}

#[inline]
pub fn object_call_put_hook(class: ObjectClass, object: *mut c_void) {
    call_hook(&PUT_HOOK, class, object);
}
