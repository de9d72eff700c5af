//! The real guest: linear memory, global allocator and the instance state
//! the generated exports run against.

use std::alloc::{self, Layout};
use std::cell::{RefCell, UnsafeCell};
use std::fmt;

use trinity_abi::{AbiError, FlatString, LinearMemory, LogLevel};

use crate::alloc::GuestMemory;
use crate::error::GuestError;
use crate::exports::Guest;
use crate::imports;

const PAGE_SIZE: usize = 65536;

#[repr(C, align(4))]
struct ReturnArea(UnsafeCell<[u8; 8]>);

// Wasm modules are single threaded.
unsafe impl Sync for ReturnArea {}

static RETURN_AREA: ReturnArea = ReturnArea(UnsafeCell::new([0; 8]));

thread_local! {
    static GUEST: RefCell<Guest<WasmHeap>> = RefCell::new(Guest::new(WasmHeap));
}

/// This module's own linear memory.
#[derive(Debug)]
pub struct WasmHeap;

fn checked(addr: u32, len: u32) -> Result<(), AbiError> {
    let size = core::arch::wasm32::memory_size(0) * PAGE_SIZE;
    let in_bounds = addr != 0
        && (addr as usize)
            .checked_add(len as usize)
            .is_some_and(|end| end <= size);
    if in_bounds {
        Ok(())
    } else {
        Err(AbiError::OutOfBounds { addr, len, size })
    }
}

impl LinearMemory for WasmHeap {
    fn read(&self, addr: u32, len: u32) -> Result<&[u8], AbiError> {
        if len == 0 {
            return Ok(&[]);
        }
        checked(addr, len)?;
        // SAFETY: the range lies inside the memory we are running in.
        Ok(unsafe { std::slice::from_raw_parts(addr as *const u8, len as usize) })
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<(), AbiError> {
        if bytes.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| AbiError::LengthOverflow(bytes.len()))?;
        checked(addr, len)?;
        // SAFETY: as above; the source is a distinct Rust borrow.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), addr as *mut u8, bytes.len()) };
        Ok(())
    }
}

impl GuestMemory for WasmHeap {
    fn realloc(&mut self, ptr: u32, old_size: u32, align: u32, new_size: u32) -> u32 {
        realloc(ptr, old_size, align, new_size)
    }

    fn return_area(&self) -> u32 {
        RETURN_AREA.0.get() as u32
    }

    fn static_str(&mut self, s: &'static str) -> FlatString {
        FlatString {
            ptr: s.as_ptr() as u32,
            len: s.len() as u32,
        }
    }
}

/// `cabi_realloc` on top of the Rust global allocator.
pub fn realloc(ptr: u32, old_size: u32, align: u32, new_size: u32) -> u32 {
    let align = align.max(1);
    if new_size == 0 {
        if ptr == 0 {
            return align;
        }
        if old_size > 0 {
            let layout = layout(old_size, align);
            // SAFETY: the host hands back exactly what we allocated.
            unsafe { alloc::dealloc(ptr as *mut u8, layout) };
        }
        return 0;
    }

    let new_layout = layout(new_size, align);
    let out = if ptr == 0 || old_size == 0 {
        // SAFETY: non-zero size.
        unsafe { alloc::alloc(new_layout) }
    } else {
        // SAFETY: `ptr` was allocated with `(old_size, align)`.
        unsafe { alloc::realloc(ptr as *mut u8, layout(old_size, align), new_size as usize) }
    };
    if out.is_null() {
        alloc::handle_alloc_error(new_layout);
    }
    out as u32
}

fn layout(size: u32, align: u32) -> Layout {
    match Layout::from_size_align(size as usize, align as usize) {
        Ok(layout) => layout,
        Err(e) => trap(&e),
    }
}

/// Run one export against the instance, trapping on protocol misuse.
pub fn dispatch<T>(call: impl FnOnce(&mut Guest<WasmHeap>) -> Result<T, GuestError>) -> T {
    let result = GUEST.with(|cell| match cell.try_borrow_mut() {
        Ok(mut guest) => call(&mut guest),
        Err(_) => Err(GuestError::Reentered),
    });
    match result {
        Ok(value) => value,
        Err(e) => trap(&e),
    }
}

pub fn trap(err: &dyn fmt::Display) -> ! {
    imports::log(LogLevel::Error, &format!("trap: {err}"));
    std::process::abort()
}
