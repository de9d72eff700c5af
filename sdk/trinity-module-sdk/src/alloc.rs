//! The allocation primitive the host calls before it writes into the guest.

use trinity_abi::{FlatString, LinearMemory};

/// Linear memory the guest owns and allocates in.
pub trait GuestMemory: LinearMemory {
    /// `cabi_realloc(ptr, old_size, align, new_size) -> ptr`.
    ///
    /// - `ptr == 0`: fresh allocation of `new_size` bytes aligned to at
    ///   least `align`. A zero-size request allocates nothing and returns a
    ///   dangling aligned address.
    /// - `ptr != 0`, `new_size > 0`: resize, preserving the first
    ///   `min(old_size, new_size)` bytes; `ptr` is invalid afterwards.
    /// - `ptr != 0`, `new_size == 0`: release; returns 0.
    ///
    /// Running out of memory aborts.
    fn realloc(&mut self, ptr: u32, old_size: u32, align: u32, new_size: u32) -> u32;

    /// Address of the scratch words an export reports its result through.
    fn return_area(&self) -> u32;

    /// Address of a string that lives for the whole module lifetime.
    /// Never allocates and must never be freed.
    fn static_str(&mut self, s: &'static str) -> FlatString;

    fn alloc(&mut self, size: u32, align: u32) -> u32 {
        self.realloc(0, 0, align, size)
    }

    /// Release an allocation. A zero `size` means nothing was allocated and
    /// `ptr` is never looked at.
    fn free(&mut self, ptr: u32, size: u32, align: u32) {
        if size > 0 {
            self.realloc(ptr, size, align, 0);
        }
    }
}
