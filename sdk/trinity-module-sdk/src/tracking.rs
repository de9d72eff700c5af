//! A vector-backed guest memory that keeps a ledger of every allocation.
//!
//! It stands in for the real linear memory when exercising modules natively,
//! so tests can check that every byte handed to the host comes back.

use std::collections::{BTreeMap, HashMap};

use trinity_abi::{AbiError, FlatString, LinearMemory};

use crate::alloc::GuestMemory;

const PAGE_SIZE: usize = 65536;
const RETURN_AREA: u32 = 8;
const HEAP_BASE: u32 = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub size: u32,
    pub align: u32,
}

#[derive(Debug)]
pub struct TrackingHeap {
    bytes: Vec<u8>,
    top: u32,
    statics: HashMap<(usize, usize), u32>,
    live: BTreeMap<u32, Allocation>,
    allocations: usize,
    frees: usize,
    invalid_frees: usize,
}

impl Default for TrackingHeap {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingHeap {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; PAGE_SIZE],
            top: HEAP_BASE,
            statics: HashMap::new(),
            live: BTreeMap::new(),
            allocations: 0,
            frees: 0,
            invalid_frees: 0,
        }
    }

    /// Successful fresh allocations, resizes included.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Successful releases, resizes included.
    pub fn frees(&self) -> usize {
        self.frees
    }

    /// Releases of addresses that were not live, or with the wrong size.
    pub fn invalid_frees(&self) -> usize {
        self.invalid_frees
    }

    pub fn live_allocations(&self) -> usize {
        self.live.len()
    }

    pub fn live_bytes(&self) -> u64 {
        self.live.values().map(|a| u64::from(a.size)).sum()
    }

    pub fn allocation(&self, ptr: u32) -> Option<Allocation> {
        self.live.get(&ptr).copied()
    }

    /// Allocate and fill a string the way the host lowers an argument.
    pub fn place_str(&mut self, s: &str) -> FlatString {
        if s.is_empty() {
            return FlatString::EMPTY;
        }
        let len = s.len() as u32;
        let ptr = self.alloc(len, 1);
        self.copy_in(ptr, s.as_bytes());
        FlatString { ptr, len }
    }

    /// Panics when the request does not fit the 32-bit address space, the
    /// way a real module runs out of memory.
    fn bump(&mut self, size: u32, align: u32) -> u32 {
        let (addr, top) = self
            .top
            .checked_next_multiple_of(align.max(1))
            .and_then(|addr| addr.checked_add(size).map(|top| (addr, top)))
            .unwrap_or_else(|| {
                panic!("tracking heap out of memory: {size} bytes aligned to {align}")
            });
        self.top = top;
        let needed = self.top as usize;
        if needed > self.bytes.len() {
            self.bytes.resize(needed.next_multiple_of(PAGE_SIZE), 0);
        }
        addr
    }

    fn copy_in(&mut self, addr: u32, bytes: &[u8]) {
        let start = addr as usize;
        self.bytes[start..start + bytes.len()].copy_from_slice(bytes);
    }
}

impl LinearMemory for TrackingHeap {
    fn read(&self, addr: u32, len: u32) -> Result<&[u8], AbiError> {
        self.bytes.read(addr, len)
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<(), AbiError> {
        self.bytes.write(addr, bytes)
    }
}

impl GuestMemory for TrackingHeap {
    fn realloc(&mut self, ptr: u32, old_size: u32, align: u32, new_size: u32) -> u32 {
        if ptr == 0 {
            if new_size == 0 {
                return align.max(1);
            }
            let addr = self.bump(new_size, align);
            self.live.insert(addr, Allocation { size: new_size, align });
            self.allocations += 1;
            return addr;
        }

        match self.live.get(&ptr) {
            Some(existing) if existing.size == old_size => {
                self.live.remove(&ptr);
                self.frees += 1;
            }
            _ => {
                self.invalid_frees += 1;
                return 0;
            }
        }
        if new_size == 0 {
            return 0;
        }

        let addr = self.bump(new_size, align);
        let keep = old_size.min(new_size) as usize;
        let from = ptr as usize;
        self.bytes.copy_within(from..from + keep, addr as usize);
        self.live.insert(addr, Allocation { size: new_size, align });
        self.allocations += 1;
        addr
    }

    fn return_area(&self) -> u32 {
        RETURN_AREA
    }

    fn static_str(&mut self, s: &'static str) -> FlatString {
        if s.is_empty() {
            return FlatString::EMPTY;
        }
        let key = (s.as_ptr() as usize, s.len());
        let ptr = match self.statics.get(&key) {
            Some(ptr) => *ptr,
            None => {
                // Data segment: placed once, outside the allocation ledger.
                let ptr = self.bump(s.len() as u32, 1);
                self.copy_in(ptr, s.as_bytes());
                self.statics.insert(key, ptr);
                ptr
            }
        };
        FlatString {
            ptr,
            len: s.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_allocation_is_aligned_and_tracked() {
        let mut heap = TrackingHeap::new();
        heap.alloc(3, 1);
        let ptr = heap.alloc(16, 8);
        assert_eq!(ptr % 8, 0);
        assert_eq!(heap.allocation(ptr), Some(Allocation { size: 16, align: 8 }));
        assert_eq!(heap.allocations(), 2);
        assert_eq!(heap.live_bytes(), 19);
    }

    #[test]
    fn test_zero_size_request_allocates_nothing() {
        let mut heap = TrackingHeap::new();
        assert_eq!(heap.realloc(0, 0, 4, 0), 4);
        assert_eq!(heap.allocations(), 0);
    }

    #[test]
    fn test_resize_preserves_prefix() {
        let mut heap = TrackingHeap::new();
        let ptr = heap.place_str("abcdef").ptr;
        let grown = heap.realloc(ptr, 6, 1, 10);
        assert_eq!(heap.read(grown, 6).unwrap(), b"abcdef");
        assert!(heap.allocation(ptr).is_none());

        let shrunk = heap.realloc(grown, 10, 1, 2);
        assert_eq!(heap.read(shrunk, 2).unwrap(), b"ab");
        assert_eq!(heap.live_allocations(), 1);
        assert_eq!(heap.invalid_frees(), 0);
    }

    #[test]
    fn test_release_and_double_release() {
        let mut heap = TrackingHeap::new();
        let ptr = heap.alloc(8, 4);
        assert_eq!(heap.realloc(ptr, 8, 4, 0), 0);
        assert_eq!(heap.frees(), 1);

        heap.free(ptr, 8, 4);
        assert_eq!(heap.frees(), 1);
        assert_eq!(heap.invalid_frees(), 1);
    }

    #[test]
    fn test_free_with_wrong_size_is_invalid() {
        let mut heap = TrackingHeap::new();
        let ptr = heap.alloc(8, 4);
        heap.free(ptr, 4, 4);
        assert_eq!(heap.invalid_frees(), 1);
        assert_eq!(heap.live_allocations(), 1);
    }

    #[test]
    fn test_zero_length_free_never_touches_pointer() {
        let mut heap = TrackingHeap::new();
        heap.free(0xDEAD_BEEF, 0, 1);
        assert_eq!(heap.frees(), 0);
        assert_eq!(heap.invalid_frees(), 0);
    }

    static BANNER: &str = "banner";

    #[test]
    fn test_statics_are_interned_outside_the_ledger() {
        let mut heap = TrackingHeap::new();
        let a = heap.static_str(BANNER);
        let b = heap.static_str(BANNER);
        assert_eq!(a, b);
        assert_eq!(a.to_str(&heap).unwrap(), "banner");
        assert_eq!(heap.allocations(), 0);
    }

    #[test]
    fn test_memory_grows_past_first_page() {
        let mut heap = TrackingHeap::new();
        let ptr = heap.alloc(PAGE_SIZE as u32, 1);
        heap.write(ptr + PAGE_SIZE as u32 - 1, &[7u8]).unwrap();
        assert_eq!(heap.read(ptr + PAGE_SIZE as u32 - 1, 1).unwrap(), &[7u8]);
    }

    #[test]
    #[should_panic(expected = "out of memory")]
    fn test_huge_request_is_fatal() {
        let mut heap = TrackingHeap::new();
        heap.realloc(0, 0, 1, u32::MAX);
    }
}
