//! Flat encodings of the four value shapes that cross the boundary.
//!
//! | shape         | layout                            | size |
//! |---------------|-----------------------------------|------|
//! | string        | `ptr@0`, `len@4`                  | 8    |
//! | option-string | `tag@0`, `ptr@4`, `len@8`         | 12   |
//! | message       | `content@0..8`, `to@8..16`        | 16   |
//! | list<message> | `ptr@0`, `len@4`, stride 16       | 8    |
//!
//! Everything is 4-byte aligned. Decoding never allocates.

use crate::error::{AbiError, Result};
use crate::memory::{load_u32, store_u32, LinearMemory};

/// Size in bytes of an option-string in memory.
pub const OPTION_STRING_SIZE: u32 = 12;

/// A `(ptr, len)` pair naming UTF-8 bytes in linear memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlatString {
    pub ptr: u32,
    pub len: u32,
}

impl FlatString {
    pub const SIZE: u32 = 8;
    pub const ALIGN: u32 = 4;
    pub const EMPTY: FlatString = FlatString { ptr: 0, len: 0 };

    /// Build from the two `i32` words of the flat calling convention.
    pub fn from_words(ptr: i32, len: i32) -> Self {
        Self {
            ptr: ptr as u32,
            len: len as u32,
        }
    }

    pub fn words(&self) -> (i32, i32) {
        (self.ptr as i32, self.len as i32)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn load<M: LinearMemory + ?Sized>(mem: &M, addr: u32) -> Result<Self> {
        Ok(Self {
            ptr: load_u32(mem, addr)?,
            len: load_u32(mem, addr.wrapping_add(4))?,
        })
    }

    pub fn store<M: LinearMemory + ?Sized>(&self, mem: &mut M, addr: u32) -> Result<()> {
        store_u32(mem, addr, self.ptr)?;
        store_u32(mem, addr.wrapping_add(4), self.len)
    }

    /// The referenced bytes. A zero length never touches `ptr`.
    pub fn bytes<'m, M: LinearMemory + ?Sized>(&self, mem: &'m M) -> Result<&'m [u8]> {
        if self.is_empty() {
            return Ok(&[]);
        }
        mem.read(self.ptr, self.len)
    }

    pub fn to_str<'m, M: LinearMemory + ?Sized>(&self, mem: &'m M) -> Result<&'m str> {
        let bytes = self.bytes(mem)?;
        std::str::from_utf8(bytes).map_err(|_| AbiError::InvalidUtf8 { addr: self.ptr })
    }
}

/// Decode the flattened `(tag, ptr, len)` argument form of `option<string>`.
///
/// With tag 0 the payload words are unspecified and ignored.
pub fn lift_option_string(tag: i32, ptr: i32, len: i32) -> Result<Option<FlatString>> {
    match tag {
        0 => Ok(None),
        1 => Ok(Some(FlatString::from_words(ptr, len))),
        other => Err(AbiError::InvalidDiscriminant(other as u32)),
    }
}

/// Lower an optional string into the flattened `(tag, ptr, len)` argument form.
pub fn option_string_words(value: Option<FlatString>) -> [i32; 3] {
    match value {
        None => [0, 0, 0],
        Some(s) => {
            let (ptr, len) = s.words();
            [1, ptr, len]
        }
    }
}

pub fn load_option_string<M: LinearMemory + ?Sized>(
    mem: &M,
    addr: u32,
) -> Result<Option<FlatString>> {
    match load_u32(mem, addr)? {
        0 => Ok(None),
        1 => Ok(Some(FlatString::load(mem, addr.wrapping_add(4))?)),
        other => Err(AbiError::InvalidDiscriminant(other)),
    }
}

pub fn store_option_string<M: LinearMemory + ?Sized>(
    mem: &mut M,
    addr: u32,
    value: Option<FlatString>,
) -> Result<()> {
    match value {
        None => store_u32(mem, addr, 0),
        Some(s) => {
            store_u32(mem, addr, 1)?;
            s.store(mem, addr.wrapping_add(4))
        }
    }
}

/// The `message` record: two strings back to back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlatMessage {
    pub content: FlatString,
    pub to: FlatString,
}

impl FlatMessage {
    pub const SIZE: u32 = 16;
    pub const ALIGN: u32 = 4;

    pub fn load<M: LinearMemory + ?Sized>(mem: &M, addr: u32) -> Result<Self> {
        Ok(Self {
            content: FlatString::load(mem, addr)?,
            to: FlatString::load(mem, addr.wrapping_add(FlatString::SIZE))?,
        })
    }

    pub fn store<M: LinearMemory + ?Sized>(&self, mem: &mut M, addr: u32) -> Result<()> {
        self.content.store(mem, addr)?;
        self.to.store(mem, addr.wrapping_add(FlatString::SIZE))
    }
}

/// A `(ptr, len)` pair naming `len` contiguous [`FlatMessage`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlatList {
    pub ptr: u32,
    pub len: u32,
}

impl FlatList {
    pub const SIZE: u32 = 8;
    pub const ALIGN: u32 = 4;
    pub const EMPTY: FlatList = FlatList { ptr: 0, len: 0 };

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn load<M: LinearMemory + ?Sized>(mem: &M, addr: u32) -> Result<Self> {
        Ok(Self {
            ptr: load_u32(mem, addr)?,
            len: load_u32(mem, addr.wrapping_add(4))?,
        })
    }

    pub fn store<M: LinearMemory + ?Sized>(&self, mem: &mut M, addr: u32) -> Result<()> {
        store_u32(mem, addr, self.ptr)?;
        store_u32(mem, addr.wrapping_add(4), self.len)
    }

    /// Bytes spanned by the element array.
    pub fn byte_len(&self) -> Result<u32> {
        byte_len_for(self.len as usize)
    }

    /// Address of element `index`, checked against the list length.
    pub fn element_addr(&self, index: u32) -> Result<u32> {
        if index >= self.len {
            return Err(AbiError::IndexOutOfRange { index, len: self.len });
        }
        index
            .checked_mul(FlatMessage::SIZE)
            .and_then(|offset| self.ptr.checked_add(offset))
            .ok_or(AbiError::LengthOverflow(index as usize))
    }

    /// Decode every element. An empty list never touches `ptr`.
    pub fn load_messages<M: LinearMemory + ?Sized>(&self, mem: &M) -> Result<Vec<FlatMessage>> {
        if self.is_empty() {
            return Ok(Vec::new());
        }
        // Bounds-check the whole array once before walking it.
        mem.read(self.ptr, self.byte_len()?)?;
        (0..self.len)
            .map(|i| FlatMessage::load(mem, self.element_addr(i)?))
            .collect()
    }
}

/// Bytes needed for an array of `count` messages.
pub fn byte_len_for(count: usize) -> Result<u32> {
    u32::try_from(count)
        .ok()
        .and_then(|n| n.checked_mul(FlatMessage::SIZE))
        .ok_or(AbiError::LengthOverflow(count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory_with(addr: u32, bytes: &[u8]) -> Vec<u8> {
        let mut mem = vec![0u8; 256];
        mem.write(addr, bytes).unwrap();
        mem
    }

    #[test]
    fn test_string_roundtrip() {
        let mut mem = memory_with(64, "héllo".as_bytes());
        let s = FlatString { ptr: 64, len: "héllo".len() as u32 };
        s.store(&mut mem, 8).unwrap();

        let decoded = FlatString::load(&mem, 8).unwrap();
        assert_eq!(decoded, s);
        assert_eq!(decoded.to_str(&mem).unwrap(), "héllo");
        assert_eq!(&mem[8..16], &[64, 0, 0, 0, 6, 0, 0, 0]);
    }

    #[test]
    fn test_empty_string_ignores_pointer() {
        let mem = vec![0u8; 8];
        let s = FlatString { ptr: 0xDEAD_BEEF, len: 0 };
        assert_eq!(s.to_str(&mem).unwrap(), "");
    }

    #[test]
    fn test_invalid_utf8() {
        let mem = memory_with(32, &[0xFF, 0xFE]);
        let s = FlatString { ptr: 32, len: 2 };
        assert_eq!(s.to_str(&mem), Err(AbiError::InvalidUtf8 { addr: 32 }));
    }

    #[test]
    fn test_lift_option_none_ignores_payload() {
        assert_eq!(lift_option_string(0, -1, -1).unwrap(), None);
        assert_eq!(
            lift_option_string(1, 40, 3).unwrap(),
            Some(FlatString { ptr: 40, len: 3 })
        );
        assert_eq!(lift_option_string(2, 0, 0), Err(AbiError::InvalidDiscriminant(2)));
    }

    #[test]
    fn test_option_words() {
        assert_eq!(option_string_words(None), [0, 0, 0]);
        assert_eq!(
            option_string_words(Some(FlatString { ptr: 16, len: 2 })),
            [1, 16, 2]
        );
    }

    #[test]
    fn test_option_in_memory_none_never_reads_payload() {
        // Only the tag word is in bounds: decoding `none` must not reach past it.
        let mem = vec![0u8; 4];
        assert_eq!(load_option_string(&mem, 0).unwrap(), None);
    }

    #[test]
    fn test_option_in_memory_some() {
        let mut mem = vec![0u8; 64];
        let s = FlatString { ptr: 40, len: 1 };
        store_option_string(&mut mem, 0, Some(s)).unwrap();
        assert_eq!(load_option_string(&mem, 0).unwrap(), Some(s));
        // The length is the last word of the payload; nothing is written past it.
        assert_eq!(load_u32(&mem, OPTION_STRING_SIZE - 4).unwrap(), 1);
        assert_eq!(load_u32(&mem, OPTION_STRING_SIZE).unwrap(), 0);

        mem[0] = 7;
        assert_eq!(load_option_string(&mem, 0), Err(AbiError::InvalidDiscriminant(7)));
    }

    #[test]
    fn test_message_layout() {
        let mut mem = vec![0u8; 64];
        let msg = FlatMessage {
            content: FlatString { ptr: 100, len: 5 },
            to: FlatString { ptr: 200, len: 3 },
        };
        msg.store(&mut mem, 16).unwrap();
        assert_eq!(load_u32(&mem, 16).unwrap(), 100);
        assert_eq!(load_u32(&mem, 20).unwrap(), 5);
        assert_eq!(load_u32(&mem, 24).unwrap(), 200);
        assert_eq!(load_u32(&mem, 28).unwrap(), 3);
        assert_eq!(FlatMessage::load(&mem, 16).unwrap(), msg);
    }

    #[test]
    fn test_list_elements() {
        let mut mem = vec![0u8; 256];
        let a = FlatMessage {
            content: FlatString { ptr: 1, len: 1 },
            to: FlatString { ptr: 2, len: 2 },
        };
        let b = FlatMessage {
            content: FlatString { ptr: 3, len: 3 },
            to: FlatString { ptr: 4, len: 4 },
        };
        a.store(&mut mem, 64).unwrap();
        b.store(&mut mem, 80).unwrap();
        let list = FlatList { ptr: 64, len: 2 };

        assert_eq!(list.byte_len().unwrap(), 32);
        assert_eq!(list.element_addr(1).unwrap(), 80);
        assert!(list.element_addr(2).is_err());
        assert_eq!(list.load_messages(&mem).unwrap(), vec![a, b]);
    }

    #[test]
    fn test_empty_list_ignores_pointer() {
        let mem = vec![0u8; 8];
        let list = FlatList { ptr: 0xDEAD_BEEF, len: 0 };
        assert!(list.load_messages(&mem).unwrap().is_empty());
    }

    #[test]
    fn test_list_out_of_bounds() {
        let mem = vec![0u8; 32];
        let list = FlatList { ptr: 16, len: 2 };
        assert!(matches!(
            list.load_messages(&mem),
            Err(AbiError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_list_length_overflow() {
        let list = FlatList { ptr: 0, len: u32::MAX };
        assert_eq!(list.byte_len(), Err(AbiError::LengthOverflow(u32::MAX as usize)));
    }
}
