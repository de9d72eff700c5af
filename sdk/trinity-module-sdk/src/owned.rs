//! Borrowed and owned values handed to the host as call results.
//!
//! An [`OwnedString`] can only be created by copying bytes into a fresh
//! allocation and only be retired by consuming it with `release`. A record
//! that crosses the boundary as a result ([`OwnedMessage`]) is built from
//! owned fields only, so its cleanup never has to guess which field may be
//! freed.

use trinity_abi::{byte_len_for, AbiError, FlatList, FlatMessage, FlatString, Message};

use crate::alloc::GuestMemory;

/// A guest allocation holding UTF-8 bytes.
#[must_use = "an owned string leaks unless it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct OwnedString {
    flat: FlatString,
}

impl OwnedString {
    /// Allocate exactly `bytes.len()` bytes and copy `bytes` in.
    /// Empty input allocates nothing.
    pub fn duplicate<M: GuestMemory + ?Sized>(mem: &mut M, bytes: &[u8]) -> Result<Self, AbiError> {
        if bytes.is_empty() {
            return Ok(Self {
                flat: FlatString::EMPTY,
            });
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| AbiError::LengthOverflow(bytes.len()))?;
        let ptr = mem.alloc(len, 1);
        if let Err(e) = mem.write(ptr, bytes) {
            mem.free(ptr, len, 1);
            return Err(e);
        }
        Ok(Self {
            flat: FlatString { ptr, len },
        })
    }

    pub fn flat(&self) -> FlatString {
        self.flat
    }

    pub fn release<M: GuestMemory + ?Sized>(self, mem: &mut M) {
        mem.free(self.flat.ptr, self.flat.len, 1);
    }
}

/// A string result: either a view of static data or an owned copy.
#[must_use = "an owned string leaks unless it is released"]
#[derive(Debug, PartialEq, Eq)]
pub enum GuestString {
    /// Points into the module's data segment. Never freed.
    Borrowed(FlatString),
    Owned(OwnedString),
}

impl GuestString {
    pub fn borrowed<M: GuestMemory + ?Sized>(mem: &mut M, literal: &'static str) -> Self {
        GuestString::Borrowed(mem.static_str(literal))
    }

    pub fn duplicate<M: GuestMemory + ?Sized>(mem: &mut M, s: &str) -> Result<Self, AbiError> {
        OwnedString::duplicate(mem, s.as_bytes()).map(GuestString::Owned)
    }

    pub fn flat(&self) -> FlatString {
        match self {
            GuestString::Borrowed(flat) => *flat,
            GuestString::Owned(owned) => owned.flat(),
        }
    }

    pub fn is_owned(&self) -> bool {
        matches!(self, GuestString::Owned(_))
    }

    /// Free the copy if there is one; borrowed data is left alone.
    pub fn release<M: GuestMemory + ?Sized>(self, mem: &mut M) {
        if let GuestString::Owned(owned) = self {
            owned.release(mem);
        }
    }
}

/// What a `help` handler returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HelpText {
    Static(&'static str),
    Owned(String),
}

impl HelpText {
    pub fn as_str(&self) -> &str {
        match self {
            HelpText::Static(s) => s,
            HelpText::Owned(s) => s,
        }
    }

    pub(crate) fn lower<M: GuestMemory + ?Sized>(
        &self,
        mem: &mut M,
    ) -> Result<GuestString, AbiError> {
        match self {
            HelpText::Static(s) => Ok(GuestString::borrowed(mem, *s)),
            HelpText::Owned(s) => GuestString::duplicate(mem, s),
        }
    }
}

impl From<&'static str> for HelpText {
    fn from(s: &'static str) -> Self {
        HelpText::Static(s)
    }
}

impl From<String> for HelpText {
    fn from(s: String) -> Self {
        HelpText::Owned(s)
    }
}

/// A message record whose fields are both guest allocations.
#[must_use = "an owned message leaks unless it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct OwnedMessage {
    content: OwnedString,
    to: OwnedString,
}

impl OwnedMessage {
    pub fn duplicate<M: GuestMemory + ?Sized>(
        mem: &mut M,
        msg: &Message,
    ) -> Result<Self, AbiError> {
        let content = OwnedString::duplicate(mem, msg.content.as_bytes())?;
        match OwnedString::duplicate(mem, msg.to.as_bytes()) {
            Ok(to) => Ok(Self { content, to }),
            Err(e) => {
                content.release(mem);
                Err(e)
            }
        }
    }

    pub fn flat(&self) -> FlatMessage {
        FlatMessage {
            content: self.content.flat(),
            to: self.to.flat(),
        }
    }

    pub fn release<M: GuestMemory + ?Sized>(self, mem: &mut M) {
        self.content.release(mem);
        self.to.release(mem);
    }
}

/// A `list<message>` result: the element array plus the fields it points at.
#[must_use = "a message list leaks unless it is released"]
#[derive(Debug, PartialEq, Eq)]
pub struct MessageList {
    ptr: u32,
    array_size: u32,
    items: Vec<OwnedMessage>,
}

impl MessageList {
    pub fn empty() -> Self {
        Self {
            ptr: 0,
            array_size: 0,
            items: Vec::new(),
        }
    }

    /// Copy `messages` into guest memory. An empty slice allocates nothing.
    pub fn lower<M: GuestMemory + ?Sized>(
        mem: &mut M,
        messages: &[Message],
    ) -> Result<Self, AbiError> {
        if messages.is_empty() {
            return Ok(Self::empty());
        }
        let array_size = byte_len_for(messages.len())?;
        let ptr = mem.alloc(array_size, FlatMessage::ALIGN);
        let mut list = Self {
            ptr,
            array_size,
            items: Vec::with_capacity(messages.len()),
        };
        for msg in messages {
            if let Err(e) = list.push(mem, msg) {
                list.release(mem);
                return Err(e);
            }
        }
        Ok(list)
    }

    fn push<M: GuestMemory + ?Sized>(
        &mut self,
        mem: &mut M,
        msg: &Message,
    ) -> Result<(), AbiError> {
        // `items.len() < messages.len()`, so the offset fits in `array_size`.
        let addr = self.ptr + self.items.len() as u32 * FlatMessage::SIZE;
        let owned = OwnedMessage::duplicate(mem, msg)?;
        if let Err(e) = owned.flat().store(mem, addr) {
            owned.release(mem);
            return Err(e);
        }
        self.items.push(owned);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn flat(&self) -> FlatList {
        FlatList {
            ptr: self.ptr,
            len: self.items.len() as u32,
        }
    }

    /// Free every field, then the element array.
    pub fn release<M: GuestMemory + ?Sized>(self, mem: &mut M) {
        for item in self.items {
            item.release(mem);
        }
        mem.free(self.ptr, self.array_size, FlatMessage::ALIGN);
    }
}
