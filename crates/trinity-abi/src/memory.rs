use crate::error::{AbiError, Result};

/// Byte-addressed view of a 32-bit linear memory.
///
/// The host implements this over the wasmtime memory slice, the guest over
/// its own address space, and tests over a plain vector.
pub trait LinearMemory {
    /// Borrow `len` bytes starting at `addr`.
    fn read(&self, addr: u32, len: u32) -> Result<&[u8]>;

    /// Copy `bytes` into memory starting at `addr`.
    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()>;
}

fn range(addr: u32, len: u32, size: usize) -> Result<std::ops::Range<usize>> {
    let start = addr as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= size)
        .ok_or(AbiError::OutOfBounds { addr, len, size })?;
    Ok(start..end)
}

impl LinearMemory for [u8] {
    fn read(&self, addr: u32, len: u32) -> Result<&[u8]> {
        if len == 0 {
            return Ok(&[]);
        }
        let range = range(addr, len, self.len())?;
        Ok(&self[range])
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let len = u32::try_from(bytes.len())
            .map_err(|_| AbiError::LengthOverflow(bytes.len()))?;
        let range = range(addr, len, self.len())?;
        self[range].copy_from_slice(bytes);
        Ok(())
    }
}

impl LinearMemory for Vec<u8> {
    fn read(&self, addr: u32, len: u32) -> Result<&[u8]> {
        self.as_slice().read(addr, len)
    }

    fn write(&mut self, addr: u32, bytes: &[u8]) -> Result<()> {
        self.as_mut_slice().write(addr, bytes)
    }
}

fn check_word_aligned(addr: u32) -> Result<()> {
    if addr % 4 != 0 {
        return Err(AbiError::Misaligned { addr, align: 4 });
    }
    Ok(())
}

/// Read a little-endian word at a 4-byte aligned address.
pub fn load_u32<M: LinearMemory + ?Sized>(mem: &M, addr: u32) -> Result<u32> {
    check_word_aligned(addr)?;
    let bytes = mem.read(addr, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Write a little-endian word at a 4-byte aligned address.
pub fn store_u32<M: LinearMemory + ?Sized>(mem: &mut M, addr: u32, value: u32) -> Result<()> {
    check_word_aligned(addr)?;
    mem.write(addr, &value.to_le_bytes())
}
