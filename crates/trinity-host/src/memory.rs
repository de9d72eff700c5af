//! Moving values across the module's linear memory from the host side.
//!
//! Arguments are copied in through the module's `cabi_realloc` and freed by
//! the host once the call returns. Results are copied out into owned Rust
//! values before the module is told to release them.

use anyhow::{Context, Result};
use trinity_abi::{FlatList, FlatString, Message};
use wasmtime::{AsContext, AsContextMut, Memory, TypedFunc};

/// `cabi_realloc(ptr, old_size, align, new_size) -> ptr`
pub type ReallocFn = TypedFunc<(i32, i32, i32, i32), i32>;

/// Copy `s` into a fresh module allocation. The empty string allocates
/// nothing.
pub fn write_str_to_wasm(
    mut store: impl AsContextMut,
    memory: &Memory,
    realloc: &ReallocFn,
    s: &str,
) -> Result<FlatString> {
    if s.is_empty() {
        return Ok(FlatString::EMPTY);
    }
    let len = i32::try_from(s.len())
        .context("argument longer than the module address space")?;
    let ptr = realloc.call(&mut store, (0, 0, 1, len))?;

    if let Err(e) = memory.write(&mut store, ptr as u32 as usize, s.as_bytes()) {
        // Release what we just got before reporting.
        let _ = realloc.call(&mut store, (ptr, len, 1, 0));
        return Err(e.into());
    }

    Ok(FlatString { ptr: ptr as u32, len: len as u32 })
}

/// Hand an argument buffer back to the module. Zero length means nothing was
/// allocated.
pub fn free_str_in_wasm(
    store: impl AsContextMut,
    realloc: &ReallocFn,
    s: FlatString,
) -> Result<()> {
    if s.is_empty() {
        return Ok(());
    }
    let (ptr, len) = s.words();
    realloc.call(store, (ptr, len, 1, 0))?;
    Ok(())
}

/// Read the string a call reported through its return area.
pub fn read_string_from_wasm(
    store: impl AsContext,
    memory: &Memory,
    area: i32,
) -> Result<String> {
    let data = memory.data(&store);
    let flat = FlatString::load(data, area as u32)?;
    Ok(flat.to_str(data)?.to_owned())
}

/// Read the message list a call reported through its return area.
pub fn read_messages_from_wasm(
    store: impl AsContext,
    memory: &Memory,
    area: i32,
) -> Result<Vec<Message>> {
    let data = memory.data(&store);
    let list = FlatList::load(data, area as u32)?;
    list.load_messages(data)?
        .into_iter()
        .map(|m| -> Result<Message> {
            Ok(Message::new(m.content.to_str(data)?, m.to.to_str(data)?))
        })
        .collect()
}
