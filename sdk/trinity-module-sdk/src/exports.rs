//! Export trampolines and their post-return hooks.
//!
//! A trampoline decodes the flat argument words, runs the handler, copies
//! the result into guest memory and reports its `(ptr, len)` through the
//! return area. The typed result is kept as the pending result until the
//! host calls the matching `cabi_post_*` hook, which releases exactly what
//! was recorded. Until then no other export may run.

use trinity_abi::{lift_option_string, store_u32, Export, FlatString};

use crate::alloc::GuestMemory;
use crate::error::GuestError;
use crate::owned::{GuestString, MessageList};
use crate::TrinityModule;

#[derive(Debug)]
enum Returned {
    Text(GuestString),
    Messages(MessageList),
}

impl Returned {
    fn words(&self) -> (u32, u32) {
        match self {
            Returned::Text(s) => {
                let flat = s.flat();
                (flat.ptr, flat.len)
            }
            Returned::Messages(list) => {
                let flat = list.flat();
                (flat.ptr, flat.len)
            }
        }
    }

    fn release<M: GuestMemory + ?Sized>(self, mem: &mut M) {
        match self {
            Returned::Text(s) => s.release(mem),
            Returned::Messages(list) => list.release(mem),
        }
    }
}

#[derive(Debug)]
struct Pending {
    export: Export,
    area: u32,
    value: Returned,
}

/// One module instance: its memory plus the result awaiting release.
#[derive(Debug)]
pub struct Guest<M: GuestMemory> {
    memory: M,
    pending: Option<Pending>,
}

impl<M: GuestMemory> Guest<M> {
    pub fn new(memory: M) -> Self {
        Self {
            memory,
            pending: None,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    /// The export whose result has not been released yet, if any.
    pub fn pending(&self) -> Option<Export> {
        self.pending.as_ref().map(|p| p.export)
    }

    /// `cabi_realloc`.
    pub fn realloc(&mut self, ptr: u32, old_size: u32, align: u32, new_size: u32) -> u32 {
        self.memory.realloc(ptr, old_size, align, new_size)
    }

    pub fn init<H: TrinityModule>(&mut self) -> Result<(), GuestError> {
        self.ensure_idle(Export::Init)?;
        H::init();
        Ok(())
    }

    /// `help(tag, ptr, len) -> area`
    pub fn help<H: TrinityModule>(
        &mut self,
        tag: i32,
        ptr: i32,
        len: i32,
    ) -> Result<u32, GuestError> {
        self.ensure_idle(Export::Help)?;
        let text = match lift_option_string(tag, ptr, len)? {
            None => H::help(None),
            Some(topic) => H::help(Some(topic.to_str(&self.memory)?)),
        };
        let value = text.lower(&mut self.memory)?;
        self.finish(Export::Help, Returned::Text(value))
    }

    /// `admin(cmd, author_id) -> area`
    pub fn admin<H: TrinityModule>(
        &mut self,
        cmd_ptr: i32,
        cmd_len: i32,
        author_id_ptr: i32,
        author_id_len: i32,
    ) -> Result<u32, GuestError> {
        self.ensure_idle(Export::Admin)?;
        let messages = {
            let mem = &self.memory;
            let lift = move |ptr, len| FlatString::from_words(ptr, len).to_str(mem);
            let cmd = lift(cmd_ptr, cmd_len)?;
            let author_id = lift(author_id_ptr, author_id_len)?;
            H::admin(cmd, author_id)
        };
        let list = MessageList::lower(&mut self.memory, &messages)?;
        self.finish(Export::Admin, Returned::Messages(list))
    }

    /// `on-msg(content, author_id, author_name, room) -> area`
    #[allow(clippy::too_many_arguments)]
    pub fn on_msg<H: TrinityModule>(
        &mut self,
        content_ptr: i32,
        content_len: i32,
        author_id_ptr: i32,
        author_id_len: i32,
        author_name_ptr: i32,
        author_name_len: i32,
        room_ptr: i32,
        room_len: i32,
    ) -> Result<u32, GuestError> {
        self.ensure_idle(Export::OnMsg)?;
        let messages = {
            let mem = &self.memory;
            let lift = move |ptr, len| FlatString::from_words(ptr, len).to_str(mem);
            let content = lift(content_ptr, content_len)?;
            let author_id = lift(author_id_ptr, author_id_len)?;
            let author_name = lift(author_name_ptr, author_name_len)?;
            let room = lift(room_ptr, room_len)?;
            H::on_msg(content, author_id, author_name, room)
        };
        let list = MessageList::lower(&mut self.memory, &messages)?;
        self.finish(Export::OnMsg, Returned::Messages(list))
    }

    /// `cabi_post_<export>(area)`: release the pending result of `export`.
    pub fn post_return(&mut self, export: Export, area: i32) -> Result<(), GuestError> {
        let pending = self.pending.take().ok_or(GuestError::NothingPending(export))?;
        if pending.export != export {
            let expected = pending.export;
            self.pending = Some(pending);
            return Err(GuestError::WrongPostReturn { expected, got: export });
        }
        if pending.area != area as u32 {
            let expected = pending.area;
            self.pending = Some(pending);
            return Err(GuestError::ForeignArea {
                export,
                expected,
                got: area as u32,
            });
        }
        pending.value.release(&mut self.memory);
        Ok(())
    }

    fn ensure_idle(&self, requested: Export) -> Result<(), GuestError> {
        match &self.pending {
            Some(pending) => Err(GuestError::CallInFlight {
                pending: pending.export,
                requested,
            }),
            None => Ok(()),
        }
    }

    fn finish(&mut self, export: Export, value: Returned) -> Result<u32, GuestError> {
        let area = self.memory.return_area();
        let (ptr, len) = value.words();
        let stored = store_u32(&mut self.memory, area, ptr)
            .and_then(|_| store_u32(&mut self.memory, area + 4, len));
        if let Err(e) = stored {
            value.release(&mut self.memory);
            return Err(e.into());
        }
        self.pending = Some(Pending { export, area, value });
        Ok(area)
    }
}
