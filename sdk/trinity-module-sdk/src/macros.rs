/// Generate the flat exports for a [`TrinityModule`](crate::TrinityModule).
///
/// Produces `init`, `help`, `admin`, `on-msg`, their `cabi_post_*` hooks and
/// `cabi_realloc`. The exports only exist when building for wasm32, so the
/// module crate still compiles natively for its tests.
#[macro_export]
macro_rules! export_module {
    ($module:ty) => {
        #[cfg(target_arch = "wasm32")]
        const _: () = {
            #[export_name = "init"]
            extern "C" fn __trinity_init() {
                $crate::wasm::dispatch(|guest| guest.init::<$module>())
            }

            #[export_name = "help"]
            extern "C" fn __trinity_help(tag: i32, ptr: i32, len: i32) -> i32 {
                $crate::wasm::dispatch(|guest| guest.help::<$module>(tag, ptr, len)) as i32
            }

            #[export_name = "cabi_post_help"]
            extern "C" fn __trinity_post_help(area: i32) {
                $crate::wasm::dispatch(|guest| guest.post_return($crate::Export::Help, area))
            }

            #[export_name = "admin"]
            extern "C" fn __trinity_admin(
                cmd_ptr: i32,
                cmd_len: i32,
                author_ptr: i32,
                author_len: i32,
            ) -> i32 {
                $crate::wasm::dispatch(|guest| {
                    guest.admin::<$module>(cmd_ptr, cmd_len, author_ptr, author_len)
                }) as i32
            }

            #[export_name = "cabi_post_admin"]
            extern "C" fn __trinity_post_admin(area: i32) {
                $crate::wasm::dispatch(|guest| guest.post_return($crate::Export::Admin, area))
            }

            #[export_name = "on-msg"]
            #[allow(clippy::too_many_arguments)]
            extern "C" fn __trinity_on_msg(
                content_ptr: i32,
                content_len: i32,
                author_id_ptr: i32,
                author_id_len: i32,
                author_name_ptr: i32,
                author_name_len: i32,
                room_ptr: i32,
                room_len: i32,
            ) -> i32 {
                $crate::wasm::dispatch(|guest| {
                    guest.on_msg::<$module>(
                        content_ptr,
                        content_len,
                        author_id_ptr,
                        author_id_len,
                        author_name_ptr,
                        author_name_len,
                        room_ptr,
                        room_len,
                    )
                }) as i32
            }

            #[export_name = "cabi_post_on-msg"]
            extern "C" fn __trinity_post_on_msg(area: i32) {
                $crate::wasm::dispatch(|guest| guest.post_return($crate::Export::OnMsg, area))
            }

            #[export_name = "cabi_realloc"]
            extern "C" fn __trinity_realloc(
                ptr: i32,
                old_size: i32,
                align: i32,
                new_size: i32,
            ) -> i32 {
                let (ptr, old_size) = (ptr as u32, old_size as u32);
                $crate::wasm::realloc(ptr, old_size, align as u32, new_size as u32) as i32
            }
        };
    };
}
