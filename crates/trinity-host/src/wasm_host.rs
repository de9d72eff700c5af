use anyhow::{Context, Result};
use trinity_abi::{
    FlatString, LogLevel, LOG_MODULE, MEMORY_EXPORT, RAND_U64_IMPORT, SYS_MODULE,
};
use wasmtime::{Caller, Config, Engine, Linker, Module, Store};

/// Target of the records a module logs through the `log` imports.
const MODULE_TARGET: &str = "trinity_module";

/// Per-instance data the imports can reach.
pub struct ModuleState {
    pub name: String,
    pub max_log_len: usize,
}

pub struct WasmHost {
    engine: Engine,
    max_log_len: usize,
}

impl WasmHost {
    pub fn new(max_log_len: usize) -> Result<Self> {
        let mut config = Config::new();
        config.cranelift_opt_level(wasmtime::OptLevel::Speed);

        let engine = Engine::new(&config)?;
        Ok(Self { engine, max_log_len })
    }

    /// Compile a module from its binary (or text) encoding.
    pub fn load_module(&self, wasm_bytes: &[u8]) -> Result<Module> {
        Module::new(&self.engine, wasm_bytes)
    }

    /// A fresh store for one module instance.
    pub fn create_store(&self, name: &str) -> Store<ModuleState> {
        Store::new(
            &self.engine,
            ModuleState {
                name: name.to_string(),
                max_log_len: self.max_log_len,
            },
        )
    }

    /// Linker providing the `log` and `sys` imports.
    pub fn create_linker(&self) -> Result<Linker<ModuleState>> {
        let mut linker = Linker::new(&self.engine);
        Self::register_log_functions(&mut linker)?;

        linker
            .func_wrap(SYS_MODULE, RAND_U64_IMPORT, || -> i64 { rand::random::<u64>() as i64 })
            .with_context(|| format!("registering {SYS_MODULE}.{RAND_U64_IMPORT}"))?;

        Ok(linker)
    }

    fn register_log_functions(linker: &mut Linker<ModuleState>) -> Result<()> {
        macro_rules! register_log {
            ($level:expr) => {
                linker
                    .func_wrap(
                        LOG_MODULE,
                        $level.import_name(),
                        move |mut caller: Caller<'_, ModuleState>, ptr: i32, len: i32| {
                            Self::handle_log(&mut caller, ptr, len, $level);
                        },
                    )
                    .with_context(|| {
                        format!("registering {LOG_MODULE}.{}", $level.import_name())
                    })?;
            };
        }

        register_log!(LogLevel::Trace);
        register_log!(LogLevel::Debug);
        register_log!(LogLevel::Info);
        register_log!(LogLevel::Warn);
        register_log!(LogLevel::Error);
        Ok(())
    }

    fn handle_log(caller: &mut Caller<'_, ModuleState>, ptr: i32, len: i32, level: LogLevel) {
        let memory = match caller.get_export(MEMORY_EXPORT) {
            Some(wasmtime::Extern::Memory(mem)) => mem,
            _ => {
                tracing::error!(module = %caller.data().name, "module does not export its memory");
                return;
            }
        };

        let max_len = caller.data().max_log_len;
        let mut flat = FlatString::from_words(ptr, len);
        flat.len = flat.len.min(u32::try_from(max_len).unwrap_or(u32::MAX));

        let data = memory.data(&*caller);
        let name = caller.data().name.as_str();
        let bytes = match flat.bytes(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(module = %name, "invalid log string: {}", e);
                return;
            }
        };

        let Some(msg) = truncated_str(bytes) else {
            tracing::warn!(module = %name, "invalid UTF-8 in module log (len={})", bytes.len());
            return;
        };
        match level {
            LogLevel::Trace => tracing::trace!(target: MODULE_TARGET, module = %name, "{}", msg),
            LogLevel::Debug => tracing::debug!(target: MODULE_TARGET, module = %name, "{}", msg),
            LogLevel::Info => tracing::info!(target: MODULE_TARGET, module = %name, "{}", msg),
            LogLevel::Warn => tracing::warn!(target: MODULE_TARGET, module = %name, "{}", msg),
            LogLevel::Error => tracing::error!(target: MODULE_TARGET, module = %name, "{}", msg),
        }
    }
}

/// Decode `bytes`, tolerating a character cut in half by truncation.
fn truncated_str(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(s) => Some(s),
        Err(e) if e.error_len().is_none() => std::str::from_utf8(&bytes[..e.valid_up_to()]).ok(),
        Err(_) => None,
    }
}
