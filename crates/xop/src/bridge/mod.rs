//! Foreign kernel bridge: one lazily loaded shared library exposing five C entry points.
//!
//! The library is loaded, resolved, and initialized at most once per process
//! through [`load_bridge`]. Every call into it is serialized process-wide
//! because the runtime behind it is not assumed to be reentrant.

pub mod abi;
mod kernel;
mod view;

use std::collections::HashMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use libloading::Library;

use crate::env;
use crate::error::{KernelError, KernelResult};
use abi::{
    ForeignAttribute, ForeignOutputList, InitFn, InvokeFn, LastErrorFn, LogFn, NewInstanceFn,
    ReleaseInstanceFn,
};

pub use kernel::{ForeignOpDescriptor, ForeignOpKernel, FOREIGN_OP_TYPE};
pub use view::{ForeignOutputRef, ForeignOutputs, InputViews, TensorView};

/// Serializes every call into any foreign runtime in this process.
static FOREIGN_CALLS: Mutex<()> = Mutex::new(());

fn serialize_foreign_calls() -> MutexGuard<'static, ()> {
    // The mutex guards no data, so a panic in another caller leaves nothing to repair.
    FOREIGN_CALLS.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The five boundary functions of a bridge library.
#[derive(Clone, Copy)]
pub struct BridgeSymbols {
    pub init: InitFn,
    pub new_instance: NewInstanceFn,
    pub invoke: InvokeFn,
    pub release_instance: ReleaseInstanceFn,
    pub last_error: LastErrorFn,
}

/// Where to find the bridge library and how to treat its log output.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Explicit library path. When set, the candidates are not consulted.
    pub library: Option<PathBuf>,
    /// Names tried in order through the platform's library search.
    pub candidates: Vec<PathBuf>,
    /// Forward log lines emitted during invokes to `tracing`.
    pub forward_foreign_logs: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            library: None,
            candidates: default_candidates(),
            forward_foreign_logs: true,
        }
    }
}

impl BridgeConfig {
    /// Reads `XOP_BRIDGE_LIBRARY` and `XOP_FOREIGN_LOG` on top of the defaults.
    pub fn from_env() -> Self {
        Self {
            library: env::path_var(env::BRIDGE_LIBRARY_VAR),
            forward_foreign_logs: env::bool_var(env::FOREIGN_LOG_VAR, true),
            ..Self::default()
        }
    }
}

fn default_candidates() -> Vec<PathBuf> {
    let file = if cfg!(target_os = "windows") {
        "xop_pyop.dll"
    } else if cfg!(target_os = "macos") {
        "libxop_pyop.dylib"
    } else {
        "libxop_pyop.so"
    };
    vec![Path::new(".").join(file), PathBuf::from(file)]
}

/// A loaded and initialized bridge library.
pub struct Bridge {
    library: Option<Library>,
    fns: BridgeSymbols,
    log: Option<LogFn>,
}

impl fmt::Debug for Bridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bridge")
            .field("library_backed", &self.library.is_some())
            .field("forward_foreign_logs", &self.log.is_some())
            .finish()
    }
}

impl Bridge {
    /// Opens the configured library, resolves all five symbols, and runs its init function.
    pub fn open(config: &BridgeConfig) -> KernelResult<Self> {
        let lib = load_bridge_library(config)?;
        let fns = BridgeSymbols {
            init: load_symbol(&lib, abi::INIT_SYMBOL)?,
            new_instance: load_symbol(&lib, abi::NEW_INSTANCE_SYMBOL)?,
            invoke: load_symbol(&lib, abi::INVOKE_SYMBOL)?,
            release_instance: load_symbol(&lib, abi::RELEASE_INSTANCE_SYMBOL)?,
            last_error: load_symbol(&lib, abi::LAST_ERROR_SYMBOL)?,
        };
        Self::initialize(Some(lib), fns, config.forward_foreign_logs)
    }

    /// Builds a bridge over functions already linked into the process and runs its init.
    pub fn from_symbols(symbols: BridgeSymbols) -> KernelResult<Self> {
        Self::initialize(None, symbols, BridgeConfig::default().forward_foreign_logs)
    }

    fn initialize(
        lib: Option<Library>,
        fns: BridgeSymbols,
        forward_logs: bool,
    ) -> KernelResult<Self> {
        let bridge = Self {
            library: lib,
            fns,
            log: forward_logs.then_some(forward_foreign_log as LogFn),
        };
        let _guard = serialize_foreign_calls();
        // SAFETY: init takes no arguments; the symbol type matches the bridge ABI.
        if !unsafe { (bridge.fns.init)() } {
            let message = bridge.last_error_locked();
            tracing::warn!(%message, "foreign bridge initialization failed");
            return Err(KernelError::BridgeLoad(format!(
                "bridge initialization failed: {message}"
            )));
        }
        tracing::debug!(library_backed = bridge.library.is_some(), "foreign bridge initialized");
        Ok(bridge)
    }

    /// Creates one foreign-side object; the returned handle releases it on drop.
    pub fn create_instance(
        self: &Arc<Self>,
        module: &str,
        class_name: &str,
        attributes: &HashMap<String, String>,
    ) -> KernelResult<ForeignInstance> {
        let creation_error = |message: String| KernelError::InstanceCreation {
            module: module.to_string(),
            class_name: class_name.to_string(),
            message,
        };
        let c_module = CString::new(module)
            .map_err(|_| creation_error("module name contains a NUL byte".to_string()))?;
        let c_class = CString::new(class_name)
            .map_err(|_| creation_error("class name contains a NUL byte".to_string()))?;
        let owned_attrs = attributes
            .iter()
            .map(|(key, value)| Ok((CString::new(key.as_str())?, CString::new(value.as_str())?)))
            .collect::<Result<Vec<_>, std::ffi::NulError>>()
            .map_err(|_| creation_error("attribute contains a NUL byte".to_string()))?;
        let raw_attrs: Vec<ForeignAttribute> = owned_attrs
            .iter()
            .map(|(key, value)| ForeignAttribute {
                key: key.as_ptr(),
                value: value.as_ptr(),
            })
            .collect();

        let _guard = serialize_foreign_calls();
        // SAFETY: all strings are NUL-terminated and outlive the call. The
        // attribute array has `len` entries.
        let handle = unsafe {
            (self.fns.new_instance)(
                c_module.as_ptr(),
                c_class.as_ptr(),
                raw_attrs.as_ptr(),
                raw_attrs.len(),
            )
        };
        if handle.is_null() {
            let message = self.last_error_locked();
            tracing::warn!(module, class_name, %message, "foreign instance creation failed");
            return Err(creation_error(message));
        }
        tracing::debug!(module, class_name, "foreign instance created");
        Ok(ForeignInstance {
            bridge: Arc::clone(self),
            handle: handle as usize,
        })
    }

    /// Runs one entry point of `instance` over `inputs`.
    ///
    /// On success the returned outputs own every foreign buffer and free them on drop.
    pub fn invoke(
        &self,
        instance: &ForeignInstance,
        entry_point: &CStr,
        inputs: &InputViews<'_>,
    ) -> KernelResult<ForeignOutputs> {
        let raw_inputs = inputs.as_raw();
        let mut list = ForeignOutputList::empty();
        let _guard = serialize_foreign_calls();
        tracing::trace!(entry_point = ?entry_point, inputs = inputs.len(), "foreign invoke");
        // SAFETY: the instance is live (owned by `instance`), inputs point into `inputs`
        // which outlives the call, and `list` is a valid out parameter.
        let ok = unsafe {
            (self.fns.invoke)(
                instance.as_ptr(),
                entry_point.as_ptr(),
                &raw_inputs,
                &mut list,
                self.log,
            )
        };
        if !ok {
            let message = self.last_error_locked();
            let entry_point = entry_point.to_string_lossy().into_owned();
            tracing::warn!(%entry_point, %message, "foreign invoke failed");
            return Err(KernelError::Invocation {
                entry_point,
                message,
            });
        }
        // SAFETY: a successful invoke hands ownership of `list` to the caller.
        Ok(unsafe { ForeignOutputs::from_raw(list) })
    }

    fn last_error_locked(&self) -> String {
        // SAFETY: a null buffer with zero capacity only queries the message length.
        let len = unsafe { (self.fns.last_error)(std::ptr::null_mut(), 0) };
        if len == 0 {
            return "unknown foreign error".to_string();
        }
        let mut buffer = vec![0u8; len + 1];
        // SAFETY: buffer holds `len + 1` writable bytes.
        unsafe { (self.fns.last_error)(buffer.as_mut_ptr() as *mut c_char, buffer.len()) };
        let end = buffer.iter().position(|&b| b == 0).unwrap_or(len);
        String::from_utf8_lossy(&buffer[..end]).into_owned()
    }

    fn release_instance(&self, handle: usize) {
        let _guard = serialize_foreign_calls();
        // SAFETY: handle came from new_instance and is released exactly once by its owner.
        unsafe { (self.fns.release_instance)(handle as *mut std::os::raw::c_void) };
        tracing::debug!("foreign instance released");
    }
}

/// Exclusively owned foreign-side object. Released exactly once, when dropped.
pub struct ForeignInstance {
    bridge: Arc<Bridge>,
    // Stored as usize so kernels holding an instance stay Send + Sync.
    handle: usize,
}

impl ForeignInstance {
    pub fn bridge(&self) -> &Arc<Bridge> {
        &self.bridge
    }

    fn as_ptr(&self) -> *mut std::os::raw::c_void {
        self.handle as *mut std::os::raw::c_void
    }
}

impl fmt::Debug for ForeignInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignInstance")
            .field("handle", &format_args!("{:#x}", self.handle))
            .finish()
    }
}

impl Drop for ForeignInstance {
    fn drop(&mut self) {
        if self.handle != 0 {
            self.bridge.release_instance(self.handle);
            self.handle = 0;
        }
    }
}

/// Init-once holder for a process-scoped bridge.
///
/// Concurrent first callers race on a single initializer; everyone observes
/// the same bridge or the same load error.
pub struct BridgeCell {
    cell: OnceLock<KernelResult<Arc<Bridge>>>,
}

impl BridgeCell {
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    pub fn get_or_load<F>(&self, load: F) -> KernelResult<Arc<Bridge>>
    where
        F: FnOnce() -> KernelResult<Bridge>,
    {
        self.cell
            .get_or_init(|| load().map(Arc::new))
            .as_ref()
            .map(Arc::clone)
            .map_err(KernelError::clone)
    }

    /// The bridge, if a load has already succeeded.
    pub fn get(&self) -> Option<Arc<Bridge>> {
        self.cell.get()?.as_ref().ok().map(Arc::clone)
    }
}

impl Default for BridgeCell {
    fn default() -> Self {
        Self::new()
    }
}

static PROCESS_BRIDGE: BridgeCell = BridgeCell::new();

/// Returns the process-wide bridge, loading it from [`BridgeConfig::from_env`] on first use.
///
/// A load failure is cached: later calls report the same error without retrying.
pub fn load_bridge() -> KernelResult<Arc<Bridge>> {
    PROCESS_BRIDGE.get_or_load(|| Bridge::open(&BridgeConfig::from_env()))
}

unsafe extern "C" fn forward_foreign_log(message: *const c_char) {
    if message.is_null() {
        return;
    }
    // SAFETY: the foreign side passes a NUL-terminated string valid for this call.
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    tracing::info!(target: crate::logging::FOREIGN_TARGET, "{message}");
}

fn load_bridge_library(config: &BridgeConfig) -> KernelResult<Library> {
    let candidates: Vec<&Path> = match &config.library {
        Some(path) => vec![path.as_path()],
        None => config.candidates.iter().map(PathBuf::as_path).collect(),
    };
    let mut failures = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        match open_library(candidate) {
            Ok(lib) => {
                tracing::debug!(path = %candidate.display(), "loaded foreign bridge library");
                return Ok(lib);
            }
            Err(err) => failures.push(format!("{}: {err}", candidate.display())),
        }
    }
    Err(KernelError::BridgeLoad(format!(
        "could not load bridge library ({})",
        failures.join("; ")
    )))
}

#[cfg(unix)]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: loading runs the library's initializers; the bridge library is trusted configuration.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
fn open_library(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: loading runs the library's initializers; the bridge library is trusted configuration.
    unsafe { Library::new(path) }
}

fn load_symbol<T: Copy>(lib: &Library, name: &'static [u8]) -> KernelResult<T> {
    // SAFETY: the caller names the symbol type fixed by the bridge ABI.
    let sym = unsafe { lib.get::<T>(name) }.map_err(|err| {
        KernelError::BridgeLoad(format!(
            "failed to resolve bridge symbol {}: {err}",
            String::from_utf8_lossy(&name[..name.len().saturating_sub(1)])
        ))
    })?;
    Ok(*sym)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_load_error() {
        let config = BridgeConfig {
            library: Some(PathBuf::from("/nonexistent/libxop_missing.so")),
            ..BridgeConfig::default()
        };
        match Bridge::open(&config) {
            Err(KernelError::BridgeLoad(message)) => {
                assert!(message.contains("libxop_missing"), "{message}")
            }
            other => panic!("expected BridgeLoad, got {other:?}"),
        }
    }

    #[test]
    fn failed_load_is_cached() {
        let cell = BridgeCell::new();
        let first = cell.get_or_load(|| Err(KernelError::BridgeLoad("boom".into())));
        let second = cell.get_or_load(|| panic!("loader must not run twice"));
        assert_eq!(first.unwrap_err(), second.unwrap_err());
        assert!(cell.get().is_none());
    }
}
