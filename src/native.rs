//! Host side of the native binding: dynamic libraries exporting the C call
//! table.

use std::ffi::{c_char, c_void};
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use libloading::{Library, Symbol};
use node_plugin::CallResult;
use node_plugin::abi::{
    CEntryPoint, CLogLevel, CNativePluginAPI, CPacket, CPluginHandle, CResult,
    NATIVE_ENTRY_SYMBOL, NATIVE_PLUGIN_API_VERSION, sanitize_c_string,
};
use node_plugin::conversions::{c_str, c_str_opt, metadata_from_c, packet_from_c, packet_to_c};
use node_plugin::logger::LogSink;
use node_plugin::metadata::NodeMetadata;
use node_plugin::node::OutputSink;
use node_plugin::packet::Packet;
use tracing::{debug, info};

use crate::error::HostError;
use crate::module::{ModuleVariant, PluginInstance, PluginModule};

/// A native module with a checked call table.
pub struct NativeModule {
    api: &'static CNativePluginAPI,
    metadata: NodeMetadata,
    log_sink: Arc<dyn LogSink>,
    path: Option<PathBuf>,
    // Keeps `api` valid. `None` for tables linked into this process.
    library: Option<Arc<Library>>,
}

impl NativeModule {
    /// Load a dynamic library and check its call table.
    pub fn load(path: &Path, log_sink: Arc<dyn LogSink>) -> Result<Self, HostError> {
        info!(?path, "Loading native plugin");

        // SAFETY: loading a library runs its initialisers. Modules in the
        // plugin directory are trusted by whoever configured the host.
        let library = unsafe { Library::new(path) }.map_err(|e| HostError::load(path, e))?;

        let api_ptr = {
            // SAFETY: the symbol type matches what `native_plugin_entry!` emits.
            let entry: Symbol<CEntryPoint> = unsafe { library.get(NATIVE_ENTRY_SYMBOL) }
                .map_err(|_| HostError::MissingSymbol(entry_symbol_name()))?;
            // SAFETY: calling the entry point has no preconditions.
            unsafe { entry() }
        };
        if api_ptr.is_null() {
            return Err(HostError::load(path, "entry point returned a null table"));
        }
        // SAFETY: non-null, and the table lives as long as the library,
        // which this module and every instance keep alive.
        let api: &'static CNativePluginAPI = unsafe { &*api_ptr };

        let mut module = Self::check(api, log_sink)?;
        module.path = Some(path.to_path_buf());
        module.library = Some(Arc::new(library));
        info!(kind = %module.metadata.kind, "Loaded native plugin");
        Ok(module)
    }

    /// Wrap a call table that is linked into this process.
    pub fn from_api(
        api: &'static CNativePluginAPI,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self, HostError> {
        Self::check(api, log_sink)
    }

    fn check(
        api: &'static CNativePluginAPI,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self, HostError> {
        if api.version != NATIVE_PLUGIN_API_VERSION {
            return Err(HostError::VersionMismatch {
                expected: NATIVE_PLUGIN_API_VERSION,
                found: api.version,
            });
        }

        let c_metadata = (api.get_metadata)();
        if c_metadata.is_null() {
            return Err(HostError::InvalidMetadata("plugin returned null metadata".into()));
        }
        // SAFETY: non-null and valid for the module's lifetime.
        let metadata = unsafe { metadata_from_c(&*c_metadata) }
            .map_err(|e| HostError::InvalidMetadata(e.to_string()))?;
        metadata.validate().map_err(|e| HostError::InvalidMetadata(e.to_string()))?;

        Ok(Self { api, metadata, log_sink, path: None, library: None })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

impl PluginModule for NativeModule {
    fn variant(&self) -> ModuleVariant {
        ModuleVariant::Native
    }

    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    fn create(&self, params: Option<&str>) -> Result<Box<dyn PluginInstance>, HostError> {
        let params = params.map(sanitize_c_string);
        let params_ptr = params.as_ref().map_or(ptr::null(), |p| p.as_ptr());

        // Boxed so the pointer handed to the plugin stays put.
        let log_sink: Box<Arc<dyn LogSink>> = Box::new(Arc::clone(&self.log_sink));
        let log_user_data = ptr::from_ref(log_sink.as_ref()).cast_mut().cast::<c_void>();

        let handle = (self.api.create_instance)(params_ptr, Some(log_trampoline), log_user_data);
        if handle.is_null() {
            return Err(HostError::CreateFailed {
                kind: self.metadata.kind.clone(),
                reason: "plugin returned no instance".into(),
            });
        }

        debug!(kind = %self.metadata.kind, "created native instance");
        Ok(Box::new(NativeInstance {
            handle,
            api: self.api,
            kind: self.metadata.kind.clone(),
            _log_sink: log_sink,
            _library: self.library.clone(),
        }))
    }
}

/// A live native instance. Dropping it calls `destroy_instance` once.
pub struct NativeInstance {
    handle: CPluginHandle,
    api: &'static CNativePluginAPI,
    kind: String,
    // Referenced by the plugin through `log_user_data` until destroy.
    _log_sink: Box<Arc<dyn LogSink>>,
    _library: Option<Arc<Library>>,
}

// The handle is only used through `&mut self`, one call at a time, and
// plugin instances are not tied to the thread that created them.
unsafe impl Send for NativeInstance {}

impl PluginInstance for NativeInstance {
    fn process(
        &mut self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> CallResult {
        let pin = sanitize_c_string(pin);
        let repr = packet_to_c(packet);
        let mut target = OutputTarget { sink: output };
        let result = (self.api.process_packet)(
            self.handle,
            pin.as_ptr(),
            &repr.packet,
            Some(output_trampoline),
            ptr::from_mut(&mut target).cast::<c_void>(),
        );
        // SAFETY: the message, if any, was set by the call that just returned.
        unsafe { result.to_call_result() }
    }

    fn update_params(&mut self, params: Option<&str>) -> CallResult {
        let params = params.map(sanitize_c_string);
        let params_ptr = params.as_ref().map_or(ptr::null(), |p| p.as_ptr());
        let result = (self.api.update_params)(self.handle, params_ptr);
        // SAFETY: as above.
        unsafe { result.to_call_result() }
    }

    fn flush(&mut self, output: &mut dyn OutputSink) -> CallResult {
        let mut target = OutputTarget { sink: output };
        let result = (self.api.flush)(
            self.handle,
            Some(output_trampoline),
            ptr::from_mut(&mut target).cast::<c_void>(),
        );
        // SAFETY: as above.
        unsafe { result.to_call_result() }
    }
}

impl Drop for NativeInstance {
    fn drop(&mut self) {
        (self.api.destroy_instance)(self.handle);
        debug!(kind = %self.kind, "destroyed native instance");
    }
}

// -----------------------------------------------------------------------------
// Callbacks handed to the plugin
// -----------------------------------------------------------------------------

struct OutputTarget<'a> {
    sink: &'a mut dyn OutputSink,
}

extern "C" fn output_trampoline(
    pin: *const c_char,
    packet: *const CPacket,
    user_data: *mut c_void,
) -> CResult {
    if user_data.is_null() || packet.is_null() {
        return CResult::error("output callback called without a packet");
    }
    // SAFETY: `user_data` is the `OutputTarget` of the call in flight.
    let target = unsafe { &mut *user_data.cast::<OutputTarget<'_>>() };
    // SAFETY: the plugin lends both for the duration of this callback.
    let pin = match unsafe { c_str(pin) } {
        Ok(pin) => pin,
        Err(err) => return CResult::error(&err.to_string()),
    };
    let packet = match unsafe { packet_from_c(&*packet) } {
        Ok(packet) => packet,
        Err(err) => return CResult::error(&err.to_string()),
    };
    match target.sink.send(pin, &packet) {
        Ok(()) => CResult::success(),
        Err(err) => CResult::error(&err.to_string()),
    }
}

extern "C" fn log_trampoline(
    level: CLogLevel,
    target: *const c_char,
    message: *const c_char,
    user_data: *mut c_void,
) {
    if user_data.is_null() {
        return;
    }
    // SAFETY: `user_data` points at the instance's boxed sink, which lives
    // until after `destroy_instance` returns.
    let sink = unsafe { &*user_data.cast::<Arc<dyn LogSink>>() };
    // SAFETY: borrowed for the duration of this callback.
    let target = unsafe { c_str_opt(target) }.unwrap_or("plugin");
    let message = unsafe { c_str_opt(message) }.unwrap_or("");
    sink.log(level.into(), target, message);
}

fn entry_symbol_name() -> String {
    let name = NATIVE_ENTRY_SYMBOL.strip_suffix(b"\0").unwrap_or(NATIVE_ENTRY_SYMBOL);
    String::from_utf8_lossy(name).into_owned()
}
