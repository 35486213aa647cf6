//! Plugin-side implementation of the native C table.
//!
//! A [`NodePlugin`] becomes a native module with one line:
//!
//! ```ignore
//! node_plugin::native_plugin_entry!(GainPlugin);
//! ```
//!
//! Each instance handle is a boxed [`InstanceCell`], so the C table gets the
//! same lifecycle rules as every other binding. Panics never cross the
//! boundary: they come back as failed results, a null handle from create, or
//! an error logged by destroy.

use std::any::Any;
use std::ffi::{c_char, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use crate::abi::{
    CLogCallback, CLogLevel, CNativePluginAPI, CNodeMetadata, COutputCallback, CPacket,
    CPluginHandle, CResult, NATIVE_PLUGIN_API_VERSION, sanitize_c_string,
};
use crate::conversions::{
    CMetadataRepr, c_str, c_str_opt, metadata_to_c, packet_from_c, packet_to_c,
};
use crate::error::PluginError;
use crate::lifecycle::InstanceCell;
use crate::logger::{LogLevel, LogSink, PluginLogger};
use crate::metadata::NodeMetadata;
use crate::node::{NodePlugin, OutputSink};
use crate::packet::Packet;

/// Metadata of an exported node kind, in both its Rust and C forms.
pub struct ExportedMetadata {
    metadata: Arc<NodeMetadata>,
    c_metadata: CMetadataRepr,
}

impl ExportedMetadata {
    pub fn new(metadata: NodeMetadata) -> Self {
        let c_metadata = metadata_to_c(&metadata);
        Self { metadata: Arc::new(metadata), c_metadata }
    }

    pub fn metadata(&self) -> &Arc<NodeMetadata> {
        &self.metadata
    }

    pub fn as_c_ptr(&self) -> *const CNodeMetadata {
        self.c_metadata.as_ptr()
    }
}

/// A node kind that can be exported through the C table.
///
/// Implemented by [`native_plugin_api!`](crate::native_plugin_api), which
/// gives each type its own process-lifetime metadata.
pub trait NativeExport: NodePlugin {
    fn exported() -> &'static ExportedMetadata;
}

/// The function table for `P`. Usable in a `static`.
pub const fn api_table<P: NativeExport>() -> CNativePluginAPI {
    CNativePluginAPI {
        version: NATIVE_PLUGIN_API_VERSION,
        get_metadata: get_metadata::<P>,
        create_instance: create_instance::<P>,
        process_packet: process_packet::<P>,
        update_params: update_params::<P>,
        flush: flush::<P>,
        destroy_instance: destroy_instance::<P>,
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn guarded(f: impl FnOnce() -> Result<(), PluginError>) -> CResult {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => CResult::success(),
        Ok(Err(err)) => CResult::error(&err.to_string()),
        Err(payload) => {
            CResult::error(&format!("plugin panicked: {}", panic_message(&*payload)))
        }
    }
}

/// # Safety
/// `handle` must be null or a live handle returned by `create_instance::<P>`.
unsafe fn instance<'a, P: NodePlugin>(
    handle: CPluginHandle,
) -> Result<&'a InstanceCell<P>, PluginError> {
    if handle.is_null() {
        return Err(PluginError::other("null instance handle"));
    }
    Ok(unsafe { &*handle.cast::<InstanceCell<P>>() })
}

// -----------------------------------------------------------------------------
// Host callbacks seen from the plugin
// -----------------------------------------------------------------------------

/// Log capability backed by the host's C callback.
struct CLogSink {
    callback: CLogCallback,
    user_data: *mut c_void,
}

// The host guarantees `user_data` stays valid and thread-safe for the
// lifetime of the instance it was passed to.
unsafe impl Send for CLogSink {}
unsafe impl Sync for CLogSink {}

impl LogSink for CLogSink {
    fn log(&self, level: LogLevel, target: &str, message: &str) {
        let level = CLogLevel::from(level);
        let target = sanitize_c_string(target);
        let message = sanitize_c_string(message);
        (self.callback)(level, target.as_ptr(), message.as_ptr(), self.user_data);
    }
}

/// Output sink backed by the host's C callback.
struct CallbackOutput {
    callback: Option<COutputCallback>,
    user_data: *mut c_void,
}

impl OutputSink for CallbackOutput {
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError> {
        let callback = self
            .callback
            .ok_or_else(|| PluginError::other("host provided no output callback"))?;
        let pin = sanitize_c_string(pin);
        let repr = packet_to_c(packet);
        let result = callback(pin.as_ptr(), &repr.packet, self.user_data);
        unsafe { result.to_call_result() }.into_result().map_err(PluginError::Other)
    }
}

// -----------------------------------------------------------------------------
// Table entries
// -----------------------------------------------------------------------------

extern "C" fn get_metadata<P: NativeExport>() -> *const CNodeMetadata {
    catch_unwind(|| P::exported().as_c_ptr()).unwrap_or(std::ptr::null())
}

extern "C" fn create_instance<P: NativeExport>(
    params: *const c_char,
    log_callback: Option<CLogCallback>,
    log_user_data: *mut c_void,
) -> CPluginHandle {
    let created = catch_unwind(AssertUnwindSafe(|| {
        let exported = P::exported();
        let target = exported.metadata().kind.clone();
        let logger = match log_callback {
            Some(callback) => {
                let sink = CLogSink { callback, user_data: log_user_data };
                PluginLogger::new(Arc::new(sink), target)
            }
            None => PluginLogger::null(target),
        };
        // unreadable params count as absent
        let params = unsafe { c_str_opt(params) };
        match InstanceCell::<P>::create(Arc::clone(exported.metadata()), params, logger.clone()) {
            Ok(cell) => Box::into_raw(Box::new(cell)).cast::<c_void>(),
            Err(err) => {
                logger.error(&format!("create failed: {err}"));
                std::ptr::null_mut()
            }
        }
    }));
    created.unwrap_or(std::ptr::null_mut())
}

extern "C" fn process_packet<P: NativeExport>(
    handle: CPluginHandle,
    input_pin: *const c_char,
    packet: *const CPacket,
    output_callback: Option<COutputCallback>,
    callback_data: *mut c_void,
) -> CResult {
    guarded(|| {
        let cell = unsafe { instance::<P>(handle) }?;
        let pin = unsafe { c_str(input_pin) }?;
        if packet.is_null() {
            return Err(PluginError::InvalidPacket("null packet".into()));
        }
        let packet = unsafe { packet_from_c(&*packet) }?;
        let mut output = CallbackOutput { callback: output_callback, user_data: callback_data };
        cell.process(pin, &packet, &mut output)
    })
}

extern "C" fn update_params<P: NativeExport>(
    handle: CPluginHandle,
    params: *const c_char,
) -> CResult {
    guarded(|| {
        let cell = unsafe { instance::<P>(handle) }?;
        cell.update_params(unsafe { c_str_opt(params) })
    })
}

extern "C" fn flush<P: NativeExport>(
    handle: CPluginHandle,
    output_callback: Option<COutputCallback>,
    callback_data: *mut c_void,
) -> CResult {
    guarded(|| {
        let cell = unsafe { instance::<P>(handle) }?;
        let mut output = CallbackOutput { callback: output_callback, user_data: callback_data };
        cell.flush(&mut output)
    })
}

extern "C" fn destroy_instance<P: NativeExport>(handle: CPluginHandle) {
    if handle.is_null() {
        return;
    }
    // SAFETY: the host hands each live handle back exactly once.
    let cell = unsafe { Box::from_raw(handle.cast::<InstanceCell<P>>()) };
    let logger = cell.logger();
    if let Err(payload) = catch_unwind(AssertUnwindSafe(move || cell.destroy())) {
        // destroy reports nothing to the host, so the log is the only trace
        if let Some(logger) = logger {
            logger.error(&format!("destroy panicked: {}", panic_message(&*payload)));
        }
    }
}

/// Implement [`NativeExport`](crate::export::NativeExport) for a node type,
/// building its metadata once on first use.
#[macro_export]
macro_rules! native_plugin_api {
    ($plugin:ty) => {
        impl $crate::export::NativeExport for $plugin {
            fn exported() -> &'static $crate::export::ExportedMetadata {
                static EXPORTED: ::std::sync::OnceLock<$crate::export::ExportedMetadata> =
                    ::std::sync::OnceLock::new();
                EXPORTED.get_or_init(|| {
                    $crate::export::ExportedMetadata::new(
                        <$plugin as $crate::node::NodePlugin>::metadata(),
                    )
                })
            }
        }
    };
}

/// Export a node type as a native module: implements the table and the
/// `node_plugin_api` entry point the host looks up.
#[macro_export]
macro_rules! native_plugin_entry {
    ($plugin:ty) => {
        $crate::native_plugin_api!($plugin);

        #[unsafe(no_mangle)]
        pub extern "C" fn node_plugin_api() -> *const $crate::abi::CNativePluginAPI {
            static API: $crate::abi::CNativePluginAPI = $crate::export::api_table::<$plugin>();
            &API
        }
    };
}
