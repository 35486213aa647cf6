//! `#[repr(C)]` mirror of the native plugin ABI.
//!
//! A native module exports one symbol, [`NATIVE_ENTRY_SYMBOL`], returning a
//! pointer to a [`CNativePluginAPI`] whose first field is the ABI version.
//! Every pointer handed into a call is borrowed for that call only.

use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char, c_void};

use crate::logger::LogLevel;
use crate::result::CallResult;

/// Current native ABI version. Host and plugin must agree exactly.
pub const NATIVE_PLUGIN_API_VERSION: u32 = 2;

/// Name of the exported entry point, NUL-terminated for symbol lookup.
pub const NATIVE_ENTRY_SYMBOL: &[u8] = b"node_plugin_api\0";

/// Opaque handle to a plugin instance.
pub type CPluginHandle = *mut c_void;

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CLogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

impl From<LogLevel> for CLogLevel {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => CLogLevel::Trace,
            LogLevel::Debug => CLogLevel::Debug,
            LogLevel::Info => CLogLevel::Info,
            LogLevel::Warn => CLogLevel::Warn,
            LogLevel::Error => CLogLevel::Error,
        }
    }
}

impl From<CLogLevel> for LogLevel {
    fn from(level: CLogLevel) -> Self {
        match level {
            CLogLevel::Trace => LogLevel::Trace,
            CLogLevel::Debug => LogLevel::Debug,
            CLogLevel::Info => LogLevel::Info,
            CLogLevel::Warn => LogLevel::Warn,
            CLogLevel::Error => LogLevel::Error,
        }
    }
}

pub type CLogCallback = extern "C" fn(
    level: CLogLevel,
    target: *const c_char,
    message: *const c_char,
    user_data: *mut c_void,
);

/// Outcome of an ABI call.
///
/// `error_message` is null on success. On failure it is borrowed from the
/// callee's thread-local storage and stays valid until the callee's next
/// failing call on the same thread; the caller copies it right away.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CResult {
    pub success: bool,
    pub error_message: *const c_char,
}

thread_local! {
    static LAST_ERROR: RefCell<CString> = RefCell::new(CString::default());
}

impl CResult {
    pub fn success() -> Self {
        Self { success: true, error_message: std::ptr::null() }
    }

    pub fn error(message: &str) -> Self {
        let message = sanitize_c_string(message);
        let error_message = LAST_ERROR.with(|slot| {
            *slot.borrow_mut() = message;
            slot.borrow().as_ptr()
        });
        Self { success: false, error_message }
    }

    /// Copy this result into an owned [`CallResult`].
    ///
    /// # Safety
    /// `error_message` must be null or a valid NUL-terminated string.
    pub unsafe fn to_call_result(&self) -> CallResult {
        if self.success {
            return CallResult::ok();
        }
        if self.error_message.is_null() {
            return CallResult::failure("unknown error");
        }
        let message = unsafe { CStr::from_ptr(self.error_message) };
        CallResult::failure(message.to_string_lossy().into_owned())
    }
}

impl From<CallResult> for CResult {
    fn from(result: CallResult) -> Self {
        match result.error_message() {
            None => CResult::success(),
            Some(message) => CResult::error(message),
        }
    }
}

/// Build a C string, replacing interior NULs with spaces.
pub fn sanitize_c_string(s: &str) -> CString {
    CString::new(s).unwrap_or_else(|_| CString::new(s.replace('\0', " ")).unwrap_or_default())
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CSampleFormat {
    F32 = 0,
    S16Le = 1,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CAudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: CSampleFormat,
}

/// Interleaved f32 samples, borrowed.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CAudioFrame {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: *const f32,
    /// Total samples across all channels.
    pub sample_count: usize,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CPacketType {
    RawAudio = 0,
    OpusAudio = 1,
    Text = 2,
    Transcription = 3,
    Custom = 4,
    Binary = 5,
    Any = 6,
    Passthrough = 7,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CCustomEncoding {
    Json = 0,
}

#[repr(C)]
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct CPacketMetadata {
    pub timestamp_us: u64,
    pub has_timestamp_us: bool,
    pub duration_us: u64,
    pub has_duration_us: bool,
    pub sequence: u64,
    pub has_sequence: bool,
}

/// Custom payload. `data_json` is UTF-8 and not NUL-terminated.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CCustomPacket {
    pub type_id: *const c_char,
    pub encoding: CCustomEncoding,
    pub data_json: *const u8,
    pub data_len: usize,
    /// May be null.
    pub metadata: *const CPacketMetadata,
}

/// Packet type plus the data its tag requires.
///
/// `audio_format` is non-null only for `RawAudio`, `custom_type_id` only for `Custom`.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CPacketTypeInfo {
    pub type_discriminant: CPacketType,
    pub audio_format: *const CAudioFormat,
    pub custom_type_id: *const c_char,
}

/// Generic packet container. What `data` points at depends on the tag:
///
/// - `RawAudio`: a [`CAudioFrame`]
/// - `Text`: a NUL-terminated string, `len` includes the NUL
/// - `Transcription`, `Binary`: `len` raw bytes
/// - `Custom`: a [`CCustomPacket`]
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CPacket {
    pub packet_type: CPacketType,
    pub data: *const c_void,
    pub len: usize,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CInputPin {
    pub name: *const c_char,
    pub accepts_types: *const CPacketTypeInfo,
    pub accepts_types_count: usize,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct COutputPin {
    pub name: *const c_char,
    pub produces_type: CPacketTypeInfo,
}

#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CNodeMetadata {
    pub kind: *const c_char,
    /// May be null.
    pub description: *const c_char,
    pub inputs: *const CInputPin,
    pub inputs_count: usize,
    pub outputs: *const COutputPin,
    pub outputs_count: usize,
    pub param_schema: *const c_char,
    pub categories: *const *const c_char,
    pub categories_count: usize,
}

pub type COutputCallback = extern "C" fn(
    pin_name: *const c_char,
    packet: *const CPacket,
    user_data: *mut c_void,
) -> CResult;

/// The table a native module exports. All function pointers are non-null.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CNativePluginAPI {
    pub version: u32,

    /// Metadata pointer valid for the whole lifetime of the loaded module.
    pub get_metadata: extern "C" fn() -> *const CNodeMetadata,

    /// Returns null on failure. `params` may be null.
    pub create_instance: extern "C" fn(
        params: *const c_char,
        log_callback: Option<CLogCallback>,
        log_user_data: *mut c_void,
    ) -> CPluginHandle,

    pub process_packet: extern "C" fn(
        handle: CPluginHandle,
        input_pin: *const c_char,
        packet: *const CPacket,
        output_callback: Option<COutputCallback>,
        callback_data: *mut c_void,
    ) -> CResult,

    pub update_params: extern "C" fn(handle: CPluginHandle, params: *const c_char) -> CResult,

    pub flush: extern "C" fn(
        handle: CPluginHandle,
        output_callback: Option<COutputCallback>,
        callback_data: *mut c_void,
    ) -> CResult,

    /// Must be called exactly once per handle, never from inside a callback.
    pub destroy_instance: extern "C" fn(handle: CPluginHandle),
}

/// Signature of the exported entry point.
pub type CEntryPoint = unsafe extern "C" fn() -> *const CNativePluginAPI;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_borrowed_from_thread_local_storage() {
        let result = CResult::error("unknown pin 'x'");
        assert!(!result.success);
        let owned = unsafe { result.to_call_result() };
        assert_eq!(owned.error_message(), Some("unknown pin 'x'"));
    }

    #[test]
    fn interior_nuls_are_replaced() {
        let result = CResult::error("bad\0pin");
        let owned = unsafe { result.to_call_result() };
        assert_eq!(owned.error_message(), Some("bad pin"));
    }

    #[test]
    fn call_results_map_onto_c_results() {
        let ok: CResult = CallResult::ok().into();
        assert!(ok.success && ok.error_message.is_null());
        let failed: CResult = CallResult::failure("boom").into();
        assert!(!failed.success);
        assert_eq!(unsafe { failed.to_call_result() }, CallResult::failure("boom"));
    }
}
