//! Conversions between the C ABI types and the Rust contract types.
//!
//! `*_to_c` functions return a `Repr` that owns every allocation the C view
//! points into; keep it alive for as long as the C view is in use.

use std::ffi::{CStr, CString, c_char, c_void};
use std::marker::PhantomData;

use crate::abi::{
    CAudioFormat, CAudioFrame, CCustomEncoding, CCustomPacket, CInputPin, CNodeMetadata,
    COutputPin, CPacket, CPacketMetadata, CPacketType, CPacketTypeInfo, CSampleFormat,
    sanitize_c_string,
};
use crate::buffer::BorrowedView;
use crate::error::PluginError;
use crate::metadata::{InputPin, NodeMetadata, OutputPin};
use crate::packet::{AudioFrame, CustomPacket, Packet};
use crate::types::{AudioFormat, CustomEncoding, PacketMetadata, PacketType, SampleFormat};

// -----------------------------------------------------------------------------
// Strings and slices
// -----------------------------------------------------------------------------

/// Borrow a C string as UTF-8.
///
/// # Safety
/// `ptr` must be null or a valid NUL-terminated string that outlives `'a`.
pub unsafe fn c_str<'a>(ptr: *const c_char) -> Result<&'a str, PluginError> {
    if ptr.is_null() {
        return Err(PluginError::InvalidPacket("null string pointer".into()));
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|e| PluginError::InvalidPacket(format!("invalid UTF-8: {e}")))
}

/// Like [`c_str`], but null or non-UTF-8 input is `None`.
///
/// # Safety
/// Same as [`c_str`].
pub unsafe fn c_str_opt<'a>(ptr: *const c_char) -> Option<&'a str> {
    unsafe { c_str(ptr) }.ok()
}

/// # Safety
/// `ptr` must be null (only when `len == 0`) or valid for `len` reads of `T` during `'a`.
unsafe fn slice_from<'a, T>(ptr: *const T, len: usize) -> Result<&'a [T], PluginError> {
    if len == 0 {
        return Ok(&[]);
    }
    if ptr.is_null() {
        return Err(PluginError::InvalidPacket(format!("null pointer with length {len}")));
    }
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) })
}

// -----------------------------------------------------------------------------
// Formats and packet types
// -----------------------------------------------------------------------------

pub const fn sample_format_to_c(format: SampleFormat) -> CSampleFormat {
    match format {
        SampleFormat::F32 => CSampleFormat::F32,
        SampleFormat::S16Le => CSampleFormat::S16Le,
    }
}

pub const fn sample_format_from_c(format: CSampleFormat) -> SampleFormat {
    match format {
        CSampleFormat::F32 => SampleFormat::F32,
        CSampleFormat::S16Le => SampleFormat::S16Le,
    }
}

pub const fn audio_format_to_c(format: &AudioFormat) -> CAudioFormat {
    CAudioFormat {
        sample_rate: format.sample_rate,
        channels: format.channels,
        sample_format: sample_format_to_c(format.sample_format),
    }
}

pub const fn audio_format_from_c(format: &CAudioFormat) -> AudioFormat {
    AudioFormat {
        sample_rate: format.sample_rate,
        channels: format.channels,
        sample_format: sample_format_from_c(format.sample_format),
    }
}

pub fn packet_metadata_to_c(meta: &PacketMetadata) -> CPacketMetadata {
    CPacketMetadata {
        timestamp_us: meta.timestamp_us.unwrap_or_default(),
        has_timestamp_us: meta.timestamp_us.is_some(),
        duration_us: meta.duration_us.unwrap_or_default(),
        has_duration_us: meta.duration_us.is_some(),
        sequence: meta.sequence.unwrap_or_default(),
        has_sequence: meta.sequence.is_some(),
    }
}

pub fn packet_metadata_from_c(meta: &CPacketMetadata) -> PacketMetadata {
    PacketMetadata {
        timestamp_us: meta.has_timestamp_us.then_some(meta.timestamp_us),
        duration_us: meta.has_duration_us.then_some(meta.duration_us),
        sequence: meta.has_sequence.then_some(meta.sequence),
    }
}

/// Owns the storage behind a [`CPacketTypeInfo`].
pub struct PacketTypeRepr {
    pub info: CPacketTypeInfo,
    _format: Option<Box<CAudioFormat>>,
    _type_id: Option<CString>,
}

pub fn packet_type_to_c(packet_type: &PacketType) -> PacketTypeRepr {
    let bare = |tag| CPacketTypeInfo {
        type_discriminant: tag,
        audio_format: std::ptr::null(),
        custom_type_id: std::ptr::null(),
    };
    let simple = |tag| PacketTypeRepr { info: bare(tag), _format: None, _type_id: None };

    match packet_type {
        PacketType::RawAudio(format) => {
            let format = Box::new(audio_format_to_c(format));
            let info = CPacketTypeInfo { audio_format: &*format, ..bare(CPacketType::RawAudio) };
            PacketTypeRepr { info, _format: Some(format), _type_id: None }
        }
        PacketType::Custom { type_id } => {
            let type_id = sanitize_c_string(type_id);
            let info = CPacketTypeInfo {
                custom_type_id: type_id.as_ptr(),
                ..bare(CPacketType::Custom)
            };
            PacketTypeRepr { info, _format: None, _type_id: Some(type_id) }
        }
        PacketType::OpusAudio => simple(CPacketType::OpusAudio),
        PacketType::Text => simple(CPacketType::Text),
        PacketType::Transcription => simple(CPacketType::Transcription),
        PacketType::Binary => simple(CPacketType::Binary),
        PacketType::Any => simple(CPacketType::Any),
        PacketType::Passthrough => simple(CPacketType::Passthrough),
    }
}

/// Rejects a tag whose required field is missing.
///
/// # Safety
/// Non-null pointers in `info` must be valid for the duration of the call.
pub unsafe fn packet_type_from_c(info: &CPacketTypeInfo) -> Result<PacketType, PluginError> {
    Ok(match info.type_discriminant {
        CPacketType::RawAudio => {
            if info.audio_format.is_null() {
                return Err(PluginError::InvalidPacket("RawAudio type missing audio_format".into()));
            }
            PacketType::RawAudio(audio_format_from_c(unsafe { &*info.audio_format }))
        }
        CPacketType::Custom => {
            if info.custom_type_id.is_null() {
                return Err(PluginError::InvalidPacket("Custom type missing custom_type_id".into()));
            }
            PacketType::custom(unsafe { c_str(info.custom_type_id) }?)
        }
        CPacketType::OpusAudio => PacketType::OpusAudio,
        CPacketType::Text => PacketType::Text,
        CPacketType::Transcription => PacketType::Transcription,
        CPacketType::Binary => PacketType::Binary,
        CPacketType::Any => PacketType::Any,
        CPacketType::Passthrough => PacketType::Passthrough,
    })
}

// -----------------------------------------------------------------------------
// Packets
// -----------------------------------------------------------------------------

/// Owns the C view of one packet for the duration of an output callback.
pub struct CPacketRepr<'a> {
    pub packet: CPacket,
    _owned: PacketOwned,
    _borrowed: PhantomData<&'a [u8]>,
}

#[allow(dead_code)] // keeps the C view's pointers alive
enum PacketOwned {
    None,
    Audio(Box<CAudioFrame>),
    Text(CString),
    Custom {
        custom: Box<CCustomPacket>,
        type_id: CString,
        metadata: Option<Box<CPacketMetadata>>,
    },
}

/// Build the C view of `packet`. Sample and byte payloads are not copied.
pub fn packet_to_c<'a>(packet: &Packet<'a>) -> CPacketRepr<'a> {
    let (packet, owned) = match packet {
        Packet::Audio(frame) => {
            let c_frame = Box::new(CAudioFrame {
                sample_rate: frame.sample_rate,
                channels: frame.channels,
                samples: frame.samples.as_ptr(),
                sample_count: frame.samples.len(),
            });
            let packet = CPacket {
                packet_type: CPacketType::RawAudio,
                data: std::ptr::from_ref::<CAudioFrame>(&c_frame).cast::<c_void>(),
                len: std::mem::size_of::<CAudioFrame>(),
            };
            (packet, PacketOwned::Audio(c_frame))
        }
        Packet::Text(text) => {
            let text = sanitize_c_string(text);
            let packet = CPacket {
                packet_type: CPacketType::Text,
                data: text.as_ptr().cast::<c_void>(),
                len: text.as_bytes_with_nul().len(),
            };
            (packet, PacketOwned::Text(text))
        }
        Packet::Transcription(bytes) => {
            (bytes_packet(CPacketType::Transcription, bytes), PacketOwned::None)
        }
        Packet::Binary(bytes) => (bytes_packet(CPacketType::Binary, bytes), PacketOwned::None),
        Packet::Custom(custom) => {
            let type_id = sanitize_c_string(custom.type_id);
            let metadata = custom.metadata.as_ref().map(|m| Box::new(packet_metadata_to_c(m)));
            let c_custom = Box::new(CCustomPacket {
                type_id: type_id.as_ptr(),
                encoding: match custom.encoding {
                    CustomEncoding::Json => CCustomEncoding::Json,
                },
                data_json: custom.data.as_ptr(),
                data_len: custom.data.len(),
                metadata: metadata.as_deref().map_or(std::ptr::null(), std::ptr::from_ref),
            });
            let packet = CPacket {
                packet_type: CPacketType::Custom,
                data: std::ptr::from_ref::<CCustomPacket>(&c_custom).cast::<c_void>(),
                len: std::mem::size_of::<CCustomPacket>(),
            };
            (packet, PacketOwned::Custom { custom: c_custom, type_id, metadata })
        }
    };
    CPacketRepr { packet, _owned: owned, _borrowed: PhantomData }
}

fn bytes_packet(tag: CPacketType, bytes: &BorrowedView<'_, u8>) -> CPacket {
    CPacket { packet_type: tag, data: bytes.as_ptr().cast::<c_void>(), len: bytes.len() }
}

/// Borrow a packet out of its C view. Nothing is copied.
///
/// # Safety
/// Every pointer reachable from `packet` must be valid for `'a` and match
/// the layout its tag describes.
pub unsafe fn packet_from_c<'a>(packet: &'a CPacket) -> Result<Packet<'a>, PluginError> {
    let needs_data =
        !matches!(packet.packet_type, CPacketType::Binary | CPacketType::Transcription);
    if needs_data && packet.data.is_null() {
        return Err(PluginError::InvalidPacket("null packet data".into()));
    }

    match packet.packet_type {
        CPacketType::RawAudio => {
            let frame = unsafe { &*packet.data.cast::<CAudioFrame>() };
            let samples = unsafe { slice_from(frame.samples, frame.sample_count) }?;
            Ok(Packet::Audio(AudioFrame::new(frame.sample_rate, frame.channels, samples)))
        }
        CPacketType::Text => {
            let bytes = unsafe { slice_from(packet.data.cast::<u8>(), packet.len) }?;
            let bytes = bytes.strip_suffix(&[0]).unwrap_or(bytes);
            let text = std::str::from_utf8(bytes).map_err(|e| {
                PluginError::InvalidPacket(format!("invalid UTF-8 in text packet: {e}"))
            })?;
            Ok(Packet::Text(text))
        }
        CPacketType::Transcription => {
            let bytes = unsafe { slice_from(packet.data.cast::<u8>(), packet.len) }?;
            Ok(Packet::Transcription(BorrowedView::new(bytes)))
        }
        CPacketType::Binary => {
            let bytes = unsafe { slice_from(packet.data.cast::<u8>(), packet.len) }?;
            Ok(Packet::Binary(BorrowedView::new(bytes)))
        }
        CPacketType::Custom => {
            let custom = unsafe { &*packet.data.cast::<CCustomPacket>() };
            let type_id = unsafe { c_str(custom.type_id) }?;
            let data = unsafe { slice_from(custom.data_json, custom.data_len) }?;
            let data = std::str::from_utf8(data).map_err(|e| {
                PluginError::InvalidPacket(format!("invalid UTF-8 in custom packet: {e}"))
            })?;
            let metadata = if custom.metadata.is_null() {
                None
            } else {
                Some(packet_metadata_from_c(unsafe { &*custom.metadata }))
            };
            let encoding = match custom.encoding {
                CCustomEncoding::Json => CustomEncoding::Json,
            };
            Ok(Packet::Custom(CustomPacket { type_id, encoding, data, metadata }))
        }
        other => {
            Err(PluginError::InvalidPacket(format!("{other:?} cannot be carried by a packet")))
        }
    }
}

// -----------------------------------------------------------------------------
// Metadata
// -----------------------------------------------------------------------------

/// Owns the storage behind a [`CNodeMetadata`].
pub struct CMetadataRepr {
    metadata: CNodeMetadata,
    _strings: Vec<CString>,
    _types: Vec<PacketTypeRepr>,
    _accepts: Vec<Vec<CPacketTypeInfo>>,
    _inputs: Vec<CInputPin>,
    _outputs: Vec<COutputPin>,
    _categories: Vec<*const c_char>,
}

// Every pointer in the C view targets heap storage owned by this value and
// never mutated after construction.
unsafe impl Send for CMetadataRepr {}
unsafe impl Sync for CMetadataRepr {}

impl CMetadataRepr {
    pub fn as_ptr(&self) -> *const CNodeMetadata {
        &self.metadata
    }
}

pub fn metadata_to_c(metadata: &NodeMetadata) -> CMetadataRepr {
    let mut strings = Vec::new();
    let mut keep = |s: &str| {
        let c = sanitize_c_string(s);
        let ptr = c.as_ptr();
        strings.push(c);
        ptr
    };

    let kind = keep(metadata.kind.as_str());
    let description = metadata.description.as_deref().map_or(std::ptr::null(), &mut keep);
    let param_schema = keep(metadata.param_schema.as_str());
    let categories: Vec<*const c_char> =
        metadata.categories.iter().map(|c| keep(c.as_str())).collect();

    let mut types = Vec::new();
    let mut accepts = Vec::new();
    let mut inputs = Vec::new();
    for pin in &metadata.inputs {
        let reprs: Vec<PacketTypeRepr> = pin.accepts_types.iter().map(packet_type_to_c).collect();
        let infos: Vec<CPacketTypeInfo> = reprs.iter().map(|r| r.info).collect();
        inputs.push(CInputPin {
            name: keep(pin.name.as_str()),
            accepts_types: infos.as_ptr(),
            accepts_types_count: infos.len(),
        });
        types.extend(reprs);
        accepts.push(infos);
    }

    let mut outputs = Vec::new();
    for pin in &metadata.outputs {
        let repr = packet_type_to_c(&pin.produces_type);
        outputs.push(COutputPin { name: keep(pin.name.as_str()), produces_type: repr.info });
        types.push(repr);
    }

    let c_metadata = CNodeMetadata {
        kind,
        description,
        inputs: inputs.as_ptr(),
        inputs_count: inputs.len(),
        outputs: outputs.as_ptr(),
        outputs_count: outputs.len(),
        param_schema,
        categories: categories.as_ptr(),
        categories_count: categories.len(),
    };

    CMetadataRepr {
        metadata: c_metadata,
        _strings: strings,
        _types: types,
        _accepts: accepts,
        _inputs: inputs,
        _outputs: outputs,
        _categories: categories,
    }
}

/// Copy a C metadata description into an owned [`NodeMetadata`].
///
/// # Safety
/// Every pointer reachable from `metadata` must be valid for the call.
pub unsafe fn metadata_from_c(metadata: &CNodeMetadata) -> Result<NodeMetadata, PluginError> {
    let string = |ptr| unsafe { c_str(ptr) }.map(str::to_string);

    let mut inputs = Vec::new();
    for pin in unsafe { slice_from(metadata.inputs, metadata.inputs_count) }? {
        let accepts = unsafe { slice_from(pin.accepts_types, pin.accepts_types_count) }?;
        let accepts_types = accepts
            .iter()
            .map(|info| unsafe { packet_type_from_c(info) })
            .collect::<Result<Vec<_>, _>>()?;
        inputs.push(InputPin { name: string(pin.name)?, accepts_types });
    }

    let mut outputs = Vec::new();
    for pin in unsafe { slice_from(metadata.outputs, metadata.outputs_count) }? {
        outputs.push(OutputPin {
            name: string(pin.name)?,
            produces_type: unsafe { packet_type_from_c(&pin.produces_type) }?,
        });
    }

    let categories = unsafe { slice_from(metadata.categories, metadata.categories_count) }?
        .iter()
        .map(|&ptr| string(ptr))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(NodeMetadata {
        kind: string(metadata.kind)?,
        description: unsafe { c_str_opt(metadata.description) }.map(str::to_string),
        inputs,
        outputs,
        param_schema: string(metadata.param_schema)?,
        categories,
    })
}
