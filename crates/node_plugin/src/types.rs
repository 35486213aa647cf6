use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Sample encoding of a raw audio stream.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    F32,
    S16Le,
}

/// Audio stream description used during pin negotiation.
///
/// A `sample_rate` or `channels` of `0` is a wildcard: the pin accepts (or
/// produces) any concrete value for that field.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
}

impl AudioFormat {
    pub const WILDCARD_RATE: u32 = 0;
    pub const WILDCARD_CHANNELS: u16 = 0;

    pub const fn new(sample_rate: u32, channels: u16, sample_format: SampleFormat) -> Self {
        Self { sample_rate, channels, sample_format }
    }

    /// Any rate, any channel count, fixed sample format.
    pub const fn any_f32() -> Self {
        Self::new(Self::WILDCARD_RATE, Self::WILDCARD_CHANNELS, SampleFormat::F32)
    }

    /// True when `self` (offered) satisfies `required`.
    pub fn satisfies(&self, required: &AudioFormat) -> bool {
        (required.sample_rate == Self::WILDCARD_RATE || self.sample_rate == required.sample_rate)
            && (required.channels == Self::WILDCARD_CHANNELS || self.channels == required.channels)
            && self.sample_format == required.sample_format
    }
}

/// The closed set of packet types a pin can accept or produce.
///
/// Associated data lives on the variant that needs it, so a `RawAudio`
/// type always has a format and a `Custom` type always has an id.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum PacketType {
    RawAudio(AudioFormat),
    OpusAudio,
    Text,
    Transcription,
    Custom { type_id: String },
    Binary,
    Any,
    Passthrough,
}

impl PacketType {
    pub fn custom(type_id: impl Into<String>) -> Self {
        PacketType::Custom { type_id: type_id.into() }
    }

    /// Short tag name, e.g. for error messages.
    pub fn tag(&self) -> &'static str {
        match self {
            PacketType::RawAudio(_) => "RawAudio",
            PacketType::OpusAudio => "OpusAudio",
            PacketType::Text => "Text",
            PacketType::Transcription => "Transcription",
            PacketType::Custom { .. } => "Custom",
            PacketType::Binary => "Binary",
            PacketType::Any => "Any",
            PacketType::Passthrough => "Passthrough",
        }
    }
}

impl std::fmt::Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::RawAudio(format) => {
                let rate = match format.sample_rate {
                    0 => "*".to_string(),
                    r => r.to_string(),
                };
                let channels = match format.channels {
                    0 => "*".to_string(),
                    c => c.to_string(),
                };
                write!(f, "RawAudio({rate}Hz, {channels}ch, {:?})", format.sample_format)
            }
            PacketType::Custom { type_id } => write!(f, "Custom({type_id})"),
            other => f.write_str(other.tag()),
        }
    }
}

/// Can a pin producing `offered` feed a pin that requires `required`?
///
/// Rules:
/// - `Any` on either side matches everything
/// - otherwise the tags must be equal
/// - `RawAudio`: every field of the offered format equals the required one,
///   unless the required field is the wildcard `0`
/// - `Custom`: the type ids must be equal
pub fn can_connect(offered: &PacketType, required: &PacketType) -> bool {
    match (offered, required) {
        (PacketType::Any, _) | (_, PacketType::Any) => true,
        (PacketType::RawAudio(out), PacketType::RawAudio(input)) => out.satisfies(input),
        (PacketType::Custom { type_id: a }, PacketType::Custom { type_id: b }) => a == b,
        (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
    }
}

/// `true` if `offered` is compatible with at least one entry of `accepted`.
pub fn can_connect_any(offered: &PacketType, accepted: &[PacketType]) -> bool {
    accepted.iter().any(|required| can_connect(offered, required))
}

/// Payload encoding of custom packets. Only JSON exists today.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum CustomEncoding {
    #[default]
    Json,
}

/// Optional timing and sequencing information that can ride along with a packet.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub struct PacketMetadata {
    pub timestamp_us: Option<u64>,
    pub duration_us: Option<u64>,
    pub sequence: Option<u64>,
}
