use serde::{Deserialize, Serialize};

use crate::buffer::{BorrowedView, OwnedBuffer};
use crate::types::{AudioFormat, CustomEncoding, PacketMetadata, PacketType, SampleFormat};

/// Interleaved f32 audio borrowed for the duration of one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioFrame<'a> {
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples, `[L, R, L, R, ...]` for stereo.
    pub samples: BorrowedView<'a, f32>,
}

impl<'a> AudioFrame<'a> {
    pub fn new(sample_rate: u32, channels: u16, samples: &'a [f32]) -> Self {
        Self { sample_rate, channels, samples: BorrowedView::new(samples) }
    }

    /// Total number of samples across all channels.
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// The concrete format of this frame. Frames always carry f32 samples.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels, SampleFormat::F32)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomPacket<'a> {
    pub type_id: &'a str,
    pub encoding: CustomEncoding,
    /// UTF-8 payload in `encoding`.
    pub data: &'a str,
    pub metadata: Option<PacketMetadata>,
}

/// One unit of data flowing between pins.
///
/// Everything inside is borrowed: a packet handed to `process` or to an
/// output sink is only valid until that call returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Packet<'a> {
    Audio(AudioFrame<'a>),
    Text(&'a str),
    Transcription(BorrowedView<'a, u8>),
    Binary(BorrowedView<'a, u8>),
    Custom(CustomPacket<'a>),
}

impl<'a> Packet<'a> {
    /// The type this packet presents to pin validation.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Audio(frame) => PacketType::RawAudio(frame.format()),
            Packet::Text(_) => PacketType::Text,
            Packet::Transcription(_) => PacketType::Transcription,
            Packet::Binary(_) => PacketType::Binary,
            Packet::Custom(custom) => PacketType::custom(custom.type_id),
        }
    }

    /// Copy everything out so the packet can outlive the call that lent it.
    pub fn to_owned_packet(&self) -> OwnedPacket {
        match self {
            Packet::Audio(frame) => OwnedPacket::Audio {
                sample_rate: frame.sample_rate,
                channels: frame.channels,
                samples: frame.samples.to_owned_buffer(),
            },
            Packet::Text(text) => OwnedPacket::Text(text.to_string()),
            Packet::Transcription(bytes) => OwnedPacket::Transcription(bytes.to_vec()),
            Packet::Binary(bytes) => OwnedPacket::Binary(bytes.to_vec()),
            Packet::Custom(custom) => OwnedPacket::Custom {
                type_id: custom.type_id.to_string(),
                encoding: custom.encoding,
                data: custom.data.to_string(),
                metadata: custom.metadata,
            },
        }
    }
}

/// Owned counterpart of [`Packet`], for whoever needs to keep a packet
/// around after the call that produced it returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OwnedPacket {
    Audio { sample_rate: u32, channels: u16, samples: OwnedBuffer<f32> },
    Text(String),
    Transcription(Vec<u8>),
    Binary(Vec<u8>),
    Custom {
        type_id: String,
        encoding: CustomEncoding,
        data: String,
        metadata: Option<PacketMetadata>,
    },
}

impl OwnedPacket {
    pub fn audio(sample_rate: u32, channels: u16, samples: Vec<f32>) -> Self {
        OwnedPacket::Audio { sample_rate, channels, samples: samples.into() }
    }

    /// Lend this packet out as a view.
    pub fn as_packet(&self) -> Packet<'_> {
        match self {
            OwnedPacket::Audio { sample_rate, channels, samples } => Packet::Audio(AudioFrame {
                sample_rate: *sample_rate,
                channels: *channels,
                samples: samples.view(),
            }),
            OwnedPacket::Text(text) => Packet::Text(text),
            OwnedPacket::Transcription(bytes) => Packet::Transcription(BorrowedView::new(bytes)),
            OwnedPacket::Binary(bytes) => Packet::Binary(BorrowedView::new(bytes)),
            OwnedPacket::Custom { type_id, encoding, data, metadata } => {
                Packet::Custom(CustomPacket {
                    type_id,
                    encoding: *encoding,
                    data,
                    metadata: *metadata,
                })
            }
        }
    }

    pub fn packet_type(&self) -> PacketType {
        self.as_packet().packet_type()
    }

    /// Samples of an audio packet, `None` for every other kind.
    pub fn samples(&self) -> Option<&[f32]> {
        match self {
            OwnedPacket::Audio { samples, .. } => Some(samples),
            _ => None,
        }
    }
}
