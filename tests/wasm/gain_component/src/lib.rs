//! Decibel gain node, exported as a component.
//!
//! Params: `{"gain_db": x}` with x clamped into `[-60, 20]`, default 0.

use std::sync::{Arc, OnceLock};

use node_plugin::buffer::BorrowedView;
use node_plugin::component::{COMPONENT_API_VERSION, ComponentInstance, HostLogSink};
use node_plugin::prelude::*;

use crate::bindings::exports::nodekit::plugin::node::{Guest, GuestNodeInstance, NodeInstance};
use crate::bindings::nodekit::plugin::{host, types as wit};

mod bindings {
    use crate::GainComponent;
    wit_bindgen::generate!({
        generate_all,
        world: "node-plugin",
        path: "../../../wit"
    });

    export!(GainComponent);
}

pub const GAIN_DB: NumberParam =
    NumberParam::new("gain_db", 0.0, -60.0, 20.0).describe("Gain in decibels");

pub fn db_to_linear(db: f64) -> f32 {
    10f64.powf(db / 20.0) as f32
}

// ---------------------------------------------------------------------------
// The node
// ---------------------------------------------------------------------------

pub struct GainDb {
    gain_db: f64,
    linear: f32,
    logger: PluginLogger,
}

impl GainDb {
    pub fn linear(&self) -> f32 {
        self.linear
    }

    fn set(&mut self, gain_db: f64) {
        self.gain_db = gain_db;
        self.linear = db_to_linear(gain_db);
    }
}

impl NodePlugin for GainDb {
    fn metadata() -> NodeMetadata {
        let audio = PacketType::RawAudio(AudioFormat::any_f32());
        NodeMetadata::builder("gain_db")
            .description("Applies a gain given in decibels")
            .input("in", vec![audio.clone()])
            .output("out", audio)
            .param_schema(param_schema(&[GAIN_DB]))
            .category("audio")
            .category("filters")
            .build()
    }

    fn new(params: Option<&str>, logger: PluginLogger) -> Result<Self, PluginError> {
        let mut node = Self { gain_db: 0.0, linear: 1.0, logger };
        node.set(GAIN_DB.initial(params));
        node.logger.debug(&format!("gain_db set to {}", node.gain_db));
        Ok(node)
    }

    fn process(
        &mut self,
        _pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), PluginError> {
        let Packet::Audio(frame) = packet else {
            return Err(PluginError::InvalidPacket("gain_db only handles raw audio".into()));
        };
        let scaled: OwnedBuffer<f32> = frame.samples.iter().map(|s| s * self.linear).collect();
        output.send(
            "out",
            &Packet::Audio(AudioFrame {
                sample_rate: frame.sample_rate,
                channels: frame.channels,
                samples: scaled.view(),
            }),
        )
    }

    fn update_params(&mut self, params: Option<&str>) -> Result<(), PluginError> {
        let gain_db = GAIN_DB.resolve(params, self.gain_db);
        if gain_db != self.gain_db {
            self.logger.info(&format!("gain_db {} -> {gain_db}", self.gain_db));
            self.set(gain_db);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Component glue
// ---------------------------------------------------------------------------

fn shared_metadata() -> Arc<NodeMetadata> {
    static METADATA: OnceLock<Arc<NodeMetadata>> = OnceLock::new();
    METADATA.get_or_init(|| Arc::new(GainDb::metadata())).clone()
}

fn host_log(level: LogLevel, target: &str, message: &str) {
    let level = match level {
        LogLevel::Trace => host::LogLevel::Trace,
        LogLevel::Debug => host::LogLevel::Debug,
        LogLevel::Info => host::LogLevel::Info,
        LogLevel::Warn => host::LogLevel::Warn,
        LogLevel::Error => host::LogLevel::Error,
    };
    host::log(level, target, message);
}

struct HostOutput;

impl OutputSink for HostOutput {
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError> {
        host::send_output(pin, &packet_to_wit(packet)).map_err(PluginError::Other)
    }
}

struct GainComponent;

impl Guest for GainComponent {
    type NodeInstance = GainNode;

    fn api_version() -> u32 {
        COMPONENT_API_VERSION
    }

    fn metadata() -> wit::NodeMetadata {
        metadata_to_wit(&shared_metadata())
    }
}

pub struct GainNode {
    inner: ComponentInstance<GainDb>,
}

impl GuestNodeInstance for GainNode {
    fn create(params: Option<String>) -> Result<NodeInstance, String> {
        let logger = PluginLogger::new(Arc::new(HostLogSink(host_log)), "gain_db");
        let inner = ComponentInstance::create(shared_metadata(), params.as_deref(), logger)?;
        Ok(NodeInstance::new(GainNode { inner }))
    }

    fn process(&self, input_pin: String, packet: wit::Packet) -> Result<(), String> {
        self.inner.process(&input_pin, &packet_from_wit(&packet), &mut HostOutput)
    }

    fn update_params(&self, params: Option<String>) -> Result<(), String> {
        self.inner.update_params(params.as_deref())
    }

    fn flush(&self) -> Result<(), String> {
        self.inner.flush(&mut HostOutput)
    }

    fn cleanup(&self) {
        self.inner.cleanup();
    }
}

// ---------------------------------------------------------------------------
// Interface type conversions
// ---------------------------------------------------------------------------

fn packet_type_to_wit(packet_type: &PacketType) -> wit::PacketType {
    match packet_type {
        PacketType::RawAudio(format) => wit::PacketType::RawAudio(wit::AudioFormat {
            sample_rate: format.sample_rate,
            channels: format.channels,
            sample_format: match format.sample_format {
                SampleFormat::F32 => wit::SampleFormat::Float32,
                SampleFormat::S16Le => wit::SampleFormat::S16le,
            },
        }),
        PacketType::OpusAudio => wit::PacketType::OpusAudio,
        PacketType::Text => wit::PacketType::Text,
        PacketType::Transcription => wit::PacketType::Transcription,
        PacketType::Custom { type_id } => wit::PacketType::Custom(type_id.clone()),
        PacketType::Binary => wit::PacketType::Binary,
        PacketType::Any => wit::PacketType::Any,
        PacketType::Passthrough => wit::PacketType::Passthrough,
    }
}

fn metadata_to_wit(metadata: &NodeMetadata) -> wit::NodeMetadata {
    wit::NodeMetadata {
        kind: metadata.kind.clone(),
        description: metadata.description.clone(),
        inputs: metadata
            .inputs
            .iter()
            .map(|pin| wit::InputPin {
                name: pin.name.clone(),
                accepts_types: pin.accepts_types.iter().map(packet_type_to_wit).collect(),
            })
            .collect(),
        outputs: metadata
            .outputs
            .iter()
            .map(|pin| wit::OutputPin {
                name: pin.name.clone(),
                produces_type: packet_type_to_wit(&pin.produces_type),
            })
            .collect(),
        param_schema: metadata.param_schema.clone(),
        categories: metadata.categories.clone(),
    }
}

fn packet_from_wit(packet: &wit::Packet) -> Packet<'_> {
    match packet {
        wit::Packet::Audio(frame) => {
            Packet::Audio(AudioFrame::new(frame.sample_rate, frame.channels, &frame.samples))
        }
        wit::Packet::Text(text) => Packet::Text(text),
        wit::Packet::Transcription(bytes) => Packet::Transcription(BorrowedView::new(bytes)),
        wit::Packet::Binary(bytes) => Packet::Binary(BorrowedView::new(bytes)),
        wit::Packet::Custom(custom) => Packet::Custom(CustomPacket {
            type_id: &custom.type_id,
            encoding: CustomEncoding::Json,
            data: &custom.data_json,
            metadata: custom.metadata.as_ref().map(|m| PacketMetadata {
                timestamp_us: m.timestamp_us,
                duration_us: m.duration_us,
                sequence: m.sequence,
            }),
        }),
    }
}

fn packet_to_wit(packet: &Packet<'_>) -> wit::Packet {
    match packet {
        Packet::Audio(frame) => wit::Packet::Audio(wit::AudioFrame {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            samples: frame.samples.to_vec(),
        }),
        Packet::Text(text) => wit::Packet::Text(text.to_string()),
        Packet::Transcription(bytes) => wit::Packet::Transcription(bytes.to_vec()),
        Packet::Binary(bytes) => wit::Packet::Binary(bytes.to_vec()),
        Packet::Custom(custom) => wit::Packet::Custom(wit::CustomPacket {
            type_id: custom.type_id.to_string(),
            encoding: wit::CustomEncoding::Json,
            data_json: custom.data.to_string(),
            metadata: custom.metadata.map(|m| wit::PacketMetadata {
                timestamp_us: m.timestamp_us,
                duration_us: m.duration_us,
                sequence: m.sequence,
            }),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_plugin::lifecycle::Instance;

    fn create(params: Option<&str>) -> Instance<GainDb> {
        Instance::create(shared_metadata(), params, PluginLogger::null("gain_db")).unwrap()
    }

    #[test]
    fn six_db_roughly_doubles() {
        let mut instance = create(Some(r#"{"gain_db": 6.0}"#));
        let samples = [0.1_f32, -0.2, 0.3, 0.0];
        let mut out: Vec<(String, OwnedPacket)> = Vec::new();
        let packet = Packet::Audio(AudioFrame::new(16_000, 1, &samples));
        instance.process("in", &packet, &mut out).unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].0, "out");
        let produced = out[0].1.samples().unwrap();
        let expected = [0.2_f32, -0.4, 0.6, 0.0];
        for (got, want) in produced.iter().zip(expected) {
            assert!((got - want).abs() < 2e-3, "{got} vs {want}");
        }
        let format = AudioFormat::new(16_000, 1, SampleFormat::F32);
        assert_eq!(out[0].1.packet_type(), PacketType::RawAudio(format));
    }

    #[test]
    fn gain_db_is_clamped_and_falls_back() {
        assert_eq!(create(None).plugin().unwrap().linear(), 1.0);
        let clamped = create(Some(r#"{"gain_db": 100}"#));
        assert_eq!(clamped.plugin().unwrap().linear(), db_to_linear(20.0));

        let mut instance = create(Some(r#"{"gain_db": -20}"#));
        instance.update_params(Some("garbage")).unwrap();
        assert!((instance.plugin().unwrap().linear() - 0.1).abs() < 1e-6);
    }

    #[test]
    fn metadata_survives_the_interface_types() {
        let exported = metadata_to_wit(&GainDb::metadata());
        assert_eq!(exported.kind, "gain_db");
        assert_eq!(exported.inputs.len(), 1);
        assert!(matches!(
            exported.outputs[0].produces_type,
            wit::PacketType::RawAudio(wit::AudioFormat { sample_rate: 0, channels: 0, .. })
        ));
        let schema: serde_json::Value = serde_json::from_str(&exported.param_schema).unwrap();
        assert_eq!(schema["properties"]["gain_db"]["minimum"], -60.0);
    }

    #[test]
    fn packets_convert_both_ways() {
        let samples = [0.5_f32, 0.25];
        let original = Packet::Audio(AudioFrame::new(8_000, 2, &samples));
        let converted = packet_to_wit(&original);
        assert_eq!(packet_from_wit(&converted), original);

        let custom = Packet::Custom(CustomPacket {
            type_id: "vad",
            encoding: CustomEncoding::Json,
            data: r#"{"speech":true}"#,
            metadata: Some(PacketMetadata { sequence: Some(7), ..Default::default() }),
        });
        let converted = packet_to_wit(&custom);
        assert_eq!(packet_from_wit(&converted), custom);
    }
}
