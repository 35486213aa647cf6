//! Linear gain node, exported as a native module.
//!
//! Params: `{"gain": x}` with x clamped into `[0, 4]`, default 1.

use node_plugin::prelude::*;

pub const GAIN: NumberParam =
    NumberParam::new("gain", 1.0, 0.0, 4.0).describe("Linear multiplier applied to every sample");

pub struct GainPlugin {
    gain: f32,
    logger: PluginLogger,
}

impl GainPlugin {
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl NodePlugin for GainPlugin {
    fn metadata() -> NodeMetadata {
        let audio = PacketType::RawAudio(AudioFormat::any_f32());
        NodeMetadata::builder("gain")
            .description("Multiplies every sample by a linear gain")
            .input("in", vec![audio.clone()])
            .output("out", audio)
            .param_schema(param_schema(&[GAIN]))
            .category("audio")
            .category("filters")
            .build()
    }

    fn new(params: Option<&str>, logger: PluginLogger) -> Result<Self, PluginError> {
        let gain = GAIN.initial(params) as f32;
        logger.debug(&format!("gain set to {gain}"));
        Ok(Self { gain, logger })
    }

    fn process(
        &mut self,
        _pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), PluginError> {
        let Packet::Audio(frame) = packet else {
            return Err(PluginError::InvalidPacket(format!(
                "gain only handles raw audio, got {}",
                packet.packet_type()
            )));
        };

        let scaled: OwnedBuffer<f32> = frame.samples.iter().map(|s| s * self.gain).collect();
        let out = AudioFrame {
            sample_rate: frame.sample_rate,
            channels: frame.channels,
            samples: scaled.view(),
        };
        output.send("out", &Packet::Audio(out))
    }

    fn update_params(&mut self, params: Option<&str>) -> Result<(), PluginError> {
        let gain = GAIN.resolve(params, f64::from(self.gain)) as f32;
        if gain != self.gain {
            self.logger.debug(&format!("gain {} -> {gain}", self.gain));
            self.gain = gain;
        }
        Ok(())
    }
}

node_plugin::native_plugin_entry!(GainPlugin);
