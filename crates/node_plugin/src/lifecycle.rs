//! The instance state machine shared by both bindings.
//!
//! ```text
//! create ──► Idle ──► Processing ─┐
//!             ▲  ├──► Updating ───┤
//!             │  └──► Flushing ───┤
//!             └───────────────────┘
//!  destroy (from any live state) ──► Destroyed
//! ```
//!
//! Every binding goes through [`Instance`], so ordering, pin validation and
//! exactly-once destroy behave the same whether a node is reached through
//! the C table or the component interface.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::PluginError;
use crate::logger::PluginLogger;
use crate::metadata::NodeMetadata;
use crate::node::{NodePlugin, OutputSink};
use crate::packet::Packet;
use crate::types::can_connect_any;

#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, EnumString,
    AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum InstanceState {
    /// Created, no call in flight.
    Idle,
    Processing,
    Updating,
    Flushing,
    Destroyed,
}

/// One live node instance: the plugin's state plus the lifecycle rules.
///
/// If a plugin call panics the instance stays in its in-flight state, so
/// every later call except destroy is rejected.
pub struct Instance<P: NodePlugin> {
    metadata: Arc<NodeMetadata>,
    plugin: Option<P>,
    state: InstanceState,
    logger: PluginLogger,
}

impl<P: NodePlugin> Instance<P> {
    pub fn create(
        metadata: Arc<NodeMetadata>,
        params: Option<&str>,
        logger: PluginLogger,
    ) -> Result<Self, PluginError> {
        let plugin = P::new(params, logger.clone())?;
        logger.debug(&format!("created {} instance", metadata.kind));
        Ok(Self { metadata, plugin: Some(plugin), state: InstanceState::Idle, logger })
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn logger(&self) -> &PluginLogger {
        &self.logger
    }

    /// The plugin state, `None` once destroyed.
    pub fn plugin(&self) -> Option<&P> {
        self.plugin.as_ref()
    }

    fn begin(&mut self, next: InstanceState) -> Result<&mut P, PluginError> {
        if self.state != InstanceState::Idle {
            return Err(PluginError::InvalidState(self.state));
        }
        let plugin =
            self.plugin.as_mut().ok_or(PluginError::InvalidState(InstanceState::Destroyed))?;
        self.state = next;
        Ok(plugin)
    }

    pub fn process(
        &mut self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), PluginError> {
        if self.state != InstanceState::Idle {
            return Err(PluginError::InvalidState(self.state));
        }
        let metadata = Arc::clone(&self.metadata);
        let input = metadata.input(pin).ok_or_else(|| PluginError::UnknownPin(pin.to_string()))?;
        let offered = packet.packet_type();
        if !can_connect_any(&offered, &input.accepts_types) {
            return Err(PluginError::UnsupportedPacket {
                pin: pin.to_string(),
                offered: offered.to_string(),
            });
        }

        let plugin = self.begin(InstanceState::Processing)?;
        let mut checked = CheckedOutput { metadata: &metadata, inner: output };
        let result = plugin.process(pin, packet, &mut checked);
        self.state = InstanceState::Idle;
        result
    }

    pub fn update_params(&mut self, params: Option<&str>) -> Result<(), PluginError> {
        let plugin = self.begin(InstanceState::Updating)?;
        let result = plugin.update_params(params);
        self.state = InstanceState::Idle;
        result
    }

    pub fn flush(&mut self, output: &mut dyn OutputSink) -> Result<(), PluginError> {
        let metadata = Arc::clone(&self.metadata);
        let plugin = self.begin(InstanceState::Flushing)?;
        let mut checked = CheckedOutput { metadata: &metadata, inner: output };
        let result = plugin.flush(&mut checked);
        self.state = InstanceState::Idle;
        result
    }

    /// Release the plugin state. Returns `false` if it was already released.
    pub fn destroy(&mut self) -> bool {
        if self.state == InstanceState::Destroyed {
            return false;
        }
        if let Some(mut plugin) = self.plugin.take() {
            plugin.cleanup();
        }
        self.state = InstanceState::Destroyed;
        self.logger.debug(&format!("destroyed {} instance", self.metadata.kind));
        true
    }
}

impl<P: NodePlugin> Drop for Instance<P> {
    fn drop(&mut self) {
        self.destroy();
    }
}

/// Rejects sends to pins the node did not declare, or of the wrong type.
struct CheckedOutput<'m, 'o> {
    metadata: &'m NodeMetadata,
    inner: &'o mut dyn OutputSink,
}

impl OutputSink for CheckedOutput<'_, '_> {
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError> {
        self.metadata.check_output(pin, &packet.packet_type())?;
        self.inner.send(pin, packet)
    }
}

/// An [`Instance`] reachable through a shared reference.
///
/// Bindings hand out `&self` access (a raw handle, a borrowed resource), so
/// a call made from inside an output callback could reach the same instance
/// again. That second call fails with [`PluginError::Busy`] instead of
/// aliasing the state.
pub struct InstanceCell<P: NodePlugin> {
    inner: RefCell<Instance<P>>,
}

impl<P: NodePlugin> InstanceCell<P> {
    pub fn new(instance: Instance<P>) -> Self {
        Self { inner: RefCell::new(instance) }
    }

    pub fn create(
        metadata: Arc<NodeMetadata>,
        params: Option<&str>,
        logger: PluginLogger,
    ) -> Result<Self, PluginError> {
        Instance::create(metadata, params, logger).map(Self::new)
    }

    fn with<R>(
        &self,
        f: impl FnOnce(&mut Instance<P>) -> Result<R, PluginError>,
    ) -> Result<R, PluginError> {
        let mut instance = self.inner.try_borrow_mut().map_err(|_| PluginError::Busy)?;
        f(&mut instance)
    }

    pub fn state(&self) -> Result<InstanceState, PluginError> {
        self.inner.try_borrow().map(|i| i.state()).map_err(|_| PluginError::Busy)
    }

    /// The instance's logger, `None` while a call is in flight.
    pub fn logger(&self) -> Option<PluginLogger> {
        self.inner.try_borrow().ok().map(|i| i.logger().clone())
    }

    pub fn process(
        &self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), PluginError> {
        self.with(|instance| instance.process(pin, packet, output))
    }

    pub fn update_params(&self, params: Option<&str>) -> Result<(), PluginError> {
        self.with(|instance| instance.update_params(params))
    }

    pub fn flush(&self, output: &mut dyn OutputSink) -> Result<(), PluginError> {
        self.with(|instance| instance.flush(output))
    }

    /// Returns `false` if already destroyed or a call is still in flight.
    pub fn destroy(&self) -> bool {
        self.with(|instance| Ok(instance.destroy())).unwrap_or(false)
    }

    pub fn into_inner(self) -> Instance<P> {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BorrowedView;
    use crate::node::FnSink;
    use crate::packet::{AudioFrame, OwnedPacket};
    use crate::types::{AudioFormat, PacketType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CLEANUPS: AtomicUsize = AtomicUsize::new(0);

    /// Collects text until flushed. Sends to a bogus pin on request.
    struct Joiner {
        parts: Vec<String>,
        separator: String,
    }

    impl NodePlugin for Joiner {
        fn metadata() -> NodeMetadata {
            NodeMetadata::builder("joiner")
                .input("in", vec![PacketType::Text])
                .output("out", PacketType::Text)
                .build()
        }

        fn new(params: Option<&str>, _logger: PluginLogger) -> Result<Self, PluginError> {
            if params == Some("fail") {
                return Err(PluginError::other("refusing to start"));
            }
            Ok(Self { parts: Vec::new(), separator: " ".into() })
        }

        fn process(
            &mut self,
            _pin: &str,
            packet: &Packet<'_>,
            output: &mut dyn OutputSink,
        ) -> Result<(), PluginError> {
            match packet {
                Packet::Text("!wrong-pin") => output.send("nowhere", packet),
                Packet::Text("!wrong-type") => {
                    output.send("out", &Packet::Binary(BorrowedView::empty()))
                }
                Packet::Text(text) => {
                    self.parts.push(text.to_string());
                    Ok(())
                }
                _ => Err(PluginError::other("text only")),
            }
        }

        fn update_params(&mut self, params: Option<&str>) -> Result<(), PluginError> {
            if let Some(separator) = params {
                self.separator = separator.to_string();
            }
            Ok(())
        }

        fn flush(&mut self, output: &mut dyn OutputSink) -> Result<(), PluginError> {
            if self.parts.is_empty() {
                return Ok(());
            }
            let joined = self.parts.join(&self.separator);
            self.parts.clear();
            output.send("out", &Packet::Text(&joined))
        }

        fn cleanup(&mut self) {
            CLEANUPS.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn collect() -> Vec<(String, OwnedPacket)> {
        Vec::new()
    }

    fn joiner() -> Instance<Joiner> {
        Instance::create(Arc::new(Joiner::metadata()), None, PluginLogger::null("joiner")).unwrap()
    }

    #[test]
    fn failed_create_yields_no_instance() {
        let logger = PluginLogger::null("joiner");
        let result = Instance::<Joiner>::create(Arc::new(Joiner::metadata()), Some("fail"), logger);
        assert!(matches!(result, Err(PluginError::Other(_))));
    }

    #[test]
    fn flush_emits_buffered_output() {
        let mut instance = joiner();
        let mut out = collect();
        instance.process("in", &Packet::Text("hello"), &mut out).unwrap();
        instance.update_params(Some("-")).unwrap();
        instance.process("in", &Packet::Text("world"), &mut out).unwrap();
        assert!(out.is_empty());

        instance.flush(&mut out).unwrap();
        assert_eq!(out, vec![("out".to_string(), OwnedPacket::Text("hello-world".into()))]);

        // nothing left to emit
        instance.flush(&mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(instance.state(), InstanceState::Idle);
    }

    #[test]
    fn unknown_pins_and_types_fail_without_sending() {
        let mut instance = joiner();
        let mut sends = 0;
        let mut sink = FnSink(|_: &str, _: &Packet<'_>| -> Result<(), PluginError> {
            sends += 1;
            Ok(())
        });

        let err = instance.process("sidechain", &Packet::Text("x"), &mut sink).unwrap_err();
        assert_eq!(err, PluginError::UnknownPin("sidechain".into()));

        let samples = [0.1_f32, 0.2];
        let audio = Packet::Audio(AudioFrame::new(48_000, 1, &samples));
        let err = instance.process("in", &audio, &mut sink).unwrap_err();
        assert!(matches!(err, PluginError::UnsupportedPacket { ref pin, .. } if pin == "in"));

        drop(sink);
        assert_eq!(sends, 0);
        assert_eq!(instance.state(), InstanceState::Idle);
    }

    #[test]
    fn sends_to_undeclared_or_mistyped_outputs_are_rejected() {
        let mut instance = joiner();
        let mut out = collect();
        let err = instance.process("in", &Packet::Text("!wrong-pin"), &mut out).unwrap_err();
        assert_eq!(err, PluginError::UnknownPin("nowhere".into()));
        let err = instance.process("in", &Packet::Text("!wrong-type"), &mut out).unwrap_err();
        assert!(matches!(err, PluginError::UnsupportedPacket { .. }));
        assert!(out.is_empty());
        // the instance is still usable afterwards
        instance.process("in", &Packet::Text("ok"), &mut out).unwrap();
    }

    #[test]
    fn destroy_runs_once_and_nothing_runs_after_it() {
        let before = CLEANUPS.load(Ordering::SeqCst);
        let mut instance = joiner();
        assert!(instance.destroy());
        assert!(!instance.destroy());
        assert!(instance.plugin().is_none());

        let mut out = collect();
        let err = instance.process("in", &Packet::Text("late"), &mut out).unwrap_err();
        assert_eq!(err, PluginError::InvalidState(InstanceState::Destroyed));
        assert!(instance.update_params(None).is_err());
        assert!(instance.flush(&mut out).is_err());

        drop(instance);
        assert!(CLEANUPS.load(Ordering::SeqCst) >= before + 1);
    }

    #[test]
    fn re_entrant_calls_fail_with_busy() {
        let cell = InstanceCell::<Joiner>::create(
            Arc::new(Joiner::metadata()),
            None,
            PluginLogger::null("joiner"),
        )
        .unwrap();
        cell.process("in", &Packet::Text("a"), &mut collect()).unwrap();

        let mut nested = None;
        let mut sink = FnSink(|_: &str, _: &Packet<'_>| -> Result<(), PluginError> {
            nested = Some(cell.process("in", &Packet::Text("again"), &mut collect()));
            assert!(!cell.destroy());
            Ok(())
        });
        cell.flush(&mut sink).unwrap();
        drop(sink);

        assert_eq!(nested, Some(Err(PluginError::Busy)));
        assert_eq!(cell.state(), Ok(InstanceState::Idle));
        assert!(cell.destroy());
        assert_eq!(cell.state(), Ok(InstanceState::Destroyed));
    }

    #[test]
    fn raw_audio_wildcard_inputs_accept_concrete_frames() {
        struct Sink;
        impl NodePlugin for Sink {
            fn metadata() -> NodeMetadata {
                NodeMetadata::builder("sink")
                    .input("in", vec![PacketType::RawAudio(AudioFormat::any_f32())])
                    .build()
            }
            fn new(_: Option<&str>, _: PluginLogger) -> Result<Self, PluginError> {
                Ok(Sink)
            }
            fn process(
                &mut self,
                _: &str,
                _: &Packet<'_>,
                _: &mut dyn OutputSink,
            ) -> Result<(), PluginError> {
                Ok(())
            }
            fn update_params(&mut self, _: Option<&str>) -> Result<(), PluginError> {
                Ok(())
            }
        }

        let logger = PluginLogger::null("sink");
        let mut instance =
            Instance::<Sink>::create(Arc::new(Sink::metadata()), None, logger).unwrap();
        let samples = [0.0_f32; 6];
        let frame = Packet::Audio(AudioFrame::new(44_100, 2, &samples));
        instance.process("in", &frame, &mut collect()).unwrap();
    }
}
