use crate::error::PluginError;
use crate::logger::PluginLogger;
use crate::metadata::NodeMetadata;
use crate::packet::{OwnedPacket, Packet};

/// Where a node sends its output.
///
/// Each `send` is synchronous: the receiver has seen the packet by the time
/// the call returns. The packet is only borrowed for the duration of the call.
pub trait OutputSink {
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError>;
}

/// Collects every output as an owned copy, in order.
impl OutputSink for Vec<(String, OwnedPacket)> {
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError> {
        self.push((pin.to_string(), packet.to_owned_packet()));
        Ok(())
    }
}

/// Adapts a closure into an [`OutputSink`].
pub struct FnSink<F>(pub F);

impl<F> OutputSink for FnSink<F>
where
    F: FnMut(&str, &Packet<'_>) -> Result<(), PluginError>,
{
    fn send(&mut self, pin: &str, packet: &Packet<'_>) -> Result<(), PluginError> {
        (self.0)(pin, packet)
    }
}

/// The one trait node authors implement.
///
/// The lifecycle rules (no call before create, nothing after destroy, no
/// overlapping calls, pin validation) are enforced around it by
/// [`Instance`](crate::lifecycle::Instance), so implementations only deal
/// with their own state.
pub trait NodePlugin: Sized + Send + 'static {
    /// Static description of this node kind. Called once per loaded module.
    fn metadata() -> NodeMetadata;

    /// Build a new instance. Absent or malformed params fall back to defaults.
    fn new(params: Option<&str>, logger: PluginLogger) -> Result<Self, PluginError>;

    /// Handle one packet that arrived on `pin`.
    ///
    /// The packet has already been checked against the pin's accepted types.
    /// It is borrowed and must not be retained.
    fn process(
        &mut self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), PluginError>;

    /// Re-read params on a running instance. Best effort: keep the current
    /// value for anything missing or malformed.
    fn update_params(&mut self, params: Option<&str>) -> Result<(), PluginError>;

    /// Emit anything still buffered. Stateless nodes emit nothing.
    fn flush(&mut self, _output: &mut dyn OutputSink) -> Result<(), PluginError> {
        Ok(())
    }

    /// Release resources before the instance is dropped. Runs exactly once.
    fn cleanup(&mut self) {}
}
