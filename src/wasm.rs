//! Host side of the component binding, on wasmtime.
//!
//! One engine and linker are shared by every module. Each instance gets its
//! own `Store`, so instances never share guest memory and can run on
//! different threads at the same time.

use std::ffi::c_void;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::Arc;

use anyhow::Context;
use node_plugin::CallResult;
use node_plugin::component::COMPONENT_API_VERSION;
use node_plugin::logger::{LogLevel, LogSink};
use node_plugin::metadata::{InputPin, NodeMetadata, OutputPin};
use node_plugin::node::OutputSink;
use node_plugin::packet::{OwnedPacket, Packet};
use node_plugin::types::{AudioFormat, CustomEncoding, PacketMetadata, PacketType, SampleFormat};
use tracing::{debug, info, warn};
use wasmtime::component::{Component, Linker, ResourceAny};
use wasmtime::{Config, Engine, Store, StoreLimits, StoreLimitsBuilder};
use wasmtime_wasi::ResourceTable;
use wasmtime_wasi::p2::{IoView, WasiCtx, WasiCtxBuilder, WasiView};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::module::{ModuleVariant, PluginInstance, PluginModule};

use self::nodekit::plugin::{host, types as wit};

wasmtime::component::bindgen!({
    world: "node-plugin",
});

/// Per-store host state.
pub struct HostState {
    table: ResourceTable,
    ctx: WasiCtx,
    limits: StoreLimits,
    log_sink: Arc<dyn LogSink>,
    /// Output declarations to check sends against. Unset while probing.
    metadata: Option<Arc<NodeMetadata>>,
    /// Sink of the `process` or `flush` call in flight.
    output: Option<OutputSlot>,
}

impl HostState {
    fn new(
        max_memory: usize,
        log_sink: Arc<dyn LogSink>,
        metadata: Option<Arc<NodeMetadata>>,
    ) -> Self {
        Self {
            table: ResourceTable::new(),
            ctx: WasiCtxBuilder::new().build(),
            limits: StoreLimitsBuilder::new().memory_size(max_memory).build(),
            log_sink,
            metadata,
            output: None,
        }
    }
}

struct SendTarget<'a> {
    sink: &'a mut dyn OutputSink,
}

/// Type-erased pointer to the [`SendTarget`] of the guest call in flight.
#[derive(Clone, Copy)]
struct OutputSlot(*mut c_void);

impl OutputSlot {
    fn new(target: &mut SendTarget<'_>) -> Self {
        Self(ptr::from_mut(target).cast::<c_void>())
    }
}

// Only dereferenced by the thread running the call that set it.
unsafe impl Send for OutputSlot {}

impl IoView for HostState {
    fn table(&mut self) -> &mut ResourceTable {
        &mut self.table
    }
}

impl WasiView for HostState {
    fn ctx(&mut self) -> &mut WasiCtx {
        &mut self.ctx
    }
}

impl wit::Host for HostState {}

impl host::Host for HostState {
    fn log(&mut self, level: host::LogLevel, target: String, message: String) {
        self.log_sink.log(log_level_from_wit(level), &target, &message);
    }

    fn send_output(&mut self, pin: String, packet: wit::Packet) -> Result<(), String> {
        let packet = packet_from_wit(packet);
        if let Some(metadata) = &self.metadata {
            metadata.check_output(&pin, &packet.packet_type()).map_err(|e| e.to_string())?;
        }
        let Some(slot) = self.output else {
            return Err("send-output is only available during process and flush".to_string());
        };
        // SAFETY: the slot is set by `WasmInstance::with_output` and cleared
        // before the target it points at goes out of scope.
        let target = unsafe { &mut *slot.0.cast::<SendTarget<'_>>() };
        target.sink.send(&pin, &packet.as_packet()).map_err(|e| e.to_string())
    }
}

// -----------------------------------------------------------------------------
// Runtime
// -----------------------------------------------------------------------------

/// Shared engine and linker for every component module.
#[derive(Clone)]
pub struct WasmRuntime {
    engine: Engine,
    linker: Arc<Linker<HostState>>,
    max_memory: usize,
    log_sink: Arc<dyn LogSink>,
}

impl WasmRuntime {
    pub fn new(config: &HostConfig, log_sink: Arc<dyn LogSink>) -> Result<Self, HostError> {
        let mut wasm_config = Config::default();
        wasm_config.async_support(false);
        if !config.wasm_simd {
            wasm_config.wasm_relaxed_simd(false);
            wasm_config.wasm_simd(false);
        }
        let engine = Engine::new(&wasm_config).map_err(HostError::wasm)?;

        let mut linker = Linker::new(&engine);
        wasmtime_wasi::p2::add_to_linker_sync(&mut linker)
            .context("Failed to add WASI to linker")
            .map_err(HostError::wasm)?;
        wit::add_to_linker(&mut linker, |state: &mut HostState| state)
            .context("Failed to link plugin types")
            .map_err(HostError::wasm)?;
        host::add_to_linker(&mut linker, |state: &mut HostState| state)
            .context("Failed to link host capabilities")
            .map_err(HostError::wasm)?;

        Ok(Self { engine, linker: Arc::new(linker), max_memory: config.max_wasm_memory, log_sink })
    }

    fn store(&self, metadata: Option<Arc<NodeMetadata>>) -> Store<HostState> {
        let mut store = Store::new(
            &self.engine,
            HostState::new(self.max_memory, Arc::clone(&self.log_sink), metadata),
        );
        store.limiter(|state| &mut state.limits);
        store
    }

    /// Compile a component, check its version and read its metadata.
    pub fn load(&self, path: &Path) -> Result<WasmModule, HostError> {
        info!(?path, "Loading wasm plugin");
        let component = Component::from_file(&self.engine, path)
            .with_context(|| format!("Failed to load wasm component from {path:?}"))
            .map_err(|e| HostError::load(path, format!("{e:#}")))?;

        let mut store = self.store(None);
        let plugin = NodePlugin::instantiate(&mut store, &component, &self.linker)
            .with_context(|| format!("Failed to instantiate component {path:?}"))
            .map_err(HostError::wasm)?;
        let node = plugin.nodekit_plugin_node();

        let version = node.call_api_version(&mut store).map_err(HostError::wasm)?;
        if version != COMPONENT_API_VERSION {
            return Err(HostError::VersionMismatch {
                expected: COMPONENT_API_VERSION,
                found: version,
            });
        }

        let metadata = metadata_from_wit(node.call_metadata(&mut store).map_err(HostError::wasm)?);
        metadata.validate().map_err(|e| HostError::InvalidMetadata(e.to_string()))?;

        info!(kind = %metadata.kind, "Loaded wasm plugin");
        Ok(WasmModule {
            runtime: self.clone(),
            component,
            metadata: Arc::new(metadata),
            path: path.to_path_buf(),
        })
    }
}

/// A compiled component with its metadata.
pub struct WasmModule {
    runtime: WasmRuntime,
    component: Component,
    metadata: Arc<NodeMetadata>,
    path: PathBuf,
}

impl WasmModule {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PluginModule for WasmModule {
    fn variant(&self) -> ModuleVariant {
        ModuleVariant::Wasm
    }

    fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    fn create(&self, params: Option<&str>) -> Result<Box<dyn PluginInstance>, HostError> {
        let kind = self.metadata.kind.clone();
        let mut store = self.runtime.store(Some(Arc::clone(&self.metadata)));
        let plugin = NodePlugin::instantiate(&mut store, &self.component, &self.runtime.linker)
            .with_context(|| format!("Failed to instantiate component for '{kind}'"))
            .map_err(HostError::wasm)?;

        let created = plugin
            .nodekit_plugin_node()
            .node_instance()
            .call_create(&mut store, params)
            .map_err(HostError::wasm)?;
        let resource =
            created.map_err(|reason| HostError::CreateFailed { kind: kind.clone(), reason })?;

        debug!(%kind, "created wasm instance");
        Ok(Box::new(WasmInstance { store, plugin, resource, kind, trapped: false }))
    }
}

/// A live component instance.
///
/// Dropping it calls `cleanup` and then drops the resource, once each.
pub struct WasmInstance {
    store: Store<HostState>,
    plugin: NodePlugin,
    resource: ResourceAny,
    kind: String,
    trapped: bool,
}

impl WasmInstance {
    /// Run one guest call. `send-output` forwards to `output` while it runs
    /// and is refused when `output` is `None`.
    fn with_output<R>(
        &mut self,
        output: Option<&mut dyn OutputSink>,
        call: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let mut target = output.map(|sink| SendTarget { sink });
        self.store.data_mut().output = target.as_mut().map(OutputSlot::new);
        let result = call(self);
        self.store.data_mut().output = None;
        result
    }

    fn finish(&mut self, outcome: wasmtime::Result<Result<(), String>>) -> CallResult {
        match outcome {
            Ok(Ok(())) => CallResult::ok(),
            Ok(Err(message)) => CallResult::failure(message),
            Err(trap) => {
                self.trapped = true;
                warn!(kind = %self.kind, "wasm instance trapped: {trap:#}");
                CallResult::failure(format!("plugin trapped: {trap:#}"))
            }
        }
    }

    fn trapped_result(&self) -> CallResult {
        CallResult::failure(format!(
            "instance of '{}' trapped earlier and cannot be used",
            self.kind
        ))
    }
}

impl PluginInstance for WasmInstance {
    fn process(
        &mut self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> CallResult {
        if self.trapped {
            return self.trapped_result();
        }
        let packet = packet_to_wit(packet);
        let outcome = self.with_output(Some(output), |this| {
            this.plugin
                .nodekit_plugin_node()
                .node_instance()
                .call_process(&mut this.store, this.resource, pin, &packet)
        });
        self.finish(outcome)
    }

    fn update_params(&mut self, params: Option<&str>) -> CallResult {
        if self.trapped {
            return self.trapped_result();
        }
        let outcome = self.with_output(None, |this| {
            this.plugin
                .nodekit_plugin_node()
                .node_instance()
                .call_update_params(&mut this.store, this.resource, params)
        });
        self.finish(outcome)
    }

    fn flush(&mut self, output: &mut dyn OutputSink) -> CallResult {
        if self.trapped {
            return self.trapped_result();
        }
        let outcome = self.with_output(Some(output), |this| {
            this.plugin
                .nodekit_plugin_node()
                .node_instance()
                .call_flush(&mut this.store, this.resource)
        });
        self.finish(outcome)
    }
}

impl Drop for WasmInstance {
    fn drop(&mut self) {
        if self.trapped {
            debug!(kind = %self.kind, "dropping trapped wasm instance");
            return;
        }
        self.store.data_mut().output = None;
        let cleanup = self
            .plugin
            .nodekit_plugin_node()
            .node_instance()
            .call_cleanup(&mut self.store, self.resource);
        if let Err(err) = cleanup {
            warn!(kind = %self.kind, "cleanup failed: {err:#}");
        }
        if let Err(err) = self.resource.resource_drop(&mut self.store) {
            warn!(kind = %self.kind, "dropping instance resource failed: {err:#}");
        }
        debug!(kind = %self.kind, "destroyed wasm instance");
    }
}

// -----------------------------------------------------------------------------
// Interface type conversions
// -----------------------------------------------------------------------------

fn log_level_from_wit(level: host::LogLevel) -> LogLevel {
    match level {
        host::LogLevel::Trace => LogLevel::Trace,
        host::LogLevel::Debug => LogLevel::Debug,
        host::LogLevel::Info => LogLevel::Info,
        host::LogLevel::Warn => LogLevel::Warn,
        host::LogLevel::Error => LogLevel::Error,
    }
}

fn sample_format_from_wit(format: wit::SampleFormat) -> SampleFormat {
    match format {
        wit::SampleFormat::Float32 => SampleFormat::F32,
        wit::SampleFormat::S16le => SampleFormat::S16Le,
    }
}

fn packet_type_from_wit(packet_type: wit::PacketType) -> PacketType {
    match packet_type {
        wit::PacketType::RawAudio(format) => PacketType::RawAudio(AudioFormat::new(
            format.sample_rate,
            format.channels,
            sample_format_from_wit(format.sample_format),
        )),
        wit::PacketType::OpusAudio => PacketType::OpusAudio,
        wit::PacketType::Text => PacketType::Text,
        wit::PacketType::Transcription => PacketType::Transcription,
        wit::PacketType::Custom(type_id) => PacketType::Custom { type_id },
        wit::PacketType::Binary => PacketType::Binary,
        wit::PacketType::Any => PacketType::Any,
        wit::PacketType::Passthrough => PacketType::Passthrough,
    }
}

fn metadata_from_wit(metadata: wit::NodeMetadata) -> NodeMetadata {
    NodeMetadata {
        kind: metadata.kind,
        description: metadata.description,
        inputs: metadata
            .inputs
            .into_iter()
            .map(|pin| InputPin {
                name: pin.name,
                accepts_types: pin.accepts_types.into_iter().map(packet_type_from_wit).collect(),
            })
            .collect(),
        outputs: metadata
            .outputs
            .into_iter()
            .map(|pin| OutputPin {
                name: pin.name,
                produces_type: packet_type_from_wit(pin.produces_type),
            })
            .collect(),
        param_schema: metadata.param_schema,
        categories: metadata.categories,
    }
}

fn packet_metadata_from_wit(meta: wit::PacketMetadata) -> PacketMetadata {
    PacketMetadata {
        timestamp_us: meta.timestamp_us,
        duration_us: meta.duration_us,
        sequence: meta.sequence,
    }
}

fn packet_from_wit(packet: wit::Packet) -> OwnedPacket {
    match packet {
        wit::Packet::Audio(frame) => {
            OwnedPacket::audio(frame.sample_rate, frame.channels, frame.samples)
        }
        wit::Packet::Text(text) => OwnedPacket::Text(text),
        wit::Packet::Transcription(bytes) => OwnedPacket::Transcription(bytes),
        wit::Packet::Binary(bytes) => OwnedPacket::Binary(bytes),
        wit::Packet::Custom(custom) => OwnedPacket::Custom {
            type_id: custom.type_id,
            encoding: match custom.encoding {
                wit::CustomEncoding::Json => CustomEncoding::Json,
            },
            data: custom.data_json,
            metadata: custom.metadata.map(packet_metadata_from_wit),
        },
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
            encoding: match custom.encoding {
                CustomEncoding::Json => wit::CustomEncoding::Json,
            },
            data_json: custom.data.to_string(),
            metadata: custom.metadata.map(|m| wit::PacketMetadata {
                timestamp_us: m.timestamp_us,
                duration_us: m.duration_us,
                sequence: m.sequence,
            }),
        }),
    }
}
