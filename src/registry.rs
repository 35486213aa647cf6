use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, TryLockError};

use dashmap::DashMap;
use node_plugin::CallResult;
use node_plugin::error::PluginError;
use node_plugin::handle::{HandleTable, InstanceId};
use node_plugin::logger::{LogSink, TracingSink};
use node_plugin::metadata::NodeMetadata;
use node_plugin::node::OutputSink;
use node_plugin::packet::Packet;
use node_plugin::types::can_connect_any;
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::config::HostConfig;
use crate::error::HostError;
use crate::module::{ModuleVariant, PluginInstance, PluginModule};
use crate::native::NativeModule;
use crate::wasm::WasmRuntime;

pub const NATIVE_PREFIX: &str = "plugin::native::";
pub const WASM_PREFIX: &str = "plugin::wasm::";

/// Registered name of a plugin kind.
///
/// Plugins declare bare kinds; the host files them under the binding they
/// came through. A kind that already carries the right prefix is kept.
pub fn namespaced_kind(variant: ModuleVariant, kind: &str) -> Result<String, HostError> {
    let prefix = match variant {
        ModuleVariant::Native => NATIVE_PREFIX,
        ModuleVariant::Wasm => WASM_PREFIX,
    };
    let bare = kind.strip_prefix(prefix).unwrap_or(kind);

    let invalid = |reason: &str| HostError::InvalidKind {
        kind: kind.to_string(),
        reason: reason.to_string(),
    };
    if bare.is_empty() {
        return Err(invalid("kind is empty"));
    }
    if bare.starts_with("core::") {
        return Err(invalid("the core:: namespace is reserved for built-in nodes"));
    }
    if bare.contains("::") {
        return Err(invalid("plugin kinds may not contain '::'"));
    }
    Ok(format!("{prefix}{bare}"))
}

#[derive(Clone)]
struct LiveInstance {
    kind: String,
    inner: Arc<Mutex<Box<dyn PluginInstance>>>,
}

/// Loaded modules plus every live instance created from them.
///
/// Each instance sits behind its own mutex and the table lock is released
/// before a plugin call, so calls on one instance never overlap while
/// different instances run in parallel.
pub struct NodeHost {
    modules: DashMap<String, Arc<dyn PluginModule>>,
    instances: Mutex<HandleTable<LiveInstance>>,
    wasm: WasmRuntime,
    log_sink: Arc<dyn LogSink>,
}

impl NodeHost {
    /// A host whose plugins log through `tracing`.
    pub fn new(config: &HostConfig) -> Result<Self, HostError> {
        Self::with_log_sink(config, Arc::new(TracingSink))
    }

    pub fn with_log_sink(
        config: &HostConfig,
        log_sink: Arc<dyn LogSink>,
    ) -> Result<Self, HostError> {
        Ok(Self {
            modules: DashMap::new(),
            instances: Mutex::new(HandleTable::new()),
            wasm: WasmRuntime::new(config, Arc::clone(&log_sink))?,
            log_sink,
        })
    }

    /// Register an already loaded module. Returns its namespaced kind.
    ///
    /// A module registered under an existing kind replaces it; instances of
    /// the old module keep running until destroyed.
    pub fn register(&self, module: Arc<dyn PluginModule>) -> Result<String, HostError> {
        let kind = namespaced_kind(module.variant(), &module.metadata().kind)?;
        if self.modules.insert(kind.clone(), module).is_some() {
            warn!(%kind, "replaced an already registered node kind");
        } else {
            info!(%kind, "registered node kind");
        }
        Ok(kind)
    }

    /// Load one module file, picking the binding from its extension.
    pub fn load_module(&self, path: &Path) -> Result<String, HostError> {
        let module: Arc<dyn PluginModule> = match ModuleVariant::from_path(path) {
            Some(ModuleVariant::Native) => {
                Arc::new(NativeModule::load(path, Arc::clone(&self.log_sink))?)
            }
            Some(ModuleVariant::Wasm) => Arc::new(self.wasm.load(path)?),
            None => {
                return Err(HostError::load(path, "not a .so, .dylib, .dll, .wasm or .wat file"));
            }
        };
        self.register(module)
    }

    /// Load every module in `dir`. Modules that fail to load are logged and
    /// skipped; the kinds that did load are returned.
    pub async fn load_directory(self: &Arc<Self>, dir: &Path) -> Result<Vec<String>, HostError> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        let mut paths: Vec<PathBuf> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.is_file() && ModuleVariant::from_path(&path).is_some() {
                paths.push(path);
            }
        }
        paths.sort();

        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let host = Arc::clone(self);
            let task_path = path.clone();
            match tokio::task::spawn_blocking(move || host.load_module(&task_path)).await {
                Ok(Ok(kind)) => loaded.push(kind),
                Ok(Err(err)) => warn!(?path, "Skipping plugin: {err}"),
                Err(err) => error!(?path, "Plugin loader task failed: {err}"),
            }
        }
        info!(dir = %dir.display(), count = loaded.len(), "Loaded plugin directory");
        Ok(loaded)
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.modules.iter().map(|entry| entry.key().clone()).collect();
        kinds.sort();
        kinds
    }

    pub fn metadata(&self, kind: &str) -> Result<NodeMetadata, HostError> {
        Ok(self.module(kind)?.metadata().clone())
    }

    pub fn create_instance(
        &self,
        kind: &str,
        params: Option<&str>,
    ) -> Result<InstanceId, HostError> {
        let module = self.module(kind)?;
        if let Some(params) = params {
            warn_on_params(kind, &module.metadata().param_schema, params);
        }

        let instance = module.create(params)?;
        let id = lock(&self.instances).insert(LiveInstance {
            kind: kind.to_string(),
            inner: Arc::new(Mutex::new(instance)),
        });
        debug!(%kind, %id, "instance created");
        Ok(id)
    }

    /// Feed one packet to an instance. A failed result leaves the instance
    /// usable; whether to drop the packet or tear the instance down is up
    /// to the caller.
    pub fn process(
        &self,
        id: InstanceId,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<CallResult, HostError> {
        self.call(id, "process", |instance| instance.process(pin, packet, output))
    }

    pub fn update_params(
        &self,
        id: InstanceId,
        params: Option<&str>,
    ) -> Result<CallResult, HostError> {
        if let Some(params) = params {
            let live = self.live(id)?;
            if let Some(module) = self.modules.get(&live.kind) {
                warn_on_params(&live.kind, &module.metadata().param_schema, params);
            }
        }
        self.call(id, "update_params", |instance| instance.update_params(params))
    }

    pub fn flush(
        &self,
        id: InstanceId,
        output: &mut dyn OutputSink,
    ) -> Result<CallResult, HostError> {
        self.call(id, "flush", |instance| instance.flush(output))
    }

    /// Run one call on a live instance.
    ///
    /// A call that arrives while another one on the same instance is still
    /// running, including one made from inside that instance's output sink,
    /// fails with `Busy` instead of waiting for the lock.
    fn call(
        &self,
        id: InstanceId,
        operation: &str,
        f: impl FnOnce(&mut dyn PluginInstance) -> CallResult,
    ) -> Result<CallResult, HostError> {
        let live = self.live(id)?;
        let result = match live.inner.try_lock() {
            Ok(mut instance) => f(&mut **instance),
            Err(TryLockError::Poisoned(poisoned)) => {
                let mut instance = poisoned.into_inner();
                f(&mut **instance)
            }
            Err(TryLockError::WouldBlock) => CallResult::from(PluginError::Busy),
        };
        if let Some(message) = result.error_message() {
            debug!(kind = %live.kind, %id, "{operation} failed: {message}");
        }
        Ok(result)
    }

    /// Destroy an instance. The id is stale afterwards.
    ///
    /// If another thread is mid-call on the instance, the destroy runs when
    /// that call returns.
    pub fn destroy(&self, id: InstanceId) -> Result<(), HostError> {
        let live = lock(&self.instances).remove(id).ok_or(HostError::UnknownInstance(id))?;
        debug!(kind = %live.kind, %id, "instance destroyed");
        Ok(())
    }

    /// Destroy every live instance.
    pub fn shutdown(&self) {
        let drained = lock(&self.instances).drain();
        if !drained.is_empty() {
            info!(count = drained.len(), "destroying remaining instances");
        }
    }

    pub fn instance_count(&self) -> usize {
        lock(&self.instances).len()
    }

    /// Check that `from_kind.out_pin` may feed `to_kind.in_pin`.
    pub fn connect(
        &self,
        from_kind: &str,
        out_pin: &str,
        to_kind: &str,
        in_pin: &str,
    ) -> Result<(), HostError> {
        let from = self.module(from_kind)?;
        let to = self.module(to_kind)?;

        let output = from.metadata().output(out_pin).ok_or_else(|| HostError::UnknownPin {
            kind: from_kind.to_string(),
            pin: out_pin.to_string(),
        })?;
        let input = to.metadata().input(in_pin).ok_or_else(|| HostError::UnknownPin {
            kind: to_kind.to_string(),
            pin: in_pin.to_string(),
        })?;

        if !can_connect_any(&output.produces_type, &input.accepts_types) {
            let accepted: Vec<String> =
                input.accepts_types.iter().map(ToString::to_string).collect();
            return Err(HostError::IncompatiblePins {
                from: format!("{from_kind}.{out_pin} ({})", output.produces_type),
                to: format!("{to_kind}.{in_pin} ([{}])", accepted.join(", ")),
            });
        }
        Ok(())
    }

    fn module(&self, kind: &str) -> Result<Arc<dyn PluginModule>, HostError> {
        self.modules
            .get(kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| HostError::UnknownKind(kind.to_string()))
    }

    fn live(&self, id: InstanceId) -> Result<LiveInstance, HostError> {
        lock(&self.instances).get(id).cloned().ok_or(HostError::UnknownInstance(id))
    }
}

impl Drop for NodeHost {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Problems with a params payload, judged against the kind's schema.
pub fn param_problems(schema: &str, params: &str) -> Vec<String> {
    let schema: Value = match serde_json::from_str(schema) {
        Ok(schema) => schema,
        Err(err) => return vec![format!("param schema is not JSON: {err}")],
    };
    let instance: Value = match serde_json::from_str(params) {
        Ok(instance) => instance,
        Err(err) => return vec![format!("params are not JSON: {err}")],
    };
    match jsonschema::validator_for(&schema) {
        Ok(validator) => validator.iter_errors(&instance).map(|e| e.to_string()).collect(),
        Err(err) => vec![format!("param schema does not compile: {err}")],
    }
}

fn warn_on_params(kind: &str, schema: &str, params: &str) {
    for problem in param_problems(schema, params) {
        warn!(%kind, "params do not match schema, passing them on anyway: {problem}");
    }
}
