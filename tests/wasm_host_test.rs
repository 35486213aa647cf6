// tests/wasm_host_test.rs
//
// Most tests run against tests/wasm/doubler.wat, a component kept in text
// form that wasmtime compiles at load. The gain_db tests need
//   cargo build -p gain_component --target wasm32-wasip2 --release
// first and are ignored otherwise.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use node_plugin::component::COMPONENT_API_VERSION;
use node_plugin::handle::InstanceId;
use node_plugin::logger::{LogSink, NullSink};
use node_plugin::node::FnSink;
use node_plugin::prelude::*;

use nodekit::HostError;
use nodekit::config::HostConfig;
use nodekit::registry::NodeHost;

const DOUBLER_KIND: &str = "plugin::wasm::doubler";
const GAIN_DB_KIND: &str = "plugin::wasm::gain_db";

type Outputs = Vec<(String, OwnedPacket)>;

#[derive(Default)]
struct RecordingSink(Mutex<Vec<(LogLevel, String, String)>>);

impl RecordingSink {
    fn count(&self, level: LogLevel, message: &str) -> usize {
        let records = self.0.lock().unwrap();
        records
            .iter()
            .filter(|(l, target, m)| *l == level && target == "doubler" && m == message)
            .count()
    }
}

impl LogSink for RecordingSink {
    fn log(&self, level: LogLevel, target: &str, message: &str) {
        self.0.lock().unwrap().push((level, target.to_string(), message.to_string()));
    }
}

fn doubler_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/wasm/doubler.wat")
}

fn doubler_host(log_sink: Arc<dyn LogSink>) -> NodeHost {
    let host = NodeHost::with_log_sink(&HostConfig::default(), log_sink).unwrap();
    assert_eq!(host.load_module(&doubler_path()).unwrap(), DOUBLER_KIND);
    host
}

fn audio(samples: &[f32]) -> Packet<'_> {
    Packet::Audio(AudioFrame::new(44_100, 2, samples))
}

#[test]
fn metadata_is_read_at_load() {
    let host = doubler_host(Arc::new(NullSink));
    let metadata = host.metadata(DOUBLER_KIND).unwrap();

    assert_eq!(metadata.kind, "doubler");
    assert_eq!(metadata.description.as_deref(), Some("Doubles every sample."));
    assert_eq!(metadata.inputs.len(), 1);
    assert_eq!(metadata.inputs[0].name, "in");
    let any_f32 = PacketType::RawAudio(AudioFormat::any_f32());
    assert_eq!(metadata.inputs[0].accepts_types, vec![any_f32.clone()]);
    assert_eq!(metadata.outputs[0].name, "out");
    assert_eq!(metadata.outputs[0].produces_type, any_f32);
    assert_eq!(metadata.categories, vec!["audio".to_string()]);
}

#[test]
fn process_doubles_and_sends_on_out() {
    let host = doubler_host(Arc::new(NullSink));
    let id = host.create_instance(DOUBLER_KIND, None).unwrap();

    let mut outputs = Outputs::new();
    let result = host.process(id, "in", &audio(&[0.1, -0.2, 0.3, 0.0]), &mut outputs).unwrap();
    assert!(result.is_success(), "{result:?}");

    assert_eq!(outputs.len(), 1);
    let (pin, packet) = &outputs[0];
    assert_eq!(pin, "out");
    match packet {
        OwnedPacket::Audio { sample_rate, channels, .. } => {
            assert_eq!((*sample_rate, *channels), (44_100, 2));
        }
        other => panic!("expected audio, got {other:?}"),
    }
    assert_eq!(packet.samples().unwrap(), &[0.2, -0.4, 0.6, 0.0]);

    assert!(host.update_params(id, Some("{}")).unwrap().is_success());
    assert!(host.flush(id, &mut outputs).unwrap().is_success());
    assert_eq!(outputs.len(), 1);
    host.destroy(id).unwrap();
}

#[test]
fn rejected_sends_are_seen_by_the_guest() {
    let log = Arc::new(RecordingSink::default());
    let host = doubler_host(log.clone());
    let id = host.create_instance(DOUBLER_KIND, None).unwrap();

    let mut attempts = 0;
    let mut sink = FnSink(|pin: &str, packet: &Packet<'_>| -> Result<(), PluginError> {
        attempts += 1;
        assert_eq!(pin, "out");
        assert!(matches!(packet, Packet::Audio(frame) if frame.samples.as_slice() == [1.0]));
        Err(PluginError::other("downstream is full"))
    });
    let result = host.process(id, "in", &audio(&[0.5]), &mut sink).unwrap();

    assert!(!result.is_success());
    assert!(result.error_message().unwrap().contains("downstream is full"), "{result:?}");
    // the guest logs before returning the host's error as its own
    assert_eq!(log.count(LogLevel::Warn, "output rejected"), 1);
    drop(sink);
    assert_eq!(attempts, 1);

    // the instance is still usable
    let mut outputs = Outputs::new();
    assert!(host.process(id, "in", &audio(&[0.5]), &mut outputs).unwrap().is_success());
    assert_eq!(outputs.len(), 1);
}

#[test]
fn wrong_pins_and_packets_fail_without_output() {
    let host = doubler_host(Arc::new(NullSink));
    let id = host.create_instance(DOUBLER_KIND, None).unwrap();
    let mut outputs = Outputs::new();

    let result = host.process(id, "sidechain", &audio(&[0.1]), &mut outputs).unwrap();
    assert_eq!(result.error_message(), Some("unknown pin"));

    let result = host.process(id, "in", &Packet::Text("not audio"), &mut outputs).unwrap();
    assert_eq!(result.error_message(), Some("doubler accepts audio only"));
    assert!(outputs.is_empty());

    assert!(host.process(id, "in", &audio(&[0.1]), &mut outputs).unwrap().is_success());
    assert_eq!(outputs.len(), 1);
}

#[test]
fn create_failures_and_cleanup_happen_once() {
    let log = Arc::new(RecordingSink::default());
    let host = doubler_host(log.clone());

    match host.create_instance(DOUBLER_KIND, Some("refuse")) {
        Err(HostError::CreateFailed { kind, reason }) => {
            assert_eq!(kind, "doubler");
            assert_eq!(reason, "refusing to start");
        }
        other => panic!("expected a create failure, got {other:?}"),
    }
    assert_eq!(log.count(LogLevel::Debug, "created"), 0);

    let id = host.create_instance(DOUBLER_KIND, Some(r#"{"unused": true}"#)).unwrap();
    assert_eq!(log.count(LogLevel::Debug, "created"), 1);

    host.destroy(id).unwrap();
    assert_eq!(log.count(LogLevel::Info, "cleanup"), 1);
    assert!(matches!(host.destroy(id), Err(HostError::UnknownInstance(_))));
    assert!(matches!(
        host.process(id, "in", &audio(&[0.1]), &mut Outputs::new()),
        Err(HostError::UnknownInstance(_))
    ));

    drop(host);
    assert_eq!(log.count(LogLevel::Info, "cleanup"), 1);
}

#[test]
fn traps_poison_only_their_instance() {
    let log = Arc::new(RecordingSink::default());
    let host = doubler_host(log.clone());
    let doomed = host.create_instance(DOUBLER_KIND, None).unwrap();
    let healthy = host.create_instance(DOUBLER_KIND, None).unwrap();
    let mut outputs = Outputs::new();

    let result = host.process(doomed, "boom", &audio(&[0.1]), &mut outputs).unwrap();
    assert!(result.error_message().unwrap().contains("trapped"), "{result:?}");

    let result = host.process(doomed, "in", &audio(&[0.1]), &mut outputs).unwrap();
    assert!(result.error_message().unwrap().contains("trapped earlier"), "{result:?}");
    assert!(outputs.is_empty());

    assert!(host.process(healthy, "in", &audio(&[0.1]), &mut outputs).unwrap().is_success());
    assert_eq!(outputs.len(), 1);

    // a trapped guest is not called again, not even for cleanup
    host.destroy(doomed).unwrap();
    assert_eq!(log.count(LogLevel::Info, "cleanup"), 0);
    host.destroy(healthy).unwrap();
    assert_eq!(log.count(LogLevel::Info, "cleanup"), 1);
}

#[test]
fn api_version_mismatch_is_rejected_at_load() {
    let source = std::fs::read_to_string(doubler_path()).unwrap();
    let marker = "i32.const 1 ;; api-version";
    assert!(source.contains(marker));

    let dir = tempfile::tempdir().unwrap();
    let future = dir.path().join("future.wat");
    std::fs::write(&future, source.replace(marker, "i32.const 99 ;; api-version")).unwrap();

    let log = Arc::new(RecordingSink::default());
    let host = NodeHost::with_log_sink(&HostConfig::default(), log.clone()).unwrap();
    match host.load_module(&future) {
        Err(HostError::VersionMismatch { expected, found }) => {
            assert_eq!(expected, COMPONENT_API_VERSION);
            assert_eq!(found, 99);
        }
        other => panic!("expected a version mismatch, got {other:?}"),
    }
    assert!(host.kinds().is_empty());
    assert!(log.0.lock().unwrap().is_empty());
}

#[test]
fn instances_keep_separate_stores() {
    let host = Arc::new(doubler_host(Arc::new(NullSink)));
    let ids: Vec<InstanceId> =
        (0..4).map(|_| host.create_instance(DOUBLER_KIND, None).unwrap()).collect();

    std::thread::scope(|scope| {
        for &id in &ids {
            let host = Arc::clone(&host);
            scope.spawn(move || {
                let mut outputs = Outputs::new();
                for _ in 0..25 {
                    let result = host.process(id, "in", &audio(&[0.25, -1.0]), &mut outputs);
                    assert!(result.unwrap().is_success());
                }
                assert_eq!(outputs.len(), 25);
                let doubled = [0.5, -2.0];
                assert!(outputs.iter().all(|(_, packet)| packet.samples() == Some(&doubled[..])));
            });
        }
    });

    for id in ids {
        host.destroy(id).unwrap();
    }
    assert_eq!(host.instance_count(), 0);
}

// -----------------------------------------------------------------------------
// gain_component built for wasm32-wasip2
// -----------------------------------------------------------------------------

fn gain_db_host() -> NodeHost {
    let root = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let path = [
        root.join("target/wasm32-wasip2/release/gain_component.wasm"),
        root.join("tests/wasm/gain_component/target/wasm32-wasip2/release/gain_component.wasm"),
    ]
    .into_iter()
    .find(|path| path.exists())
    .expect("gain_component.wasm has not been built");
    let host = NodeHost::with_log_sink(&HostConfig::default(), Arc::new(NullSink)).unwrap();
    assert_eq!(host.load_module(&path).unwrap(), GAIN_DB_KIND);
    host
}

fn gain_db_samples(host: &NodeHost, id: InstanceId, samples: &[f32]) -> Vec<f32> {
    let mut outputs = Outputs::new();
    let packet = Packet::Audio(AudioFrame::new(44_100, 1, samples));
    let result = host.process(id, "in", &packet, &mut outputs).unwrap();
    assert!(result.is_success(), "{result:?}");
    assert_eq!(outputs.len(), 1);
    outputs[0].1.samples().unwrap().to_vec()
}

fn assert_close(actual: &[f32], expected: &[f32]) {
    assert_eq!(actual.len(), expected.len());
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 2e-3, "{actual:?} != {expected:?}");
    }
}

#[test]
#[ignore = "needs gain_component built for wasm32-wasip2"]
fn six_db_roughly_doubles() {
    let host = gain_db_host();
    let id = host.create_instance(GAIN_DB_KIND, Some(r#"{"gain_db": 6.0}"#)).unwrap();
    assert_close(&gain_db_samples(&host, id, &[0.1, -0.2, 0.3, 0.0]), &[0.2, -0.4, 0.6, 0.0]);
    host.destroy(id).unwrap();
}

#[test]
#[ignore = "needs gain_component built for wasm32-wasip2"]
fn gain_db_params_clamp_and_fall_back() {
    let host = gain_db_host();

    // +100 dB clamps to +20 dB, a factor of 10
    let id = host.create_instance(GAIN_DB_KIND, Some(r#"{"gain_db": 100}"#)).unwrap();
    assert_close(&gain_db_samples(&host, id, &[0.05]), &[0.5]);

    // malformed update keeps +20 dB
    assert!(host.update_params(id, Some("{not json")).unwrap().is_success());
    assert_close(&gain_db_samples(&host, id, &[0.05]), &[0.5]);

    // unparseable create params mean 0 dB
    let plain = host.create_instance(GAIN_DB_KIND, Some("???")).unwrap();
    assert_close(&gain_db_samples(&host, plain, &[0.05]), &[0.05]);
}
