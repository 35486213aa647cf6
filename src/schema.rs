use std::{fs, path::Path};

use anyhow::{Context, Error};
use node_plugin::metadata::NodeMetadata;
use schemars::schema_for;
use serde_json::Value;

use crate::{config::HostConfig, registry::NodeHost};

pub const METADATA_SCHEMA_FILE: &str = "node-metadata.schema.json";
pub const CONFIG_SCHEMA_FILE: &str = "host-config.schema.json";

/// Write the JSON Schemas for node metadata and the host config, then one
/// `param-<kind>.schema.json` per registered kind. Returns the files
/// written.
pub fn write_schema(out_dir: &Path, host: &NodeHost) -> Result<Vec<String>, Error> {
    fs::create_dir_all(out_dir).with_context(|| format!("could not create {}", out_dir.display()))?;
    let mut written = Vec::new();

    // 1) contract schemas
    let metadata_schema = schema_for!(NodeMetadata);
    fs::write(out_dir.join(METADATA_SCHEMA_FILE), serde_json::to_string_pretty(&metadata_schema)?)?;
    written.push(METADATA_SCHEMA_FILE.to_string());

    let config_schema = schema_for!(HostConfig);
    fs::write(out_dir.join(CONFIG_SCHEMA_FILE), serde_json::to_string_pretty(&config_schema)?)?;
    written.push(CONFIG_SCHEMA_FILE.to_string());

    // 2) one params schema per loaded plugin
    for kind in host.kinds() {
        let metadata = host.metadata(&kind)?;
        let schema: Value = serde_json::from_str(&metadata.param_schema)
            .with_context(|| format!("param schema of {kind} is not JSON"))?;
        let filename = param_schema_file(&kind);
        fs::write(out_dir.join(&filename), serde_json::to_string_pretty(&schema)?)?;
        written.push(filename);
    }

    Ok(written)
}

/// `plugin::native::gain` → `param-native-gain.schema.json`.
pub fn param_schema_file(kind: &str) -> String {
    let name = kind.strip_prefix("plugin::").unwrap_or(kind).replace("::", "-");
    format!("param-{}.schema.json", name.to_lowercase())
}
