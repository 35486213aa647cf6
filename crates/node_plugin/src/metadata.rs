use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::error::PluginError;
use crate::types::{PacketType, can_connect};

/// An input pin: a name plus the ordered list of packet types it accepts.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct InputPin {
    pub name: String,
    pub accepts_types: Vec<PacketType>,
}

/// An output pin produces exactly one packet type.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct OutputPin {
    pub name: String,
    pub produces_type: PacketType,
}

/// Static description of a node kind.
///
/// Built once per loaded module and never mutated; it outlives every
/// instance created from that module.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct NodeMetadata {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub inputs: Vec<InputPin>,
    pub outputs: Vec<OutputPin>,
    /// JSON Schema (as a string) describing the params payload.
    pub param_schema: String,
    #[serde(default)]
    pub categories: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("node kind is empty")]
    EmptyKind,

    #[error("{0} pin with an empty name")]
    EmptyPinName(&'static str),

    #[error("input pin '{0}' accepts no packet types")]
    NoAcceptedTypes(String),

    #[error("duplicate input pin '{0}'")]
    DuplicateInput(String),

    #[error("duplicate output pin '{0}'")]
    DuplicateOutput(String),

    #[error("param schema is not a JSON object: {0}")]
    InvalidParamSchema(String),
}

pub const EMPTY_PARAM_SCHEMA: &str = r#"{"type":"object","properties":{}}"#;

impl NodeMetadata {
    pub fn builder(kind: impl Into<String>) -> NodeMetadataBuilder {
        NodeMetadataBuilder::new(kind)
    }

    pub fn input(&self, name: &str) -> Option<&InputPin> {
        self.inputs.iter().find(|pin| pin.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputPin> {
        self.outputs.iter().find(|pin| pin.name == name)
    }

    /// Whether `pin` is a declared output that may carry `offered`.
    /// Passthrough and Any outputs carry anything.
    pub fn check_output(&self, pin: &str, offered: &PacketType) -> Result<(), PluginError> {
        let declared = self.output(pin).ok_or_else(|| PluginError::UnknownPin(pin.to_string()))?;
        let produced = &declared.produces_type;
        let open = matches!(produced, PacketType::Passthrough | PacketType::Any);
        if !open && !can_connect(offered, produced) {
            return Err(PluginError::UnsupportedPacket {
                pin: pin.to_string(),
                offered: offered.to_string(),
            });
        }
        Ok(())
    }

    /// Check the pin invariants: non-empty kind, non-empty unique pin
    /// names, at least one accepted type per input, and a param schema
    /// that parses as a JSON object.
    pub fn validate(&self) -> Result<(), MetadataError> {
        if self.kind.trim().is_empty() {
            return Err(MetadataError::EmptyKind);
        }

        let mut seen = HashSet::new();
        for pin in &self.inputs {
            if pin.name.is_empty() {
                return Err(MetadataError::EmptyPinName("input"));
            }
            if pin.accepts_types.is_empty() {
                return Err(MetadataError::NoAcceptedTypes(pin.name.clone()));
            }
            if !seen.insert(pin.name.as_str()) {
                return Err(MetadataError::DuplicateInput(pin.name.clone()));
            }
        }

        let mut seen = HashSet::new();
        for pin in &self.outputs {
            if pin.name.is_empty() {
                return Err(MetadataError::EmptyPinName("output"));
            }
            if !seen.insert(pin.name.as_str()) {
                return Err(MetadataError::DuplicateOutput(pin.name.clone()));
            }
        }

        match serde_json::from_str::<serde_json::Value>(&self.param_schema) {
            Ok(serde_json::Value::Object(_)) => Ok(()),
            Ok(other) => Err(MetadataError::InvalidParamSchema(format!("got {other}"))),
            Err(err) => Err(MetadataError::InvalidParamSchema(err.to_string())),
        }
    }
}

pub struct NodeMetadataBuilder {
    metadata: NodeMetadata,
}

impl NodeMetadataBuilder {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            metadata: NodeMetadata {
                kind: kind.into(),
                description: None,
                inputs: Vec::new(),
                outputs: Vec::new(),
                param_schema: EMPTY_PARAM_SCHEMA.to_string(),
                categories: Vec::new(),
            },
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    pub fn input(mut self, name: impl Into<String>, accepts_types: Vec<PacketType>) -> Self {
        self.metadata.inputs.push(InputPin { name: name.into(), accepts_types });
        self
    }

    pub fn output(mut self, name: impl Into<String>, produces_type: PacketType) -> Self {
        self.metadata.outputs.push(OutputPin { name: name.into(), produces_type });
        self
    }

    pub fn param_schema(mut self, schema: impl Into<String>) -> Self {
        self.metadata.param_schema = schema.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.metadata.categories.push(category.into());
        self
    }

    /// Finish without checking. Hosts validate metadata when they load a module.
    pub fn build(self) -> NodeMetadata {
        self.metadata
    }

    pub fn try_build(self) -> Result<NodeMetadata, MetadataError> {
        self.metadata.validate()?;
        Ok(self.metadata)
    }
}
