use schemars::JsonSchema;
use serde::Serialize;

use crate::error::PluginError;

/// Outcome of one lifecycle call.
///
/// Either a success, or a failure with a message. There is no partial
/// success and no failure without a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct CallResult {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl CallResult {
    pub fn ok() -> Self {
        Self { success: true, error_message: None }
    }

    /// A failed result. An empty message is replaced so the failure still says something.
    pub fn failure(message: impl Into<String>) -> Self {
        let mut message = message.into();
        if message.is_empty() {
            message = "unspecified failure".to_string();
        }
        Self { success: false, error_message: Some(message) }
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn into_result(self) -> Result<(), String> {
        match self.error_message {
            None => Ok(()),
            Some(message) => Err(message),
        }
    }
}

impl Default for CallResult {
    fn default() -> Self {
        Self::ok()
    }
}

impl From<Result<(), PluginError>> for CallResult {
    fn from(result: Result<(), PluginError>) -> Self {
        match result {
            Ok(()) => CallResult::ok(),
            Err(err) => CallResult::failure(err.to_string()),
        }
    }
}

impl From<PluginError> for CallResult {
    fn from(err: PluginError) -> Self {
        CallResult::failure(err.to_string())
    }
}
