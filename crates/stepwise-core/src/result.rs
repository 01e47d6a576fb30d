use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Key/value pairs a step hands back to the run, merged into shared data.
pub type Metadata = IndexMap<String, Value>;

/// The outcome of a single step (or of a whole run).
///
/// `Success` and `Skip` continue the run, `Abort` ends it early without
/// counting as a failure, and `Error` is subject to the step's error policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StepResult {
    Success {
        #[serde(default)]
        message: String,
        #[serde(default)]
        metadata: Metadata,
    },
    Skip {
        #[serde(default)]
        message: String,
        #[serde(default)]
        metadata: Metadata,
    },
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cause: Option<String>,
    },
    Abort {
        #[serde(default)]
        message: String,
        #[serde(default)]
        metadata: Metadata,
    },
}

impl StepResult {
    pub fn success(message: impl Into<String>) -> Self {
        Self::Success {
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn success_with(message: impl Into<String>, metadata: Metadata) -> Self {
        Self::Success {
            message: message.into(),
            metadata,
        }
    }

    pub fn skip(message: impl Into<String>) -> Self {
        Self::Skip {
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn abort(message: impl Into<String>) -> Self {
        Self::Abort {
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            error_code: None,
            cause: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: i32) -> Self {
        Self::Error {
            message: message.into(),
            error_code: Some(code),
            cause: None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Success { message, .. }
            | Self::Skip { message, .. }
            | Self::Error { message, .. }
            | Self::Abort { message, .. } => message,
        }
    }

    /// Metadata carried by the result; `Error` never carries any.
    pub fn metadata(&self) -> Option<&Metadata> {
        match self {
            Self::Success { metadata, .. }
            | Self::Skip { metadata, .. }
            | Self::Abort { metadata, .. } => Some(metadata),
            Self::Error { .. } => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success { .. } => "success",
            Self::Skip { .. } => "skip",
            Self::Error { .. } => "error",
            Self::Abort { .. } => "abort",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_tagged_json_from_external_providers() {
        let raw = r#"{"status":"skip","message":"nothing to do","metadata":{"x":1}}"#;
        let result: StepResult = serde_json::from_str(raw).expect("tagged result should parse");
        assert_eq!(result.kind(), "skip");
        assert_eq!(result.metadata().unwrap()["x"], json!(1));
    }

    #[test]
    fn error_carries_no_metadata() {
        let result = StepResult::error_with_code("boom", 2);
        assert!(result.metadata().is_none());
        assert_eq!(result.message(), "boom");
        assert!(result.is_error());
    }

    #[test]
    fn missing_message_defaults_to_empty() {
        let result: StepResult = serde_json::from_str(r#"{"status":"success"}"#).unwrap();
        assert_eq!(result, StepResult::success(""));
    }
}
