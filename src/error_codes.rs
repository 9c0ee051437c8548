use std::fmt;

use anyhow::Error;
use serde::Serialize;

pub const CONFIG_EMPTY_CHARSET: &str = "CONFIG_EMPTY_CHARSET";
pub const CONFIG_INVALID_COLUMNS: &str = "CONFIG_INVALID_COLUMNS";
pub const CONFIG_UNKNOWN_PRESET: &str = "CONFIG_UNKNOWN_PRESET";
pub const CONFIG_PARSE_FAILED: &str = "CONFIG_PARSE_FAILED";
pub const CONFIG_INVALID_SIZE: &str = "CONFIG_INVALID_SIZE";

pub const RESOURCE_FONT_UNAVAILABLE: &str = "RESOURCE_FONT_UNAVAILABLE";
pub const RESOURCE_SOURCE_UNAVAILABLE: &str = "RESOURCE_SOURCE_UNAVAILABLE";
pub const RESOURCE_GPU_UNAVAILABLE: &str = "RESOURCE_GPU_UNAVAILABLE";

pub const PIPELINE_SHADER_INVALID: &str = "PIPELINE_SHADER_INVALID";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// Rejected configuration; nothing was built.
    Config,
    /// A font, decoder, capture device or GPU adapter could not be acquired.
    Resource,
    /// The shading pipeline failed validation.
    Pipeline,
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn config(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: CodedErrorKind::Config,
        }
    }

    pub fn resource(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: CodedErrorKind::Resource,
        }
    }

    pub fn pipeline(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            kind: CodedErrorKind::Pipeline,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                kind: self.kind,
                message: self.message.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub kind: CodedErrorKind,
    pub message: String,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for errors that never got a code attached.
pub fn uncoded_envelope(error: &Error) -> serde_json::Value {
    serde_json::json!({
        "ok": false,
        "error": {
            "code": "UNCLASSIFIED",
            "message": format!("{error:#}"),
        }
    })
}
