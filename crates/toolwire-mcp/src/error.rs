//! Error types.
//!
//! Codec errors are local to the reading side and end the session. Remote
//! errors travel inside failure responses and never end it. Call errors are
//! what the caller engine hands back to its application.

use std::fmt;
use std::io;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ParamType;

/// Errors raised while turning bytes into messages or messages into bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("unknown message kind: {0}")]
    UnknownMessageKind(String),

    #[error("unexpected message: expected a {expected}, got a {got}")]
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },

    #[error("stream closed after {buffered} bytes of an incomplete frame")]
    Truncated { buffered: usize },

    #[error("frame exceeds {limit} bytes")]
    FrameTooLarge { limit: usize },

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Registration-time errors. Fatal to provider startup.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a tool named '{0}' is already registered")]
    DuplicateToolName(String),
}

/// The kind of a failure response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    UnknownTool,
    InvalidArguments,
    ToolExecutionError,
    UnknownResource,
    ResourceReadError,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RemoteErrorKind::UnknownTool => "unknown_tool",
            RemoteErrorKind::InvalidArguments => "invalid_arguments",
            RemoteErrorKind::ToolExecutionError => "tool_execution_error",
            RemoteErrorKind::UnknownResource => "unknown_resource",
            RemoteErrorKind::ResourceReadError => "resource_read_error",
        })
    }
}

/// Why a single argument failed schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ViolationReason {
    /// A required argument was not supplied.
    Missing,
    /// The argument was supplied with a value of the wrong type.
    WrongType { expected: ParamType, found: String },
    /// The argument is not part of the tool's schema.
    Unexpected,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArgViolation {
    pub field: String,
    #[serde(flatten)]
    pub reason: ViolationReason,
}

impl fmt::Display for ArgViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            ViolationReason::Missing => write!(f, "missing required argument '{}'", self.field),
            ViolationReason::WrongType { expected, found } => write!(
                f,
                "argument '{}' must be of type {expected}, got {found}",
                self.field
            ),
            ViolationReason::Unexpected => write!(f, "unexpected argument '{}'", self.field),
        }
    }
}

/// Error detail carried by a failure response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind}: {detail}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub detail: String,
    /// The requested tool, when the failure concerns one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    /// The requested resource, for resource failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<ArgViolation>,
}

impl RemoteError {
    pub fn unknown_tool(name: &str) -> Self {
        Self {
            kind: RemoteErrorKind::UnknownTool,
            detail: format!("unknown tool: {name}"),
            tool_name: Some(name.to_string()),
            uri: None,
            violations: vec![],
        }
    }

    pub fn invalid_arguments(name: &str, violations: Vec<ArgViolation>) -> Self {
        let detail = violations
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        Self {
            kind: RemoteErrorKind::InvalidArguments,
            detail,
            tool_name: Some(name.to_string()),
            uri: None,
            violations,
        }
    }

    pub fn execution(name: &str, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::ToolExecutionError,
            detail: message.into(),
            tool_name: Some(name.to_string()),
            uri: None,
            violations: vec![],
        }
    }

    pub fn unknown_resource(uri: &str) -> Self {
        Self {
            kind: RemoteErrorKind::UnknownResource,
            detail: format!("unknown resource: {uri}"),
            tool_name: None,
            uri: Some(uri.to_string()),
            violations: vec![],
        }
    }

    /// A resource source could not enumerate what it holds.
    pub fn listing_failed(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::ResourceReadError,
            detail: message.into(),
            tool_name: None,
            uri: None,
            violations: vec![],
        }
    }

    pub fn resource_read(uri: &str, message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::ResourceReadError,
            detail: message.into(),
            tool_name: None,
            uri: Some(uri.to_string()),
            violations: vec![],
        }
    }
}

/// Errors surfaced by [`crate::CallerEngine`].
#[derive(Debug, Error)]
pub enum CallError {
    /// The provider answered with a failure response.
    #[error("remote error: {0}")]
    Remote(RemoteError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    /// The provider broke the protocol. When it answered a listing request
    /// with a failure, that failure is kept in `remote`.
    #[error("protocol error: {message}")]
    ProtocolError {
        message: String,
        remote: Option<RemoteError>,
    },

    #[error("session closed")]
    Closed,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl CallError {
    pub(crate) fn protocol(message: impl Into<String>) -> Self {
        CallError::ProtocolError {
            message: message.into(),
            remote: None,
        }
    }

    /// The provider's error kind, if this is a remote failure.
    pub fn remote_kind(&self) -> Option<RemoteErrorKind> {
        match self {
            CallError::Remote(err) => Some(err.kind),
            _ => None,
        }
    }
}

pub type CallResult<T> = Result<T, CallError>;
