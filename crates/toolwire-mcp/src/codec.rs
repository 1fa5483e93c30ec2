//! Newline-delimited JSON framing.
//!
//! Every message is one JSON object on one line. JSON string escaping keeps
//! raw newlines out of the encoded text, so `\n` delimits frames no matter
//! how the transport chunks its reads.

use std::io::{BufRead, BufReader, Read, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    error::{CodecError, RemoteError},
    message::{Message, Outcome, Payload, Request, RequestBody, RequestId, Response},
    resource::{ResourceContents, ResourceDef},
    types::{Arguments, ToolDef},
};

/// Frames larger than this are rejected unless configured otherwise.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

const KIND_LIST_TOOLS: &str = "list_tools";
const KIND_CALL_TOOL: &str = "call_tool";
const KIND_LIST_RESOURCES: &str = "list_resources";
const KIND_READ_RESOURCE: &str = "read_resource";
const OUTCOME_SUCCESS: &str = "success";
const OUTCOME_FAILURE: &str = "failure";

/// Flat on-the-wire shape shared by every message. Which fields are set
/// depends on the `kind` (requests) or `outcome` (responses) discriminator.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireFrame {
    id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    outcome: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    arguments: Option<Arguments>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<ToolDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    resources: Option<Vec<ResourceDef>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    contents: Option<ResourceContents>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<RemoteError>,
}

impl From<&Message> for WireFrame {
    fn from(message: &Message) -> Self {
        match message {
            Message::Request(req) => match &req.body {
                RequestBody::ListTools => WireFrame {
                    id: req.id,
                    kind: Some(KIND_LIST_TOOLS.into()),
                    ..Default::default()
                },
                RequestBody::CallTool {
                    tool_name,
                    arguments,
                } => WireFrame {
                    id: req.id,
                    kind: Some(KIND_CALL_TOOL.into()),
                    tool_name: Some(tool_name.clone()),
                    arguments: Some(arguments.clone()),
                    ..Default::default()
                },
                RequestBody::ListResources => WireFrame {
                    id: req.id,
                    kind: Some(KIND_LIST_RESOURCES.into()),
                    ..Default::default()
                },
                RequestBody::ReadResource { uri } => WireFrame {
                    id: req.id,
                    kind: Some(KIND_READ_RESOURCE.into()),
                    uri: Some(uri.clone()),
                    ..Default::default()
                },
            },
            Message::Response(resp) => match &resp.outcome {
                Outcome::Success(Payload::Tools(tools)) => WireFrame {
                    id: resp.id,
                    outcome: Some(OUTCOME_SUCCESS.into()),
                    tools: Some(tools.clone()),
                    ..Default::default()
                },
                Outcome::Success(Payload::Result(value)) => WireFrame {
                    id: resp.id,
                    outcome: Some(OUTCOME_SUCCESS.into()),
                    result: Some(value.clone()),
                    ..Default::default()
                },
                Outcome::Success(Payload::Resources(resources)) => WireFrame {
                    id: resp.id,
                    outcome: Some(OUTCOME_SUCCESS.into()),
                    resources: Some(resources.clone()),
                    ..Default::default()
                },
                Outcome::Success(Payload::Contents(contents)) => WireFrame {
                    id: resp.id,
                    outcome: Some(OUTCOME_SUCCESS.into()),
                    contents: Some(contents.clone()),
                    ..Default::default()
                },
                Outcome::Failure(error) => WireFrame {
                    id: resp.id,
                    outcome: Some(OUTCOME_FAILURE.into()),
                    error: Some(error.clone()),
                    ..Default::default()
                },
            },
        }
    }
}

impl TryFrom<WireFrame> for Message {
    type Error = CodecError;

    fn try_from(frame: WireFrame) -> Result<Self, Self::Error> {
        let id = frame.id;
        match (frame.kind, frame.outcome) {
            (Some(_), Some(_)) => Err(CodecError::MalformedMessage(
                "frame carries both 'kind' and 'outcome'".into(),
            )),
            (None, None) => Err(CodecError::MalformedMessage(
                "frame carries neither 'kind' nor 'outcome'".into(),
            )),
            (Some(kind), None) => {
                let body = match kind.as_str() {
                    KIND_LIST_TOOLS => RequestBody::ListTools,
                    KIND_CALL_TOOL => RequestBody::CallTool {
                        tool_name: frame.tool_name.ok_or_else(|| {
                            CodecError::MalformedMessage("call_tool without 'tool_name'".into())
                        })?,
                        arguments: frame.arguments.unwrap_or_default(),
                    },
                    KIND_LIST_RESOURCES => RequestBody::ListResources,
                    KIND_READ_RESOURCE => RequestBody::ReadResource {
                        uri: frame.uri.ok_or_else(|| {
                            CodecError::MalformedMessage("read_resource without 'uri'".into())
                        })?,
                    },
                    _ => return Err(CodecError::UnknownMessageKind(kind)),
                };
                Ok(Message::Request(Request { id, body }))
            }
            (None, Some(outcome)) => {
                let outcome = match outcome.as_str() {
                    // A success with no listing or contents is an invocation
                    // result; a JSON null result deserializes as an absent
                    // field.
                    OUTCOME_SUCCESS => match (frame.tools, frame.resources, frame.contents) {
                        (None, None, None) => Outcome::Success(Payload::Result(
                            frame.result.unwrap_or(Value::Null),
                        )),
                        (Some(tools), None, None) if frame.result.is_none() => {
                            Outcome::Success(Payload::Tools(tools))
                        }
                        (None, Some(resources), None) if frame.result.is_none() => {
                            Outcome::Success(Payload::Resources(resources))
                        }
                        (None, None, Some(contents)) if frame.result.is_none() => {
                            Outcome::Success(Payload::Contents(contents))
                        }
                        _ => {
                            return Err(CodecError::MalformedMessage(
                                "success carries more than one payload".into(),
                            ));
                        }
                    },
                    OUTCOME_FAILURE => Outcome::Failure(frame.error.ok_or_else(|| {
                        CodecError::MalformedMessage("failure without 'error'".into())
                    })?),
                    _ => return Err(CodecError::UnknownMessageKind(outcome)),
                };
                Ok(Message::Response(Response { id, outcome }))
            }
        }
    }
}

/// Encode one message as a complete frame, delimiter included.
pub fn encode(message: &Message) -> Result<Vec<u8>, CodecError> {
    let mut bytes = serde_json::to_vec(&WireFrame::from(message))
        .map_err(|e| CodecError::MalformedMessage(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode one complete frame. A trailing delimiter is tolerated.
pub fn decode(frame: &[u8]) -> Result<Message, CodecError> {
    let wire: WireFrame =
        serde_json::from_slice(frame).map_err(|e| CodecError::MalformedMessage(e.to_string()))?;
    Message::try_from(wire)
}

/// Reads complete frames from a byte stream.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: Read> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_limit(inner, DEFAULT_MAX_FRAME_BYTES)
    }

    pub fn with_limit(inner: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(inner),
            max_frame_bytes,
        }
    }

    /// Next complete frame without its delimiter.
    ///
    /// `Ok(None)` means the stream ended cleanly between frames. Blank lines
    /// are skipped.
    pub fn read_frame(&mut self) -> Result<Option<Vec<u8>>, CodecError> {
        // Room for the body plus a `\r\n` delimiter.
        let window = self.max_frame_bytes as u64 + 2;
        loop {
            let mut buf = Vec::new();
            let n = (&mut self.inner).take(window).read_until(b'\n', &mut buf)?;
            if n == 0 {
                return Ok(None);
            }
            if buf.last() != Some(&b'\n') {
                // Filling the window means the line goes on past the limit;
                // anything shorter stopped at end of stream.
                if buf.len() as u64 == window {
                    return Err(CodecError::FrameTooLarge {
                        limit: self.max_frame_bytes,
                    });
                }
                return Err(CodecError::Truncated {
                    buffered: buf.len(),
                });
            }
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
            if buf.len() > self.max_frame_bytes {
                return Err(CodecError::FrameTooLarge {
                    limit: self.max_frame_bytes,
                });
            }
            if buf.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            return Ok(Some(buf));
        }
    }

    pub fn read_message(&mut self) -> Result<Option<Message>, CodecError> {
        match self.read_frame()? {
            Some(frame) => decode(&frame).map(Some),
            None => Ok(None),
        }
    }

    pub fn read_request(&mut self) -> Result<Option<Request>, CodecError> {
        match self.read_message()? {
            Some(Message::Request(req)) => Ok(Some(req)),
            Some(other) => Err(CodecError::UnexpectedMessage {
                expected: "request",
                got: other.label(),
            }),
            None => Ok(None),
        }
    }

    pub fn read_response(&mut self) -> Result<Option<Response>, CodecError> {
        match self.read_message()? {
            Some(Message::Response(resp)) => Ok(Some(resp)),
            Some(other) => Err(CodecError::UnexpectedMessage {
                expected: "response",
                got: other.label(),
            }),
            None => Ok(None),
        }
    }
}

/// Writes whole frames to a byte stream, flushing after each one.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: Write> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn write_message(&mut self, message: &Message) -> Result<(), CodecError> {
        let frame = encode(message)?;
        self.inner.write_all(&frame)?;
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
