use serde_json::Value;

use crate::{
    error::RemoteError,
    resource::{ResourceContents, ResourceDef},
    types::{Arguments, ToolDef},
};

/// Correlation token linking a request to its response.
pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// Discovery: enumerate the provider's tools.
    ListTools,
    /// Invocation: run a named tool with arguments.
    CallTool {
        tool_name: String,
        arguments: Arguments,
    },
    /// Enumerate the provider's readable resources.
    ListResources,
    ReadResource { uri: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub body: RequestBody,
}

impl Request {
    pub fn list_tools(id: RequestId) -> Self {
        Self {
            id,
            body: RequestBody::ListTools,
        }
    }

    pub fn call_tool(id: RequestId, tool_name: impl Into<String>, arguments: Arguments) -> Self {
        Self {
            id,
            body: RequestBody::CallTool {
                tool_name: tool_name.into(),
                arguments,
            },
        }
    }

    pub fn list_resources(id: RequestId) -> Self {
        Self {
            id,
            body: RequestBody::ListResources,
        }
    }

    pub fn read_resource(id: RequestId, uri: impl Into<String>) -> Self {
        Self {
            id,
            body: RequestBody::ReadResource { uri: uri.into() },
        }
    }
}

/// Payload of a success response; its shape depends on the request kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Tools(Vec<ToolDef>),
    Result(Value),
    Resources(Vec<ResourceDef>),
    Contents(ResourceContents),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success(Payload),
    Failure(RemoteError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub outcome: Outcome,
}

impl Response {
    pub fn tools(id: RequestId, tools: Vec<ToolDef>) -> Self {
        Self {
            id,
            outcome: Outcome::Success(Payload::Tools(tools)),
        }
    }

    pub fn result(id: RequestId, value: Value) -> Self {
        Self {
            id,
            outcome: Outcome::Success(Payload::Result(value)),
        }
    }

    pub fn resources(id: RequestId, resources: Vec<ResourceDef>) -> Self {
        Self {
            id,
            outcome: Outcome::Success(Payload::Resources(resources)),
        }
    }

    pub fn contents(id: RequestId, contents: ResourceContents) -> Self {
        Self {
            id,
            outcome: Outcome::Success(Payload::Contents(contents)),
        }
    }

    pub fn failure(id: RequestId, error: RemoteError) -> Self {
        Self {
            id,
            outcome: Outcome::Failure(error),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failure(_))
    }
}

/// Anything that can travel in one frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn id(&self) -> RequestId {
        match self {
            Message::Request(r) => r.id,
            Message::Response(r) => r.id,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Message::Request(_) => "request",
            Message::Response(_) => "response",
        }
    }
}

impl From<Request> for Message {
    fn from(r: Request) -> Self {
        Message::Request(r)
    }
}

impl From<Response> for Message {
    fn from(r: Response) -> Self {
        Message::Response(r)
    }
}
