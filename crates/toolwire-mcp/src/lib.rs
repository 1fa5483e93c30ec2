pub mod caller;
pub mod codec;
pub mod error;
pub mod message;
pub mod provider;
pub mod registry;
pub mod resource;
pub mod resources;
pub mod schema;
pub mod tool;
pub mod tools;
pub mod transport;
pub mod types;

#[cfg(test)]
mod test_tools;

// Convenience re-exports so users only need `use toolwire_mcp::*` or individual items.
pub use caller::{CallerEngine, CallerOptions, TimeoutPolicy};
pub use codec::{DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter, decode, encode};
pub use error::{
    ArgViolation, CallError, CallResult, CodecError, RegistryError, RemoteError, RemoteErrorKind,
    ViolationReason,
};
pub use message::{Message, Outcome, Payload, Request, RequestBody, RequestId, Response};
pub use provider::{
    CloseReason, DEFAULT_MAX_IN_FLIGHT, ProviderEngine, ProviderOptions, ProviderState,
    SessionSummary,
};
pub use registry::ToolRegistry;
pub use resource::{ResourceContents, ResourceDef, ResourceRegistry, ResourceSource};
pub use resources::builtin_resources;
pub use tool::Tool;
pub use tools::builtin_registry;
pub use transport::{ChildTransport, StreamTransport, Transport};
pub use types::{Arguments, ParamType, ToolArgs, ToolDef, ToolParam};
