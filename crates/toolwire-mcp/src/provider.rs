//! Provider side of a session: read a request, dispatch it against the
//! registry, write the response, repeat until the stream ends.

use std::{
    any::Any,
    io::{self, Read, Write},
    panic::{self, AssertUnwindSafe},
    sync::{Mutex, PoisonError, mpsc},
    thread,
};

use log::{debug, error, info, trace, warn};

use crate::{
    codec::{DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter},
    error::{CodecError, RemoteError},
    message::{Request, RequestBody, RequestId, Response},
    registry::ToolRegistry,
    resource::ResourceRegistry,
    schema,
    types::{Arguments, ToolArgs},
};

/// Requests a pipelined provider works on at once unless configured
/// otherwise.
pub const DEFAULT_MAX_IN_FLIGHT: usize = 8;

/// Where the provider's session loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Idle,
    AwaitingFrame,
    Dispatching,
    Responding,
    Closed,
}

#[derive(Debug, Clone)]
pub struct ProviderOptions {
    /// Dispatch requests on a pool of worker threads instead of one at a
    /// time. Responses are then written in completion order.
    pub pipelined: bool,
    /// Size of that pool. Once every worker is busy and as many requests
    /// again are queued, no further frames are read until one finishes.
    pub max_in_flight: usize,
    pub max_frame_bytes: usize,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            pipelined: false,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

/// How a session that ended without a codec failure was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CloseReason {
    /// The stream ended between frames.
    #[default]
    EndOfStream,
    /// The stream ended inside a frame; nothing was answered for it.
    Truncated { buffered: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    /// Complete requests received and answered.
    pub requests: u64,
    /// How many of those were answered with a failure response.
    pub failures: u64,
    pub closed_by: CloseReason,
}

pub struct ProviderEngine {
    registry: ToolRegistry,
    resources: ResourceRegistry,
    options: ProviderOptions,
    state: ProviderState,
}

impl ProviderEngine {
    pub fn new(registry: ToolRegistry) -> Self {
        Self::with_options(registry, ProviderOptions::default())
    }

    pub fn with_options(registry: ToolRegistry, options: ProviderOptions) -> Self {
        Self {
            registry,
            resources: ResourceRegistry::new(),
            options,
            state: ProviderState::Idle,
        }
    }

    /// Serve `resources` next to the tools. Without them, listing resources
    /// answers with an empty list and every read with `unknown_resource`.
    pub fn with_resources(mut self, resources: ResourceRegistry) -> Self {
        self.resources = resources;
        self
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    /// Answer a single request. Tool failures of every kind come back as a
    /// failure response carrying the request's id.
    pub fn handle(&self, request: &Request) -> Response {
        dispatch(&self.registry, &self.resources, request)
    }

    /// Serve one session until the stream ends.
    ///
    /// A clean end of stream, or one that cuts a frame short, closes the
    /// session normally. Codec failures and write errors close it with an
    /// error; no response is written for a frame that could not be decoded.
    pub fn serve<R, W>(&mut self, reader: R, writer: W) -> Result<SessionSummary, CodecError>
    where
        R: Read,
        W: Write + Send,
    {
        info!(
            "serving {} tool(s){}",
            self.registry.len(),
            if self.options.pipelined { " (pipelined)" } else { "" }
        );
        let reader = FrameReader::with_limit(reader, self.options.max_frame_bytes);
        let result = if self.options.pipelined {
            self.serve_pipelined(reader, writer)
        } else {
            self.serve_sequential(reader, writer)
        };
        transition(&mut self.state, ProviderState::Closed);
        match &result {
            Ok(summary) => info!(
                "session closed after {} request(s), {} failure(s)",
                summary.requests, summary.failures
            ),
            Err(e) => error!("session closed: {e}"),
        }
        result
    }

    fn serve_sequential<R: Read, W: Write>(
        &mut self,
        mut reader: FrameReader<R>,
        writer: W,
    ) -> Result<SessionSummary, CodecError> {
        let mut writer = FrameWriter::new(writer);
        let mut summary = SessionSummary::default();
        let state = &mut self.state;

        loop {
            transition(state, ProviderState::AwaitingFrame);
            let Some(request) = next_request(&mut reader, &mut summary)? else {
                return Ok(summary);
            };

            transition(state, ProviderState::Dispatching);
            let response = dispatch(&self.registry, &self.resources, &request);
            summary.requests += 1;
            if response.is_failure() {
                summary.failures += 1;
            }

            transition(state, ProviderState::Responding);
            writer.write_message(&response.into())?;
            transition(state, ProviderState::Idle);
        }
    }

    /// The reading thread only decodes and queues. Workers dispatch, and a
    /// single writer thread owns the output stream.
    fn serve_pipelined<R: Read, W: Write + Send>(
        &mut self,
        mut reader: FrameReader<R>,
        writer: W,
    ) -> Result<SessionSummary, CodecError> {
        let registry = &self.registry;
        let resources = &self.resources;
        let state = &mut self.state;
        let workers = self.options.max_in_flight.max(1);
        let mut summary = SessionSummary::default();

        let (job_tx, job_rx) = mpsc::sync_channel::<Request>(workers);
        let job_rx = Mutex::new(job_rx);
        let (tx, rx) = mpsc::channel::<Response>();

        thread::scope(|scope| -> Result<SessionSummary, CodecError> {
            let writer_thread = scope.spawn(move || -> Result<u64, CodecError> {
                let mut writer = FrameWriter::new(writer);
                let mut failures = 0;
                for response in rx {
                    if response.is_failure() {
                        failures += 1;
                    }
                    writer.write_message(&response.into())?;
                }
                Ok(failures)
            });

            for _ in 0..workers {
                let tx = tx.clone();
                let job_rx = &job_rx;
                scope.spawn(move || {
                    loop {
                        // The lock is released at the end of this statement,
                        // before the request is dispatched.
                        let job = job_rx.lock().unwrap_or_else(PoisonError::into_inner).recv();
                        let Ok(request) = job else {
                            break;
                        };
                        let response = dispatch(registry, resources, &request);
                        if tx.send(response).is_err() {
                            warn!("dropping response {}: writer has stopped", request.id);
                        }
                    }
                });
            }
            // Workers hold their own senders; the writer drains until the
            // last of them finishes.
            drop(tx);

            let read_result = loop {
                transition(state, ProviderState::AwaitingFrame);
                match next_request(&mut reader, &mut summary) {
                    Ok(Some(request)) => {
                        transition(state, ProviderState::Dispatching);
                        summary.requests += 1;
                        if job_tx.send(request).is_err() {
                            break Err(CodecError::Io(io::Error::other(
                                "dispatch workers stopped",
                            )));
                        }
                        transition(state, ProviderState::Idle);
                    }
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                }
            };

            drop(job_tx);
            transition(state, ProviderState::Responding);
            let written = writer_thread
                .join()
                .unwrap_or_else(|payload| Err(io::Error::other(panic_message(&*payload)).into()));

            read_result?;
            summary.failures = written?;
            Ok(summary)
        })
    }
}

fn transition(state: &mut ProviderState, next: ProviderState) {
    trace!("provider state {:?} -> {:?}", *state, next);
    *state = next;
}

/// Read the next request, folding the end-of-stream cases into `summary`.
fn next_request<R: Read>(
    reader: &mut FrameReader<R>,
    summary: &mut SessionSummary,
) -> Result<Option<Request>, CodecError> {
    match reader.read_request() {
        Ok(Some(request)) => {
            trace!("request {} received", request.id);
            Ok(Some(request))
        }
        Ok(None) => {
            debug!("stream ended between frames");
            summary.closed_by = CloseReason::EndOfStream;
            Ok(None)
        }
        Err(CodecError::Truncated { buffered }) => {
            warn!("stream ended inside a frame ({buffered} bytes buffered); nothing to answer");
            summary.closed_by = CloseReason::Truncated { buffered };
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn dispatch(registry: &ToolRegistry, resources: &ResourceRegistry, request: &Request) -> Response {
    let id = request.id;
    match &request.body {
        RequestBody::ListTools => {
            debug!("request {id}: list_tools");
            Response::tools(id, registry.defs())
        }
        RequestBody::CallTool {
            tool_name,
            arguments,
        } => invoke(registry, id, tool_name, arguments),
        RequestBody::ListResources => {
            debug!("request {id}: list_resources");
            match resources.list() {
                Ok(defs) => Response::resources(id, defs),
                Err(err) => Response::failure(id, err),
            }
        }
        RequestBody::ReadResource { uri } => {
            debug!("request {id}: read_resource {uri}");
            match resources.read(uri) {
                Ok(contents) => Response::contents(id, contents),
                Err(err) => {
                    warn!("request {id}: {err}");
                    Response::failure(id, err)
                }
            }
        }
    }
}

fn invoke(registry: &ToolRegistry, id: RequestId, name: &str, arguments: &Arguments) -> Response {
    let Some((def, tool)) = registry.lookup(name) else {
        warn!("request {id}: unknown tool {name:?}");
        return Response::failure(id, RemoteError::unknown_tool(name));
    };

    if let Err(violations) = schema::validate(def, arguments) {
        let err = RemoteError::invalid_arguments(name, violations);
        warn!("request {id}: {err}");
        return Response::failure(id, err);
    }

    debug!("request {id}: calling {name}");
    let args = ToolArgs::new(arguments.clone());
    match panic::catch_unwind(AssertUnwindSafe(|| tool.call(&args))) {
        Ok(Ok(value)) => Response::result(id, value),
        Ok(Err(e)) => {
            warn!("request {id}: {name} failed: {e:#}");
            Response::failure(id, RemoteError::execution(name, format!("{e:#}")))
        }
        Err(payload) => {
            let message = panic_message(&*payload);
            error!("request {id}: {name} panicked: {message}");
            Response::failure(
                id,
                RemoteError::execution(name, format!("tool panicked: {message}")),
            )
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        codec::encode,
        error::{RemoteErrorKind, ViolationReason},
        message::{Message, Outcome, Payload},
        resources::{STATUS_URI, builtin_resources},
        test_tools::{self, args},
    };

    fn frames(requests: &[Request]) -> Vec<u8> {
        requests
            .iter()
            .flat_map(|r| encode(&Message::Request(r.clone())).unwrap())
            .collect()
    }

    fn responses(out: &[u8]) -> Vec<Response> {
        let mut reader = FrameReader::new(out);
        let mut all = Vec::new();
        while let Some(resp) = reader.read_response().unwrap() {
            all.push(resp);
        }
        all
    }

    fn failure(resp: &Response) -> &RemoteError {
        match &resp.outcome {
            Outcome::Failure(err) => err,
            other => panic!("expected failure, got {other:?}"),
        }
    }

    fn pipelined(max_in_flight: usize) -> ProviderEngine {
        ProviderEngine::with_options(
            test_tools::registry(),
            ProviderOptions {
                pipelined: true,
                max_in_flight,
                ..Default::default()
            },
        )
    }

    fn serve(input: Vec<u8>) -> (Result<SessionSummary, CodecError>, Vec<Response>) {
        let mut engine = ProviderEngine::new(test_tools::registry());
        let mut out = Vec::new();
        let result = engine.serve(Cursor::new(input), &mut out);
        assert_eq!(engine.state(), ProviderState::Closed);
        (result, responses(&out))
    }

    #[test]
    fn discovery_lists_tools_in_registration_order() {
        let engine = ProviderEngine::new(test_tools::registry());
        let resp = engine.handle(&Request::list_tools(9));
        assert_eq!(resp.id, 9);
        let Outcome::Success(Payload::Tools(tools)) = resp.outcome else {
            panic!("expected tools");
        };
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, ["say_hello", "fail", "panic", "sleep"]);
        assert_eq!(tools, engine.registry().defs());
    }

    #[test]
    fn invocation_returns_tool_result() {
        let engine = ProviderEngine::new(test_tools::registry());
        let resp = engine.handle(&Request::call_tool(1, "say_hello", args(json!({"name": "Alice"}))));
        assert_eq!(resp, Response::result(1, json!("Hello, Alice!")));
    }

    #[test]
    fn unknown_tool_carries_requested_name() {
        let engine = ProviderEngine::new(test_tools::registry());
        let resp = engine.handle(&Request::call_tool(2, "nonexistent", Arguments::new()));
        let err = failure(&resp);
        assert_eq!(err.kind, RemoteErrorKind::UnknownTool);
        assert_eq!(err.tool_name.as_deref(), Some("nonexistent"));
        assert!(err.detail.contains("nonexistent"));
    }

    #[test]
    fn missing_and_mistyped_arguments() {
        let engine = ProviderEngine::new(test_tools::registry());

        let resp = engine.handle(&Request::call_tool(3, "say_hello", Arguments::new()));
        let err = failure(&resp);
        assert_eq!(err.kind, RemoteErrorKind::InvalidArguments);
        assert_eq!(err.violations[0].field, "name");
        assert_eq!(err.violations[0].reason, ViolationReason::Missing);

        let resp = engine.handle(&Request::call_tool(4, "say_hello", args(json!({"name": 42}))));
        let err = failure(&resp);
        assert_eq!(err.kind, RemoteErrorKind::InvalidArguments);
        assert!(matches!(
            err.violations[0].reason,
            ViolationReason::WrongType { ref found, .. } if found == "integer"
        ));
        assert!(err.detail.contains("'name'"));
    }

    #[test]
    fn failing_and_panicking_tools_keep_the_session_alive() {
        let input = frames(&[
            Request::call_tool(1, "fail", Arguments::new()),
            Request::call_tool(2, "panic", Arguments::new()),
            Request::call_tool(3, "say_hello", args(json!({"name": "Bob"}))),
        ]);
        let (result, out) = serve(input);

        let summary = result.unwrap();
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.failures, 2);
        assert_eq!(summary.closed_by, CloseReason::EndOfStream);

        assert_eq!(out.len(), 3);
        let err = failure(&out[0]);
        assert_eq!(err.kind, RemoteErrorKind::ToolExecutionError);
        assert_eq!(err.detail, "disk on fire");
        let err = failure(&out[1]);
        assert_eq!(err.kind, RemoteErrorKind::ToolExecutionError);
        assert!(err.detail.contains("tool bug"));
        assert_eq!(out[2], Response::result(3, json!("Hello, Bob!")));
    }

    #[test]
    fn responses_echo_request_ids_in_order() {
        let input = frames(&[
            Request::list_tools(40),
            Request::call_tool(7, "nonexistent", Arguments::new()),
            Request::list_tools(12),
        ]);
        let (_, out) = serve(input);
        let ids: Vec<_> = out.iter().map(|r| r.id).collect();
        assert_eq!(ids, [40, 7, 12]);
    }

    #[test]
    fn truncated_frame_closes_without_answer() {
        let mut input = frames(&[Request::list_tools(1)]);
        input.extend_from_slice(br#"{"id":2,"kind":"call_"#);
        let (result, out) = serve(input);
        let summary = result.unwrap();
        assert_eq!(summary.requests, 1);
        assert!(matches!(summary.closed_by, CloseReason::Truncated { buffered } if buffered > 0));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn malformed_frame_closes_the_session() {
        let mut input = frames(&[Request::list_tools(1)]);
        input.extend_from_slice(b"{oops\n");
        input.extend(frames(&[Request::list_tools(3)]));
        let (result, out) = serve(input);
        assert!(matches!(result, Err(CodecError::MalformedMessage(_))));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn unknown_kind_closes_the_session() {
        let (result, out) = serve(b"{\"id\":1,\"kind\":\"subscribe\"}\n".to_vec());
        assert!(matches!(result, Err(CodecError::UnknownMessageKind(_))));
        assert!(out.is_empty());
    }

    #[test]
    fn response_frames_are_rejected() {
        let input = encode(&Response::result(1, Value::Null).into()).unwrap();
        let (result, _) = serve(input);
        assert!(matches!(result, Err(CodecError::UnexpectedMessage { .. })));
    }

    #[test]
    fn empty_stream_is_a_clean_close() {
        let (result, out) = serve(Vec::new());
        assert_eq!(result.unwrap(), SessionSummary::default());
        assert!(out.is_empty());
    }

    #[test]
    fn pipelined_answers_every_request() {
        let input = frames(&[
            Request::call_tool(1, "sleep", args(json!({"ms": 150}))),
            Request::call_tool(2, "say_hello", args(json!({"name": "Eve"}))),
            Request::call_tool(3, "fail", Arguments::new()),
            Request::list_tools(4),
        ]);
        let mut engine = pipelined(DEFAULT_MAX_IN_FLIGHT);
        let mut out = Vec::new();
        let summary = engine.serve(Cursor::new(input), &mut out).unwrap();
        assert_eq!(engine.state(), ProviderState::Closed);
        assert_eq!(summary.requests, 4);
        assert_eq!(summary.failures, 1);

        let mut out = responses(&out);
        // the slow request finishes last
        assert_eq!(out.last().map(|r| r.id), Some(1));
        out.sort_by_key(|r| r.id);
        assert_eq!(out[0], Response::result(1, json!(150)));
        assert_eq!(out[1], Response::result(2, json!("Hello, Eve!")));
        assert_eq!(failure(&out[2]).kind, RemoteErrorKind::ToolExecutionError);
        assert!(matches!(out[3].outcome, Outcome::Success(Payload::Tools(_))));
    }

    #[test]
    fn pipelined_work_is_bounded_by_the_pool() {
        let input = frames(&[
            Request::call_tool(1, "sleep", args(json!({"ms": 100}))),
            Request::call_tool(2, "sleep", args(json!({"ms": 100}))),
            Request::call_tool(3, "sleep", args(json!({"ms": 100}))),
            Request::call_tool(4, "sleep", args(json!({"ms": 100}))),
        ]);
        let started = std::time::Instant::now();
        let summary = pipelined(2)
            .serve(Cursor::new(input), &mut Vec::new())
            .unwrap();
        assert_eq!(summary.requests, 4);
        // two at a time, so at least two rounds of sleeping
        assert!(started.elapsed() >= std::time::Duration::from_millis(200));
    }

    #[test]
    fn single_worker_answers_in_request_order() {
        let input = frames(&[
            Request::call_tool(1, "sleep", args(json!({"ms": 100}))),
            Request::call_tool(2, "say_hello", args(json!({"name": "Eve"}))),
        ]);
        let mut out = Vec::new();
        pipelined(1).serve(Cursor::new(input), &mut out).unwrap();
        let ids: Vec<_> = responses(&out).iter().map(|r| r.id).collect();
        assert_eq!(ids, [1, 2]);
    }

    #[test]
    fn resources_are_listed_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("users.json"), "{\"users\": []}").unwrap();
        let engine = ProviderEngine::new(test_tools::registry())
            .with_resources(builtin_resources(dir.path(), 4));

        let resp = engine.handle(&Request::list_resources(1));
        let Outcome::Success(Payload::Resources(defs)) = resp.outcome else {
            panic!("expected resources");
        };
        assert_eq!(defs.len(), 3);
        assert_eq!(defs[2].uri, "file://users.json");

        let resp = engine.handle(&Request::read_resource(2, "file://users.json"));
        let Outcome::Success(Payload::Contents(contents)) = resp.outcome else {
            panic!("expected contents");
        };
        assert_eq!(contents.text, "{\"users\": []}");

        let resp = engine.handle(&Request::read_resource(3, STATUS_URI));
        assert!(!resp.is_failure());

        let resp = engine.handle(&Request::read_resource(4, "gopher://menu"));
        let err = failure(&resp);
        assert_eq!(err.kind, RemoteErrorKind::UnknownResource);
        assert_eq!(err.uri.as_deref(), Some("gopher://menu"));
    }

    #[test]
    fn resource_failures_keep_the_session_alive() {
        let input = frames(&[
            Request::read_resource(1, "file://missing.txt"),
            Request::list_resources(2),
            Request::list_tools(3),
        ]);
        let (result, out) = serve(input);
        let summary = result.unwrap();
        assert_eq!(summary.requests, 3);
        assert_eq!(summary.failures, 1);
        assert_eq!(failure(&out[0]).kind, RemoteErrorKind::UnknownResource);
        // no resources were configured
        assert_eq!(out[1], Response::resources(2, vec![]));
    }
}
