//! Caller side of a session.
//!
//! Requests are queued to a writer thread and answered through a per-request
//! channel. A background reader thread reads response frames and routes each
//! one to the waiter registered under its id, so several threads can have
//! requests in flight on the same session. A call's timeout covers both
//! getting its frame onto the stream and waiting for the answer.

use std::{
    collections::HashMap,
    io::{self, Write},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc::{self, RecvTimeoutError},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    codec::{DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter},
    error::{CallError, CallResult, CodecError},
    message::{Outcome, Payload, Request, RequestBody, RequestId, Response},
    resource::{ResourceContents, ResourceDef},
    transport::Transport,
    types::{Arguments, ToolDef},
};

/// What happens to the session when a call times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPolicy {
    /// Log the timeout and close the session.
    #[default]
    Close,
    /// Forget the request and keep the session usable. A late response is
    /// logged and dropped.
    KeepOpen,
}

#[derive(Debug, Clone)]
pub struct CallerOptions {
    /// Default bound on each call's wait. `None` waits forever.
    pub timeout: Option<Duration>,
    pub on_timeout: TimeoutPolicy,
    pub max_frame_bytes: usize,
}

impl Default for CallerOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            on_timeout: TimeoutPolicy::Close,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared with the reader thread.
#[derive(Default)]
struct Shared {
    /// Waiters by request id. Only touched while holding this lock, together
    /// with `open`, so a waiter is never registered after the reader quit.
    pending: Mutex<HashMap<RequestId, mpsc::Sender<Response>>>,
    open: AtomicBool,
    /// Why the reader thread stopped, if it was not a clean end of stream.
    failure: Mutex<Option<String>>,
}

impl Shared {
    fn shut(&self) {
        let mut pending = lock(&self.pending);
        self.open.store(false, Ordering::SeqCst);
        // Dropping the senders wakes every waiter.
        pending.clear();
    }
}

/// A request for the writer thread, and where to report whether it made it
/// onto the stream.
struct Outgoing {
    request: Request,
    written: mpsc::Sender<Result<(), CodecError>>,
}

pub struct CallerEngine {
    shared: Arc<Shared>,
    /// Dropping this sender stops the writer thread, which then drops the
    /// stream.
    outgoing: Mutex<Option<mpsc::Sender<Outgoing>>>,
    transport: Mutex<Option<Box<dyn Transport>>>,
    threads: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    options: CallerOptions,
}

impl CallerEngine {
    /// Take over a transport and start reading responses from it.
    pub fn connect(transport: impl Transport + 'static, options: CallerOptions) -> io::Result<Self> {
        let mut transport: Box<dyn Transport> = Box::new(transport);
        let reader = FrameReader::with_limit(transport.take_reader()?, options.max_frame_bytes);
        let writer = FrameWriter::new(transport.take_writer()?);

        let shared = Arc::new(Shared {
            open: AtomicBool::new(true),
            ..Default::default()
        });
        let reader_shared = Arc::clone(&shared);
        let read_handle = thread::Builder::new()
            .name("toolwire-reader".into())
            .spawn(move || read_loop(reader, &reader_shared))?;

        let (outgoing, queue) = mpsc::channel();
        let write_handle = thread::Builder::new()
            .name("toolwire-writer".into())
            .spawn(move || write_loop(writer, queue))?;

        debug!("caller connected");
        Ok(Self {
            shared,
            outgoing: Mutex::new(Some(outgoing)),
            transport: Mutex::new(Some(transport)),
            threads: Mutex::new(vec![read_handle, write_handle]),
            next_id: AtomicU64::new(1),
            options,
        })
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    /// Fetch the provider's tool descriptors, in registration order.
    pub fn discover(&self) -> CallResult<Vec<ToolDef>> {
        self.discover_with_timeout(self.options.timeout)
    }

    /// A failure answer to discovery is a [`CallError::ProtocolError`] that
    /// keeps the provider's error.
    pub fn discover_with_timeout(&self, timeout: Option<Duration>) -> CallResult<Vec<ToolDef>> {
        match self.request(RequestBody::ListTools, timeout)?.outcome {
            Outcome::Success(Payload::Tools(tools)) => Ok(tools),
            Outcome::Success(other) => Err(wrong_payload("discovery", &other)),
            Outcome::Failure(err) => Err(CallError::ProtocolError {
                message: format!("discovery failed: {err}"),
                remote: Some(err),
            }),
        }
    }

    /// Invoke a tool by name. A failure response comes back as
    /// [`CallError::Remote`] with the provider's error kind intact.
    pub fn invoke(&self, tool_name: &str, arguments: Arguments) -> CallResult<Value> {
        self.invoke_with_timeout(tool_name, arguments, self.options.timeout)
    }

    pub fn invoke_with_timeout(
        &self,
        tool_name: &str,
        arguments: Arguments,
        timeout: Option<Duration>,
    ) -> CallResult<Value> {
        let body = RequestBody::CallTool {
            tool_name: tool_name.to_string(),
            arguments,
        };
        match self.request(body, timeout)?.outcome {
            Outcome::Success(Payload::Result(value)) => Ok(value),
            Outcome::Success(other) => Err(wrong_payload(&format!("call to {tool_name}"), &other)),
            Outcome::Failure(err) => Err(CallError::Remote(err)),
        }
    }

    /// The provider's readable resources.
    pub fn list_resources(&self) -> CallResult<Vec<ResourceDef>> {
        match self.request(RequestBody::ListResources, self.options.timeout)?.outcome {
            Outcome::Success(Payload::Resources(resources)) => Ok(resources),
            Outcome::Success(other) => Err(wrong_payload("resource listing", &other)),
            Outcome::Failure(err) => Err(CallError::Remote(err)),
        }
    }

    /// Read one resource. An unknown URI comes back as [`CallError::Remote`]
    /// with kind `unknown_resource`.
    pub fn read_resource(&self, uri: &str) -> CallResult<ResourceContents> {
        let body = RequestBody::ReadResource { uri: uri.to_string() };
        match self.request(body, self.options.timeout)?.outcome {
            Outcome::Success(Payload::Contents(contents)) => Ok(contents),
            Outcome::Success(other) => Err(wrong_payload(&format!("read of {uri}"), &other)),
            Outcome::Failure(err) => Err(CallError::Remote(err)),
        }
    }

    fn request(&self, body: RequestBody, timeout: Option<Duration>) -> CallResult<Response> {
        let deadline = timeout.map(|limit| Instant::now() + limit);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        {
            let mut pending = lock(&self.shared.pending);
            if !self.shared.open.load(Ordering::SeqCst) {
                return Err(self.closed_error());
            }
            pending.insert(id, tx);
        }

        let (written, written_rx) = mpsc::channel();
        let queued = match lock(&self.outgoing).as_ref() {
            Some(outgoing) => outgoing
                .send(Outgoing {
                    request: Request { id, body },
                    written,
                })
                .is_ok(),
            None => false,
        };
        if !queued {
            self.forget(id);
            return Err(CallError::Closed);
        }
        debug!("request {id} queued");

        match wait(&written_rx, deadline) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.forget(id);
                return Err(e.into());
            }
            Err(RecvTimeoutError::Disconnected) => {
                self.forget(id);
                return Err(self.closed_error());
            }
            Err(RecvTimeoutError::Timeout) => return Err(self.timed_out(id, timeout)),
        }

        match wait(&rx, deadline) {
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Disconnected) => Err(self.closed_error()),
            Err(RecvTimeoutError::Timeout) => Err(self.timed_out(id, timeout)),
        }
    }

    fn timed_out(&self, id: RequestId, timeout: Option<Duration>) -> CallError {
        self.forget(id);
        let limit = timeout.unwrap_or_default();
        warn!("request {id}: no response within {limit:?}");
        if self.options.on_timeout == TimeoutPolicy::Close {
            if let Err(e) = self.close() {
                warn!("closing session after timeout: {e}");
            }
        }
        CallError::Timeout(limit)
    }

    fn forget(&self, id: RequestId) {
        lock(&self.shared.pending).remove(&id);
    }

    fn closed_error(&self) -> CallError {
        match lock(&self.shared.failure).as_ref() {
            Some(reason) => CallError::protocol(reason.clone()),
            None => CallError::Closed,
        }
    }

    /// End the session and release the transport. Pending calls fail with
    /// [`CallError::Closed`]. Safe to call more than once; also run on drop.
    ///
    /// Never waits on the stream itself. A writer stuck on a provider that
    /// stopped reading is left behind, and so is a reader on a stream that
    /// never ends.
    pub fn close(&self) -> io::Result<()> {
        self.shared.shut();
        // The writer drains what is queued, then drops the stream: that is
        // the end-of-stream signal to the provider.
        let had_writer = lock(&self.outgoing).take().is_some();

        let transport = lock(&self.transport).take();
        if let Some(mut transport) = transport {
            transport.close()?;
        }

        for handle in lock(&self.threads).drain(..) {
            if handle.is_finished() {
                let _ = handle.join();
            }
        }

        if had_writer {
            info!("caller session closed");
        }
        Ok(())
    }
}

impl Drop for CallerEngine {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!("closing caller session: {e}");
        }
    }
}

/// Block on `rx` until `deadline`, or forever without one.
fn wait<T>(rx: &mpsc::Receiver<T>, deadline: Option<Instant>) -> Result<T, RecvTimeoutError> {
    match deadline {
        Some(deadline) => rx.recv_timeout(deadline.saturating_duration_since(Instant::now())),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    }
}

fn wrong_payload(what: &str, payload: &Payload) -> CallError {
    let got = match payload {
        Payload::Tools(_) => "a tool list",
        Payload::Result(_) => "an invocation result",
        Payload::Resources(_) => "a resource list",
        Payload::Contents(_) => "resource contents",
    };
    CallError::protocol(format!("{what} was answered with {got}"))
}

fn write_loop<W: Write>(mut writer: FrameWriter<W>, queue: mpsc::Receiver<Outgoing>) {
    for Outgoing { request, written } in queue {
        let id = request.id;
        let result = writer.write_message(&request.into());
        match &result {
            Ok(()) => debug!("request {id} sent"),
            Err(e) => warn!("sending request {id} failed: {e}"),
        }
        // The caller may have stopped waiting.
        let _ = written.send(result);
    }
    debug!("writer stopped");
}

fn read_loop<R: io::Read>(mut reader: FrameReader<R>, shared: &Shared) {
    loop {
        match reader.read_response() {
            Ok(Some(response)) => {
                let waiter = lock(&shared.pending).remove(&response.id);
                match waiter {
                    Some(tx) => {
                        debug!("response {} received", response.id);
                        let _ = tx.send(response);
                    }
                    None => warn!("dropping response for unknown request id {}", response.id),
                }
            }
            Ok(None) => {
                debug!("provider closed the stream");
                break;
            }
            Err(e) => {
                error!("reading responses failed: {e}");
                *lock(&shared.failure) = Some(e.to_string());
                break;
            }
        }
    }
    shared.shut();
}

#[cfg(all(test, unix))]
mod tests {
    use std::{
        io::{BufRead, BufReader},
        os::unix::net::UnixStream,
        thread,
        time::Instant,
    };

    use serde_json::json;

    use super::*;
    use crate::{
        error::{RemoteError, RemoteErrorKind},
        provider::{ProviderEngine, ProviderOptions, SessionSummary},
        resources::{STATUS_URI, builtin_resources},
        test_tools::{self, args},
        transport::StreamTransport,
    };

    /// Provider-side ends of a duplex link.
    struct ProviderEnd {
        reader: UnixStream,
        writer: UnixStream,
    }

    /// Two one-way links, so dropping one side's writer is seen as EOF by
    /// the other side's reader.
    fn link() -> (StreamTransport<UnixStream, UnixStream>, ProviderEnd) {
        let (caller_out, provider_in) = UnixStream::pair().unwrap();
        let (provider_out, caller_in) = UnixStream::pair().unwrap();
        (
            StreamTransport::new(caller_in, caller_out),
            ProviderEnd {
                reader: provider_in,
                writer: provider_out,
            },
        )
    }

    fn start(options: ProviderOptions) -> (
        StreamTransport<UnixStream, UnixStream>,
        thread::JoinHandle<SessionSummary>,
    ) {
        start_engine(ProviderEngine::with_options(test_tools::registry(), options))
    }

    fn start_engine(
        mut engine: ProviderEngine,
    ) -> (
        StreamTransport<UnixStream, UnixStream>,
        thread::JoinHandle<SessionSummary>,
    ) {
        let (transport, end) = link();
        let provider = thread::spawn(move || engine.serve(end.reader, end.writer).unwrap());
        (transport, provider)
    }

    fn connect(options: CallerOptions) -> (CallerEngine, thread::JoinHandle<SessionSummary>) {
        let (transport, provider) = start(ProviderOptions::default());
        (CallerEngine::connect(transport, options).unwrap(), provider)
    }

    #[test]
    fn discover_and_invoke() {
        let (caller, provider) = connect(CallerOptions::default());

        let tools = caller.discover().unwrap();
        assert_eq!(tools, test_tools::registry().defs());
        // discovery is idempotent
        assert_eq!(caller.discover().unwrap(), tools);

        let out = caller.invoke("say_hello", args(json!({"name": "Alice"}))).unwrap();
        assert_eq!(out, json!("Hello, Alice!"));

        caller.close().unwrap();
        let summary = provider.join().unwrap();
        assert_eq!(summary.requests, 3);
    }

    #[test]
    fn remote_errors_keep_their_kind() {
        let (caller, _provider) = connect(CallerOptions::default());

        let err = caller.invoke("nonexistent", Arguments::new()).unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::UnknownTool));
        let CallError::Remote(remote) = err else { unreachable!() };
        assert_eq!(remote.tool_name.as_deref(), Some("nonexistent"));

        let err = caller.invoke("say_hello", Arguments::new()).unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::InvalidArguments));

        let err = caller.invoke("fail", Arguments::new()).unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::ToolExecutionError));

        // still usable after every kind of failure
        assert!(caller.is_open());
        assert_eq!(
            caller.invoke("say_hello", args(json!({"name": "Ann"}))).unwrap(),
            json!("Hello, Ann!")
        );
    }

    #[test]
    fn concurrent_calls_are_matched_by_id() {
        let (transport, _provider) = start(ProviderOptions {
            pipelined: true,
            ..Default::default()
        });
        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();

        let started = Instant::now();
        thread::scope(|s| {
            let slow = s.spawn(|| caller.invoke("sleep", args(json!({"ms": 300}))));
            let fast = s.spawn(|| {
                // let the slow request go out first
                thread::sleep(Duration::from_millis(50));
                let out = caller.invoke("say_hello", args(json!({"name": "Fast"})));
                (out, started.elapsed())
            });

            let (fast_out, fast_elapsed) = fast.join().unwrap();
            assert_eq!(fast_out.unwrap(), json!("Hello, Fast!"));
            assert!(fast_elapsed < Duration::from_millis(300));
            assert_eq!(slow.join().unwrap().unwrap(), json!(300));
        });
    }

    #[test]
    fn timeout_closes_the_session_by_default() {
        let (caller, provider) = connect(CallerOptions::default());

        let err = caller
            .invoke_with_timeout(
                "sleep",
                args(json!({"ms": 300})),
                Some(Duration::from_millis(30)),
            )
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout(_)));
        assert!(!caller.is_open());
        assert!(matches!(caller.discover(), Err(CallError::Closed)));

        // the provider finishes the slow call, then sees end of stream
        assert_eq!(provider.join().unwrap().requests, 1);
    }

    #[test]
    fn timeout_can_keep_the_session_open() {
        let (caller, _provider) = connect(CallerOptions {
            on_timeout: TimeoutPolicy::KeepOpen,
            ..Default::default()
        });

        let err = caller
            .invoke_with_timeout(
                "sleep",
                args(json!({"ms": 200})),
                Some(Duration::from_millis(20)),
            )
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout(_)));
        assert!(caller.is_open());

        // the late response is dropped; this call gets its own
        let out = caller.invoke("say_hello", args(json!({"name": "Later"}))).unwrap();
        assert_eq!(out, json!("Hello, Later!"));
    }

    #[test]
    fn provider_hangup_fails_pending_calls() {
        let (transport, end) = link();
        let fake = thread::spawn(move || {
            // read one request, then hang up without answering
            let mut line = String::new();
            BufReader::new(&end.reader).read_line(&mut line).unwrap();
            drop(end);
        });

        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();
        let err = caller.discover().unwrap_err();
        assert!(matches!(err, CallError::Closed));
        assert!(matches!(
            caller.invoke("say_hello", Arguments::new()),
            Err(CallError::Closed)
        ));
        fake.join().unwrap();
    }

    #[test]
    fn garbage_from_provider_is_a_protocol_error() {
        let (transport, mut end) = link();
        let fake = thread::spawn(move || {
            let mut line = String::new();
            BufReader::new(&end.reader).read_line(&mut line).unwrap();
            end.writer.write_all(b"this is not a frame\n").unwrap();
            // keep the link up until the caller has seen the garbage
            thread::sleep(Duration::from_millis(100));
        });

        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();
        let err = caller.discover().unwrap_err();
        assert!(matches!(
            err,
            CallError::ProtocolError { ref message, remote: None } if message.contains("malformed")
        ));
        fake.join().unwrap();
    }

    #[test]
    fn unknown_response_ids_are_ignored() {
        let (transport, mut end) = link();
        let fake = thread::spawn(move || {
            let mut reader = BufReader::new(&end.reader);
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let id = request["id"].as_u64().unwrap();
            // a stray response first, then the real one
            writeln!(end.writer, r#"{{"id":{},"outcome":"success","result":"stray"}}"#, id + 100)
                .unwrap();
            writeln!(end.writer, r#"{{"id":{id},"outcome":"success","result":"mine"}}"#).unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();
        assert_eq!(caller.invoke("anything", Arguments::new()).unwrap(), json!("mine"));
        fake.join().unwrap();
    }

    #[test]
    fn close_is_idempotent_and_drop_releases_the_session() {
        let (caller, provider) = connect(CallerOptions::default());
        caller.close().unwrap();
        caller.close().unwrap();
        assert!(matches!(caller.discover(), Err(CallError::Closed)));
        drop(caller);
        assert_eq!(provider.join().unwrap().requests, 0);

        let (caller, provider) = connect(CallerOptions::default());
        assert!(caller.invoke("nonexistent", Arguments::new()).is_err());
        drop(caller);
        assert_eq!(provider.join().unwrap().failures, 1);
    }

    #[test]
    fn timeout_covers_a_write_the_provider_never_reads() {
        // the provider end is kept open but never read, so the socket
        // buffer fills up long before this frame is written
        let (transport, end) = link();
        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();

        let (done_tx, done_rx) = mpsc::channel();
        let started = Instant::now();
        thread::scope(|s| {
            s.spawn(|| {
                let name = "x".repeat(4 * 1024 * 1024);
                let out = caller.invoke_with_timeout(
                    "say_hello",
                    args(json!({ "name": name })),
                    Some(Duration::from_millis(100)),
                );
                let _ = done_tx.send(out);
            });

            let out = done_rx
                .recv_timeout(Duration::from_secs(3))
                .expect("call outlived its timeout");
            assert!(matches!(out, Err(CallError::Timeout(_))));
            assert!(started.elapsed() < Duration::from_secs(2));
            assert!(!caller.is_open());
        });
        // hanging up unblocks the abandoned writer
        drop(end);
    }

    #[test]
    fn failed_discovery_keeps_the_remote_error() {
        let (transport, mut end) = link();
        let fake = thread::spawn(move || {
            let mut line = String::new();
            BufReader::new(&end.reader).read_line(&mut line).unwrap();
            let request: Value = serde_json::from_str(&line).unwrap();
            let failure = Response::failure(
                request["id"].as_u64().unwrap(),
                RemoteError::execution("list_tools", "registry offline"),
            );
            end.writer
                .write_all(&crate::codec::encode(&failure.into()).unwrap())
                .unwrap();
            thread::sleep(Duration::from_millis(100));
        });

        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();
        let err = caller.discover().unwrap_err();
        let CallError::ProtocolError { message, remote: Some(remote) } = err else {
            panic!("expected a protocol error carrying the remote error");
        };
        assert!(message.contains("registry offline"));
        assert_eq!(remote.kind, RemoteErrorKind::ToolExecutionError);
        assert_eq!(remote.detail, "registry offline");
        fake.join().unwrap();
    }

    #[test]
    fn resources_through_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("todo.txt"), "buy milk").unwrap();
        let engine = ProviderEngine::new(test_tools::registry())
            .with_resources(builtin_resources(dir.path(), 4));
        let (transport, _provider) = start_engine(engine);
        let caller = CallerEngine::connect(transport, CallerOptions::default()).unwrap();

        let uris: Vec<String> = caller
            .list_resources()
            .unwrap()
            .into_iter()
            .map(|r| r.uri)
            .collect();
        assert_eq!(uris, ["file://current-directory", STATUS_URI, "file://todo.txt"]);

        assert_eq!(caller.read_resource("file://todo.txt").unwrap().text, "buy milk");
        let status: Value =
            serde_json::from_str(&caller.read_resource(STATUS_URI).unwrap().text).unwrap();
        assert_eq!(status["tools_count"], 4);

        let err = caller.read_resource("file://nope.txt").unwrap_err();
        assert_eq!(err.remote_kind(), Some(RemoteErrorKind::UnknownResource));
        assert!(caller.is_open());
    }
}
