//! Duplex byte streams for the caller engine.

use std::{
    io::{self, Read, Write},
    process::{Child, Command, Stdio},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};

/// The caller's end of a duplex byte stream.
///
/// Dropping the writer must signal end-of-stream to the provider; that is how
/// a caller ends the session.
pub trait Transport: Send {
    fn take_reader(&mut self) -> io::Result<Box<dyn Read + Send>>;

    fn take_writer(&mut self) -> io::Result<Box<dyn Write + Send>>;

    /// Release whatever the transport holds beyond the two streams.
    /// Called once the writer has been dropped.
    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

fn already_taken(what: &str) -> io::Error {
    io::Error::other(format!("transport {what} already taken"))
}

/// Any reader/writer pair, e.g. the two ends of a pair of pipes.
pub struct StreamTransport<R, W> {
    reader: Option<R>,
    writer: Option<W>,
}

impl<R, W> StreamTransport<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: Some(reader),
            writer: Some(writer),
        }
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    fn take_reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        let reader = self.reader.take().ok_or_else(|| already_taken("reader"))?;
        Ok(Box::new(reader))
    }

    fn take_writer(&mut self) -> io::Result<Box<dyn Write + Send>> {
        let writer = self.writer.take().ok_or_else(|| already_taken("writer"))?;
        Ok(Box::new(writer))
    }
}

/// How long a child provider gets to exit on its own after its stdin closes.
pub const DEFAULT_EXIT_GRACE: Duration = Duration::from_secs(2);

/// A provider running as a child process, spoken to over its stdin/stdout.
/// Its stderr is inherited.
pub struct ChildTransport {
    child: Child,
    exit_grace: Duration,
}

impl ChildTransport {
    pub fn spawn(mut command: Command) -> io::Result<Self> {
        let child = command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()?;
        debug!("spawned provider process {}", child.id());
        Ok(Self {
            child,
            exit_grace: DEFAULT_EXIT_GRACE,
        })
    }

    pub fn with_exit_grace(mut self, grace: Duration) -> Self {
        self.exit_grace = grace;
        self
    }

    pub fn id(&self) -> u32 {
        self.child.id()
    }
}

impl Transport for ChildTransport {
    fn take_reader(&mut self) -> io::Result<Box<dyn Read + Send>> {
        let stdout = self.child.stdout.take().ok_or_else(|| already_taken("reader"))?;
        Ok(Box::new(stdout))
    }

    fn take_writer(&mut self) -> io::Result<Box<dyn Write + Send>> {
        let stdin = self.child.stdin.take().ok_or_else(|| already_taken("writer"))?;
        Ok(Box::new(stdin))
    }

    /// Wait for the provider to exit, killing it once the grace period runs
    /// out.
    fn close(&mut self) -> io::Result<()> {
        // Closes stdin if the writer was never taken.
        drop(self.child.stdin.take());

        let deadline = Instant::now() + self.exit_grace;
        loop {
            if let Some(status) = self.child.try_wait()? {
                debug!("provider process exited: {status}");
                return Ok(());
            }
            if Instant::now() >= deadline {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        warn!(
            "provider process {} still running after {:?}; killing it",
            self.child.id(),
            self.exit_grace
        );
        self.child.kill()?;
        self.child.wait()?;
        Ok(())
    }
}

impl Drop for ChildTransport {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}
