use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::time::{sleep, Instant, Sleep};

use crate::config::ConnectionLimits;

// ─── Per-connection request state ────────────────────────────────

/// Shared between a connection's service (which opens a `RequestGuard` per
/// request) and its `TimeoutStream` (which picks a read deadline from it).
/// Both live on the same connection task.
#[derive(Debug, Default)]
pub struct ConnState {
    in_flight: AtomicUsize,
    started: AtomicU64,
}

impl ConnState {
    /// Marks a request as dispatched until the returned guard drops.
    pub fn begin_request(self: &Arc<Self>) -> RequestGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.started.fetch_add(1, Ordering::Relaxed);
        RequestGuard(Arc::clone(self))
    }

    fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Relaxed)
    }

    fn started(&self) -> u64 {
        self.started.load(Ordering::Relaxed)
    }
}

/// Held for as long as a handler is producing a response.
pub struct RequestGuard(Arc<ConnState>);

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

// ─── Deadline ────────────────────────────────────────────────────

struct Deadline {
    sleep: Pin<Box<Sleep>>,
    timeout: Duration,
    armed: bool,
}

impl Deadline {
    fn new() -> Self {
        Self {
            sleep: Box::pin(sleep(Duration::ZERO)),
            timeout: Duration::ZERO,
            armed: false,
        }
    }

    fn arm(&mut self, timeout: Duration) {
        self.sleep.as_mut().reset(Instant::now() + timeout);
        self.timeout = timeout;
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }

    /// Registers the timer with `cx`; errors once it has fired.
    fn poll_expired(&mut self, cx: &mut Context<'_>, what: &str) -> io::Result<()> {
        if !self.armed {
            return Ok(());
        }
        match self.sleep.as_mut().poll(cx) {
            Poll::Ready(()) => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{what} exceeded {:?}", self.timeout),
            )),
            Poll::Pending => Ok(()),
        }
    }
}

// ─── TimeoutStream ───────────────────────────────────────────────

/// What the connection is waiting on when hyper reads from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadPhase {
    /// Between requests: bounded by `idle`.
    Idle,
    /// First byte of a request head seen: bounded by `read` from that byte.
    Head,
    /// A handler is running: no read deadline.
    Busy,
}

/// Wraps a connection and enforces `ConnectionLimits`:
///
/// - `idle` while waiting for the next request,
/// - `read` from the first byte of a request head until it is dispatched,
/// - `write` for any write that makes no progress.
///
/// Expiry surfaces as an `io::ErrorKind::TimedOut` error and hyper drops the
/// connection. A running handler is never subject to a read deadline.
pub struct TimeoutStream<T> {
    inner: T,
    limits: ConnectionLimits,
    state: Arc<ConnState>,
    /// Value of `state.started` when the current head began arriving.
    head_of: Option<u64>,
    read: Deadline,
    read_for: Option<ReadPhase>,
    write: Deadline,
}

impl<T> TimeoutStream<T> {
    pub fn new(inner: T, limits: ConnectionLimits, state: Arc<ConnState>) -> Self {
        Self {
            inner,
            limits,
            state,
            head_of: None,
            read: Deadline::new(),
            read_for: None,
            write: Deadline::new(),
        }
    }

    fn read_phase(&mut self) -> ReadPhase {
        if self.state.in_flight() > 0 {
            return ReadPhase::Busy;
        }
        if self.head_of.is_some() && self.head_of == Some(self.state.started()) {
            return ReadPhase::Head;
        }
        self.head_of = None;
        ReadPhase::Idle
    }

    fn arm_read(&mut self, phase: ReadPhase, timeout: Duration) {
        if self.read_for != Some(phase) {
            self.read.arm(timeout);
            self.read_for = Some(phase);
        }
    }

    fn disarm_read(&mut self) {
        self.read.disarm();
        self.read_for = None;
    }
}

impl<T: AsyncRead + Unpin> AsyncRead for TimeoutStream<T> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let phase = this.read_phase();
        let before = buf.filled().len();

        match Pin::new(&mut this.inner).poll_read(cx, buf) {
            Poll::Ready(Ok(())) => {
                if phase == ReadPhase::Idle && buf.filled().len() > before {
                    this.head_of = Some(this.state.started());
                    this.arm_read(ReadPhase::Head, this.limits.read);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => {
                match phase {
                    ReadPhase::Busy => this.disarm_read(),
                    ReadPhase::Idle => {
                        this.arm_read(ReadPhase::Idle, this.limits.idle);
                        this.read.poll_expired(cx, "idle connection")?;
                    }
                    ReadPhase::Head => {
                        this.read.poll_expired(cx, "request head")?;
                    }
                }
                Poll::Pending
            }
        }
    }
}

impl<T: AsyncWrite + Unpin> AsyncWrite for TimeoutStream<T> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(res) => {
                this.write.disarm();
                Poll::Ready(res)
            }
            Poll::Pending => {
                if !this.write.armed {
                    this.write.arm(this.limits.write);
                }
                this.write.poll_expired(cx, "write")?;
                Poll::Pending
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_flush(cx) {
            Poll::Ready(res) => {
                this.write.disarm();
                Poll::Ready(res)
            }
            Poll::Pending => {
                if !this.write.armed {
                    this.write.arm(this.limits.write);
                }
                this.write.poll_expired(cx, "flush")?;
                Poll::Pending
            }
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn limits() -> ConnectionLimits {
        ConnectionLimits {
            read: Duration::from_secs(10),
            write: Duration::from_secs(10),
            idle: Duration::from_secs(60),
        }
    }

    fn wrap(io: DuplexStream) -> (TimeoutStream<DuplexStream>, Arc<ConnState>) {
        let state = Arc::new(ConnState::default());
        (TimeoutStream::new(io, limits(), state.clone()), state)
    }

    #[tokio::test(start_paused = true)]
    async fn silent_peer_trips_idle_timeout() {
        let (client, _peer) = duplex(64);
        let (mut stream, _state) = wrap(client);

        let start = Instant::now();
        let mut buf = [0u8; 8];
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn partial_head_trips_read_timeout() {
        let (client, mut peer) = duplex(64);
        let (mut stream, _state) = wrap(client);

        peer.write_all(b"GET /hea").await.unwrap();
        let mut buf = [0u8; 64];
        assert_eq!(stream.read(&mut buf).await.unwrap(), 8);

        let start = Instant::now();
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() < Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn running_request_has_no_read_deadline() {
        let (client, _peer) = duplex(64);
        let (mut stream, state) = wrap(client);

        let guard = state.begin_request();
        let mut buf = [0u8; 8];
        let waited = tokio::time::timeout(Duration::from_secs(300), stream.read(&mut buf)).await;
        assert!(waited.is_err(), "read must stay pending while a request runs");

        // Back to idle once the response is done.
        drop(guard);
        let start = Instant::now();
        let err = stream.read(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn next_request_gets_a_fresh_idle_window() {
        let (client, mut peer) = duplex(64);
        let (mut stream, state) = wrap(client);
        let mut buf = [0u8; 64];

        // One full request cycle.
        peer.write_all(b"GET / HTTP/1.1\r\n\r\n").await.unwrap();
        stream.read(&mut buf).await.unwrap();
        drop(state.begin_request());

        // Quiet for longer than `read` but shorter than `idle`.
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            peer.write_all(b"GET /").await.unwrap();
            tokio::time::sleep(Duration::from_secs(3600)).await;
        });
        assert_eq!(stream.read(&mut buf).await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_writer_trips_write_timeout() {
        // Peer never reads, so the 4-byte pipe fills up.
        let (client, _peer) = duplex(4);
        let (mut stream, _state) = wrap(client);

        let err = stream.write_all(b"more than four bytes").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
