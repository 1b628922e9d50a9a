//! A single tunnel connection to a remote agent and its in-flight request
//! table.
//!
//! `TunnelSession` is the thing the registry maps a hostname to. It owns
//! one physical connection, split into a writer task (the only place that
//! ever writes to the socket) and a reader task (the only place that ever
//! reads from it), and tracks every request dispatched against it until a
//! matching response arrives, the queue TTL expires, or the session
//! closes.
//!
//! State only ever moves forward: `Connected` -> `Ready` -> `Closed`. All
//! three fields that admission decisions depend on — `state`,
//! `pending_queue`, `inflight` — live behind one `std::sync::Mutex` so an
//! admission decision and whatever it mutates happen atomically with
//! respect to `close()`'s own drain. Two mutexes here would have let a
//! request slip into the queue the instant after `close()` checked it was
//! empty.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tunnel_wire::{Frame, RequestFrame, ResponseFrame};
use uuid::Uuid;

/// Invoked exactly once, the first time a session transitions to `Closed`,
/// with the session's identity and hostname. The registry uses it to evict
/// its own entry — but only if that entry still belongs to this session
/// (see [`crate::registry::TunnelRegistry::unregister_if`]).
pub type OnClose = Box<dyn Fn(Uuid, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Ready,
    Closed,
}

struct PendingRequest {
    frame: RequestFrame,
    result_tx: oneshot::Sender<ResponseFrame>,
    queued_at: Instant,
}

struct Inner {
    state: SessionState,
    pending_queue: VecDeque<PendingRequest>,
    inflight: HashMap<String, oneshot::Sender<ResponseFrame>>,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: SessionState::Connected,
            pending_queue: VecDeque::new(),
            inflight: HashMap::new(),
        }
    }
}

pub struct TunnelSession {
    id: Uuid,
    hostname: String,
    user: String,
    inner: Mutex<Inner>,
    writer_tx: mpsc::UnboundedSender<RequestFrame>,
    cancel: CancellationToken,
    closed: AtomicBool,
    max_pending_queue: usize,
    pending_queue_ttl: Duration,
    on_close: OnClose,
}

impl TunnelSession {
    /// Builds a session and spawns its writer task over `writer`. The
    /// caller is responsible for spawning [`Self::run_reader`] separately
    /// once the handshake has consumed the agent's `Ready` frame — the two
    /// halves of the connection are owned independently, matching the
    /// single-writer/single-reader split the protocol requires.
    pub fn spawn<W>(
        hostname: String,
        user: String,
        max_pending_queue: usize,
        pending_queue_ttl: Duration,
        writer: W,
        on_close: OnClose,
    ) -> Arc<Self>
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            hostname,
            user,
            inner: Mutex::new(Inner::new()),
            writer_tx,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            max_pending_queue,
            pending_queue_ttl,
            on_close,
        });

        tokio::spawn(Arc::clone(&session).run_writer(writer, writer_rx));
        session
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The identity the handshake's `TokenValidator` returned for this
    /// session's bearer token (`"anonymous"` under the permissive default).
    pub fn user(&self) -> &str {
        &self.user
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("session mutex poisoned")
    }

    /// Admits a request. `Ok` hands back a receiver the caller should await
    /// with its own deadline; `Err` is a synthetic response the caller can
    /// return immediately without ever touching the agent connection.
    pub fn dispatch(&self, frame: RequestFrame) -> Result<oneshot::Receiver<ResponseFrame>, ResponseFrame> {
        let id = frame.id.clone();
        let (tx, rx) = oneshot::channel();
        let mut inner = self.lock_inner();

        match inner.state {
            SessionState::Closed => Err(ResponseFrame::synthetic(id, 502, "tunnel closed")),
            SessionState::Ready => {
                inner.inflight.insert(id.clone(), tx);
                drop(inner);
                if self.writer_tx.send(frame).is_err() {
                    let mut inner = self.lock_inner();
                    inner.inflight.remove(&id);
                    return Err(ResponseFrame::synthetic(id, 502, "tunnel writer unavailable"));
                }
                Ok(rx)
            }
            SessionState::Connected => {
                if inner.pending_queue.len() >= self.max_pending_queue {
                    Err(ResponseFrame::synthetic_with_retry_after(
                        id,
                        503,
                        "tunnel not ready",
                        1,
                    ))
                } else {
                    inner.pending_queue.push_back(PendingRequest {
                        frame,
                        result_tx: tx,
                        queued_at: Instant::now(),
                    });
                    Ok(rx)
                }
            }
        }
    }

    /// The agent's `Ready` frame arrived: flush anything queued while
    /// `Connected`, dropping (with a synthetic timeout response) whatever
    /// has already sat past `pending_queue_ttl`.
    pub fn mark_ready(&self) {
        let drained = {
            let mut inner = self.lock_inner();
            if inner.state != SessionState::Connected {
                return;
            }
            inner.state = SessionState::Ready;

            let ttl = self.pending_queue_ttl;
            let now = Instant::now();
            let mut drained = Vec::with_capacity(inner.pending_queue.len());
            while let Some(pending) = inner.pending_queue.pop_front() {
                if now.duration_since(pending.queued_at) > ttl {
                    let _ = pending.result_tx.send(ResponseFrame::synthetic(
                        pending.frame.id.clone(),
                        503,
                        "request timeout in queue",
                    ));
                    continue;
                }
                inner.inflight.insert(pending.frame.id.clone(), pending.result_tx);
                drained.push(pending.frame);
            }
            drained
        };

        for frame in drained {
            let id = frame.id.clone();
            if self.writer_tx.send(frame).is_err() {
                let mut inner = self.lock_inner();
                if let Some(tx) = inner.inflight.remove(&id) {
                    let _ = tx.send(ResponseFrame::synthetic(id, 502, "tunnel writer unavailable"));
                }
                break;
            }
        }
    }

    /// Delivers a `Response` frame read off the agent connection to its
    /// waiter. A response with no matching in-flight entry — already
    /// completed by a timeout, or for an id the relay never issued — is
    /// logged and dropped.
    pub fn complete(&self, response: ResponseFrame) {
        let mut inner = self.lock_inner();
        match inner.inflight.remove(&response.id) {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => {
                tracing::warn!(session = %self.id, id = %response.id, "response for unknown or already-resolved request");
            }
        }
    }

    /// Idempotent. The first caller tears the session down: cancels both
    /// tasks, fails every queued and in-flight waiter with a synthetic
    /// response, and fires `on_close`. Later callers are no-ops.
    pub fn close(&self) {
        if self.closed.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return;
        }
        self.cancel.cancel();

        let mut inner = self.lock_inner();
        inner.state = SessionState::Closed;
        for pending in inner.pending_queue.drain(..) {
            let _ = pending
                .result_tx
                .send(ResponseFrame::synthetic(pending.frame.id.clone(), 503, "tunnel closed"));
        }
        for (id, tx) in inner.inflight.drain() {
            let _ = tx.send(ResponseFrame::synthetic(id, 502, "tunnel closed"));
        }
        drop(inner);

        (self.on_close)(self.id, &self.hostname);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    async fn run_writer<W>(self: Arc<Self>, mut writer: W, mut rx: mpsc::UnboundedReceiver<RequestFrame>)
    where
        W: AsyncWrite + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                maybe_frame = rx.recv() => {
                    let Some(frame) = maybe_frame else { break };
                    if let Err(err) = tunnel_wire::write_frame(&mut writer, &Frame::Request(frame)).await {
                        tracing::warn!(session = %self.id, error = %err, "tunnel writer failed");
                        break;
                    }
                }
            }
        }
        self.close();
    }

    /// Reads `Response` frames off the agent connection until it errors or
    /// the session is cancelled elsewhere, completing waiters as they
    /// arrive. Expected to be spawned once, right after the handshake
    /// consumes the initial `Ready` frame.
    pub async fn run_reader<R>(self: Arc<Self>, mut reader: R)
    where
        R: AsyncRead + Unpin,
    {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tunnel_wire::read_response(&mut reader) => {
                    match result {
                        Ok(response) => self.complete(response),
                        Err(err) => {
                            tracing::warn!(session = %self.id, error = %err, "tunnel reader failed");
                            break;
                        }
                    }
                }
            }
        }
        self.close();
    }
}

#[cfg(test)]
impl TunnelSession {
    /// Builds a session with no background tasks; the caller drives
    /// `writer_rx` by hand to assert on what would have been written
    /// without racing a real writer task.
    fn new_for_test(max_pending_queue: usize, pending_queue_ttl: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<RequestFrame>) {
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            id: Uuid::new_v4(),
            hostname: "test.example.com".into(),
            user: "anonymous".into(),
            inner: Mutex::new(Inner::new()),
            writer_tx,
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
            max_pending_queue,
            pending_queue_ttl,
            on_close: Box::new(|_, _| {}),
        });
        (session, writer_rx)
    }
}
