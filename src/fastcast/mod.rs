//! Live game feed over the Fastcast pub/sub websocket.
//!
//! A [`FastcastConnection`] owns one socket for the process run. Each
//! [`FastcastConnection::subscribe`] spawns a small pipeline:
//! - a session task that sends the topic subscription once a `sid` is known
//! - a heartbeat worker that fetches base documents strictly one at a time
//! - a snapshot task that decodes result batches and combines the latest
//!   `sid`, document and batch into [`Snapshot`]s
//!
//! All tasks share one cancellation token, fired by [`FastcastConnection::dispose`].

pub mod coordinator;
pub mod frame;
pub mod patch;
pub mod snapshot;
pub mod transport;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio_tungstenite::connect_async;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::FASTCAST_HOST_URL;

pub use coordinator::{DocumentFetcher, HttpFetcher};
pub use frame::{Frame, HeartbeatFrame, Scheme, WebSocketHost};
pub use patch::{PatchOp, apply_operations, decode_result};
pub use snapshot::{Snapshot, SnapshotBuilder};
pub use transport::Lifecycle;

use transport::{Demultiplexer, FrameBus, SocketTasks};

const LIFECYCLE_CAPACITY: usize = 16;

pub struct FastcastConnection {
    client: reqwest::Client,
    lifecycle: broadcast::Sender<Lifecycle>,
    bus: FrameBus,
    sid: watch::Receiver<Option<String>>,
    demux: Option<Demultiplexer>,
    socket: Option<SocketTasks>,
    cancel: CancellationToken,
    disposed: bool,
}

impl Default for FastcastConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl FastcastConnection {
    pub fn new() -> Self {
        Self::with_client(reqwest::Client::new())
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_CAPACITY);
        let bus = FrameBus::default();
        let (sid_tx, sid) = watch::channel(None);
        Self {
            client,
            lifecycle,
            demux: Some(Demultiplexer::new(bus.clone(), sid_tx)),
            bus,
            sid,
            socket: None,
            cancel: CancellationToken::new(),
            disposed: false,
        }
    }

    /// Observe open/closing/close notifications from this point on.
    pub fn lifecycle(&self) -> broadcast::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    /// All inbound frames received after this call, in order.
    pub fn frames(&self) -> mpsc::UnboundedReceiver<Frame> {
        self.bus.tap()
    }

    /// The session id, replayed to every new receiver once known.
    pub fn session_ids(&self) -> watch::Receiver<Option<String>> {
        self.sid.clone()
    }

    /// Discover the socket host and open the push channel.
    pub async fn connect(&mut self) -> Result<()> {
        self.connect_via(FASTCAST_HOST_URL, Scheme::Secure).await
    }

    pub async fn connect_via(&mut self, discovery_url: &str, scheme: Scheme) -> Result<()> {
        if self.disposed {
            bail!("connection disposed");
        }
        let host = transport::discover(&self.client, discovery_url).await?;
        self.open(&host.socket_url_for(scheme)).await
    }

    /// Open the push channel at `url` and start the handshake.
    pub async fn open(&mut self, url: &str) -> Result<()> {
        let Some(demux) = self.demux.take() else {
            bail!("connection already opened");
        };

        debug!("connecting to {url}");
        let (ws, response) = match connect_async(url).await {
            Ok(connected) => connected,
            Err(e) => {
                self.demux = Some(demux);
                return Err(e).with_context(|| format!("failed to connect to {url}"));
            }
        };
        info!("open (status {})", response.status());
        let _ = self.lifecycle.send(Lifecycle::Open);

        let socket = transport::spawn_socket(
            ws,
            demux,
            self.lifecycle.clone(),
            self.cancel.clone(),
        );
        socket
            .outbound
            .send(Frame::connect_request())
            .context("socket closed before handshake")?;
        self.socket = Some(socket);
        Ok(())
    }

    /// Subscribe to `gp-<topic>-<game>`, fetching heartbeat documents over HTTP.
    pub fn subscribe(&self, game: &str, topic: &str) -> Result<Subscription> {
        self.subscribe_with(game, topic, HttpFetcher::new(self.client.clone()))
    }

    pub fn subscribe_with<F: DocumentFetcher>(
        &self,
        game: &str,
        topic: &str,
        fetcher: F,
    ) -> Result<Subscription> {
        if self.disposed {
            bail!("connection disposed");
        }
        let Some(socket) = &self.socket else {
            bail!("connect before subscribing");
        };

        let frames = self.bus.tap();
        tokio::spawn(coordinator::request_session(
            self.sid.clone(),
            socket.outbound.clone(),
            topic.to_string(),
            game.to_string(),
            self.cancel.clone(),
        ));

        let (hb_tx, hb_rx) = mpsc::unbounded_channel();
        let (doc_tx, doc_rx) = mpsc::unbounded_channel();
        tokio::spawn(coordinator::run_heartbeats(
            fetcher,
            hb_rx,
            doc_tx,
            self.cancel.clone(),
        ));

        let (snap_tx, snap_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_snapshots(
            frames,
            self.sid.clone(),
            doc_rx,
            hb_tx,
            snap_tx,
            self.cancel.clone(),
        ));

        Ok(Subscription { snapshots: snap_rx })
    }

    /// Cancel every derived task and close the socket. Call once.
    pub async fn dispose(&mut self) -> Result<()> {
        if self.disposed {
            bail!("connection already disposed");
        }
        let Some(socket) = self.socket.take() else {
            bail!("connect before disposing");
        };
        self.disposed = true;

        info!("dispose");
        let _ = self.lifecycle.send(Lifecycle::Closing(None));
        self.cancel.cancel();

        if let Err(e) = socket.writer.await {
            warn!("writer task failed: {e}");
        }
        if let Err(e) = socket.reader.await {
            warn!("reader task failed: {e}");
        }
        Ok(())
    }
}

impl Drop for FastcastConnection {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Stream of patched snapshots for one topic.
pub struct Subscription {
    snapshots: mpsc::UnboundedReceiver<Snapshot>,
}

impl Subscription {
    /// Next snapshot, or `None` once the connection is disposed or closed.
    pub async fn next(&mut self) -> Option<Snapshot> {
        self.snapshots.recv().await
    }
}

/// Route frames of one subscription into the snapshot builder.
async fn run_snapshots(
    mut frames: mpsc::UnboundedReceiver<Frame>,
    mut sid: watch::Receiver<Option<String>>,
    mut documents: mpsc::UnboundedReceiver<(u64, Value)>,
    heartbeats: mpsc::UnboundedSender<HeartbeatFrame>,
    snapshots: mpsc::UnboundedSender<Snapshot>,
    cancel: CancellationToken,
) {
    let mut builder = SnapshotBuilder::new();
    let mut sid_open = true;
    let mut documents_open = true;

    let current = sid.borrow_and_update().clone();
    if let Some(current) = current {
        builder.on_session(current);
    }

    loop {
        let emitted = tokio::select! {
            _ = cancel.cancelled() => break,
            frame = frames.recv() => match frame {
                Some(Frame::Heartbeat(hb)) => {
                    if heartbeats.send(hb).is_err() {
                        warn!("heartbeat worker gone, dropping heartbeat");
                    }
                    None
                }
                Some(Frame::Result(result)) => {
                    let ops = decode_result(&result);
                    debug!("ops mid={} {ops:?}", result.mid);
                    builder.on_operations(ops)
                }
                Some(_) => None,
                None => break,
            },
            changed = sid.changed(), if sid_open => match changed {
                Ok(()) => {
                    let current = sid.borrow_and_update().clone();
                    current.and_then(|s| builder.on_session(s))
                }
                Err(_) => {
                    sid_open = false;
                    None
                }
            },
            doc = documents.recv(), if documents_open => match doc {
                Some((mid, doc)) => builder.on_document(mid, doc),
                None => {
                    documents_open = false;
                    None
                }
            },
        };

        if let Some(snapshot) = emitted {
            if snapshots.send(snapshot).is_err() {
                break;
            }
        }
    }
    debug!("snapshot task stopped");
}
