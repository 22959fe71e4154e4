use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use futures_util::{SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::frame::{Frame, WebSocketHost};

/// Connection lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    Closing(Option<String>),
    Closed,
}

/// Fan-out of inbound frames to every live tap, in receipt order.
///
/// Taps are unbounded so a slow consumer never causes frames to be dropped.
#[derive(Debug, Clone, Default)]
pub struct FrameBus {
    taps: Arc<Mutex<Vec<mpsc::UnboundedSender<Frame>>>>,
}

impl FrameBus {
    pub fn tap(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    pub fn publish(&self, frame: &Frame) {
        self.lock().retain(|tap| tap.send(frame.clone()).is_ok());
    }

    /// Drop every tap so their receivers see the end of the stream.
    pub fn close(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::UnboundedSender<Frame>>> {
        self.taps.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Routes classified frames: logs them, records the session id and
/// republishes them on the bus.
#[derive(Debug)]
pub struct Demultiplexer {
    bus: FrameBus,
    sid: watch::Sender<Option<String>>,
}

impl Demultiplexer {
    pub fn new(bus: FrameBus, sid: watch::Sender<Option<String>>) -> Self {
        Self { bus, sid }
    }

    pub fn dispatch(&self, frame: Frame) {
        debug!("message op={} {frame:?}", frame.op());
        if let Frame::Connect(connect) = &frame {
            if let Some(sid) = &connect.sid {
                info!("session established sid={sid}");
                self.sid.send_replace(Some(sid.clone()));
            }
        }
        self.bus.publish(&frame);
    }

    /// Parse one text message; unparseable text is logged and dropped.
    pub fn dispatch_text(&self, text: &str) {
        match serde_json::from_str::<Frame>(text) {
            Ok(frame) => self.dispatch(frame),
            Err(e) => warn!("unparseable frame ({e}): {}", preview(text, 200)),
        }
    }
}

/// Ask the discovery endpoint for socket coordinates.
pub async fn discover(client: &reqwest::Client, discovery_url: &str) -> Result<WebSocketHost> {
    let host: WebSocketHost = client
        .get(discovery_url)
        .send()
        .await
        .with_context(|| format!("discovery request to {discovery_url} failed"))?
        .error_for_status()
        .context("discovery endpoint returned an error")?
        .json()
        .await
        .context("discovery response is not a websocket host")?;
    debug!("discovered fastcast host {}:{}", host.ip, host.secure_port);
    Ok(host)
}

/// Handles of the reader and writer tasks bound to one socket.
pub struct SocketTasks {
    pub outbound: mpsc::UnboundedSender<Frame>,
    pub reader: JoinHandle<()>,
    pub writer: JoinHandle<()>,
}

/// Split `ws` into a reader task feeding `demux` and a writer task draining
/// an outbound frame queue. Both stop when `cancel` fires.
pub fn spawn_socket<S>(
    ws: WebSocketStream<S>,
    demux: Demultiplexer,
    lifecycle: broadcast::Sender<Lifecycle>,
    cancel: CancellationToken,
) -> SocketTasks
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut write, read) = ws.split();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

    let writer_cancel = cancel.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_cancel.cancelled() => break,
                frame = outbound_rx.recv() => {
                    let Some(frame) = frame else { break };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("could not serialize outbound frame {frame:?}: {e}");
                            continue;
                        }
                    };
                    debug!("send {text}");
                    if let Err(e) = write.send(Message::Text(text.into())).await {
                        warn!("send failed: {e}");
                        break;
                    }
                }
            }
        }
        if let Err(e) = write.close().await {
            debug!("close handshake failed: {e}");
        }
    });

    let reader = tokio::spawn(read_frames(read, demux, lifecycle, cancel));

    SocketTasks {
        outbound,
        reader,
        writer,
    }
}

async fn read_frames<R>(
    mut read: R,
    demux: Demultiplexer,
    lifecycle: broadcast::Sender<Lifecycle>,
    cancel: CancellationToken,
) where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
{
    loop {
        let msg = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            msg = read.next() => msg,
        };
        match msg {
            Some(Ok(Message::Text(text))) => demux.dispatch_text(text.as_str()),
            Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                Ok(text) => demux.dispatch_text(text),
                Err(_) => warn!("ignoring {} byte binary message", bytes.len()),
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = frame.map(|f| f.reason.as_str().to_string());
                info!("closing {reason:?}");
                let _ = lifecycle.send(Lifecycle::Closing(reason));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("websocket error: {e}");
                break;
            }
            None => break,
        }
    }
    demux.bus.close();
    info!("close");
    let _ = lifecycle.send(Lifecycle::Closed);
}

fn preview(text: &str, max: usize) -> String {
    if text.len() > max {
        let end = (0..=max).rev().find(|i| text.is_char_boundary(*i)).unwrap_or(0);
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::frame::ConnectFrame;

    fn demux() -> (Demultiplexer, FrameBus, watch::Receiver<Option<String>>) {
        let bus = FrameBus::default();
        let (sid_tx, sid_rx) = watch::channel(None);
        (Demultiplexer::new(bus.clone(), sid_tx), bus, sid_rx)
    }

    #[test]
    fn every_tap_sees_every_frame_in_order() {
        let (demux, bus, _) = demux();
        let mut a = bus.tap();
        let mut b = bus.tap();

        demux.dispatch_text(r#"{"op":"P"}"#);
        demux.dispatch_text(r#"{"op":"I"}"#);

        for tap in [&mut a, &mut b] {
            assert_eq!(tap.try_recv().unwrap().op(), "P");
            assert_eq!(tap.try_recv().unwrap().op(), "I");
        }
    }

    #[test]
    fn dropped_taps_are_pruned() {
        let bus = FrameBus::default();
        let rx = bus.tap();
        drop(rx);
        bus.publish(&Frame::Ping {});
        assert!(bus.lock().is_empty());
    }

    #[test]
    fn session_id_replays_to_late_subscribers() {
        let (demux, _bus, _early) = demux();
        demux.dispatch(Frame::Connect(ConnectFrame {
            sid: Some("S1".into()),
            rc: Some(200),
            hbi: None,
        }));

        let late = demux.sid.subscribe();
        assert_eq!(late.borrow().as_deref(), Some("S1"));
    }

    #[test]
    fn connect_without_sid_keeps_previous() {
        let (demux, _bus, sid) = demux();
        demux.dispatch(Frame::Connect(ConnectFrame {
            sid: Some("S1".into()),
            ..Default::default()
        }));
        demux.dispatch(Frame::connect_request());
        assert_eq!(sid.borrow().as_deref(), Some("S1"));
    }

    #[test]
    fn garbage_text_is_dropped() {
        let (demux, bus, _) = demux();
        let mut tap = bus.tap();
        demux.dispatch_text("not json");
        assert!(tap.try_recv().is_err());
    }

    #[test]
    fn close_ends_taps() {
        let bus = FrameBus::default();
        let mut tap = bus.tap();
        bus.close();
        assert!(matches!(
            tap.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        assert_eq!(preview("héllo", 2), "h...");
        assert_eq!(preview("abc", 10), "abc");
    }
}
