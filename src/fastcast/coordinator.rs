use std::future::Future;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::frame::{Frame, HeartbeatFrame};

/// Retrieves the base document a heartbeat points at.
pub trait DocumentFetcher: Send + Sync + 'static {
    fn fetch(&self, locator: &str) -> impl Future<Output = Result<Value>> + Send;
}

/// Plain HTTP GET + JSON parse.
#[derive(Debug, Clone, Default)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl DocumentFetcher for HttpFetcher {
    async fn fetch(&self, locator: &str) -> Result<Value> {
        let url = Url::parse(locator).with_context(|| format!("invalid locator {locator}"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            bail!("unsupported locator scheme {}", url.scheme());
        }
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("heartbeat fetch failed")?
            .error_for_status()?;
        resp.json().await.context("heartbeat payload is not JSON")
    }
}

/// Fetch heartbeat documents one at a time, in arrival order.
///
/// The next fetch starts only after the previous fetch and parse completed.
/// Failed heartbeats are logged and skipped; the worker keeps running until
/// `heartbeats` closes, `documents` is dropped, or `cancel` fires.
pub async fn run_heartbeats<F: DocumentFetcher>(
    fetcher: F,
    mut heartbeats: mpsc::UnboundedReceiver<HeartbeatFrame>,
    documents: mpsc::UnboundedSender<(u64, Value)>,
    cancel: CancellationToken,
) {
    loop {
        let hb = tokio::select! {
            _ = cancel.cancelled() => break,
            hb = heartbeats.recv() => match hb {
                Some(hb) => hb,
                None => break,
            },
        };

        debug!("fetching heartbeat mid={} from {}", hb.mid, hb.pl);
        let fetched = tokio::select! {
            _ = cancel.cancelled() => break,
            fetched = fetcher.fetch(&hb.pl) => fetched,
        };

        match fetched {
            Ok(doc) => {
                if documents.send((hb.mid, doc)).is_err() {
                    break;
                }
            }
            Err(e) => warn!("skipping heartbeat mid={} ({}): {e:#}", hb.mid, hb.pl),
        }
    }
    debug!("heartbeat worker stopped");
}

/// Send the topic subscription once, for the first session id observed.
pub async fn request_session(
    mut sid: watch::Receiver<Option<String>>,
    outbound: mpsc::UnboundedSender<Frame>,
    topic: String,
    game: String,
    cancel: CancellationToken,
) {
    let observed = tokio::select! {
        _ = cancel.cancelled() => return,
        observed = sid.wait_for(Option::is_some) => match observed {
            Ok(value) => value.clone(),
            Err(_) => return,
        },
    };
    let Some(sid) = observed else {
        return;
    };

    let frame = Frame::session_request(&sid, &topic, &game);
    info!("subscribing sid={sid} to {}", super::frame::topic_channel(&topic, &game));
    if outbound.send(frame).is_err() {
        warn!("connection closed before subscription for sid={sid}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde_json::json;

    /// Records start/end of each fetch; sleeps to simulate a slow host.
    #[derive(Clone, Default)]
    struct SlowFetcher {
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl DocumentFetcher for SlowFetcher {
        async fn fetch(&self, locator: &str) -> Result<Value> {
            self.calls.lock().unwrap().push(format!("start {locator}"));
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.calls.lock().unwrap().push(format!("end {locator}"));
            if locator.contains("broken") {
                bail!("404");
            }
            Ok(json!({"from": locator}))
        }
    }

    fn heartbeat(mid: u64, pl: &str) -> HeartbeatFrame {
        HeartbeatFrame {
            pl: pl.into(),
            tc: "gp-hockey-nhl-1".into(),
            mid,
            use_cdn: false,
        }
    }

    #[tokio::test]
    async fn heartbeat_fetches_are_serialized() {
        let fetcher = SlowFetcher::default();
        let calls = fetcher.calls.clone();
        let (hb_tx, hb_rx) = mpsc::unbounded_channel();
        let (doc_tx, mut doc_rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_heartbeats(fetcher, hb_rx, doc_tx, CancellationToken::new()));

        hb_tx.send(heartbeat(1, "one")).unwrap();
        hb_tx.send(heartbeat(2, "two")).unwrap();

        assert_eq!(doc_rx.recv().await.unwrap(), (1, json!({"from": "one"})));
        assert_eq!(doc_rx.recv().await.unwrap(), (2, json!({"from": "two"})));
        drop(hb_tx);
        worker.await.unwrap();

        assert_eq!(
            *calls.lock().unwrap(),
            vec!["start one", "end one", "start two", "end two"]
        );
    }

    #[tokio::test]
    async fn failed_heartbeat_is_skipped() {
        let fetcher = SlowFetcher::default();
        let (hb_tx, hb_rx) = mpsc::unbounded_channel();
        let (doc_tx, mut doc_rx) = mpsc::unbounded_channel();
        tokio::spawn(run_heartbeats(fetcher, hb_rx, doc_tx, CancellationToken::new()));

        hb_tx.send(heartbeat(1, "broken")).unwrap();
        hb_tx.send(heartbeat(2, "ok")).unwrap();

        assert_eq!(doc_rx.recv().await.unwrap(), (2, json!({"from": "ok"})));
    }

    #[tokio::test]
    async fn cancelled_worker_stops() {
        let (_hb_tx, hb_rx) = mpsc::unbounded_channel::<HeartbeatFrame>();
        let (doc_tx, _doc_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let worker = tokio::spawn(run_heartbeats(SlowFetcher::default(), hb_rx, doc_tx, cancel.clone()));

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), worker)
            .await
            .expect("worker should stop on cancel")
            .unwrap();
    }

    #[tokio::test]
    async fn http_fetcher_rejects_non_http_locator() {
        let err = HttpFetcher::default().fetch("ftp://example.com/x").await.unwrap_err();
        assert!(err.to_string().contains("unsupported locator scheme"));
    }

    #[tokio::test]
    async fn session_request_sent_once_for_replayed_sid() {
        let (sid_tx, sid_rx) = watch::channel(Some("S1".to_string()));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();

        request_session(
            sid_rx,
            out_tx,
            "football-college-football".into(),
            "401520000".into(),
            CancellationToken::new(),
        )
        .await;
        // later session ids are not re-sent
        sid_tx.send_replace(Some("S2".to_string()));

        assert_eq!(
            out_rx.recv().await.unwrap(),
            Frame::session_request("S1", "football-college-football", "401520000")
        );
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn session_request_waits_for_first_sid() {
        let (sid_tx, sid_rx) = watch::channel(None);
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(request_session(
            sid_rx,
            out_tx,
            "hockey-nhl".into(),
            "42".into(),
            CancellationToken::new(),
        ));

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(out_rx.try_recv().is_err());

        sid_tx.send_replace(Some("late".to_string()));
        task.await.unwrap();
        assert_eq!(
            out_rx.recv().await.unwrap(),
            Frame::session_request("late", "hockey-nhl", "42")
        );
    }
}
