//! Wire types for the Fastcast push channel.
//!
//! Every message is a JSON object discriminated by a one-letter `op` field:
//! - `C` connect: sent bare to start the handshake, answered with a `sid`
//! - `S` session: subscribes the `sid` to a topic channel `tc`
//! - `H` heartbeat: `pl` is a URL serving a full base document
//! - `R` result: `pl` is a JSON string holding an (optionally compressed) patch batch
//! - `I` / `P` info and ping, ignored

use serde::{Deserialize, Serialize};

use crate::FASTCAST_PROFILE_PATH;

/// Socket coordinates returned by the discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSocketHost {
    pub ip: String,
    pub port: u16,
    pub secure_port: u16,
    pub token: String,
}

/// Which of the advertised ports to dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scheme {
    #[default]
    Secure,
    Plain,
}

impl WebSocketHost {
    /// Secure socket URL for the pub/sub profile on this host.
    pub fn socket_url(&self) -> String {
        self.socket_url_for(Scheme::Secure)
    }

    pub fn socket_url_for(&self, scheme: Scheme) -> String {
        let (scheme, port) = match scheme {
            Scheme::Secure => ("wss", self.secure_port),
            Scheme::Plain => ("ws", self.port),
        };
        format!(
            "{scheme}://{}:{port}{}?TrafficManager-Token={}",
            self.ip, FASTCAST_PROFILE_PATH, self.token
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Frame {
    #[serde(rename = "C")]
    Connect(ConnectFrame),
    #[serde(rename = "H")]
    Heartbeat(HeartbeatFrame),
    #[serde(rename = "I")]
    Info {},
    #[serde(rename = "P")]
    Ping {},
    #[serde(rename = "R")]
    Result(ResultFrame),
    #[serde(rename = "S")]
    Session(SessionFrame),
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    /// Response code, 200 on acceptance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<u16>,
    /// Heartbeat interval advertised by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hbi: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    /// URL of the full base document.
    pub pl: String,
    pub tc: String,
    pub mid: u64,
    #[serde(default, rename = "useCDN")]
    pub use_cdn: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFrame {
    /// JSON text of a [`ResultPayload`](super::patch::ResultPayload).
    pub pl: String,
    pub mid: u64,
    pub tc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionFrame {
    pub sid: String,
    pub tc: String,
}

impl Frame {
    /// Bare connect request that starts the handshake.
    pub fn connect_request() -> Self {
        Frame::Connect(ConnectFrame::default())
    }

    /// Subscription request binding `sid` to the `gp-<topic>-<game>` channel.
    pub fn session_request(sid: &str, topic: &str, game: &str) -> Self {
        Frame::Session(SessionFrame {
            sid: sid.to_string(),
            tc: topic_channel(topic, game),
        })
    }

    /// One-letter op code, for logging and frame summaries.
    pub fn op(&self) -> &'static str {
        match self {
            Frame::Connect(_) => "C",
            Frame::Heartbeat(_) => "H",
            Frame::Info {} => "I",
            Frame::Ping {} => "P",
            Frame::Result(_) => "R",
            Frame::Session(_) => "S",
            Frame::Unknown => "?",
        }
    }
}

pub fn topic_channel(topic: &str, game: &str) -> String {
    format!("gp-{topic}-{game}")
}
