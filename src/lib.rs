pub mod autocreate;
pub mod cache;
pub mod comment;
pub mod commentary;
pub mod config;
pub mod fastcast;
pub mod manifold;
pub mod matching;
pub mod prompt;
pub mod recorder;
pub mod scoreboard;
pub mod stats;

/// Fastcast discovery endpoint (public, no auth required)
pub const FASTCAST_HOST_URL: &str = "https://fastcast.semfs.engsvc.go.com/public/websockethost";

/// Path of the Fastcast pub/sub profile on the socket host
pub const FASTCAST_PROFILE_PATH: &str = "/FastcastService/pubsub/profiles/12000";

/// Manifold REST API base URL (static `Key` auth)
pub const MANIFOLD_API_BASE: &str = "https://api.manifold.markets/v0";

/// College football statistics REST API base URL (`Bearer` auth)
pub const CFB_API_BASE: &str = "https://api.collegefootballdata.com";
