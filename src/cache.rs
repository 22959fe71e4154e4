use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use reqwest::header::ETAG;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};
use url::Url;

/// On-disk JSON cache. Each entry lives in `<root>/<sha256(key)>.json`
/// wrapped as `{ "ts": <unix ms>, "data": ... }`.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    root: PathBuf,
}

impl ResponseCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// A cache rooted at a subdirectory of this one.
    pub fn namespace(&self, name: &str) -> Self {
        Self {
            root: self.root.join(name),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Look up `key`. Missing entries and unreadable payloads both yield `None`.
    pub async fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if key.is_empty() {
            warn!("cache load skipped: empty key");
            return None;
        }

        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            warn!("could not create cache directory {}: {e}", self.root.display());
        }

        let path = self.entry_path(key);
        let contents = tokio::fs::read_to_string(&path).await.ok()?;
        debug!("cache read {}", path.display());

        let parsed: Value = match serde_json::from_str(&contents) {
            Ok(v) => v,
            Err(e) => {
                warn!("corrupt cache entry {}: {e}", path.display());
                return None;
            }
        };
        let data = unwrap_entry(parsed);
        match serde_json::from_value(data) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("cache entry {} has unexpected shape: {e}", path.display());
                None
            }
        }
    }

    /// Store `data` under `key`. Failures are logged, never returned.
    pub async fn save<T: Serialize>(&self, key: &str, data: &T) {
        if key.is_empty() {
            warn!("cache save skipped: empty key");
            return;
        }

        let entry = json!({
            "ts": chrono::Utc::now().timestamp_millis(),
            "data": data,
        });
        let path = self.entry_path(key);
        if let Err(e) = tokio::fs::create_dir_all(&self.root).await {
            warn!("could not create cache directory {}: {e}", self.root.display());
            return;
        }
        match tokio::fs::write(&path, entry.to_string()).await {
            Ok(()) => debug!("cache write {}", path.display()),
            Err(e) => warn!("could not write cache entry {}: {e}", path.display()),
        }
    }

    /// GET `url` as JSON through the cache.
    ///
    /// A HEAD request supplies the current etag; an entry stored under
    /// `<url>-<etag>` is served without a GET. Responses without an etag are
    /// never cached. A 404 yields `None`.
    pub async fn fetch_json<T>(
        &self,
        url: &Url,
        request: impl Fn(Method, &Url) -> RequestBuilder,
    ) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let head = request(Method::HEAD, url)
            .send()
            .await
            .with_context(|| format!("HEAD {url} failed"))?;
        if let Some(etag) = etag_of(&head) {
            if let Some(hit) = self.load(&format!("{url}-{etag}")).await {
                return Ok(Some(hit));
            }
        }

        let resp = request(Method::GET, url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;
        if resp.status() == StatusCode::NOT_FOUND {
            debug!("GET {url}: not found");
            return Ok(None);
        }
        let resp = resp
            .error_for_status()
            .with_context(|| format!("GET {url} returned an error"))?;
        let etag = etag_of(&resp);
        let data: T = resp
            .json()
            .await
            .with_context(|| format!("GET {url}: unexpected response body"))?;

        if let Some(etag) = etag {
            self.save(&format!("{url}-{etag}"), &data).await;
        }
        Ok(Some(data))
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.json", hash_key(key)))
    }
}

fn hash_key(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}

fn etag_of(resp: &Response) -> Option<String> {
    resp.headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Entries written by older versions hold the bare payload.
fn unwrap_entry(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("ts") && map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

/// Local HTTP responder for client tests.
#[cfg(test)]
pub(crate) mod test_server {
    use std::sync::{Arc, Mutex};

    use axum::Router;
    use axum::body::Bytes;
    use axum::extract::{OriginalUri, State};
    use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
    use axum::response::{IntoResponse, Response};
    use tokio::net::TcpListener;

    pub struct Reply {
        pub status: u16,
        pub etag: Option<&'static str>,
        pub body: String,
    }

    impl Reply {
        pub fn ok(etag: Option<&'static str>, body: impl Into<String>) -> Self {
            Self {
                status: 200,
                etag,
                body: body.into(),
            }
        }

        pub fn not_found() -> Self {
            Self {
                status: 404,
                etag: None,
                body: String::new(),
            }
        }
    }

    pub type RequestLog = Arc<Mutex<Vec<String>>>;

    type Handler = Arc<dyn Fn(&str, &str) -> Reply + Send + Sync>;

    #[derive(Clone)]
    struct Responder {
        handler: Handler,
        log: RequestLog,
    }

    async fn respond(
        State(responder): State<Responder>,
        method: Method,
        OriginalUri(uri): OriginalUri,
        headers: HeaderMap,
        body: Bytes,
    ) -> Response {
        let target = uri.path_and_query().map_or("/", |pq| pq.as_str());
        let auth = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let mut line = format!("{method} {target} {auth}");
        if !body.is_empty() {
            line.push(' ');
            line.push_str(&String::from_utf8_lossy(&body));
        }
        responder.log.lock().unwrap().push(line);

        let reply = (responder.handler)(method.as_str(), target);
        let status = StatusCode::from_u16(reply.status).unwrap();
        let mut response = (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            reply.body,
        )
            .into_response();
        if let Some(etag) = reply.etag {
            response
                .headers_mut()
                .insert(header::ETAG, HeaderValue::from_static(etag));
        }
        response
    }

    /// Serve `handler(method, target)` on a local port. Returns the base URL
    /// and a log of `"<METHOD> <target> <authorization>[ <body>]"` lines.
    pub async fn spawn<F>(handler: F) -> (String, RequestLog)
    where
        F: Fn(&str, &str) -> Reply + Send + Sync + 'static,
    {
        let log = RequestLog::default();
        let app = Router::new().fallback(respond).with_state(Responder {
            handler: Arc::new(handler),
            log: log.clone(),
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        (base, log)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::test_server::{Reply, spawn};

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path()).namespace("games");
        cache.save("https://x/games?week=1-\"etag\"", &vec![1, 2, 3]).await;

        let loaded: Option<Vec<i32>> = cache.load("https://x/games?week=1-\"etag\"").await;
        assert_eq!(loaded, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn different_key_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        cache.save("a", &json!({"x": 1})).await;

        let loaded: Option<Value> = cache.load("b").await;
        assert!(loaded.is_none());
    }

    #[tokio::test]
    async fn empty_key_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        cache.save("", &json!(1)).await;

        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert!(cache.load::<Value>("").await.is_none());
    }

    #[tokio::test]
    async fn entry_is_wrapped_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        cache.save("k", &json!({"name": "Ohio State"})).await;

        let raw = std::fs::read_to_string(dir.path().join(format!("{}.json", hash_key("k")))).unwrap();
        let value: Value = serde_json::from_str(&raw).unwrap();
        assert!(value["ts"].as_i64().unwrap() > 0);
        assert_eq!(value["data"]["name"], "Ohio State");
    }

    #[tokio::test]
    async fn bare_legacy_entry_is_returned_as_is() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        std::fs::write(
            dir.path().join(format!("{}.json", hash_key("legacy"))),
            r#"[{"id": 7}]"#,
        )
        .unwrap();

        let loaded: Option<Value> = cache.load("legacy").await;
        assert_eq!(loaded, Some(json!([{"id": 7}])));
    }

    #[tokio::test]
    async fn corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        std::fs::write(dir.path().join(format!("{}.json", hash_key("bad"))), "{not json").unwrap();

        assert!(cache.load::<Value>("bad").await.is_none());
    }

    // ── fetch_json ─────────────────────────────────────────────────

    fn get_count(log: &std::sync::Mutex<Vec<String>>) -> usize {
        log.lock().unwrap().iter().filter(|l| l.starts_with("GET")).count()
    }

    #[tokio::test]
    async fn fetch_json_serves_second_call_from_cache() {
        let (base, log) = spawn(|_, _| Reply::ok(Some("\"v1\""), r#"[{"id": 1}]"#)).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/games?week=3")).unwrap();
        let request = |m: Method, u: &Url| client.request(m, u.clone());

        let first: Option<Value> = cache.fetch_json(&url, request).await.unwrap();
        let second: Option<Value> = cache.fetch_json(&url, request).await.unwrap();

        assert_eq!(first, Some(json!([{"id": 1}])));
        assert_eq!(second, first);
        assert_eq!(get_count(&log), 1);
    }

    #[tokio::test]
    async fn fetch_json_without_etag_is_not_cached() {
        let (base, log) = spawn(|_, _| Reply::ok(None, "{}")).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/teams")).unwrap();
        let request = |m: Method, u: &Url| client.request(m, u.clone());

        let _: Option<Value> = cache.fetch_json(&url, request).await.unwrap();
        let _: Option<Value> = cache.fetch_json(&url, request).await.unwrap();
        assert_eq!(get_count(&log), 2);
    }

    #[tokio::test]
    async fn fetch_json_not_found_is_none() {
        let (base, _log) = spawn(|_, _| Reply::not_found()).await;
        let dir = tempfile::tempdir().unwrap();
        let cache = ResponseCache::new(dir.path());
        let client = reqwest::Client::new();
        let url = Url::parse(&format!("{base}/market/nope")).unwrap();

        let found: Option<Value> = cache
            .fetch_json(&url, |m, u| client.request(m, u.clone()))
            .await
            .unwrap();
        assert!(found.is_none());
    }
}
