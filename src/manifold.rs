//! Manifold market platform REST client.

use anyhow::{Context, Result, bail};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::debug;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::ApiConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub name: String,
    #[serde(default)]
    pub balance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Market {
    pub id: String,
    pub question: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub creator_id: Option<String>,
    #[serde(default)]
    pub outcome_type: Option<String>,
    #[serde(default)]
    pub probability: Option<f64>,
    #[serde(default)]
    pub close_time: Option<i64>,
    #[serde(default)]
    pub is_resolved: bool,
    /// `YES`, `NO`, `MKT` or `CANCEL` once resolved.
    #[serde(default)]
    pub resolution: Option<String>,
    #[serde(default)]
    pub group_slugs: Vec<String>,
    /// Plain-text rendering of the rich description.
    #[serde(default)]
    pub text_description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeType {
    Binary,
    MultipleChoice,
    PseudoNumeric,
    Poll,
    BountiedQuestion,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    Public,
    Unlisted,
}

/// Body of a market creation request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMarket {
    pub outcome_type: OutcomeType,
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_markdown: Option<String>,
    /// Unix milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// 1 to 99.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initial_prob: Option<u8>,
}

/// Fields of an existing market to overwrite.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description_markdown: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Resolution {
    Yes,
    No,
    Mkt,
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    #[serde(default)]
    pub contract_id: Option<String>,
}

/// `filter` values accepted by market search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchFilter {
    All,
    Open,
    Closed,
    Resolved,
    ClosingThisMonth,
    ClosingNextMonth,
}

impl SearchFilter {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchFilter::All => "all",
            SearchFilter::Open => "open",
            SearchFilter::Closed => "closed",
            SearchFilter::Resolved => "resolved",
            SearchFilter::ClosingThisMonth => "closing-this-month",
            SearchFilter::ClosingNextMonth => "closing-next-month",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MarketSearch<'a> {
    pub terms: Option<&'a str>,
    pub filter: Option<SearchFilter>,
    pub creator_id: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ManifoldClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    cache: ResponseCache,
}

impl ManifoldClient {
    pub fn new(config: &ApiConfig, cache: &ResponseCache) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .with_context(|| format!("invalid manifold api url {}", config.api_url))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: config.api_key.clone(),
            cache: cache.clone(),
        })
    }

    /// The account the API key belongs to. Never cached.
    pub async fn me(&self) -> Result<User> {
        let url = self.endpoint("me")?;
        self.request(Method::GET, &url)
            .send()
            .await
            .context("GET /me failed")?
            .error_for_status()
            .context("manifold rejected the api key")?
            .json()
            .await
            .context("unexpected /me response")
    }

    /// Look up a market by id; `None` when it does not exist.
    pub async fn market(&self, id: &str) -> Result<Option<Market>> {
        let url = self.endpoint(&format!("market/{id}"))?;
        let market = self
            .cache
            .namespace("market")
            .fetch_json(&url, |m, u| self.request(m, u))
            .await?;
        if market.is_none() {
            debug!("market {id} not found");
        }
        Ok(market)
    }

    pub async fn search_markets(&self, search: &MarketSearch<'_>) -> Result<Vec<Market>> {
        let mut url = self.endpoint("search-markets")?;
        {
            let mut query = url.query_pairs_mut();
            if let Some(terms) = search.terms {
                query.append_pair("term", terms);
            }
            if let Some(filter) = search.filter {
                query.append_pair("filter", filter.as_str());
            }
            if let Some(creator_id) = search.creator_id {
                query.append_pair("creatorId", creator_id);
            }
        }
        if url.query() == Some("") {
            url.set_query(None);
        }

        let markets: Vec<Market> = self
            .cache
            .namespace("search-markets")
            .fetch_json(&url, |m, u| self.request(m, u))
            .await?
            .unwrap_or_default();
        debug!("search returned {} markets", markets.len());
        Ok(markets)
    }

    pub async fn create_market(&self, market: &NewMarket) -> Result<Market> {
        let created: Market = self.post("market", market).await?;
        debug!("created market {} {}", created.id, created.url);
        Ok(created)
    }

    /// Add `market_id` to the group, or take it out when `remove` is set.
    pub async fn edit_market_group(&self, market_id: &str, group_id: &str, remove: bool) -> Result<Value> {
        let body = if remove {
            json!({"groupId": group_id, "remove": true})
        } else {
            json!({"groupId": group_id})
        };
        self.post(&format!("market/{market_id}/group"), &body).await
    }

    pub async fn update_market(&self, market_id: &str, update: &MarketUpdate) -> Result<Value> {
        self.post(&format!("market/{market_id}/update"), update).await
    }

    pub async fn resolve_market(&self, market_id: &str, outcome: Resolution) -> Result<Value> {
        self.post(
            &format!("market/{market_id}/resolve"),
            &json!({"outcome": outcome}),
        )
        .await
    }

    /// Post `markdown` as a comment on `market_id`.
    pub async fn create_comment(&self, market_id: &str, markdown: &str) -> Result<Comment> {
        self.post(
            "comment",
            &json!({"contractId": market_id, "markdown": markdown}),
        )
        .await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.endpoint(path)?;
        let resp = self
            .request(Method::POST, &url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST /{path} failed"))?;
        let resp = reject_error(resp)
            .await
            .with_context(|| format!("POST /{path} was rejected"))?;
        resp.json()
            .await
            .with_context(|| format!("POST /{path}: unexpected response body"))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}")).with_context(|| format!("invalid endpoint {path}"))
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.http
            .request(method, url.clone())
            .header("Authorization", format!("Key {}", self.api_key))
    }
}

/// Pass successful responses through; turn errors into their `message`.
async fn reject_error(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    match body.get("message").and_then(Value::as_str) {
        Some(message) => bail!("{status}: {message}"),
        None => bail!("{status}"),
    }
}
