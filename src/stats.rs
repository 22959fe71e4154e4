//! College football statistics REST client.

use std::collections::{BTreeMap, HashMap};

use anyhow::{Context, Result};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::ResponseCache;
use crate::config::ApiConfig;

/// Scheduled or played game from the `/games` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Game {
    pub id: u64,
    pub season: i32,
    pub week: u32,
    pub start_date: String,
    #[serde(default)]
    pub start_time_tbd: bool,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub neutral_site: bool,
    #[serde(default)]
    pub conference_game: bool,
    #[serde(default)]
    pub venue_id: Option<u64>,
    #[serde(default)]
    pub venue: Option<String>,
    pub home_id: u64,
    pub home_team: String,
    #[serde(default)]
    pub home_conference: Option<String>,
    #[serde(default)]
    pub home_points: Option<u32>,
    #[serde(default)]
    pub home_pregame_elo: Option<f64>,
    pub away_id: u64,
    pub away_team: String,
    #[serde(default)]
    pub away_conference: Option<String>,
    #[serde(default)]
    pub away_points: Option<u32>,
    #[serde(default)]
    pub away_pregame_elo: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Possession {
    Home,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardTeam {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub points: Option<u32>,
}

/// Live game state from the `/scoreboard` endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardGame {
    pub id: u64,
    pub start_date: String,
    #[serde(default, rename = "startTimeTBD")]
    pub start_time_tbd: bool,
    #[serde(default)]
    pub tv: Option<String>,
    pub status: GameStatus,
    #[serde(default)]
    pub period: Option<u8>,
    /// `HH:MM:SS` remaining in the period.
    #[serde(default)]
    pub clock: Option<String>,
    /// Down and distance, e.g. `"2nd & 7 at OSU 23"`.
    #[serde(default)]
    pub situation: Option<String>,
    #[serde(default)]
    pub possession: Option<Possession>,
    pub home_team: ScoreboardTeam,
    pub away_team: ScoreboardTeam,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: u64,
    pub school: String,
    #[serde(default)]
    pub mascot: Option<String>,
    #[serde(default)]
    pub abbreviation: Option<String>,
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub classification: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

/// Which ranking `poll_ranks` reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Poll {
    Ap,
    Cfp,
}

impl Poll {
    /// Poll name as published by the rankings endpoint.
    pub fn title(self) -> &'static str {
        match self {
            Poll::Ap => "AP Top 25",
            Poll::Cfp => "Playoff Committee Rankings",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollWeek {
    pub season: i32,
    #[serde(default)]
    pub week: Option<u32>,
    #[serde(default)]
    pub polls: Vec<PollRanking>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRanking {
    pub poll: String,
    #[serde(default)]
    pub ranks: Vec<PollRank>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRank {
    pub rank: u32,
    pub school: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Venue {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingGame {
    pub id: u64,
    #[serde(default)]
    pub lines: Vec<BettingLine>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BettingLine {
    pub provider: String,
    /// Home spread, published as a number or a numeric string.
    #[serde(default)]
    pub spread: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamMatchups {
    pub team1: String,
    pub team2: String,
    #[serde(default)]
    pub team1_wins: u32,
    #[serde(default)]
    pub team2_wins: u32,
    #[serde(default)]
    pub ties: u32,
    #[serde(default)]
    pub games: Vec<MatchupGame>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchupGame {
    pub season: i32,
    pub date: String,
    pub home_team: String,
    #[serde(default)]
    pub home_score: Option<u32>,
    pub away_team: String,
    #[serde(default)]
    pub away_score: Option<u32>,
}

#[derive(Debug, Clone)]
pub struct StatsClient {
    http: reqwest::Client,
    base: Url,
    api_key: String,
    cache: ResponseCache,
}

impl StatsClient {
    pub fn new(config: &ApiConfig, cache: &ResponseCache) -> Result<Self> {
        let base = Url::parse(&config.api_url)
            .with_context(|| format!("invalid stats api url {}", config.api_url))?;
        Ok(Self {
            http: reqwest::Client::new(),
            base,
            api_key: config.api_key.clone(),
            cache: cache.clone(),
        })
    }

    /// Regular-season FBS games for `year` and `week`.
    pub async fn games(&self, year: i32, week: u32) -> Result<Vec<Game>> {
        let mut url = self.endpoint("games")?;
        url.query_pairs_mut()
            .append_pair("year", &year.to_string())
            .append_pair("week", &week.to_string())
            .append_pair("seasonType", "regular")
            .append_pair("division", "fbs");
        self.get_list("games", url).await
    }

    pub async fn scoreboard(
        &self,
        classification: Option<&str>,
        conference: Option<&str>,
    ) -> Result<Vec<ScoreboardGame>> {
        let mut url = self.endpoint("scoreboard")?;
        if let Some(classification) = classification {
            url.query_pairs_mut()
                .append_pair("classification", classification);
        }
        if let Some(conference) = conference {
            url.query_pairs_mut().append_pair("conference", conference);
        }
        self.get_list("scoreboard", url).await
    }

    pub async fn teams(&self, conference: Option<&str>) -> Result<Vec<Team>> {
        let mut url = self.endpoint("teams")?;
        if let Some(conference) = conference {
            url.query_pairs_mut().append_pair("conference", conference);
        }
        self.get_list("teams", url).await
    }

    /// School to rank in `poll` for the regular-season `week` of `year`.
    pub async fn poll_ranks(&self, year: i32, week: u32, poll: Poll) -> Result<HashMap<String, u32>> {
        let mut url = self.endpoint("rankings")?;
        url.query_pairs_mut()
            .append_pair("year", &year.to_string())
            .append_pair("week", &week.to_string())
            .append_pair("seasonType", "regular");
        let weeks: Vec<PollWeek> = self.get_list("rankings", url).await?;

        let ranks: HashMap<String, u32> = weeks
            .into_iter()
            .next()
            .and_then(|w| w.polls.into_iter().find(|p| p.poll == poll.title()))
            .map(|p| p.ranks.into_iter().map(|r| (r.school, r.rank)).collect())
            .unwrap_or_default();
        debug!("{} ranked teams in {}", ranks.len(), poll.title());
        Ok(ranks)
    }

    pub async fn venues(&self) -> Result<HashMap<u64, Venue>> {
        let url = self.endpoint("venues")?;
        let venues: Vec<Venue> = self.get_list("venues", url).await?;
        Ok(venues.into_iter().map(|v| (v.id, v)).collect())
    }

    /// Consensus home spread for `game_id` across providers.
    pub async fn game_spread(&self, game_id: u64) -> Result<Option<String>> {
        let mut url = self.endpoint("lines")?;
        url.query_pairs_mut()
            .append_pair("gameId", &game_id.to_string());
        let games: Vec<BettingGame> = self.get_list("lines", url).await?;
        Ok(games.first().and_then(|g| consensus_spread(&g.lines)))
    }

    /// All-time head-to-head record of `team1` against `team2`.
    pub async fn team_matchups(&self, team1: &str, team2: &str) -> Result<Option<TeamMatchups>> {
        let mut url = self.endpoint("teams/matchup")?;
        url.query_pairs_mut()
            .append_pair("team1", team1)
            .append_pair("team2", team2);
        self.get("teams/matchup", url).await
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        let base = self.base.as_str().trim_end_matches('/');
        Url::parse(&format!("{base}/{path}")).with_context(|| format!("invalid endpoint {path}"))
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        self.http
            .request(method, url.clone())
            .bearer_auth(&self.api_key)
    }

    async fn get<T>(&self, namespace: &str, url: Url) -> Result<Option<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        self.cache
            .namespace(namespace)
            .fetch_json(&url, |m, u| self.request(m, u))
            .await
    }

    async fn get_list<T>(&self, namespace: &str, url: Url) -> Result<Vec<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let items: Vec<T> = self.get(namespace, url).await?.unwrap_or_default();
        debug!("fetched {} {namespace} entries", items.len());
        Ok(items)
    }
}

/// The spread quoted by a strict majority of providers, else the most quoted
/// one. Ties go to the lexically last spread.
pub fn consensus_spread(lines: &[BettingLine]) -> Option<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for spread in lines.iter().filter_map(|l| spread_text(&l.spread)) {
        *counts.entry(spread).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    if let Some((spread, _)) = counts.iter().find(|(_, count)| **count * 2 > total) {
        return Some(spread.clone());
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(spread, _)| spread)
}

fn spread_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(n) => n.as_f64().map(|f| f.to_string()),
        Value::String(s) if !s.trim().is_empty() => s.trim().parse::<f64>().ok().map(|f| f.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::test_server::{Reply, spawn};
    use serde_json::json;

    fn client(base: &str, dir: &std::path::Path) -> StatsClient {
        let config = ApiConfig {
            api_url: base.to_string(),
            api_key: "cfb-key".into(),
        };
        StatsClient::new(&config, &ResponseCache::new(dir)).unwrap()
    }

    #[tokio::test]
    async fn games_query_and_auth() {
        let body = json!([{
            "id": 401520000,
            "season": 2023,
            "week": 3,
            "season_type": "regular",
            "start_date": "2023-09-16T19:30:00.000Z",
            "start_time_tbd": false,
            "completed": false,
            "home_id": 194,
            "home_team": "Ohio State",
            "home_points": null,
            "away_id": 2633,
            "away_team": "Western Kentucky",
            "away_points": null,
            "attendance": null
        }])
        .to_string();
        let (base, log) = spawn(move |_, _| Reply::ok(Some("\"g\""), body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let games = client(&base, dir.path()).games(2023, 3).await.unwrap();

        assert_eq!(games.len(), 1);
        assert_eq!(games[0].home_team, "Ohio State");
        assert_eq!(games[0].home_points, None);
        let log = log.lock().unwrap();
        assert_eq!(
            log[1],
            "GET /games?year=2023&week=3&seasonType=regular&division=fbs Bearer cfb-key"
        );
    }

    #[tokio::test]
    async fn scoreboard_parses_live_state() {
        let body = json!([{
            "id": 7,
            "startDate": "2023-09-16T19:30:00.000Z",
            "startTimeTBD": false,
            "tv": "FOX",
            "status": "in_progress",
            "period": 2,
            "clock": "00:07:45",
            "situation": "2nd & 7 at WKU 23",
            "possession": "home",
            "homeTeam": {"id": 1, "name": "Ohio State", "conference": "Big Ten", "classification": "fbs", "points": 14},
            "awayTeam": {"id": 2, "name": "Western Kentucky", "conference": "CUSA", "classification": "fbs", "points": 3}
        }])
        .to_string();
        let (base, log) = spawn(move |_, _| Reply::ok(None, body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let games = client(&base, dir.path())
            .scoreboard(Some("fbs"), None)
            .await
            .unwrap();

        assert_eq!(games[0].status, GameStatus::InProgress);
        assert_eq!(games[0].possession, Some(Possession::Home));
        assert_eq!(games[0].home_team.points, Some(14));
        assert!(log.lock().unwrap()[1].starts_with("GET /scoreboard?classification=fbs "));
    }

    #[tokio::test]
    async fn missing_endpoint_yields_empty_list() {
        let (base, _log) = spawn(|_, _| Reply::not_found()).await;
        let dir = tempfile::tempdir().unwrap();

        let teams = client(&base, dir.path()).teams(Some("SEC")).await.unwrap();
        assert!(teams.is_empty());
    }

    #[tokio::test]
    async fn poll_ranks_pick_the_named_poll() {
        let body = json!([{
            "season": 2023,
            "seasonType": "regular",
            "week": 3,
            "polls": [
                {"poll": "Coaches Poll", "ranks": [{"rank": 1, "school": "Georgia"}]},
                {"poll": "AP Top 25", "ranks": [
                    {"rank": 1, "school": "Georgia", "conference": "SEC", "firstPlaceVotes": 50, "points": 1550},
                    {"rank": 6, "school": "Ohio State", "conference": "Big Ten", "firstPlaceVotes": 0, "points": 1200}
                ]}
            ]
        }])
        .to_string();
        let (base, log) = spawn(move |_, _| Reply::ok(None, body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let ranks = client(&base, dir.path())
            .poll_ranks(2023, 3, Poll::Ap)
            .await
            .unwrap();

        assert_eq!(ranks.len(), 2);
        assert_eq!(ranks["Ohio State"], 6);
        assert_eq!(
            log.lock().unwrap()[1],
            "GET /rankings?year=2023&week=3&seasonType=regular Bearer cfb-key"
        );
    }

    #[tokio::test]
    async fn venues_are_keyed_by_id() {
        let body = json!([
            {"id": 3, "name": "Ohio Stadium", "city": "Columbus", "state": "OH", "capacity": 102780},
            {"id": 9, "name": "Houchens", "city": null, "state": null}
        ])
        .to_string();
        let (base, _log) = spawn(move |_, _| Reply::ok(None, body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let venues = client(&base, dir.path()).venues().await.unwrap();
        assert_eq!(venues[&3].city.as_deref(), Some("Columbus"));
        assert_eq!(venues[&9].state, None);
    }

    #[tokio::test]
    async fn game_spread_from_lines() {
        let body = json!([{
            "id": 7,
            "homeTeam": "Ohio State",
            "awayTeam": "Western Kentucky",
            "lines": [
                {"provider": "a", "spread": -31.5},
                {"provider": "b", "spread": "-31.5"},
                {"provider": "c", "spread": -30}
            ]
        }])
        .to_string();
        let (base, log) = spawn(move |_, _| Reply::ok(None, body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let spread = client(&base, dir.path()).game_spread(7).await.unwrap();
        assert_eq!(spread.as_deref(), Some("-31.5"));
        assert!(log.lock().unwrap()[1].starts_with("GET /lines?gameId=7 "));
    }

    #[tokio::test]
    async fn matchups_query_both_teams() {
        let body = json!({
            "team1": "Western Kentucky",
            "team2": "Ohio State",
            "startYear": null,
            "team1Wins": 0,
            "team2Wins": 1,
            "ties": 0,
            "games": [{
                "season": 2019, "week": 1, "seasonType": "regular", "date": "2019-08-31T16:00:00.000Z",
                "neutralSite": false, "venue": null,
                "homeTeam": "Ohio State", "homeScore": 45, "awayTeam": "Western Kentucky", "awayScore": 21,
                "winner": "Ohio State"
            }]
        })
        .to_string();
        let (base, log) = spawn(move |_, _| Reply::ok(None, body.clone())).await;
        let dir = tempfile::tempdir().unwrap();

        let matchups = client(&base, dir.path())
            .team_matchups("Western Kentucky", "Ohio State")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(matchups.team2_wins, 1);
        assert_eq!(matchups.games[0].home_score, Some(45));
        assert!(log.lock().unwrap()[1]
            .starts_with("GET /teams/matchup?team1=Western+Kentucky&team2=Ohio+State "));
    }

    fn line(spread: Value) -> BettingLine {
        BettingLine {
            provider: "p".into(),
            spread,
        }
    }

    #[test]
    fn consensus_prefers_majority_then_most_common() {
        let majority = [line(json!(-3)), line(json!("-3")), line(json!(-2.5))];
        assert_eq!(consensus_spread(&majority).as_deref(), Some("-3"));

        let plurality = [
            line(json!(7)),
            line(json!(7)),
            line(json!(6.5)),
            line(json!(6)),
            line(json!(Value::Null)),
        ];
        assert_eq!(consensus_spread(&plurality).as_deref(), Some("7"));

        let tied = [line(json!(1)), line(json!(2))];
        assert_eq!(consensus_spread(&tied).as_deref(), Some("2"));

        assert_eq!(consensus_spread(&[]), None);
        assert_eq!(consensus_spread(&[line(json!(""))]), None);
    }
}
