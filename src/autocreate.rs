//! Interactive market upkeep for a week of games.
//!
//! For each game: find the market it belongs to (the matching games ledger
//! first, then a search of the account's own markets), offer to create one
//! when none matches, then bring groups, close time and description in line
//! with the schedule.

use std::collections::HashMap;
use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, NaiveTime, TimeZone, Timelike, Utc};
use tracing::{debug, error, warn};

use crate::commentary::{format_date, format_time, game_description, plain_text, render_diff};
use crate::manifold::{
    ManifoldClient, Market, MarketSearch, MarketUpdate, NewMarket, OutcomeType, SearchFilter,
};
use crate::matching::MatchingGames;
use crate::prompt::{Answer, Prompter, Selection};
use crate::stats::{Game, Poll, StatsClient, Venue};

/// Markets close this long after kickoff.
pub const CLOSE_PADDING_HOURS: i64 = 4;

const GROUP_IDS: [(&str, &str); 13] = [
    ("sports-default", "2hGlgVhIyvVaFyQAREPi"),
    ("football", "Vcf6CYTTSXAiStbKSqQq"),
    ("college-football", "ky1VPTuxrLXMnHyajZFp"),
    ("aac", "569048e1-f4f8-41d8-827b-5a89f4fb6d03"),
    ("acc", "fd88ff6f-22cd-4b94-ac6b-79e9af2bc16f"),
    ("big-ten", "d1a6645b-90f0-4c35-a0cf-4bf709402f72"),
    ("big-12", "7f158dd0-db47-4861-abc1-1713e032109c"),
    ("conference-usa", "aa391c04-a211-4300-b4e7-08d78c2b52aa"),
    ("midamerican-conference", "1fc39c2a-b6f4-44c8-b58f-97cc0ca0184d"),
    ("mountain-west-conference", "53ab54e6-558f-4137-9ac7-bb592f23dd3b"),
    ("pac12", "1749cf04-48bc-4333-b900-2e1bad326051"),
    ("sec", "fced6b02-8033-4522-bfae-c3b9c0f9744d"),
    ("sun-belt-conference", "a51e3e61-c09a-4d77-9513-cbd3d5c86625"),
];

const CONFERENCE_GROUPS: [(&str, &str); 10] = [
    ("American Athletic", "aac"),
    ("ACC", "acc"),
    ("Big 12", "big-12"),
    ("Big Ten", "big-ten"),
    ("Conference USA", "conference-usa"),
    ("Mid-American", "midamerican-conference"),
    ("Mountain West", "mountain-west-conference"),
    ("Pac-12", "pac12"),
    ("SEC", "sec"),
    ("Sun Belt", "sun-belt-conference"),
];

const BASE_GROUPS: [&str; 3] = ["sports-default", "football", "college-football"];

pub fn group_id(slug: &str) -> Option<&'static str> {
    GROUP_IDS.iter().find(|(s, _)| *s == slug).map(|(_, id)| *id)
}

pub fn conference_group(conference: &str) -> Option<&'static str> {
    CONFERENCE_GROUPS
        .iter()
        .find(|(c, _)| *c == conference)
        .map(|(_, slug)| *slug)
}

/// Group slugs a game's market belongs in.
pub fn wanted_groups(game: &Game) -> Vec<&'static str> {
    let mut groups = BASE_GROUPS.to_vec();
    for conference in [&game.home_conference, &game.away_conference]
        .into_iter()
        .flatten()
    {
        if let Some(slug) = conference_group(conference) {
            if !groups.contains(&slug) {
                groups.push(slug);
            }
        }
    }
    groups
}

/// Slugs to add and slugs to remove so `existing` becomes `wanted`.
pub fn group_changes<'a>(wanted: &[&'a str], existing: &'a [String]) -> (Vec<&'a str>, Vec<&'a str>) {
    let add = wanted
        .iter()
        .copied()
        .filter(|slug| !existing.iter().any(|e| e == slug))
        .collect();
    let remove = existing
        .iter()
        .map(String::as_str)
        .filter(|slug| !wanted.contains(slug))
        .collect();
    (add, remove)
}

/// Close time in unix milliseconds for a game starting at `start`.
pub fn close_time<Tz: TimeZone>(start: &DateTime<Tz>) -> i64 {
    (start.with_timezone(&Utc) + chrono::Duration::hours(CLOSE_PADDING_HOURS)).timestamp_millis()
}

/// `#6 Ohio State` when ranked.
pub fn team_label(team: &str, ranks: &HashMap<String, u32>) -> String {
    match ranks.get(team) {
        Some(rank) => format!("#{rank} {team}"),
        None => team.to_string(),
    }
}

pub fn question(season: i32, away: &str, home: &str) -> String {
    format!("🏈 {season} NCAAF: Will {away} beat {home}?")
}

/// Kickoff is unknown when flagged TBD or parked at 23:59.
pub fn needs_start_time<Tz: TimeZone>(game: &Game, start: &DateTime<Tz>) -> bool {
    game.start_time_tbd || (start.hour() == 23 && start.minute() == 59)
}

/// `start` moved to the `H:MM` (or `H`) wall-clock time on the same day.
pub fn with_time<Tz: TimeZone>(start: &DateTime<Tz>, answer: &str) -> Option<DateTime<Tz>> {
    let (hours, minutes) = answer.split_once(':').unwrap_or((answer, "0"));
    let time = NaiveTime::from_hms_opt(hours.trim().parse().ok()?, minutes.trim().parse().ok()?, 0)?;
    start
        .date_naive()
        .and_time(time)
        .and_local_timezone(start.timezone())
        .earliest()
}

fn elo(value: Option<f64>) -> String {
    value.map_or_else(|| "?".to_string(), |e| format!("{e:.0}"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Quit,
}

pub struct AutocreateOptions {
    pub year: i32,
    pub week: u32,
    pub game: Option<u64>,
    pub poll: Poll,
}

/// Walk the week's games in kickoff order, prompting for every change.
/// Confirmed and rejected matches are recorded in `matching`.
pub async fn run<R: BufRead, W: Write>(
    stats: &StatsClient,
    manifold: &ManifoldClient,
    matching: &mut MatchingGames,
    options: &AutocreateOptions,
    prompt: &mut Prompter<R, W>,
) -> Result<()> {
    let user = manifold
        .me()
        .await
        .context("could not get Manifold user details")?;
    debug!("manifold user id {}", user.id);
    let ranks = stats
        .poll_ranks(options.year, options.week, options.poll)
        .await
        .context("could not get poll ranking")?;
    let venues = stats.venues().await.context("could not get venues")?;
    let mut games = stats
        .games(options.year, options.week)
        .await
        .context("could not get game schedule")?;
    games.sort_by(|a, b| a.start_date.cmp(&b.start_date));

    let session = Session {
        stats,
        manifold,
        user_id: &user.id,
        ranks: &ranks,
        venues: &venues,
    };
    for game in games
        .iter()
        .filter(|g| options.game.is_none_or(|id| id == g.id))
    {
        prompt.say("-".repeat(80))?;
        if session.review(game, matching, prompt).await? == Flow::Quit {
            prompt.say("Quitting")?;
            break;
        }
    }
    Ok(())
}

struct Session<'a> {
    stats: &'a StatsClient,
    manifold: &'a ManifoldClient,
    user_id: &'a str,
    ranks: &'a HashMap<String, u32>,
    venues: &'a HashMap<u64, Venue>,
}

/// What the market for one game should say.
struct Target {
    start: DateTime<Local>,
    description: String,
    text: String,
}

impl Session<'_> {
    async fn review<R: BufRead, W: Write>(
        &self,
        game: &Game,
        matching: &mut MatchingGames,
        prompt: &mut Prompter<R, W>,
    ) -> Result<Flow> {
        let away = team_label(&game.away_team, self.ranks);
        let home = team_label(&game.home_team, self.ranks);
        let matchup = format!(
            "{away} ({}) @ {home} ({})",
            elo(game.away_pregame_elo),
            elo(game.home_pregame_elo)
        );

        let mut start = DateTime::parse_from_rfc3339(&game.start_date)
            .with_context(|| format!("game {} has a bad start date", game.id))?
            .with_timezone(&Local);
        if needs_start_time(game, &start) {
            prompt.say(&matchup)?;
            let answer = prompt.answer("What time is this game?")?;
            match with_time(&start, &answer) {
                Some(t) => start = t,
                None => warn!("could not read {answer:?} as a time, keeping {start}"),
            }
        }

        let when = format!("{} at {}", format_date(&start), format_time(&start));
        prompt.say(format!("{when}: {matchup}"))?;

        let spread = self
            .stats
            .game_spread(game.id)
            .await?
            .and_then(|s| s.parse::<f64>().ok());
        let matchups = self
            .stats
            .team_matchups(&game.away_team, &game.home_team)
            .await?;
        let venue = game.venue_id.and_then(|id| self.venues.get(&id));
        let description = game_description(&when, venue, &game.home_team, spread, matchups.as_ref());
        let target = Target {
            start,
            text: plain_text(&description),
            description,
        };

        let (candidates, already_matched) = self.candidates(game, matching).await;
        let mut matched: Option<Market> = None;
        let mut can_create = true;

        if !candidates.is_empty() {
            prompt.say("Found existing market(s):")?;
            for (i, market) in candidates.iter().enumerate() {
                prompt.say(format!("{}. {}", i + 1, market.question))?;
            }

            if already_matched {
                prompt.say("Already marked as existing - will not create")?;
                matched = candidates.into_iter().next();
                can_create = false;
            } else {
                let choice = prompt.select("Which market matches?", Selection::Number(1))?;
                if choice == Selection::Quit {
                    return Ok(Flow::Quit);
                }
                for (i, market) in candidates.into_iter().enumerate() {
                    if choice != Selection::Number(i + 1) {
                        matching.mark(game.id, &market.id, false);
                        continue;
                    }
                    prompt.say("Market matches - will not create")?;
                    matching.mark(game.id, &market.id, true);
                    // Search hits come back without group slugs.
                    let full = if market.group_slugs.is_empty() {
                        self.manifold.market(&market.id).await?
                    } else {
                        None
                    };
                    matched = Some(full.unwrap_or(market));
                    can_create = false;
                }
            }
        }

        let mut created: Option<Market> = None;
        if can_create {
            match prompt.confirm("Create market?")? {
                Answer::Yes => {
                    let new_market = NewMarket {
                        outcome_type: OutcomeType::Binary,
                        question: question(game.season, &away, &home),
                        description_markdown: Some(target.description.clone()),
                        close_time: Some(close_time(&target.start)),
                        visibility: None,
                        group_id: group_id("college-football").map(str::to_string),
                        initial_prob: Some(50),
                    };
                    let summary = serde_json::to_string_pretty(&new_market)?;
                    match prompt.confirm(&format!("Create market {summary}?"))? {
                        Answer::Yes => match self.manifold.create_market(&new_market).await {
                            Ok(mut market) => {
                                // The description comes back as a rich document.
                                market.text_description = target.text.clone();
                                matching.mark(game.id, &market.id, true);
                                prompt.say(format!("Market created {} {}", market.id, market.url))?;
                                created = Some(market);
                            }
                            Err(e) => error!("failed to create market: {e:#}"),
                        },
                        Answer::No => {}
                        Answer::Quit => return Ok(Flow::Quit),
                    }
                }
                Answer::No => prompt.say("Skipped creating market")?,
                Answer::Quit => return Ok(Flow::Quit),
            }
        }

        match created.or(matched) {
            Some(market) => self.sync(game, &market, &target, prompt).await,
            None => Ok(Flow::Continue),
        }
    }

    /// Markets that may belong to `game`, and whether the ledger already
    /// confirmed the first of them.
    async fn candidates(&self, game: &Game, matching: &MatchingGames) -> (Vec<Market>, bool) {
        if let Some(market_id) = matching.market_for(game.id) {
            debug!("game {} already matched, getting market {market_id}", game.id);
            return match self.manifold.market(market_id).await {
                Ok(market) => (market.into_iter().collect(), true),
                Err(e) => {
                    error!("could not get matching market {market_id}: {e:#}");
                    (Vec::new(), false)
                }
            };
        }

        let terms = format!("{} {}", game.away_team, game.home_team);
        let search = MarketSearch {
            terms: Some(terms.as_str()),
            filter: Some(SearchFilter::All),
            creator_id: Some(self.user_id),
        };
        match self.manifold.search_markets(&search).await {
            Ok(markets) => {
                let mut unique: Vec<Market> = Vec::with_capacity(markets.len());
                for market in markets {
                    if !unique.iter().any(|m| m.id == market.id) {
                        unique.push(market);
                    }
                }
                (unique, false)
            }
            Err(e) => {
                error!("could not search for matching market: {e:#}");
                (Vec::new(), false)
            }
        }
    }

    /// Bring groups, close time and description of `market` in line.
    async fn sync<R: BufRead, W: Write>(
        &self,
        game: &Game,
        market: &Market,
        target: &Target,
        prompt: &mut Prompter<R, W>,
    ) -> Result<Flow> {
        let wanted = wanted_groups(game);
        let (to_add, to_remove) = group_changes(&wanted, &market.group_slugs);

        if to_add.is_empty() {
            prompt.say("All groups already added")?;
        }
        for slug in to_add {
            let Some(id) = group_id(slug) else { continue };
            match self.manifold.edit_market_group(&market.id, id, false).await {
                Ok(_) => prompt.say(format!("Group {slug} added to market {}", market.id))?,
                Err(e) => error!("failed to add {slug} to market {}: {e:#}", market.id),
            }
        }

        if to_remove.is_empty() {
            prompt.say("No groups need removing")?;
        } else {
            let ask = format!(
                "Remove groups {} from market {}?",
                to_remove.join(", "),
                market.question
            );
            match prompt.confirm(&ask)? {
                Answer::Yes => {
                    for slug in to_remove {
                        let Some(id) = group_id(slug) else {
                            warn!("no group id for {slug}, leaving it");
                            continue;
                        };
                        match self.manifold.edit_market_group(&market.id, id, true).await {
                            Ok(_) => {
                                prompt.say(format!("Group {slug} removed from market {}", market.id))?
                            }
                            Err(e) => error!("failed to remove {slug} from market {}: {e:#}", market.id),
                        }
                    }
                }
                Answer::No => {}
                Answer::Quit => return Ok(Flow::Quit),
            }
        }

        let close = close_time(&target.start);
        if market.close_time != Some(close) {
            debug!("market close time {:?}, expected {close}", market.close_time);
            let local = target.start + chrono::Duration::hours(CLOSE_PADDING_HOURS);
            match prompt.confirm(&format!("Update close time to {}", format_time(&local)))? {
                Answer::Yes => {
                    let update = MarketUpdate {
                        close_time: Some(close),
                        ..Default::default()
                    };
                    self.apply_update(market, &update, prompt).await?;
                }
                Answer::No => {}
                Answer::Quit => return Ok(Flow::Quit),
            }
        }

        if market.text_description != target.text {
            prompt.say(format!("New: {}", target.text))?;
            prompt.say(format!(
                "Changes: {}",
                render_diff(&market.text_description, &target.text)
            ))?;
            match prompt.confirm("Update description")? {
                Answer::Yes => {
                    let update = MarketUpdate {
                        description_markdown: Some(target.description.clone()),
                        ..Default::default()
                    };
                    self.apply_update(market, &update, prompt).await?;
                }
                Answer::No => {}
                Answer::Quit => return Ok(Flow::Quit),
            }
        }

        Ok(Flow::Continue)
    }

    async fn apply_update<R: BufRead, W: Write>(
        &self,
        market: &Market,
        update: &MarketUpdate,
        prompt: &mut Prompter<R, W>,
    ) -> Result<()> {
        match self.manifold.update_market(&market.id, update).await {
            Ok(_) => prompt.say(format!("Market {} updated", market.id))?,
            Err(e) => error!("failed to update market {}: {e:#}", market.id),
        }
        Ok(())
    }
}
