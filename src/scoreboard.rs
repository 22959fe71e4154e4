//! Scoreboard of matched games, ordered by time remaining, with market odds.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;

use anyhow::{Result, bail};
use chrono::{DateTime, Days, Local, TimeZone, Utc};
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, CellAlignment, Color, ContentArrangement, Table};
use futures_util::future::try_join_all;
use tracing::debug;

use crate::manifold::{ManifoldClient, Market};
use crate::stats::{Game, GameStatus, Possession, ScoreboardGame, StatsClient, Team};

const HEADER: [&str; 8] = ["ID", "Market", "Start", "Away", "Score", "Home", "Status", "Sitch"];

const ALIGN: [CellAlignment; 8] = [
    CellAlignment::Left,
    CellAlignment::Right,
    CellAlignment::Left,
    CellAlignment::Right,
    CellAlignment::Center,
    CellAlignment::Left,
    CellAlignment::Left,
    CellAlignment::Left,
];

const PERIOD_SECONDS: u32 = 15 * 60;

// ── inputs ─────────────────────────────────────────────────────────

/// Earliest start date shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Since {
    #[default]
    Any,
    Yesterday,
    Today,
    Tomorrow,
    /// The last N hours.
    Hours(u32),
}

impl FromStr for Since {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim().to_ascii_lowercase();
        match s.as_str() {
            "any" => Ok(Since::Any),
            "yesterday" => Ok(Since::Yesterday),
            "today" => Ok(Since::Today),
            "tomorrow" => Ok(Since::Tomorrow),
            _ => match s.strip_suffix('h').map(str::parse::<u32>) {
                Some(Ok(hours)) => Ok(Since::Hours(hours)),
                _ => bail!("expected any, yesterday, today, tomorrow or <N>h, got {s:?}"),
            },
        }
    }
}

impl Since {
    /// Cutoff instant relative to `now`; day boundaries are midnight in `now`'s zone.
    pub fn cutoff<Tz: TimeZone>(self, now: DateTime<Tz>) -> Option<DateTime<Utc>> {
        let midnight = |days_ahead: i64| {
            let day = if days_ahead >= 0 {
                now.date_naive().checked_add_days(Days::new(days_ahead.unsigned_abs()))
            } else {
                now.date_naive().checked_sub_days(Days::new(days_ahead.unsigned_abs()))
            }?;
            day.and_hms_opt(0, 0, 0)?
                .and_local_timezone(now.timezone())
                .earliest()
                .map(|t| t.with_timezone(&Utc))
        };

        match self {
            Since::Any => None,
            Since::Yesterday => midnight(-1),
            Since::Today => midnight(0),
            Since::Tomorrow => midnight(1),
            Since::Hours(hours) => {
                Some(now.with_timezone(&Utc) - chrono::Duration::hours(i64::from(hours)))
            }
        }
    }
}

pub struct ScoreboardOptions {
    pub year: i32,
    pub week: u32,
    pub classification: Option<String>,
    pub conference: Option<String>,
    /// Empty means every status.
    pub statuses: Vec<GameStatus>,
    pub since: Since,
    pub unresolved: bool,
}

// ── selection ──────────────────────────────────────────────────────

/// Keep games whose status is listed (or any, when none are) and whose start
/// is at or after `cutoff`.
pub fn select_games(
    games: Vec<ScoreboardGame>,
    statuses: &[GameStatus],
    cutoff: Option<DateTime<Utc>>,
) -> Vec<ScoreboardGame> {
    games
        .into_iter()
        .filter(|game| statuses.is_empty() || statuses.contains(&game.status))
        .filter(|game| match cutoff {
            None => true,
            Some(cutoff) => DateTime::parse_from_rfc3339(&game.start_date)
                .is_ok_and(|start| start.with_timezone(&Utc) >= cutoff),
        })
        .collect()
}

/// Seconds of regulation left: whole periods still to play plus the clock.
pub fn remaining_seconds(game: &ScoreboardGame) -> u32 {
    let periods_left = 4u32.saturating_sub(u32::from(game.period.unwrap_or(0)));
    periods_left * PERIOD_SECONDS + game.clock.as_deref().map(clock_seconds).unwrap_or(0)
}

/// `HH:MM:SS`, `MM:SS` or `SS` to seconds; unparseable parts count as zero.
pub fn clock_seconds(clock: &str) -> u32 {
    clock
        .split(':')
        .map(|part| part.trim().parse::<u32>().unwrap_or(0))
        .fold(0, |total, part| total * 60 + part)
}

// ── cells ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Bold,
    Green,
    Red,
    GreenBold,
    RedBold,
    YellowBold,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cell {
    pub text: String,
    pub style: Style,
}

impl Cell {
    pub fn plain(text: impl Into<String>) -> Self {
        Self::styled(text, Style::Plain)
    }

    pub fn styled(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }

    fn to_table_cell(&self) -> comfy_table::Cell {
        let cell = comfy_table::Cell::new(&self.text);
        match self.style {
            Style::Plain => cell,
            Style::Bold => cell.add_attribute(Attribute::Bold),
            Style::Green => cell.fg(Color::Green),
            Style::Red => cell.fg(Color::Red),
            Style::GreenBold => cell.fg(Color::Green).add_attribute(Attribute::Bold),
            Style::RedBold => cell.fg(Color::Red).add_attribute(Attribute::Bold),
            Style::YellowBold => cell.fg(Color::Yellow).add_attribute(Attribute::Bold),
        }
    }
}

pub fn market_cell(market: Option<&Market>) -> Cell {
    match market {
        None => Cell::plain("None"),
        Some(m) if m.is_resolved => match m.resolution.as_deref() {
            Some("YES") => Cell::styled("YES", Style::Green),
            _ => Cell::styled("NO", Style::Red),
        },
        Some(m) => match m.probability {
            Some(p) => Cell::plain(format!("{}%", (p * 100.0).round())),
            None => Cell::plain("N/A"),
        },
    }
}

pub fn status_cell(game: &ScoreboardGame) -> Cell {
    match game.status {
        GameStatus::Completed => Cell::plain("Final"),
        GameStatus::Scheduled => Cell::plain("Scheduled"),
        GameStatus::InProgress => {
            let period = match game.period {
                Some(1) => "1st ",
                Some(2) => "2nd ",
                Some(3) => "3rd ",
                Some(4) => "4th ",
                _ => " ",
            };
            let clock = game.clock.as_deref().unwrap_or_default();
            let clock = clock.strip_prefix("00:").unwrap_or(clock);
            Cell::plain(format!("{period}{clock}"))
        }
    }
}

/// Start time in `tz` as `M/D, H:MM`; the raw value when unparseable.
pub fn format_start<Tz>(start: &str, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    match DateTime::parse_from_rfc3339(start) {
        Ok(t) => t.with_timezone(tz).format("%-m/%-d, %-H:%M").to_string(),
        Err(_) => start.to_string(),
    }
}

pub fn situation_cell(game: &ScoreboardGame, teams: &HashMap<u64, Team>) -> Cell {
    match game.status {
        GameStatus::Completed => return Cell::plain("Game over"),
        GameStatus::Scheduled => return Cell::plain("N/A"),
        GameStatus::InProgress => {}
    }

    let abbreviation = |id: u64| {
        teams
            .get(&id)
            .and_then(|t| t.abbreviation.as_deref())
            .filter(|a| !a.is_empty())
    };
    let away = abbreviation(game.away_team.id);
    let home = abbreviation(game.home_team.id);
    let situation = game.situation.as_deref().unwrap_or_default();

    // A situation led by a team abbreviation describes a scoring play.
    if [away, home]
        .into_iter()
        .flatten()
        .any(|abbr| !situation.is_empty() && situation.starts_with(abbr))
    {
        return Cell::styled(situation, Style::GreenBold);
    }

    let defense = match game.possession {
        Some(Possession::Away) => home,
        Some(Possession::Home) => away,
        None => return Cell::plain("N/A"),
    };

    match defense.and_then(|abbr| field_position(situation, abbr)) {
        Some(FieldPosition::RedZone) => Cell::styled(situation, Style::RedBold),
        Some(FieldPosition::Outside) => Cell::styled(situation, Style::YellowBold),
        None if situation.is_empty() => Cell::plain("Unknown"),
        None => Cell::plain(situation),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldPosition {
    RedZone,
    Outside,
}

/// Parse `"<n>(st|nd|rd|th) & <yards|goal> at <defense> <line>"`.
fn field_position(situation: &str, defense: &str) -> Option<FieldPosition> {
    let tokens: Vec<&str> = situation.split_whitespace().collect();
    if tokens.len() < 6 {
        return None;
    }
    let (down, amp, distance, at) = (tokens[0], tokens[1], tokens[2], tokens[3]);
    let line = tokens[tokens.len() - 1];
    let team = tokens[4..tokens.len() - 1].join(" ");

    let ordinal = down.trim_start_matches(|c: char| c.is_ascii_digit());
    let valid = ordinal.len() < down.len()
        && ["st", "nd", "rd", "th"]
            .iter()
            .any(|s| ordinal.eq_ignore_ascii_case(s))
        && amp == "&"
        && (distance.eq_ignore_ascii_case("goal") || distance.parse::<u32>().is_ok())
        && at.eq_ignore_ascii_case("at")
        && team.eq_ignore_ascii_case(defense);
    if !valid {
        return None;
    }

    let line: u32 = line.parse().ok()?;
    // Goal to go is always inside the 25, whatever yard line is reported.
    if distance.eq_ignore_ascii_case("goal") || line <= 25 {
        Some(FieldPosition::RedZone)
    } else {
        Some(FieldPosition::Outside)
    }
}

/// One table row for `game`. Team names come from the week's games when known.
pub fn build_row(
    game: &ScoreboardGame,
    market: Option<&Market>,
    week_game: Option<&Game>,
    teams: &HashMap<u64, Team>,
) -> Vec<Cell> {
    let away_points = game.away_team.points.unwrap_or(0);
    let home_points = game.home_team.points.unwrap_or(0);
    let live = game.status == GameStatus::InProgress;

    let away_name = week_game.map_or(game.away_team.name.as_str(), |g| g.away_team.as_str());
    let home_name = week_game.map_or(game.home_team.name.as_str(), |g| g.home_team.as_str());

    let away = Cell::styled(
        if live && game.possession == Some(Possession::Away) {
            format!("● {away_name}")
        } else {
            away_name.to_string()
        },
        if away_points > home_points { Style::Bold } else { Style::Plain },
    );
    let home = Cell::styled(
        if live && game.possession == Some(Possession::Home) {
            format!("{home_name} ●")
        } else {
            home_name.to_string()
        },
        if home_points > away_points { Style::Bold } else { Style::Plain },
    );
    let score = if game.status == GameStatus::Scheduled {
        Cell::plain("N/A")
    } else {
        Cell::plain(format!("{away_points}-{home_points}"))
    };

    vec![
        Cell::plain(game.id.to_string()),
        market_cell(market),
        Cell::plain(format_start(&game.start_date, &Local)),
        away,
        score,
        home,
        status_cell(game),
        situation_cell(game, teams),
    ]
}

/// Table of `rows` under the scoreboard header.
pub fn scoreboard_table(rows: &[Vec<Cell>]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Disabled)
        .set_header(HEADER);
    for row in rows {
        table.add_row(row.iter().map(Cell::to_table_cell));
    }
    for (i, align) in ALIGN.into_iter().enumerate() {
        if let Some(column) = table.column_mut(i) {
            column.set_cell_alignment(align);
        }
    }
    table
}

pub fn render_table(rows: &[Vec<Cell>]) -> String {
    scoreboard_table(rows).to_string()
}

// ── command ────────────────────────────────────────────────────────

/// Fetch, filter and order the matched games, returning table rows.
pub async fn build_scoreboard(
    stats: &StatsClient,
    manifold: &ManifoldClient,
    matching: &HashMap<u64, String>,
    options: &ScoreboardOptions,
) -> Result<Vec<Vec<Cell>>> {
    let week_games: HashMap<u64, Game> = stats
        .games(options.year, options.week)
        .await?
        .into_iter()
        .map(|g| (g.id, g))
        .collect();
    let scoreboard = stats
        .scoreboard(options.classification.as_deref(), options.conference.as_deref())
        .await?;
    let teams: HashMap<u64, Team> = stats
        .teams(None)
        .await?
        .into_iter()
        .map(|t| (t.id, t))
        .collect();

    let cutoff = options.since.cutoff(Local::now());
    debug!("scoreboard cutoff {cutoff:?}");
    let games = select_games(scoreboard, &options.statuses, cutoff);

    let markets = try_join_all(games.iter().map(|game| async move {
        match matching.get(&game.id) {
            Some(id) => manifold.market(id).await,
            None => Ok(None),
        }
    }))
    .await?;

    let mut rows: Vec<(ScoreboardGame, Option<Market>)> = games
        .into_iter()
        .zip(markets)
        .filter(|(_, market)| !options.unresolved || !market.as_ref().is_some_and(|m| m.is_resolved))
        .collect();
    rows.sort_by_key(|(game, _)| remaining_seconds(game));

    Ok(rows
        .iter()
        .map(|(game, market)| build_row(game, market.as_ref(), week_games.get(&game.id), &teams))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use serde_json::json;

    fn game(value: serde_json::Value) -> ScoreboardGame {
        let mut base = json!({
            "id": 1,
            "startDate": "2023-09-16T19:30:00.000Z",
            "status": "in_progress",
            "period": 2,
            "clock": "00:07:45",
            "situation": null,
            "possession": "home",
            "homeTeam": {"id": 10, "name": "Ohio State", "points": 14},
            "awayTeam": {"id": 20, "name": "Western Kentucky", "points": 3}
        });
        for (k, v) in value.as_object().unwrap() {
            base[k] = v.clone();
        }
        serde_json::from_value(base).unwrap()
    }

    fn teams() -> HashMap<u64, Team> {
        [(10, "OSU"), (20, "WKU")]
            .into_iter()
            .map(|(id, abbr)| {
                let team: Team = serde_json::from_value(json!({
                    "id": id,
                    "school": abbr,
                    "abbreviation": abbr
                }))
                .unwrap();
                (id, team)
            })
            .collect()
    }

    fn market(value: serde_json::Value) -> Market {
        let mut base = json!({"id": "m", "question": "q"});
        for (k, v) in value.as_object().unwrap() {
            base[k] = v.clone();
        }
        serde_json::from_value(base).unwrap()
    }

    // ── since ──────────────────────────────────────────────────────

    #[test]
    fn since_parses_keywords_and_hours() {
        assert_eq!("any".parse::<Since>().unwrap(), Since::Any);
        assert_eq!("Today".parse::<Since>().unwrap(), Since::Today);
        assert_eq!("12h".parse::<Since>().unwrap(), Since::Hours(12));
        assert!("soon".parse::<Since>().is_err());
        assert!("h".parse::<Since>().is_err());
    }

    #[test]
    fn since_cutoffs() {
        let tz = FixedOffset::west_opt(5 * 3600).unwrap();
        let now = tz.with_ymd_and_hms(2023, 9, 16, 15, 30, 0).unwrap();

        assert_eq!(Since::Any.cutoff(now), None);
        assert_eq!(
            Since::Today.cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 9, 16, 5, 0, 0).unwrap()
        );
        assert_eq!(
            Since::Yesterday.cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 9, 15, 5, 0, 0).unwrap()
        );
        assert_eq!(
            Since::Tomorrow.cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 9, 17, 5, 0, 0).unwrap()
        );
        assert_eq!(
            Since::Hours(3).cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2023, 9, 16, 17, 30, 0).unwrap()
        );
    }

    // ── selection ──────────────────────────────────────────────────

    #[test]
    fn select_by_status_and_cutoff() {
        let games = vec![
            game(json!({"id": 1, "status": "completed", "startDate": "2023-09-15T23:00:00Z"})),
            game(json!({"id": 2, "status": "in_progress", "startDate": "2023-09-16T19:30:00Z"})),
            game(json!({"id": 3, "status": "scheduled", "startDate": "2023-09-16T23:00:00Z"})),
            game(json!({"id": 4, "status": "scheduled", "startDate": "not a date"})),
        ];
        let cutoff = Utc.with_ymd_and_hms(2023, 9, 16, 0, 0, 0).unwrap();

        let ids = |v: Vec<ScoreboardGame>| v.into_iter().map(|g| g.id).collect::<Vec<_>>();
        assert_eq!(ids(select_games(games.clone(), &[], None)), vec![1, 2, 3, 4]);
        assert_eq!(ids(select_games(games.clone(), &[], Some(cutoff))), vec![2, 3]);
        assert_eq!(
            ids(select_games(games, &[GameStatus::Scheduled], Some(cutoff))),
            vec![3]
        );
    }

    #[test]
    fn remaining_time_orders_later_games_first() {
        let fourth = game(json!({"period": 4, "clock": "00:02:00"}));
        let second = game(json!({"period": 2, "clock": "00:07:45"}));
        let scheduled = game(json!({"status": "scheduled", "period": null, "clock": null}));

        assert_eq!(remaining_seconds(&fourth), 120);
        assert_eq!(remaining_seconds(&second), 2 * 900 + 465);
        assert_eq!(remaining_seconds(&scheduled), 3600);
    }

    #[test]
    fn clock_formats() {
        assert_eq!(clock_seconds("00:07:45"), 465);
        assert_eq!(clock_seconds("7:45"), 465);
        assert_eq!(clock_seconds("30"), 30);
        assert_eq!(clock_seconds("x:10"), 10);
    }

    // ── cells ──────────────────────────────────────────────────────

    #[test]
    fn market_cells() {
        assert_eq!(market_cell(None), Cell::plain("None"));
        assert_eq!(
            market_cell(Some(&market(json!({"isResolved": true, "resolution": "YES"})))),
            Cell::styled("YES", Style::Green)
        );
        assert_eq!(
            market_cell(Some(&market(json!({"isResolved": true, "resolution": "NO"})))),
            Cell::styled("NO", Style::Red)
        );
        assert_eq!(
            market_cell(Some(&market(json!({"probability": 0.934})))),
            Cell::plain("93%")
        );
    }

    #[test]
    fn status_cells() {
        assert_eq!(status_cell(&game(json!({}))).text, "2nd 07:45");
        assert_eq!(
            status_cell(&game(json!({"period": 5, "clock": "01:00:00"}))).text,
            " 01:00:00"
        );
        assert_eq!(status_cell(&game(json!({"status": "completed"}))).text, "Final");
        assert_eq!(status_cell(&game(json!({"status": "scheduled"}))).text, "Scheduled");
    }

    #[test]
    fn start_cell_in_local_zone() {
        let tz = FixedOffset::west_opt(4 * 3600).unwrap();
        assert_eq!(format_start("2023-09-16T19:30:00.000Z", &tz), "9/16, 15:30");
        assert_eq!(format_start("TBD", &tz), "TBD");
    }

    #[test]
    fn situation_red_zone_and_goal() {
        let teams = teams();
        let inside = game(json!({"situation": "2nd & 7 at WKU 23"}));
        let goal = game(json!({"situation": "1st & Goal at WKU 30"}));
        assert_eq!(situation_cell(&inside, &teams).style, Style::RedBold);
        assert_eq!(situation_cell(&goal, &teams).style, Style::RedBold);
    }

    #[test]
    fn situation_outside_red_zone_is_yellow() {
        let teams = teams();
        let midfield = game(json!({"situation": "3rd & 4 at WKU 45"}));
        assert_eq!(situation_cell(&midfield, &teams).style, Style::YellowBold);

        // own side of the field does not match the defense
        let own = game(json!({"situation": "3rd & 4 at OSU 45"}));
        assert_eq!(situation_cell(&own, &teams), Cell::plain("3rd & 4 at OSU 45"));
    }

    #[test]
    fn situation_scoring_play_is_green() {
        let cell = situation_cell(&game(json!({"situation": "OSU TD, J. Smith 12 yd pass"})), &teams());
        assert_eq!(cell.style, Style::GreenBold);
    }

    #[test]
    fn situation_fallbacks() {
        let teams = teams();
        assert_eq!(
            situation_cell(&game(json!({"status": "completed"})), &teams),
            Cell::plain("Game over")
        );
        assert_eq!(
            situation_cell(&game(json!({"status": "scheduled"})), &teams),
            Cell::plain("N/A")
        );
        assert_eq!(
            situation_cell(&game(json!({"possession": null, "situation": "Kickoff"})), &teams),
            Cell::plain("N/A")
        );
        assert_eq!(situation_cell(&game(json!({})), &teams), Cell::plain("Unknown"));
    }

    #[test]
    fn row_marks_possession_and_leader() {
        let row = build_row(&game(json!({})), None, None, &teams());
        assert_eq!(row.len(), 8);
        assert_eq!(row[0].text, "1");
        assert_eq!(row[3], Cell::plain("Western Kentucky"));
        assert_eq!(row[4].text, "3-14");
        assert_eq!(row[5], Cell::styled("Ohio State ●", Style::Bold));
    }

    #[test]
    fn scheduled_row_has_no_score() {
        let row = build_row(
            &game(json!({"status": "scheduled", "possession": null})),
            None,
            None,
            &teams(),
        );
        assert_eq!(row[4].text, "N/A");
        assert_eq!(row[5], Cell::styled("Ohio State", Style::Bold));
    }

    #[test]
    fn table_aligns_columns() {
        let rows = vec![
            vec![
                Cell::plain("1"),
                Cell::plain("93%"),
                Cell::plain("9/16, 15:30"),
                Cell::plain("WKU"),
                Cell::plain("3-14"),
                Cell::styled("OSU ●", Style::Bold),
                Cell::plain("2nd 07:45"),
                Cell::styled("2nd & 7 at WKU 23", Style::RedBold),
            ],
            vec![
                Cell::plain("22"),
                Cell::styled("YES", Style::Green),
                Cell::plain("9/16, 12:00"),
                Cell::plain("Western Kentucky"),
                Cell::plain("N/A"),
                Cell::plain("OSU"),
                Cell::plain("Final"),
                Cell::plain("Game over"),
            ],
        ];

        let mut table = scoreboard_table(&rows);
        let text = table.force_no_tty().to_string();
        let lines: Vec<&str> = text.lines().collect();

        let header = lines.iter().find(|l| l.contains("Market")).unwrap();
        for name in HEADER {
            assert!(header.contains(name), "missing {name}");
        }
        let first = lines.iter().find(|l| l.contains("93%")).unwrap();
        assert!(first.contains(" 93% "));
        assert!(first.contains("             WKU "));
        assert!(!first.contains('\u{1b}'));
        let width = lines[0].chars().count();
        assert!(lines.iter().all(|l| l.chars().count() == width));
    }
}
