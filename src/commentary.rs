//! Markdown snippets shared by market descriptions and comments.

use std::sync::LazyLock;

use chrono::{DateTime, TimeZone};
use colored::Colorize;
use difference::{Changeset, Difference};
use regex::Regex;

use crate::stats::{MatchupGame, TeamMatchups, Venue};

static MARKET_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:^|\s)line: (.+?) ([+-]?\d+(?:\.\d+)?)").expect("valid line pattern")
});

pub fn bold_if(condition: bool, text: &str) -> String {
    if condition {
        format!("**{text}**")
    } else {
        text.to_string()
    }
}

/// `Team -3.5` / `Team +7`.
pub fn format_spread(team: &str, points: f64) -> String {
    if points < 0.0 {
        format!("{team} {points}")
    } else {
        format!("{team} +{points}")
    }
}

pub fn format_date<Tz: TimeZone>(t: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    t.format("%Y-%m-%d").to_string()
}

/// `7 PM` on the hour, `7:05 PM` otherwise.
pub fn format_time<Tz: TimeZone>(t: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    let minute = t.format("%M").to_string();
    if minute == "00" {
        t.format("%-I %p").to_string()
    } else {
        t.format("%-I:%M %p").to_string()
    }
}

/// Home spread stated in a market description, as `(team, points)`.
pub fn market_spread(description: &str) -> Option<(String, f64)> {
    let caps = MARKET_LINE.captures(description)?;
    let points = caps[2].parse().ok()?;
    Some((caps[1].to_string(), points))
}

/// Overall series record, plus the last five meetings when they tell a
/// different story.
pub fn head_to_head(matchups: &TeamMatchups) -> Vec<String> {
    if matchups.games.is_empty() {
        return Vec::new();
    }

    let record = |wins1: u32, wins2: u32, ties: u32| {
        [
            bold_if(wins1 > wins2, &format!("{} {wins1}", matchups.team1)),
            bold_if(wins2 > wins1, &format!("{} {wins2}", matchups.team2)),
            format!("Tie {ties}"),
        ]
        .join(", ")
    };
    let mut lines = vec![format!(
        "Overall: {}",
        record(matchups.team1_wins, matchups.team2_wins, matchups.ties)
    )];

    let mut recent: Vec<&MatchupGame> = matchups.games.iter().collect();
    recent.sort_by_key(|g| std::cmp::Reverse(DateTime::parse_from_rfc3339(&g.date).ok()));
    recent.truncate(5);

    let won_by = |team: &str| {
        recent
            .iter()
            .filter(|g| {
                let (home, away) = (g.home_score.unwrap_or(0), g.away_score.unwrap_or(0));
                if g.away_team == team { away > home } else { home > away }
            })
            .count() as u32
    };
    let last1 = won_by(matchups.team1.as_str());
    let last2 = won_by(matchups.team2.as_str());
    let last_ties = recent
        .iter()
        .filter(|g| g.home_score.unwrap_or(0) == g.away_score.unwrap_or(0))
        .count() as u32;

    if (last1, last2, last_ties) != (matchups.team1_wins, matchups.team2_wins, matchups.ties) {
        lines.push(format!(
            "Last {}: {}",
            recent.len(),
            record(last1, last2, last_ties)
        ));
    }
    lines
}

/// Market description for a game starting `when`, in markdown paragraphs.
pub fn game_description(
    when: &str,
    venue: Option<&Venue>,
    home_team: &str,
    spread: Option<f64>,
    matchups: Option<&TeamMatchups>,
) -> String {
    let place = venue
        .and_then(|v| Some(format!(" in {}, {}.", v.city.as_deref()?, v.state.as_deref()?)))
        .unwrap_or_default();
    let mut lines = vec![format!("{when}{place}")];

    if let Some(points) = spread {
        lines.push(format!("Line: {}.", format_spread(home_team, points)));
    }

    let series = matchups.map(head_to_head).unwrap_or_default();
    if !series.is_empty() {
        lines.push("Head-to-head:".to_string());
        lines.extend(series);
    }
    lines.join("\n\n")
}

/// Plain text a market shows for `markdown` built by this module.
pub fn plain_text(markdown: &str) -> String {
    markdown.replace("**", "")
}

/// Comment paragraphs announcing a line move since the market was written,
/// plus the series record. Empty when there is nothing to say.
pub fn game_comment(
    home_team: &str,
    stated: Option<(&str, f64)>,
    spread: Option<f64>,
    matchups: Option<&TeamMatchups>,
) -> Vec<String> {
    let mut content = Vec::new();

    if let Some(points) = spread {
        let moved = stated.is_none_or(|(team, old)| team != home_team || old != points);
        if moved {
            let indicator = match stated {
                Some((team, old)) => {
                    let flipped = (old > 0.0 && points < 0.0) || (old < 0.0 && points > 0.0);
                    let size = if old.abs() < points.abs() { "🔼" } else { "🔽" };
                    format!(
                        "{} {size}{}",
                        format_spread(team, old),
                        if flipped { "🔀" } else { "" }
                    )
                }
                None => "✨".to_string(),
            };
            content.push(format!(
                "**Line update:** {indicator} {}.",
                format_spread(home_team, points)
            ));
        }
    }

    let series = matchups.map(head_to_head).unwrap_or_default();
    if !series.is_empty() {
        content.push("**Head-to-head:**".to_string());
        content.extend(series);
    }
    content
}

/// Character diff of `old` to `new`: insertions green and underlined,
/// deletions red and struck through.
pub fn render_diff(old: &str, new: &str) -> String {
    Changeset::new(old, new, "")
        .diffs
        .iter()
        .map(|d| match d {
            Difference::Same(s) => s.clone(),
            Difference::Add(s) => s.green().underline().to_string(),
            Difference::Rem(s) => s.red().strikethrough().to_string(),
        })
        .collect()
}
