//! Pre-game comments on matched markets: line moves since the market was
//! written and the head-to-head record.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use tracing::{debug, error};

use crate::commentary::{format_date, format_time, game_comment, market_spread};
use crate::manifold::ManifoldClient;
use crate::matching::MatchingGames;
use crate::prompt::{Answer, Prompter};
use crate::stats::StatsClient;

pub struct CommentOptions {
    pub year: i32,
    pub week: u32,
    pub game: Option<u64>,
}

/// Offer a comment for every matched game of the week that has not
/// kicked off by `now`.
pub async fn run<R: BufRead, W: Write>(
    stats: &StatsClient,
    manifold: &ManifoldClient,
    matching: &MatchingGames,
    options: &CommentOptions,
    now: DateTime<Utc>,
    prompt: &mut Prompter<R, W>,
) -> Result<()> {
    let user = manifold
        .me()
        .await
        .context("could not get Manifold user details")?;
    debug!("manifold user id {}", user.id);
    let mut games = stats
        .games(options.year, options.week)
        .await
        .context("could not get game schedule")?;
    games.sort_by(|a, b| a.start_date.cmp(&b.start_date));

    for game in games
        .iter()
        .filter(|g| options.game.is_none_or(|id| id == g.id))
    {
        let start = DateTime::parse_from_rfc3339(&game.start_date)
            .with_context(|| format!("game {} has a bad start date", game.id))?;
        if start < now {
            continue;
        }

        let local = start.with_timezone(&Local);
        prompt.say("-".repeat(80))?;
        prompt.say(format!(
            "{} {}: {} @ {}",
            format_date(&local),
            format_time(&local),
            game.away_team,
            game.home_team
        ))?;

        let Some(market_id) = matching.market_for(game.id) else {
            debug!("no matching market for game {} - skipping", game.id);
            continue;
        };

        let description = manifold
            .market(market_id)
            .await?
            .map(|m| m.text_description)
            .unwrap_or_default();
        let stated = market_spread(&description);
        let spread = stats
            .game_spread(game.id)
            .await?
            .and_then(|s| s.parse::<f64>().ok());
        let matchups = stats
            .team_matchups(&game.away_team, &game.home_team)
            .await?;

        let content = game_comment(
            &game.home_team,
            stated.as_ref().map(|(team, points)| (team.as_str(), *points)),
            spread,
            matchups.as_ref(),
        );
        if content.is_empty() {
            prompt.say("No content for comment - skipping")?;
            continue;
        }

        let text = content.join("\n\n");
        prompt.say(format!("Comment:\n{text}"))?;

        match prompt.confirm("Create comment?")? {
            Answer::Yes => match manifold.create_comment(market_id, &text).await {
                Ok(comment) => prompt.say(format!("Comment created {}", comment.id))?,
                Err(e) => error!("failed to create comment: {e:#}"),
            },
            Answer::No => prompt.say("Skipped creating comment")?,
            Answer::Quit => {
                prompt.say("Quitting")?;
                break;
            }
        }
    }
    Ok(())
}
