//! The `matching-games.json` ledger pairing games with markets.
//!
//! Keys are `"<gameId>_<marketId>"`. `true` marks the market confirmed for the
//! game, `false` marks a search hit that was rejected.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MatchingGames {
    entries: BTreeMap<String, bool>,
}

impl MatchingGames {
    pub fn parse(text: &str) -> Result<Self> {
        let entries = serde_json::from_str(text)
            .context("matching games is not a JSON object of booleans")?;
        Ok(Self { entries })
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("failed to parse {}", path.display()))
    }

    /// Write the ledger back as two-space indented JSON.
    pub async fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(&self.entries)?;
        tokio::fs::write(path, text)
            .await
            .with_context(|| format!("failed to write {}", path.display()))?;
        debug!("saved {} matching game entries", self.entries.len());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The confirmed market of `game`, if any.
    pub fn market_for(&self, game: u64) -> Option<&str> {
        let prefix = format!("{game}_");
        self.entries
            .iter()
            .filter(|(_, confirmed)| **confirmed)
            .find_map(|(key, _)| key.strip_prefix(&prefix))
            .filter(|market| !market.is_empty())
    }

    pub fn mark(&mut self, game: u64, market: &str, confirmed: bool) {
        self.entries.insert(format!("{game}_{market}"), confirmed);
    }

    /// Game id to market id for every confirmed pair.
    pub fn confirmed(&self) -> HashMap<u64, String> {
        let mut matches = HashMap::new();
        for (key, _) in self.entries.iter().filter(|(_, confirmed)| **confirmed) {
            let parsed = key
                .split_once('_')
                .and_then(|(game, market)| Some((game.parse::<u64>().ok()?, market)));
            match parsed {
                Some((game, market)) if !market.is_empty() => {
                    matches.insert(game, market.to_string());
                }
                _ => warn!("ignoring malformed matching games key {key:?}"),
            }
        }
        matches
    }
}
