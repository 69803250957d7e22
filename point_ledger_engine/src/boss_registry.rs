//! The catalogue of spawn-event bosses, the attendance credit each one is worth, and the aliases operators use for
//! them.
use std::{collections::BTreeMap, fs, path::Path};

use ledger_common::Points;
use log::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::helpers::levenshtein;

/// Operator-entered labels within this many edits of a boss name or alias resolve to that boss.
pub const MAX_BOSS_EDIT_DISTANCE: usize = 2;

#[derive(Debug, Clone, Error)]
pub enum BossRegistryError {
    #[error("Could not read the boss registry file. {0}")]
    Io(String),
    #[error("The boss registry is not valid JSON. {0}")]
    Json(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BossEntry {
    points: Points,
    #[serde(default)]
    aliases: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boss {
    pub name: String,
    pub points: Points,
    pub aliases: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BossRegistry {
    bosses: Vec<Boss>,
}

impl BossRegistry {
    /// Parses `{"Venatus": {"points": 1, "aliases": ["vena"]}, ...}`. Bosses are kept in name order.
    pub fn from_json(json: &str) -> Result<Self, BossRegistryError> {
        let entries: BTreeMap<String, BossEntry> =
            serde_json::from_str(json).map_err(|e| BossRegistryError::Json(e.to_string()))?;
        let bosses = entries
            .into_iter()
            .map(|(name, entry)| Boss { name, points: entry.points, aliases: entry.aliases })
            .collect();
        Ok(Self { bosses })
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, BossRegistryError> {
        let json = fs::read_to_string(path.as_ref()).map_err(|e| BossRegistryError::Io(e.to_string()))?;
        let registry = Self::from_json(&json)?;
        info!("🪛️ Loaded {} bosses from {}", registry.bosses.len(), path.as_ref().display());
        Ok(registry)
    }

    pub fn with_boss<S: Into<String>>(mut self, name: S, points: Points, aliases: &[&str]) -> Self {
        self.bosses.push(Boss {
            name: name.into(),
            points,
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bosses.is_empty()
    }

    pub fn bosses(&self) -> &[Boss] {
        &self.bosses
    }

    /// Resolves an operator-entered label to a boss: exact name, then exact alias (both case-insensitive), then the
    /// closest name or alias within [`MAX_BOSS_EDIT_DISTANCE`] edits. The first boss seen wins a tie.
    pub fn resolve(&self, label: &str) -> Option<&Boss> {
        let query = label.trim().to_lowercase();
        if query.is_empty() {
            return None;
        }
        if let Some(boss) = self.bosses.iter().find(|b| b.name.to_lowercase() == query) {
            return Some(boss);
        }
        if let Some(boss) = self.bosses.iter().find(|b| b.aliases.iter().any(|a| a.to_lowercase() == query)) {
            return Some(boss);
        }
        let mut best: Option<(&Boss, usize)> = None;
        for boss in &self.bosses {
            let candidates = std::iter::once(&boss.name).chain(boss.aliases.iter());
            for candidate in candidates {
                let d = levenshtein(&query, candidate);
                if best.map_or(true, |(_, best_d)| d < best_d) {
                    best = Some((boss, d));
                }
            }
        }
        match best {
            Some((boss, d)) if d <= MAX_BOSS_EDIT_DISTANCE => {
                debug!("📋 Boss label '{label}' resolved to {} ({d} edits)", boss.name);
                Some(boss)
            },
            _ => None,
        }
    }

    /// The canonical name for a label, or `None` if the label does not resolve.
    pub fn canonical_name(&self, label: &str) -> Option<&str> {
        self.resolve(label).map(|b| b.name.as_str())
    }

    /// The attendance credit of a spawn column. Unknown bosses are worth 1 point.
    pub fn points_for(&self, label: &str) -> Points {
        self.resolve(label).map(|b| b.points).unwrap_or_else(|| Points::from(1))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const JSON: &str = r#"{
        "Venatus": {"points": 1, "aliases": ["vena"]},
        "Lady Dalia": {"points": 2, "aliases": ["dalia"]},
        "Guild Boss": {"points": 5}
    }"#;

    #[test]
    fn resolves_names_aliases_and_typos() {
        let reg = BossRegistry::from_json(JSON).unwrap();
        assert_eq!(reg.bosses().len(), 3);
        assert_eq!(reg.canonical_name("venatus"), Some("Venatus"));
        assert_eq!(reg.canonical_name("  VENA "), Some("Venatus"));
        assert_eq!(reg.canonical_name("Venatsu"), Some("Venatus"));
        assert_eq!(reg.canonical_name("dalai"), Some("Lady Dalia"));
        assert_eq!(reg.canonical_name("something else"), None);
        assert_eq!(reg.canonical_name(""), None);
    }

    #[test]
    fn points() {
        let reg = BossRegistry::from_json(JSON).unwrap();
        assert_eq!(reg.points_for("Guild Boss"), Points::from(5));
        assert_eq!(reg.points_for("dalia"), Points::from(2));
        assert_eq!(reg.points_for("Unknown Worm"), Points::from(1));
    }

    #[test]
    fn bad_json() {
        assert!(matches!(BossRegistry::from_json("{not json"), Err(BossRegistryError::Json(_))));
        assert!(matches!(BossRegistry::from_file("/definitely/not/here.json"), Err(BossRegistryError::Io(_))));
    }
}
