//! The historical item catalog, and nearest-neighbour correction of operator-entered item labels against it.
use ledger_common::Points;
use log::*;
use serde::{Deserialize, Serialize};

use crate::{
    db_types::{CatalogItem, ItemStatus, Row},
    helpers::similarity,
    sheets::item_from_row,
};

/// The outcome of matching one label against the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogMatch {
    pub input: String,
    /// The catalog spelling, if the label matched. `None` means the label is a new item.
    pub corrected_name: Option<String>,
    pub suggested_price: Option<Points>,
    pub similarity: f64,
    pub is_exact_match: bool,
}

impl CatalogMatch {
    fn no_match(input: &str, similarity: f64) -> Self {
        Self { input: input.to_string(), corrected_name: None, suggested_price: None, similarity, is_exact_match: false }
    }

    pub fn is_match(&self) -> bool {
        self.corrected_name.is_some()
    }

    pub fn is_fuzzy_match(&self) -> bool {
        self.is_match() && !self.is_exact_match
    }

    /// The label to use from here on: the catalog spelling if there was a match, otherwise the trimmed input.
    pub fn label(&self) -> &str {
        self.corrected_name.as_deref().unwrap_or_else(|| self.input.trim())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    items: Vec<CatalogItem>,
}

impl Catalog {
    pub fn new(items: Vec<CatalogItem>) -> Self {
        Self { items }
    }

    /// Builds the catalog from settled auction history, oldest rows first. The first spelling seen for a name
    /// (compared case-insensitively) is kept; the price is updated to the most recent one.
    pub fn from_history<'a, I: IntoIterator<Item = &'a Row>>(rows: I) -> Self {
        let mut catalog = Self::default();
        for item in rows.into_iter().filter_map(|r| item_from_row(r)) {
            if matches!(item.status, ItemStatus::Queued | ItemStatus::Open) {
                continue;
            }
            catalog.record(&item.label, item.start_price);
        }
        catalog
    }

    pub fn record(&mut self, name: &str, price: Points) {
        let name = name.trim();
        if name.is_empty() {
            return;
        }
        let lowered = name.to_lowercase();
        match self.items.iter_mut().find(|c| c.name.to_lowercase() == lowered) {
            Some(existing) => existing.last_start_price = price,
            None => self.items.push(CatalogItem::new(name, price)),
        }
    }

    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn find_best_match(&self, label: &str, threshold: f64) -> CatalogMatch {
        find_best_match(label, &self.items, threshold)
    }
}

/// Greedy nearest-neighbour match of `label` against `catalog`.
///
/// 1. A case-insensitive exact match wins outright, with similarity 1.0.
/// 2. Otherwise the candidate with the highest edit-distance similarity is kept; the first one scanned wins a tie.
/// 3. That candidate is accepted only if its similarity reaches `threshold`.
pub fn find_best_match(label: &str, catalog: &[CatalogItem], threshold: f64) -> CatalogMatch {
    let query = label.trim();
    if query.is_empty() {
        return CatalogMatch::no_match(label, 0.0);
    }
    let lowered = query.to_lowercase();
    if let Some(exact) = catalog.iter().find(|c| c.name.trim().to_lowercase() == lowered) {
        return CatalogMatch {
            input: label.to_string(),
            corrected_name: Some(exact.name.clone()),
            suggested_price: Some(exact.last_start_price),
            similarity: 1.0,
            is_exact_match: true,
        };
    }
    let mut best: Option<(&CatalogItem, f64)> = None;
    for candidate in catalog {
        let score = similarity(query, candidate.name.trim());
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((candidate, score));
        }
    }
    match best {
        Some((candidate, score)) if score >= threshold => {
            debug!("🔨 Corrected item label '{query}' to '{}' (similarity {score:.2})", candidate.name);
            CatalogMatch {
                input: label.to_string(),
                corrected_name: Some(candidate.name.clone()),
                suggested_price: Some(candidate.last_start_price),
                similarity: score,
                is_exact_match: false,
            }
        },
        Some((_, score)) => CatalogMatch::no_match(label, score),
        None => CatalogMatch::no_match(label, 0.0),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        db_types::Cell,
        sheets::{item_cols, ITEMS_HEADER},
    };

    fn catalog() -> Vec<CatalogItem> {
        vec![
            CatalogItem::new("Blue Ring", Points::from(500)),
            CatalogItem::new("Red Ring", Points::from(300)),
            CatalogItem::new("Dragon Scale", Points::from(1200)),
        ]
    }

    #[test]
    fn exact_matches_ignore_case() {
        let m = find_best_match("  blue RING ", &catalog(), 0.7);
        assert!(m.is_exact_match);
        assert_eq!(m.similarity, 1.0);
        assert_eq!(m.corrected_name.as_deref(), Some("Blue Ring"));
        assert_eq!(m.suggested_price, Some(Points::from(500)));
    }

    #[test]
    fn typos_are_corrected() {
        let m = find_best_match("Blue Rign", &[CatalogItem::new("Blue Ring", Points::from(500))], 0.7);
        assert!(m.is_fuzzy_match());
        assert!(m.similarity >= 0.7);
        assert_eq!(m.label(), "Blue Ring");
        assert_eq!(m.suggested_price, Some(Points::from(500)));
    }

    #[test]
    fn distinct_names_are_new_items() {
        let m = find_best_match("Golden Helmet", &catalog(), 0.7);
        assert!(!m.is_match());
        assert!(m.similarity < 0.7);
        assert_eq!(m.suggested_price, None);
        assert_eq!(m.label(), "Golden Helmet");
        assert!(!find_best_match("", &catalog(), 0.7).is_match());
        assert!(!find_best_match("Blue Ring", &[], 0.7).is_match());
    }

    #[test]
    fn ties_go_to_the_first_candidate() {
        let items = vec![CatalogItem::new("Ring A", Points::from(1)), CatalogItem::new("Ring B", Points::from(2))];
        let m = find_best_match("Ring C", &items, 0.5);
        assert_eq!(m.corrected_name.as_deref(), Some("Ring A"));
    }

    #[test]
    fn history_keeps_first_spelling_and_latest_price() {
        let row = |label: &str, price: i64, winner: &str| {
            let mut r = vec![Cell::Empty; ITEMS_HEADER.len()];
            r[item_cols::ITEM] = Cell::from(label);
            r[item_cols::START_PRICE] = Cell::Int(price);
            r[item_cols::WINNER] = Cell::from(winner);
            r
        };
        let rows = vec![row("Blue Ring", 400, "alice"), row("blue ring", 550, "bob"), row("Unsold Hat", 10, "")];
        let catalog = Catalog::from_history(rows.iter());
        assert_eq!(catalog.items(), &[CatalogItem::new("Blue Ring", Points::from(550))]);
    }
}
