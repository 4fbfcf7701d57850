use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::price::{format_price, PriceValue};

// ---------------------------------------------------------------------------
// Enumerated package tags
// ---------------------------------------------------------------------------

/// Which game client the package is priced for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Game {
    #[default]
    Paper,
    Mtgo,
    Arena,
}

/// Policy the backend uses to pick a print when the user has not chosen one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultSelection {
    #[default]
    Newest,
    Oldest,
    Cheapest,
    MostExpensive,
}

// ---------------------------------------------------------------------------
// CardListItem — One requested line of the card list
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardListItem {
    pub name: String,
    pub count: u32,
}

impl CardListItem {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

// ---------------------------------------------------------------------------
// CardPrint — One concrete printing of a card
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardPrint {
    /// Print id; the key version selections are synchronized on.
    pub scryfall_id: String,
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub collector_number: String,
    #[serde(default)]
    pub image_uris: Vec<String>,
    #[serde(default)]
    pub prices: BTreeMap<String, Option<PriceValue>>,
}

impl CardPrint {
    /// Normalized price for a currency key such as `"usd"` or `"tix"`.
    pub fn price(&self, currency: &str) -> Option<f64> {
        self.prices
            .get(currency)
            .and_then(|p| p.as_ref())
            .and_then(PriceValue::as_f64)
    }

    pub fn display_price(&self, currency: &str) -> String {
        format_price(currency, self.price(currency))
    }
}

// ---------------------------------------------------------------------------
// PackageEntry — One resolved line item
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageEntry {
    pub count: u32,
    /// `None` while the name is unresolved or ambiguous.
    pub oracle_id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub card_prints: Vec<CardPrint>,
    pub selected_print: Option<String>,
    #[serde(default)]
    pub user_selected: bool,
    #[serde(default)]
    pub not_found: bool,
}

impl PackageEntry {
    pub fn is_resolved(&self) -> bool {
        self.oracle_id.is_some() && !self.not_found
    }

    /// The print that currently applies to this entry.
    ///
    /// Not-found entries have no selection. A lone print is always selected.
    /// With several prints, `selected_print` counts only if it names one of
    /// them; otherwise the server default is still pending.
    pub fn effective_selection(&self) -> Option<&CardPrint> {
        if self.not_found {
            return None;
        }
        match self.card_prints.as_slice() {
            [] => None,
            [only] => Some(only),
            prints => {
                let selected = self.selected_print.as_deref()?;
                prints.iter().find(|p| p.scryfall_id == selected)
            }
        }
    }

    pub fn matches_oracle(&self, oracle_id: &str) -> bool {
        self.oracle_id.as_deref() == Some(oracle_id)
    }
}

// ---------------------------------------------------------------------------
// CardPackage — The unit of synchronization
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CardPackage {
    /// Assigned by the backend on creation.
    pub package_id: Option<String>,
    #[serde(default)]
    pub card_list: Vec<CardListItem>,
    #[serde(default)]
    pub game: Game,
    #[serde(default)]
    pub default_selection: DefaultSelection,
    #[serde(default)]
    pub package_entries: Vec<PackageEntry>,
}

impl CardPackage {
    pub fn entry_mut_by_oracle(&mut self, oracle_id: &str) -> Option<&mut PackageEntry> {
        self.package_entries
            .iter_mut()
            .find(|e| e.matches_oracle(oracle_id))
    }

    /// Point the entry with `oracle_id` at `scryfall_id`.
    ///
    /// Returns `false` and leaves every entry untouched when no entry carries
    /// that oracle id.
    pub fn apply_version_selection(&mut self, oracle_id: &str, scryfall_id: &str) -> bool {
        match self.entry_mut_by_oracle(oracle_id) {
            Some(entry) => {
                entry.selected_print = Some(scryfall_id.to_string());
                entry.user_selected = true;
                true
            }
            None => false,
        }
    }

    /// Total number of cards requested.
    pub fn card_count(&self) -> u32 {
        self.card_list.iter().map(|c| c.count).sum()
    }

    /// Sum of `count × price` over every entry with an effective selection
    /// that has a price in `currency`.
    pub fn total_price(&self, currency: &str) -> f64 {
        self.package_entries
            .iter()
            .filter_map(|e| {
                e.effective_selection()
                    .and_then(|p| p.price(currency))
                    .map(|price| price * f64::from(e.count))
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn print(id: &str, usd: f64) -> CardPrint {
        CardPrint {
            scryfall_id: id.to_string(),
            set_name: "Alpha".to_string(),
            collector_number: "1".to_string(),
            image_uris: Vec::new(),
            prices: BTreeMap::from([("usd".to_string(), Some(PriceValue::Number(usd)))]),
        }
    }

    fn entry(oracle: &str, prints: Vec<CardPrint>, selected: Option<&str>) -> PackageEntry {
        PackageEntry {
            count: 2,
            oracle_id: Some(oracle.to_string()),
            name: oracle.to_uppercase(),
            card_prints: prints,
            selected_print: selected.map(str::to_string),
            user_selected: false,
            not_found: false,
        }
    }

    #[test]
    fn single_print_is_implicitly_selected() {
        let e = entry("o1", vec![print("a", 1.0)], None);
        assert_eq!(e.effective_selection().unwrap().scryfall_id, "a");
    }

    #[test]
    fn selection_must_reference_a_print() {
        let e = entry("o1", vec![print("a", 1.0), print("b", 2.0)], Some("zzz"));
        assert!(e.effective_selection().is_none());
        let e = entry("o1", vec![print("a", 1.0), print("b", 2.0)], Some("b"));
        assert_eq!(e.effective_selection().unwrap().scryfall_id, "b");
    }

    #[test]
    fn not_found_entry_has_no_selection() {
        let mut e = entry("o1", vec![print("a", 1.0)], Some("a"));
        e.not_found = true;
        assert!(e.effective_selection().is_none());
        assert!(!e.is_resolved());
    }

    #[test]
    fn total_price_multiplies_by_count() {
        let pkg = CardPackage {
            package_entries: vec![
                entry("o1", vec![print("a", 1.5)], None),
                entry("o2", vec![print("b", 2.0), print("c", 9.0)], None),
            ],
            ..Default::default()
        };
        assert!((pkg.total_price("usd") - 3.0).abs() < 1e-9);
    }

    #[test]
    fn deserializes_backend_shape() {
        let pkg: CardPackage = serde_json::from_value(serde_json::json!({
            "package_id": "p1",
            "card_list": [{"name": "Lightning Bolt", "count": 4}],
            "game": "mtgo",
            "default_selection": "most_expensive",
            "package_entries": [{
                "count": 4,
                "oracle_id": null,
                "name": "Lightning Bolt",
                "card_prints": [],
                "selected_print": null
            }]
        }))
        .unwrap();
        assert_eq!(pkg.package_id.as_deref(), Some("p1"));
        assert_eq!(pkg.game, Game::Mtgo);
        assert_eq!(pkg.default_selection, DefaultSelection::MostExpensive);
        assert!(!pkg.package_entries[0].not_found);
        assert_eq!(pkg.card_count(), 4);
    }
}
