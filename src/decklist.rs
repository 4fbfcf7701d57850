//! Plain-text card list parsing and formatting.
//!
//! Accepts the usual pasted-decklist shape, one card per line with an
//! optional leading count:
//!
//! ```text
//! 4 Lightning Bolt
//! 2x Counterspell
//! Sol Ring
//! // sideboard notes are ignored
//! ```
//!
//! Validation happens here, before anything reaches the network.

use std::collections::HashMap;

use crate::error::{MtgvError, Result};
use crate::models::CardListItem;

/// Parse a pasted card list.
///
/// Lines without a count default to 1. Duplicate names (compared
/// case-insensitively) are merged into the first occurrence, keeping its
/// spelling and position. Blank lines and lines starting with `//` or `#`
/// are skipped.
///
/// # Errors
///
/// Returns [`MtgvError::InvalidArgument`] naming the 1-based line for a zero
/// count, a count too large for `u32`, a missing name, or a name containing
/// control characters.
pub fn parse_card_list(text: &str) -> Result<Vec<CardListItem>> {
    let mut items: Vec<CardListItem> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for (i, raw) in text.lines().enumerate() {
        let line_no = i + 1;
        let line = raw.trim();
        if line.is_empty() || line.starts_with("//") || line.starts_with('#') {
            continue;
        }

        let Some((count, name)) = split_count(line) else {
            return Err(MtgvError::InvalidArgument(format!(
                "Line {line_no}: count is too large"
            )));
        };
        let name = name.trim();

        if count == 0 {
            return Err(MtgvError::InvalidArgument(format!(
                "Line {line_no}: count must be at least 1"
            )));
        }
        if name.is_empty() {
            return Err(MtgvError::InvalidArgument(format!(
                "Line {line_no}: missing card name"
            )));
        }
        if name.chars().any(char::is_control) {
            return Err(MtgvError::InvalidArgument(format!(
                "Line {line_no}: invalid card name '{}'",
                name.escape_default()
            )));
        }

        let key = name.to_lowercase();
        match index.get(&key) {
            Some(&pos) => items[pos].count = items[pos].count.saturating_add(count),
            None => {
                index.insert(key, items.len());
                items.push(CardListItem::new(name, count));
            }
        }
    }

    Ok(items)
}

/// Render a card list back to text, one `"{count} {name}"` per line.
pub fn format_card_list(cards: &[CardListItem]) -> String {
    cards
        .iter()
        .map(|c| format!("{} {}", c.count, c.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Split an optional leading `N` or `Nx` count off a line.
///
/// Returns `None` when the count does not fit in a `u32`.
fn split_count(line: &str) -> Option<(u32, &str)> {
    let digits = line.bytes().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return Some((1, line));
    }
    let rest = &line[digits..];
    let rest = rest
        .strip_prefix('x')
        .or_else(|| rest.strip_prefix('X'))
        .unwrap_or(rest);
    // "2x4 Lumber" has no separator after the count: the digits are part of the name.
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return Some((1, line));
    }
    let count = line[..digits].parse::<u32>().ok()?;
    Some((count, rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_counts_and_defaults() {
        let cards = parse_card_list("4 Lightning Bolt\n2x Counterspell\nSol Ring\n").unwrap();
        assert_eq!(
            cards,
            vec![
                CardListItem::new("Lightning Bolt", 4),
                CardListItem::new("Counterspell", 2),
                CardListItem::new("Sol Ring", 1),
            ]
        );
    }

    #[test]
    fn skips_comments_and_blank_lines() {
        let cards = parse_card_list("\n// main\n# note\n  3 Opt  \n\n").unwrap();
        assert_eq!(cards, vec![CardListItem::new("Opt", 3)]);
    }

    #[test]
    fn merges_duplicates_case_insensitively() {
        let cards = parse_card_list("2 Opt\n1 Sol Ring\n1 opt").unwrap();
        assert_eq!(
            cards,
            vec![CardListItem::new("Opt", 3), CardListItem::new("Sol Ring", 1)]
        );
    }

    #[test]
    fn number_without_separator_is_part_of_name() {
        let cards = parse_card_list("2x4 Lumber\n1 1996 World Champion").unwrap();
        assert_eq!(
            cards,
            vec![
                CardListItem::new("2x4 Lumber", 1),
                CardListItem::new("1996 World Champion", 1),
            ]
        );
    }

    #[test]
    fn rejects_zero_count_with_line_number() {
        let err = parse_card_list("1 Opt\n0 Sol Ring").unwrap_err();
        match err {
            MtgvError::InvalidArgument(msg) => assert!(msg.starts_with("Line 2")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_overflowing_count_with_line_number() {
        let err = parse_card_list("1 Opt\n99999999999 Opt").unwrap_err();
        match err {
            MtgvError::InvalidArgument(msg) => {
                assert!(msg.starts_with("Line 2"));
                assert!(msg.contains("too large"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rejects_missing_name() {
        assert!(matches!(
            parse_card_list("4x   "),
            Err(MtgvError::InvalidArgument(_))
        ));
    }

    #[test]
    fn format_is_inverse_of_parse() {
        let text = "4 Lightning Bolt\n1 Sol Ring";
        assert_eq!(format_card_list(&parse_card_list(text).unwrap()), text);
    }
}
