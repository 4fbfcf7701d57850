use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// PriceValue — A price as the backend happens to encode it
// ---------------------------------------------------------------------------

/// A single price value.
///
/// The backend is inconsistent about how prices are encoded: plain JSON
/// numbers, numeric strings (`"1.23"`), and decimal wrappers
/// (`{"$numberDecimal": "1.23"}`) all appear. Use [`as_f64`](Self::as_f64)
/// before doing arithmetic or display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriceValue {
    Number(f64),
    Text(String),
    Decimal {
        #[serde(rename = "$numberDecimal")]
        value: String,
    },
}

impl PriceValue {
    /// Normalize to a float. Unparseable or non-finite values yield `None`.
    pub fn as_f64(&self) -> Option<f64> {
        let parsed = match self {
            PriceValue::Number(n) => Some(*n),
            PriceValue::Text(s) | PriceValue::Decimal { value: s } => s.trim().parse::<f64>().ok(),
        };
        parsed.filter(|n| n.is_finite())
    }
}

impl From<f64> for PriceValue {
    fn from(value: f64) -> Self {
        PriceValue::Number(value)
    }
}

/// Format a normalized price for the given currency key.
///
/// Keys containing `tix` render as MTGO tickets, `eur` keys with a euro
/// sign, everything else as US dollars.
pub fn format_price(currency: &str, amount: Option<f64>) -> String {
    let Some(amount) = amount else {
        return "n/a".to_string();
    };
    let key = currency.to_ascii_lowercase();
    if key.contains("tix") {
        format!("{amount:.2} tix")
    } else if key.contains("eur") {
        format!("€{amount:.2}")
    } else {
        format!("${amount:.2}")
    }
}
