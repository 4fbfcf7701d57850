//! Realtime message shapes exchanged with the package service.
//!
//! Every message is a JSON object discriminated by its `type` field.
//! Outbound messages carry `{type, packageId, data}`; inbound ones are
//! broadcasts to everyone in the package's room.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::CardListItem;

/// A version pick for one entry, keyed by the entry's oracle id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionSelection {
    pub oracle_id: String,
    pub scryfall_id: String,
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum OutboundMessage {
    JoinPackage {
        #[serde(rename = "packageId")]
        package_id: String,
    },
    LeavePackage {
        #[serde(rename = "packageId")]
        package_id: String,
    },
    UpdateCardList {
        #[serde(rename = "packageId")]
        package_id: String,
        data: Vec<CardListItem>,
    },
    UpdateVersionSelection {
        #[serde(rename = "packageId")]
        package_id: String,
        data: VersionSelection,
    },
}

impl OutboundMessage {
    pub fn package_id(&self) -> &str {
        match self {
            OutboundMessage::JoinPackage { package_id }
            | OutboundMessage::LeavePackage { package_id }
            | OutboundMessage::UpdateCardList { package_id, .. }
            | OutboundMessage::UpdateVersionSelection { package_id, .. } => package_id,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum InboundMessage {
    /// Authoritative replacement of the whole card list.
    CardListUpdated { data: Vec<CardListItem> },
    VersionSelectionUpdated { data: VersionSelection },
    /// Room join acknowledgement.
    JoinedPackage {
        #[serde(rename = "packageId", default)]
        package_id: Option<String>,
    },
    Error { error: String },
}

impl InboundMessage {
    /// Parse a text frame. Unknown `type` values are rejected.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Whether this is the server telling us the package is gone.
    pub fn is_package_not_found(&self) -> bool {
        matches!(self, InboundMessage::Error { error } if error.to_lowercase().contains("package not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn outbound_uses_type_package_id_data_shape() {
        let msg = OutboundMessage::UpdateVersionSelection {
            package_id: "p1".to_string(),
            data: VersionSelection {
                oracle_id: "o1".to_string(),
                scryfall_id: "s1".to_string(),
            },
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "update-version-selection",
                "packageId": "p1",
                "data": {"oracle_id": "o1", "scryfall_id": "s1"}
            })
        );
    }

    #[test]
    fn join_has_no_data() {
        let msg = OutboundMessage::JoinPackage {
            package_id: "p1".to_string(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "join-package", "packageId": "p1"}));
    }

    #[test]
    fn parses_each_inbound_kind() {
        let list = InboundMessage::parse(
            r#"{"type":"card-list-updated","data":[{"name":"Opt","count":2}]}"#,
        )
        .unwrap();
        assert_eq!(
            list,
            InboundMessage::CardListUpdated {
                data: vec![CardListItem::new("Opt", 2)]
            }
        );

        let joined = InboundMessage::parse(r#"{"type":"joined-package","packageId":"p1"}"#).unwrap();
        assert_eq!(
            joined,
            InboundMessage::JoinedPackage {
                package_id: Some("p1".to_string())
            }
        );

        let err = InboundMessage::parse(r#"{"type":"error","error":"Package not found"}"#).unwrap();
        assert!(err.is_package_not_found());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(InboundMessage::parse(r#"{"type":"something-else"}"#).is_err());
    }
}
