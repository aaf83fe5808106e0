//! NIP-89: Recommended Application Handlers
//!
//! A DVM announces which job kinds it serves with an addressable kind 31990
//! event. The `d` tag identifies the handler, one `k` tag names each
//! supported kind, and the JSON content describes it for humans.

use crate::nip01::{Event, EventTemplate};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Handler information announcement
pub const KIND_HANDLER_INFORMATION: u16 = 31990;

#[derive(Debug, Error)]
pub enum Nip89Error {
    #[error("invalid kind: {0} (expected 31990)")]
    InvalidKind(u16),

    #[error("missing required tag: {0}")]
    MissingTag(String),

    #[error("invalid content: {0}")]
    InvalidContent(#[from] serde_json::Error),
}

/// Human-facing part of a handler announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerMetadata {
    pub name: String,
    #[serde(default)]
    pub about: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default)]
    pub encryption_supported: bool,
    /// Parameter descriptions keyed by `param` name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nip90_params: Option<Value>,
}

/// Advertised price per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerPricing {
    pub amount: u64,
    pub unit: String,
}

/// A kind 31990 handler announcement.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerInfo {
    /// Value of the `d` tag
    pub identifier: String,
    pub kinds: Vec<u16>,
    pub metadata: HandlerMetadata,
    pub pricing: Option<HandlerPricing>,
}

impl HandlerInfo {
    pub fn new(identifier: impl Into<String>, kinds: Vec<u16>, metadata: HandlerMetadata) -> Self {
        Self {
            identifier: identifier.into(),
            kinds,
            metadata,
            pricing: None,
        }
    }

    pub fn with_pricing(mut self, amount: u64, unit: impl Into<String>) -> Self {
        self.pricing = Some(HandlerPricing {
            amount,
            unit: unit.into(),
        });
        self
    }

    pub fn to_tags(&self) -> Vec<Vec<String>> {
        let mut tags = vec![vec!["d".to_string(), self.identifier.clone()]];
        for kind in &self.kinds {
            tags.push(vec!["k".to_string(), kind.to_string()]);
        }
        if let Some(pricing) = &self.pricing {
            tags.push(vec![
                "amount".to_string(),
                pricing.amount.to_string(),
                pricing.unit.clone(),
            ]);
        }
        tags
    }

    pub fn to_template(&self) -> Result<EventTemplate, Nip89Error> {
        let content = serde_json::to_string(&self.metadata)?;
        Ok(EventTemplate::new(KIND_HANDLER_INFORMATION, content).with_tags(self.to_tags()))
    }

    pub fn from_event(event: &Event) -> Result<Self, Nip89Error> {
        if event.kind != KIND_HANDLER_INFORMATION {
            return Err(Nip89Error::InvalidKind(event.kind));
        }

        let identifier = event
            .tag_value("d")
            .ok_or_else(|| Nip89Error::MissingTag("d".to_string()))?
            .to_string();
        let kinds = event
            .tags_named("k")
            .filter_map(|tag| tag.get(1).and_then(|k| k.parse().ok()))
            .collect();
        let pricing = event.tag("amount").and_then(|tag| {
            Some(HandlerPricing {
                amount: tag.get(1)?.parse().ok()?,
                unit: tag.get(2).cloned().unwrap_or_else(|| "msats".to_string()),
            })
        });

        Ok(Self {
            identifier,
            kinds,
            metadata: serde_json::from_str(&event.content)?,
            pricing,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn metadata() -> HandlerMetadata {
        HandlerMetadata {
            name: "Memory Curator".to_string(),
            about: "Suggests memory updates".to_string(),
            image: None,
            encryption_supported: false,
            nip90_params: Some(json!({"style": {"values": ["concise", "detailed"]}})),
        }
    }

    #[test]
    fn test_tags() {
        let info = HandlerInfo::new("memory-curator-v1", vec![5700], metadata()).with_pricing(0, "msats");
        let tags = info.to_tags();
        assert_eq!(tags[0], vec!["d", "memory-curator-v1"]);
        assert_eq!(tags[1], vec!["k", "5700"]);
        assert_eq!(tags[2], vec!["amount", "0", "msats"]);
    }

    #[test]
    fn test_content_uses_camel_case() {
        let template = HandlerInfo::new("x", vec![5700], metadata()).to_template().unwrap();
        assert!(template.content.contains("\"encryptionSupported\":false"));
        assert!(template.content.contains("\"nip90Params\""));
        assert!(!template.content.contains("image"));
    }

    #[test]
    fn test_from_event() {
        let info = HandlerInfo::new("memory-curator-v1", vec![5700], metadata()).with_pricing(0, "msats");
        let template = info.to_template().unwrap();
        let event = Event {
            id: "a".repeat(64),
            pubkey: "b".repeat(64),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: "c".repeat(128),
        };

        assert_eq!(HandlerInfo::from_event(&event).unwrap(), info);
    }

    #[test]
    fn test_from_event_wrong_kind() {
        let event = Event {
            id: String::new(),
            pubkey: String::new(),
            created_at: 0,
            kind: 1,
            tags: vec![],
            content: String::new(),
            sig: String::new(),
        };
        assert!(matches!(
            HandlerInfo::from_event(&event),
            Err(Nip89Error::InvalidKind(1))
        ));
    }
}
