//! NIP-89 handler announcement (kind 31990).

use crate::config::DvmConfig;
use crate::error::Result;
use crate::processor::ProcessorRegistry;
use crate::relay_api::RelayApi;
use nostr::{
    Event, HandlerInfo, HandlerMetadata, KIND_HANDLER_INFORMATION, Keys, verify_event,
};
use nostr_client::Filter;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// `d` tag of our announcement.
pub const HANDLER_IDENTIFIER: &str = "memory-curator-v1";

/// Announcement for every kind in `registry`.
pub fn handler_info(config: &DvmConfig, registry: &ProcessorRegistry) -> HandlerInfo {
    let mut params = Map::new();
    for kind in registry.kinds() {
        if let Some(Value::Object(processor_params)) =
            registry.get(kind).and_then(|p| p.nip90_params())
        {
            params.extend(processor_params);
        }
    }

    let metadata = HandlerMetadata {
        name: config.name.clone(),
        about: config.about.clone(),
        image: None,
        encryption_supported: false,
        nip90_params: (!params.is_empty()).then_some(Value::Object(params)),
    };

    HandlerInfo::new(HANDLER_IDENTIFIER, registry.kinds(), metadata)
        .with_pricing(config.result_amount_msats.unwrap_or(0), "msats")
}

/// Sign and publish an announcement.
pub async fn announce(relay: &dyn RelayApi, keys: &Keys, info: &HandlerInfo) -> Result<Event> {
    let event = keys.sign(&info.to_template()?)?;
    let report = relay.publish(&event).await?;
    info!(
        identifier = %info.identifier,
        kinds = ?info.kinds,
        relays = report.sent_to.len(),
        "published handler announcement"
    );
    Ok(event)
}

/// Announcements published by `author`, newest first.
pub async fn list_handlers(
    relay: &dyn RelayApi,
    author: &str,
    wait: Duration,
) -> Result<Vec<(Event, HandlerInfo)>> {
    let filter = Filter::new()
        .kinds(vec![KIND_HANDLER_INFORMATION])
        .authors(vec![author.to_string()]);
    let mut events = relay.query(vec![filter], wait).await?;
    events.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(events
        .into_iter()
        .filter(verify_event)
        .filter_map(|event| match HandlerInfo::from_event(&event) {
            Ok(info) => Some((event, info)),
            Err(e) => {
                debug!(event_id = %event.short_id(), error = %e, "skipping bad announcement");
                None
            }
        })
        .collect())
}
