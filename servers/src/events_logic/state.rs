use crate::events_logic::config::Config;
use anyhow::{Context, Result};
use lib_events::http::AppState;
use lib_events::services::inventory::{seed, InventoryFile};
use lib_events::services::{MemoryEventCache, MemoryInventory, StaticAuthorizer};
use lib_events::EventStreamService;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Wires the in-memory collaborators into the shared handler state.
pub fn build_state(config: &Config, shutdown: CancellationToken) -> Result<AppState> {
    let inventory = MemoryInventory::new(config.group_label(), config.default_namespace());
    let cache = MemoryEventCache::default();

    match &config.inventory_path {
        Some(path) => {
            let file = read_inventory(path)?;
            seed(&file, &inventory, &cache)?;
        }
        None => log::warn!("No inventory file configured; every stream will report its cluster as not found."),
    }

    let tokens = config.viewer_tokens();
    let authorizer = if tokens.is_empty() {
        log::warn!("No viewer tokens configured; streams are open to everyone.");
        StaticAuthorizer::allow_all()
    } else {
        StaticAuthorizer::with_tokens(tokens)
    };

    let service = EventStreamService::new(
        Arc::new(authorizer),
        Arc::new(inventory.clone()),
        Arc::new(inventory),
        Arc::new(cache.clone()),
        config.session_config(),
    );

    Ok(AppState {
        service,
        cache,
        shutdown,
    })
}

fn read_inventory(path: &Path) -> Result<InventoryFile> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read inventory file {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse inventory file {}", path.display()))
}
