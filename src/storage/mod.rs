//! Persistence layer.
//!
//! Saves and loads the event history to/from a JSON file so that the log
//! survives restarts. Scheduler state is deliberately not persisted: it
//! is rebuilt from the venue clock on every start.

use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::journal::Event;

/// Save the event history to a JSON file.
pub fn save_history(events: &[Event], path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(events)
        .context("Failed to serialise event history")?;

    std::fs::write(path, &json)
        .context(format!("Failed to write history to {path}"))?;

    debug!(path, events = events.len(), "History saved");
    Ok(())
}

/// Load the event history from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_history(path: &str) -> Result<Option<Vec<Event>>> {
    if !Path::new(path).exists() {
        info!(path, "No saved history found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path)
        .context(format!("Failed to read history from {path}"))?;

    let events: Vec<Event> = serde_json::from_str(&json)
        .context(format!("Failed to parse history from {path}"))?;

    info!(path, events = events.len(), "History loaded from disk");

    Ok(Some(events))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
