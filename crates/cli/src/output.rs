//! Rendering of delivered changes on stdout

use anyhow::{Context, Result};
use filegate_watcher::{ChangeEvent, ChangeKind};

/// Render one change as a single line
pub fn format_change(event: &ChangeEvent, json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(event).context("Failed to serialize change");
    }

    let kind = match event.kind() {
        ChangeKind::Created => "created",
        ChangeKind::Modified => "modified",
        ChangeKind::Deleted => "deleted",
        ChangeKind::Renamed => "renamed",
    };
    let line = match event.old_path() {
        Some(old) => format!(
            "{kind:<8} {} -> {} ({} bytes)",
            old.display(),
            event.path().display(),
            event.file_size()
        ),
        None => format!(
            "{kind:<8} {} ({} bytes)",
            event.path().display(),
            event.file_size()
        ),
    };
    Ok(line)
}

/// Render a batch; JSON output is one array per batch
pub fn format_batch(events: &[ChangeEvent], json: bool) -> Result<String> {
    if json {
        return serde_json::to_string(events).context("Failed to serialize batch");
    }

    let mut lines = vec![format!("batch of {} changes", events.len())];
    for event in events {
        lines.push(format!("  {}", format_change(event, false)?));
    }
    Ok(lines.join("\n"))
}
