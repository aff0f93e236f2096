//! # Utilities Module
//!
//! Shared helpers for exporting merged state in human-readable form.

use crate::dispatch::Dispatcher;
use crate::series::Timestamp;
use crate::units::UnitSystem;
use anyhow::Result;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Render an epoch timestamp as RFC 3339, falling back to the raw seconds
/// when it is out of range.
pub fn format_timestamp(timestamp: Timestamp) -> String {
    OffsetDateTime::from_unix_timestamp(timestamp)
        .ok()
        .and_then(|datetime| datetime.format(&Rfc3339).ok())
        .unwrap_or_else(|| timestamp.to_string())
}

/// Export the merged state to a text summary, one line per key, values
/// rendered in the given unit system.
pub fn export_to_text_summary(dispatcher: &Dispatcher, system: UnitSystem) -> Result<String> {
    let mut summary = String::new();

    summary.push_str("Merged State Summary\n");
    summary.push_str("====================\n\n");

    let keys = dispatcher.keys();
    let stats = dispatcher.stats();
    summary.push_str(&format!("Total Keys: {}\n", keys.len()));
    summary.push_str(&format!("Updates Applied: {}\n", stats.updates));
    summary.push_str(&format!("Pending Monitors: {}\n\n", stats.pending_monitors));

    for key in keys {
        let Some(merged) = dispatcher.merged(&key) else {
            continue;
        };
        match merged.value() {
            Some(resolved) => {
                let display = resolved
                    .measurement()
                    .convert(system)
                    .unwrap_or_else(|_| resolved.measurement().clone());
                summary.push_str(&format!(
                    "{} = {} [{} {} @ {}]{}\n",
                    key,
                    display,
                    resolved.source(),
                    resolved.origin(),
                    format_timestamp(resolved.timestamp()),
                    if merged.has_forecast() { " +forecast" } else { "" },
                ));
            }
            None => summary.push_str(&format!("{} = <unresolved>\n", key)),
        }

        let sources = merged.sources();
        if sources.len() > 1 {
            let names: Vec<&str> = sources.iter().map(|source| source.as_str()).collect();
            summary.push_str(&format!("    sources: {}\n", names.join(", ")));
        }
    }

    Ok(summary)
}

/// Save a summary to a file.
pub fn save_summary_to_file(summary: &str, filename: &str) -> Result<()> {
    std::fs::write(filename, summary)?;
    println!("Summary saved to: {}", filename);
    Ok(())
}
