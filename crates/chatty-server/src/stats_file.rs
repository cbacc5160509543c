use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use chatty_core::Stats;

/// Appends one formatted line to the stats file, creating it if needed.
/// Matches the original's `plotStats`: an append-only log rather than a
/// rewritten snapshot, so a `tail -f` shows every dump in sequence.
pub fn append_snapshot(path: &Path, stats: &Stats) -> io::Result<()> {
    let timestamp = chrono::Utc::now().to_rfc3339();
    let line = stats.format_line(&timestamp);
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")
}
