//! Sync progress reporting.
//!
//! Reports what `psync sync` and `psync push` are doing: listing remote
//! files, pulling them, pushing local projects. Progress goes to
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for a sync pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncProgressEvent {
    /// Listing remote project files. Total unknown.
    Listing,
    /// Remote project `n` of `total` loaded.
    Pulling { n: u64, total: u64 },
    /// Local project `n` of `total` pushed (or attempted).
    Pushing { n: u64, total: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync  pushing  3 / 12 projects".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::Listing => "sync  listing remote projects...\n".to_string(),
            SyncProgressEvent::Pulling { n, total } => format!(
                "sync  pulling  {} / {} projects\n",
                format_number(*n),
                format_number(*total)
            ),
            SyncProgressEvent::Pushing { n, total } => format!(
                "sync  pushing  {} / {} projects\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl JsonProgress {
    fn to_json(event: &SyncProgressEvent) -> serde_json::Value {
        match event {
            SyncProgressEvent::Listing => serde_json::json!({
                "event": "progress",
                "phase": "listing"
            }),
            SyncProgressEvent::Pulling { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "pulling",
                "n": n,
                "total": total
            }),
            SyncProgressEvent::Pushing { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "pushing",
                "n": n,
                "total": total
            }),
        }
    }
}

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        if let Ok(line) = serde_json::to_string(&Self::to_json(&event)) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(1), "1");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1234), "1,234");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn json_events_name_their_phase() {
        let v = JsonProgress::to_json(&SyncProgressEvent::Pushing { n: 2, total: 5 });
        assert_eq!(v["phase"], "pushing");
        assert_eq!(v["n"], 2);
        assert_eq!(v["total"], 5);
        assert_eq!(
            JsonProgress::to_json(&SyncProgressEvent::Listing)["phase"],
            "listing"
        );
    }
}
