//! Load status reporting.
//!
//! The driver is the only writer of catalog status. It publishes
//! [`StatusUpdate`]s to a [`StatusSurface`]; the CLI picks the surface with
//! `--status`. Human and JSON surfaces write to **stderr** so stdout stays
//! parseable for scripts.

use std::io::Write;
use std::sync::{Arc, Mutex};

/// One status property change.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StatusUpdate {
    /// Free-form load status, e.g. `"Loading: 1,234 titles processed so far"`.
    LoadStatus(String),
    /// Persistent id of the catalog now being served.
    PersistentId(String),
    /// Number of titles in the catalog now being served.
    TitleCount(u64),
}

/// Receives status updates from the driver.
pub trait StatusSurface: Send + Sync {
    fn publish(&self, update: StatusUpdate);
}

/// Human-friendly status on stderr: "catalog  status  Loading: 1,234 titles processed so far".
pub struct StderrStatus;

impl StatusSurface for StderrStatus {
    fn publish(&self, update: StatusUpdate) {
        let line = match &update {
            StatusUpdate::LoadStatus(s) => format!("catalog  status  {}\n", s),
            StatusUpdate::PersistentId(id) => format!("catalog  id      {}\n", id),
            StatusUpdate::TitleCount(n) => format!("catalog  titles  {}\n", format_number(*n)),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable status: one JSON object per line on stderr.
pub struct JsonStatus;

impl StatusSurface for JsonStatus {
    fn publish(&self, update: StatusUpdate) {
        let obj = match &update {
            StatusUpdate::LoadStatus(s) => serde_json::json!({
                "event": "status",
                "load_status": s
            }),
            StatusUpdate::PersistentId(id) => serde_json::json!({
                "event": "status",
                "persistent_id": id
            }),
            StatusUpdate::TitleCount(n) => serde_json::json!({
                "event": "status",
                "title_count": n
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// Drops every update.
pub struct NoStatus;

impl StatusSurface for NoStatus {
    fn publish(&self, _update: StatusUpdate) {}
}

/// Keeps every update in memory. Clones share the same log.
#[derive(Clone, Default)]
pub struct MemoryStatus {
    updates: Arc<Mutex<Vec<StatusUpdate>>>,
}

impl MemoryStatus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<StatusUpdate> {
        self.updates
            .lock()
            .map(|u| u.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Most recent `LoadStatus` text.
    pub fn load_status(&self) -> Option<String> {
        self.updates().into_iter().rev().find_map(|u| match u {
            StatusUpdate::LoadStatus(s) => Some(s),
            _ => None,
        })
    }

    pub fn persistent_id(&self) -> Option<String> {
        self.updates().into_iter().rev().find_map(|u| match u {
            StatusUpdate::PersistentId(id) => Some(id),
            _ => None,
        })
    }

    pub fn title_count(&self) -> Option<u64> {
        self.updates().into_iter().rev().find_map(|u| match u {
            StatusUpdate::TitleCount(n) => Some(n),
            _ => None,
        })
    }
}

impl StatusSurface for MemoryStatus {
    fn publish(&self, update: StatusUpdate) {
        let mut updates = self
            .updates
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        updates.push(update);
    }
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Status mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StatusMode {
    Off,
    Human,
    Json,
}

impl StatusMode {
    /// Default: human status when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            StatusMode::Human
        } else {
            StatusMode::Off
        }
    }

    pub fn surface(&self) -> Arc<dyn StatusSurface> {
        match self {
            StatusMode::Off => Arc::new(NoStatus),
            StatusMode::Human => Arc::new(StderrStatus),
            StatusMode::Json => Arc::new(JsonStatus),
        }
    }
}
