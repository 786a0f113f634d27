//! Error manager: classifies incoming errors into [`ErrorRecord`]s and
//! stores them in a bounded per-subsystem ring buffer (§3, §4.5).

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use uuid::Uuid;

use crate::error::KernelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Info,
    Warning,
    Error,
    Fatal,
}

/// One classified error occurrence (§3 Error Record).
#[derive(Debug, Clone)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub kind: &'static str,
    pub severity: ErrorSeverity,
    pub subsystem: String,
    pub path: Option<String>,
    pub code: Option<String>,
    pub metadata: serde_json::Value,
    pub timestamp_unix_ms: u128,
}

fn classify(err: &KernelError) -> (&'static str, ErrorSeverity) {
    match err {
        KernelError::UnknownPrincipal { .. } => ("UnknownPrincipal", ErrorSeverity::Warning),
        KernelError::UnknownDestination { .. } => ("UnknownDestination", ErrorSeverity::Warning),
        KernelError::PermissionDenied { .. } => ("PermissionDenied", ErrorSeverity::Warning),
        KernelError::QueueFull { .. } => ("QueueFull", ErrorSeverity::Warning),
        KernelError::RouteNotFound { .. } => ("RouteNotFound", ErrorSeverity::Warning),
        KernelError::HandlerFailure { .. } => ("HandlerFailure", ErrorSeverity::Error),
        KernelError::ResponseTimeout { .. } => ("ResponseTimeout", ErrorSeverity::Warning),
        KernelError::ReservedName { .. } => ("ReservedName", ErrorSeverity::Error),
        KernelError::DuplicateSubsystem { .. } => ("DuplicateSubsystem", ErrorSeverity::Error),
        KernelError::UnknownSubsystem { .. } => ("UnknownSubsystem", ErrorSeverity::Warning),
        KernelError::InvalidChannelName { .. } => ("InvalidChannelName", ErrorSeverity::Error),
        KernelError::InvalidPath { .. } => ("InvalidPath", ErrorSeverity::Warning),
        KernelError::CycleDetected { .. } => ("CycleDetected", ErrorSeverity::Fatal),
        KernelError::DependencyMissing { .. } => ("DependencyMissing", ErrorSeverity::Fatal),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorSummary {
    pub total: usize,
    pub by_kind: Vec<(&'static str, usize)>,
}

struct Ring {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl Ring {
    fn push(&mut self, record: ErrorRecord) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }
}

/// A bounded ring buffer of [`ErrorRecord`]s per subsystem.
pub struct ErrorManager {
    capacity: usize,
    rings: DashMap<String, Mutex<Ring>>,
}

impl ErrorManager {
    pub fn new(capacity: usize) -> Self {
        ErrorManager {
            capacity,
            rings: DashMap::new(),
        }
    }

    /// Classifies `err` and stores it under `subsystem`, returning the
    /// resulting record.
    pub fn add(&self, subsystem: &str, err: &KernelError, path: Option<String>) -> ErrorRecord {
        let (kind, severity) = classify(err);
        let record = ErrorRecord {
            id: Uuid::new_v4(),
            kind,
            severity,
            subsystem: subsystem.to_string(),
            path,
            code: None,
            metadata: serde_json::json!({ "message": err.to_string() }),
            timestamp_unix_ms: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        };
        self.rings
            .entry(subsystem.to_string())
            .or_insert_with(|| {
                Mutex::new(Ring {
                    entries: VecDeque::new(),
                    capacity: self.capacity,
                })
            })
            .lock()
            .unwrap()
            .push(record.clone());
        record
    }

    pub fn get(&self, subsystem: &str, id: Uuid) -> Option<ErrorRecord> {
        self.rings
            .get(subsystem)?
            .lock()
            .unwrap()
            .entries
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn list(&self, subsystem: &str) -> Vec<ErrorRecord> {
        self.rings
            .get(subsystem)
            .map(|ring| ring.lock().unwrap().entries.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn recent(&self, subsystem: &str, n: usize) -> Vec<ErrorRecord> {
        self.rings
            .get(subsystem)
            .map(|ring| {
                let ring = ring.lock().unwrap();
                ring.entries
                    .iter()
                    .rev()
                    .take(n)
                    .rev()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn summarize(&self, subsystem: &str) -> ErrorSummary {
        let Some(ring) = self.rings.get(subsystem) else {
            return ErrorSummary::default();
        };
        let ring = ring.lock().unwrap();
        let mut by_kind: Vec<(&'static str, usize)> = Vec::new();
        for record in &ring.entries {
            if let Some(entry) = by_kind.iter_mut().find(|(kind, _)| *kind == record.kind) {
                entry.1 += 1;
            } else {
                by_kind.push((record.kind, 1));
            }
        }
        ErrorSummary {
            total: ring.entries.len(),
            by_kind,
        }
    }

    pub fn clear(&self, subsystem: &str) {
        if let Some(ring) = self.rings.get(subsystem) {
            ring.lock().unwrap().entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_buffer_evicts_oldest_on_overflow() {
        let manager = ErrorManager::new(2);
        manager.add("echo", &KernelError::QueueFull { subsystem: "echo".into() }, None);
        manager.add("echo", &KernelError::RouteNotFound { path: "echo://x".into() }, None);
        manager.add(
            "echo",
            &KernelError::UnknownDestination { scheme: "ghost".into() },
            None,
        );

        let list = manager.list("echo");
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, "RouteNotFound");
        assert_eq!(list[1].kind, "UnknownDestination");
    }

    #[test]
    fn recent_returns_last_n_in_order() {
        let manager = ErrorManager::new(10);
        for i in 0..5 {
            manager.add(
                "echo",
                &KernelError::UnknownSubsystem { name: format!("s{i}") },
                None,
            );
        }
        let recent = manager.recent("echo", 2);
        assert_eq!(recent.len(), 2);
        assert!(recent[1].metadata["message"].as_str().unwrap().contains("s4"));
    }

    #[test]
    fn summarize_counts_by_kind() {
        let manager = ErrorManager::new(10);
        manager.add("echo", &KernelError::QueueFull { subsystem: "echo".into() }, None);
        manager.add("echo", &KernelError::QueueFull { subsystem: "echo".into() }, None);
        manager.add("echo", &KernelError::RouteNotFound { path: "echo://x".into() }, None);

        let summary = manager.summarize("echo");
        assert_eq!(summary.total, 3);
        assert!(summary
            .by_kind
            .iter()
            .any(|(kind, count)| *kind == "QueueFull" && *count == 2));
    }

    #[test]
    fn clear_empties_the_ring() {
        let manager = ErrorManager::new(10);
        manager.add("echo", &KernelError::QueueFull { subsystem: "echo".into() }, None);
        manager.clear("echo");
        assert!(manager.list("echo").is_empty());
    }
}
