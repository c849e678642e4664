//! Trigger dispatch
//!
//! Triggers are rows of the `triggers` table. Dispatch counts the rows
//! matching `(table, action, timing)` and notifies the handler once per
//! match; which trigger matched is not reported.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::catalog::{Catalog, TRIGGERS};
use crate::error::{Error, Result};
use crate::storage::Value;

/// Operation a trigger watches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerAction {
    Insert,
    Update,
    Delete,
}

impl TriggerAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerAction::Insert => "insert",
            TriggerAction::Update => "update",
            TriggerAction::Delete => "delete",
        }
    }
}

impl FromStr for TriggerAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "insert" => Ok(TriggerAction::Insert),
            "update" => Ok(TriggerAction::Update),
            "delete" => Ok(TriggerAction::Delete),
            other => Err(Error::InvalidTrigger(format!("unknown action '{}'", other))),
        }
    }
}

impl fmt::Display for TriggerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a trigger runs before or after the operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerTiming {
    Before,
    After,
}

impl TriggerTiming {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerTiming::Before => "before",
            TriggerTiming::After => "after",
        }
    }
}

impl FromStr for TriggerTiming {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "before" => Ok(TriggerTiming::Before),
            "after" => Ok(TriggerTiming::After),
            other => Err(Error::InvalidTrigger(format!("unknown timing '{}'", other))),
        }
    }
}

impl fmt::Display for TriggerTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives one notification per matching trigger
pub trait TriggerHandler: Send + Sync {
    fn notify(&self, table: &str, action: TriggerAction, timing: TriggerTiming);
}

/// Default handler: log the notification
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTriggerHandler;

impl TriggerHandler for LogTriggerHandler {
    fn notify(&self, table: &str, action: TriggerAction, timing: TriggerTiming) {
        tracing::info!(table, "trigger executed {} {} query", timing, action);
    }
}

/// Matches trigger rows and forwards notifications
#[derive(Clone)]
pub struct TriggerDispatcher {
    handler: Arc<dyn TriggerHandler>,
}

impl fmt::Debug for TriggerDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerDispatcher").finish_non_exhaustive()
    }
}

impl Default for TriggerDispatcher {
    fn default() -> Self {
        Self::new(Arc::new(LogTriggerHandler))
    }
}

impl TriggerDispatcher {
    pub fn new(handler: Arc<dyn TriggerHandler>) -> Self {
        Self { handler }
    }

    /// Number of triggers registered for `(table, action, timing)`
    pub fn count_matches(catalog: &Catalog, table: &str, action: TriggerAction, timing: TriggerTiming) -> usize {
        let Ok(triggers) = catalog.get(TRIGGERS) else {
            return 0;
        };
        let table = Value::from(table);
        let action = Value::from(action.as_str());
        let timing = Value::from(timing.as_str());
        triggers
            .live_rows()
            .filter(|(_, row)| {
                row.get(1) == Some(&table) && row.get(2) == Some(&action) && row.get(3) == Some(&timing)
            })
            .count()
    }

    /// Notify once per matching trigger; returns the number of notifications
    pub fn dispatch(&self, catalog: &Catalog, table: &str, action: TriggerAction, timing: TriggerTiming) -> usize {
        let n = Self::count_matches(catalog, table, action, timing);
        for _ in 0..n {
            self.fire(table, action, timing);
        }
        n
    }

    pub fn fire(&self, table: &str, action: TriggerAction, timing: TriggerTiming) {
        self.handler.notify(table, action, timing);
    }
}
