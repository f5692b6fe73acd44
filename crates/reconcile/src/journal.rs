//! Transaction log - append-only record of every attempted change
//!
//! A [`PendingChange`] is opened the moment an attempt starts and consumed
//! exactly once to produce the immutable [`ChangeRecord`] that gets appended.

use crate::types::{Category, Goal, Outcome, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io;

/// One attempted reconciliation of one parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRecord {
    run_id: String,
    parameter_id: String,
    category: Category,
    goal: Goal,
    #[serde(default)]
    dry_run: bool,
    observed_before: Option<Value>,
    requested_value: Option<Value>,
    observed_after: Option<Value>,
    outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    detail: Option<String>,
    started_at: DateTime<Utc>,
    timestamp: DateTime<Utc>,
}

impl ChangeRecord {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn parameter_id(&self) -> &str {
        &self.parameter_id
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn goal(&self) -> Goal {
        self.goal
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn observed_before(&self) -> Option<&Value> {
        self.observed_before.as_ref()
    }

    pub fn requested_value(&self) -> Option<&Value> {
        self.requested_value.as_ref()
    }

    pub fn observed_after(&self) -> Option<&Value> {
        self.observed_after.as_ref()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Whether this record sets a rollback point
    pub fn is_tuned_application(&self) -> bool {
        self.outcome == Outcome::Applied
            && !self.dry_run
            && matches!(self.goal, Goal::Desired | Goal::LastKnownGood)
    }
}

/// A reconciliation attempt whose outcome is not yet known
#[derive(Debug)]
pub struct PendingChange {
    run_id: String,
    parameter_id: String,
    category: Category,
    goal: Goal,
    dry_run: bool,
    started_at: DateTime<Utc>,
    observed_before: Option<Value>,
    requested_value: Option<Value>,
}

impl PendingChange {
    /// Start an attempt now
    pub fn start(
        run_id: &str,
        parameter_id: &str,
        category: Category,
        goal: Goal,
        dry_run: bool,
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            parameter_id: parameter_id.to_string(),
            category,
            goal,
            dry_run,
            started_at: Utc::now(),
            observed_before: None,
            requested_value: None,
        }
    }

    pub fn observed(&mut self, value: Value) {
        self.observed_before = Some(value);
    }

    pub fn requested(&mut self, value: Value) {
        self.requested_value = Some(value);
    }

    /// Record the outcome, producing the immutable record
    pub fn finish(
        self,
        outcome: Outcome,
        observed_after: Option<Value>,
        detail: Option<String>,
    ) -> ChangeRecord {
        ChangeRecord {
            run_id: self.run_id,
            parameter_id: self.parameter_id,
            category: self.category,
            goal: self.goal,
            dry_run: self.dry_run,
            observed_before: self.observed_before,
            requested_value: self.requested_value,
            observed_after,
            outcome,
            detail,
            started_at: self.started_at,
            timestamp: Utc::now(),
        }
    }
}

/// Durable, ordered, append-only store of change records
pub trait Journal {
    /// Append a record
    fn append(&mut self, record: &ChangeRecord) -> io::Result<()>;

    /// Records in append order, optionally for one parameter
    fn history(&self, parameter_id: Option<&str>) -> io::Result<Vec<ChangeRecord>>;

    /// Most recently applied tuned value (apply or rollback, never revert)
    fn last_known_good(&self, parameter_id: &str) -> io::Result<Option<Value>> {
        Ok(self
            .history(Some(parameter_id))?
            .into_iter()
            .rev()
            .find(ChangeRecord::is_tuned_application)
            .and_then(|r| r.requested_value))
    }
}

/// Journal kept in process memory
#[derive(Debug, Default)]
pub struct MemoryJournal {
    records: Vec<ChangeRecord>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Journal for MemoryJournal {
    fn append(&mut self, record: &ChangeRecord) -> io::Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn history(&self, parameter_id: Option<&str>) -> io::Result<Vec<ChangeRecord>> {
        Ok(self
            .records
            .iter()
            .filter(|r| parameter_id.is_none_or(|id| r.parameter_id == id))
            .cloned()
            .collect())
    }
}
