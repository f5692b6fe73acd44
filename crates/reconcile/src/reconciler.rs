//! Reconciler - drives parameters toward a goal, one at a time
//!
//! Parameters are processed strictly in the order given, with no two
//! writes in flight at once: some targets have side effects on others.
//! A run never fails as a whole; every parameter gets a record.

use crate::context::{NoProgress, ProgressCallback};
use crate::journal::{ChangeRecord, Journal, PendingChange};
use crate::parameter::Parameter;
use crate::reader::{self, Observed, ReadError};
use crate::target::TargetError;
use crate::types::{Goal, Mode, Outcome, RunSummary, Value};
use chrono::Utc;
use serde::Serialize;

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: Mode,
    /// One record per input parameter, in input order
    pub records: Vec<ChangeRecord>,
    /// Records that could not be written to the journal
    pub journal_errors: Vec<String>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for record in &self.records {
            summary.add(record.outcome());
        }
        summary
    }

    /// Records with the given outcome
    pub fn with_outcome(&self, outcome: Outcome) -> impl Iterator<Item = &ChangeRecord> {
        self.records.iter().filter(move |r| r.outcome() == outcome)
    }
}

/// Reconcile `parameters` in order, appending each record to `journal`
///
/// Dry runs read but never write, and leave the journal untouched.
pub fn reconcile<J, P>(
    parameters: &[&Parameter],
    mode: Mode,
    journal: &mut J,
    progress: &mut P,
) -> RunReport
where
    J: Journal + ?Sized,
    P: ProgressCallback + ?Sized,
{
    let run_id = Utc::now().format("%Y%m%dT%H%M%S%.3fZ").to_string();
    let mut report = RunReport {
        run_id,
        mode,
        records: Vec::with_capacity(parameters.len()),
        journal_errors: Vec::new(),
    };

    progress.on_run_start(parameters.len(), mode);

    for parameter in parameters {
        progress.on_parameter_start(&parameter.id, &parameter.description);
        let record = reconcile_one(parameter, mode, &report.run_id, journal);

        if !mode.dry_run
            && let Err(e) = journal.append(&record)
        {
            log::warn!("Failed to journal {}: {}", parameter.id, e);
            report
                .journal_errors
                .push(format!("{}: {}", parameter.id, e));
        }

        progress.on_parameter_complete(&record);
        report.records.push(record);
    }

    progress.on_run_complete();
    report
}

/// Reconcile without progress reporting
pub fn reconcile_simple<J: Journal + ?Sized>(
    parameters: &[&Parameter],
    mode: Mode,
    journal: &mut J,
) -> RunReport {
    reconcile(parameters, mode, journal, &mut NoProgress)
}

fn reconcile_one<J: Journal + ?Sized>(
    parameter: &Parameter,
    mode: Mode,
    run_id: &str,
    journal: &J,
) -> ChangeRecord {
    let mut pending = PendingChange::start(
        run_id,
        &parameter.id,
        parameter.category,
        mode.goal,
        mode.dry_run,
    );

    // 1. Read
    let current = match reader::read(parameter) {
        Ok(Observed::Value(v)) => v,
        Ok(Observed::Absent) => {
            return pending.finish(
                Outcome::Unsupported,
                None,
                Some(format!("{} not present on this host", parameter.target.location())),
            );
        }
        Err(ReadError::PermissionDenied(msg)) => {
            return pending.finish(Outcome::Denied, None, Some(format!("read refused: {msg}")));
        }
        Err(ReadError::Unreadable(msg)) => {
            return pending.finish(Outcome::Unreadable, None, Some(msg));
        }
    };
    pending.observed(current.clone());

    // 2. Resolve the value this run wants
    let target = match resolve_target(parameter, mode.goal, journal) {
        Ok(v) => v,
        Err((outcome, detail)) => {
            return pending.finish(outcome, Some(current), Some(detail));
        }
    };
    pending.requested(target.clone());

    // 3. Idempotence: nothing to write
    if current == target {
        return pending.finish(Outcome::AlreadyMatched, Some(current), None);
    }

    // 4. Preview only
    if mode.dry_run {
        return pending.finish(Outcome::WouldChange, Some(current), None);
    }

    // 5. Write
    log::debug!(
        "{}: writing {} to {} (was {})",
        parameter.id,
        target,
        parameter.target.location(),
        current
    );
    if let Err(e) = parameter.target.write(&target.to_string()) {
        // Only a refusal is `denied`; after any other failure the write may
        // or may not have landed
        let outcome = if e.is_refusal() {
            Outcome::Denied
        } else if matches!(e, TargetError::NotFound(_)) {
            Outcome::Unreadable
        } else {
            Outcome::Unverified
        };
        return pending.finish(outcome, Some(current), Some(format!("write failed: {e}")));
    }

    // 6. Verify by re-reading; the write call's own success is not trusted
    match reader::read(parameter) {
        Ok(Observed::Value(after)) if after == target => {
            pending.finish(Outcome::Applied, Some(after), None)
        }
        Ok(Observed::Value(after)) => {
            let detail = if after == current {
                format!("write accepted but value stayed at {after}")
            } else {
                format!("write accepted but target reports {after}, not {target}")
            };
            pending.finish(Outcome::Unverified, Some(after), Some(detail))
        }
        Ok(Observed::Absent) => pending.finish(
            Outcome::Unverified,
            None,
            Some("target disappeared after write".to_string()),
        ),
        Err(e) => pending.finish(
            Outcome::Unverified,
            None,
            Some(format!("re-read failed: {e}")),
        ),
    }
}

fn resolve_target<J: Journal + ?Sized>(
    parameter: &Parameter,
    goal: Goal,
    journal: &J,
) -> Result<Value, (Outcome, String)> {
    match goal {
        Goal::Desired => Ok(parameter.desired_value.clone()),
        Goal::Default => Ok(parameter.default_value.clone()),
        Goal::LastKnownGood => match journal.last_known_good(&parameter.id) {
            Ok(Some(v)) if v.matches_encoding(parameter.encoding) => Ok(v),
            Ok(Some(v)) => Err((
                Outcome::Unsupported,
                format!("rollback point {v} does not fit {:?}", parameter.encoding),
            )),
            Ok(None) => Err((
                Outcome::Unsupported,
                "no rollback point recorded".to_string(),
            )),
            Err(e) => Err((
                Outcome::Unreadable,
                format!("transaction log unreadable: {e}"),
            )),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::MemoryJournal;
    use crate::target::{Reading, Target};
    use crate::types::{Category, Encoding};
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone)]
    enum Behavior {
        Accept,
        Deny,
        /// Driver silently stores this instead
        Clamp(String),
        Ignore,
        /// Fails with a plain I/O error
        Fault,
    }

    #[derive(Debug)]
    struct Cell {
        value: Option<String>,
        behavior: Behavior,
        writes: usize,
    }

    /// In-memory target shared between the parameter and the test
    #[derive(Debug, Clone)]
    struct MemTarget(Arc<Mutex<Cell>>);

    impl MemTarget {
        fn new(value: Option<&str>, behavior: Behavior) -> Self {
            Self(Arc::new(Mutex::new(Cell {
                value: value.map(str::to_string),
                behavior,
                writes: 0,
            })))
        }

        fn value(&self) -> Option<String> {
            self.0.lock().unwrap().value.clone()
        }

        fn writes(&self) -> usize {
            self.0.lock().unwrap().writes
        }
    }

    impl Target for MemTarget {
        fn location(&self) -> String {
            "mem".into()
        }

        fn read(&self) -> Result<Reading, TargetError> {
            Ok(match &self.0.lock().unwrap().value {
                Some(v) => Reading::Raw(v.clone()),
                None => Reading::Absent,
            })
        }

        fn write(&self, raw: &str) -> Result<(), TargetError> {
            let mut cell = self.0.lock().unwrap();
            match cell.behavior.clone() {
                Behavior::Deny => return Err(TargetError::PermissionDenied("mem".into())),
                Behavior::Accept => cell.value = Some(raw.to_string()),
                Behavior::Clamp(v) => cell.value = Some(v),
                Behavior::Ignore => {}
                Behavior::Fault => return Err(TargetError::Io(io::Error::other("EIO"))),
            }
            cell.writes += 1;
            Ok(())
        }
    }

    fn int_param(id: &str, target: &MemTarget, desired: i64, default: i64) -> Parameter {
        Parameter::new(
            id,
            Category::Memory,
            Box::new(target.clone()),
            Encoding::Integer,
            Value::Int(desired),
            Value::Int(default),
        )
    }

    fn outcomes(report: &RunReport) -> Vec<Outcome> {
        report.records.iter().map(ChangeRecord::outcome).collect()
    }

    #[test]
    fn test_example_swappiness_and_hugepages() {
        let swap = MemTarget::new(Some("60"), Behavior::Accept);
        let thp = MemTarget::new(Some("[always] madvise never"), Behavior::Accept);
        let params = [
            int_param("mem.swappiness", &swap, 10, 60),
            Parameter::new(
                "mem.thp.enabled",
                Category::Memory,
                Box::new(thp.clone()),
                Encoding::EnumString,
                Value::Word("always".into()),
                Value::Word("madvise".into()),
            ),
        ];
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut journal = MemoryJournal::new();

        let report = reconcile_simple(&refs, Mode::apply(), &mut journal);

        assert_eq!(
            outcomes(&report),
            vec![Outcome::Applied, Outcome::AlreadyMatched]
        );
        let swap_record = &report.records[0];
        assert_eq!(swap_record.observed_before(), Some(&Value::Int(60)));
        assert_eq!(swap_record.observed_after(), Some(&Value::Int(10)));
        assert_eq!(
            report.records[1].observed_after(),
            Some(&Value::Word("always".into()))
        );
        assert_eq!(thp.writes(), 0);
        assert_eq!(journal.len(), 2);
    }

    #[test]
    fn test_second_apply_is_all_already_matched() {
        let targets: Vec<MemTarget> = (0..4)
            .map(|_| MemTarget::new(Some("0"), Behavior::Accept))
            .collect();
        let params: Vec<Parameter> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| int_param(&format!("p{i}"), t, 5, 0))
            .collect();
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut journal = MemoryJournal::new();

        let first = reconcile_simple(&refs, Mode::apply(), &mut journal);
        assert_eq!(first.summary().applied, 4);

        let second = reconcile_simple(&refs, Mode::apply(), &mut journal);
        assert_eq!(second.summary().applied, 0);
        assert_eq!(second.summary().already_matched, 4);
        assert!(targets.iter().all(|t| t.writes() == 1));
    }

    #[test]
    fn test_apply_revert_apply_round_trip() {
        let targets: Vec<MemTarget> = ["60", "100", "20"]
            .iter()
            .map(|v| MemTarget::new(Some(v), Behavior::Accept))
            .collect();
        let params = [
            int_param("a", &targets[0], 10, 60),
            int_param("b", &targets[1], 50, 100),
            int_param("c", &targets[2], 5, 20),
        ];
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut journal = MemoryJournal::new();

        reconcile_simple(&refs, Mode::apply(), &mut journal);
        let first: Vec<_> = targets.iter().map(MemTarget::value).collect();

        let reverted = reconcile_simple(&refs, Mode::revert_to_default(), &mut journal);
        assert_eq!(reverted.summary().applied, 3);
        assert_eq!(targets[1].value().as_deref(), Some("100"));

        reconcile_simple(&refs, Mode::apply(), &mut journal);
        let again: Vec<_> = targets.iter().map(MemTarget::value).collect();
        assert_eq!(first, again);
    }

    #[test]
    fn test_denied_parameter_does_not_truncate_batch() {
        let targets: Vec<MemTarget> = (1..=10)
            .map(|i| {
                let behavior = if i == 5 {
                    Behavior::Deny
                } else {
                    Behavior::Accept
                };
                // P3 already at its desired value
                let initial = if i == 3 { "1" } else { "0" };
                MemTarget::new(Some(initial), behavior)
            })
            .collect();
        let params: Vec<Parameter> = targets
            .iter()
            .enumerate()
            .map(|(i, t)| int_param(&format!("P{}", i + 1), t, 1, 0))
            .collect();
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut journal = MemoryJournal::new();

        let report = reconcile_simple(&refs, Mode::apply(), &mut journal);

        assert_eq!(report.records.len(), 10);
        assert_eq!(report.records[4].outcome(), Outcome::Denied);
        assert_eq!(report.records[2].outcome(), Outcome::AlreadyMatched);
        for (i, record) in report.records.iter().enumerate() {
            if i != 4 && i != 2 {
                assert_eq!(record.outcome(), Outcome::Applied, "{}", record.parameter_id());
            }
        }
        assert_eq!(report.summary().failures(), 1);
    }

    #[test]
    fn test_clamped_write_is_unverified() {
        let target = MemTarget::new(Some("300"), Behavior::Clamp("250".into()));
        let params = [int_param("gpu0.power.limit", &target, 400, 300)];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut MemoryJournal::new());

        let record = &report.records[0];
        assert_eq!(record.outcome(), Outcome::Unverified);
        assert_eq!(record.observed_after(), Some(&Value::Int(250)));
        assert!(record.detail().unwrap().contains("250"));
    }

    #[test]
    fn test_ignored_write_is_unverified() {
        let target = MemTarget::new(Some("60"), Behavior::Ignore);
        let params = [int_param("mem.swappiness", &target, 10, 60)];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut MemoryJournal::new());

        assert_eq!(report.records[0].outcome(), Outcome::Unverified);
        assert!(report.records[0].detail().unwrap().contains("stayed"));
    }

    #[test]
    fn test_io_fault_on_write_is_unverified_not_denied() {
        let target = MemTarget::new(Some("60"), Behavior::Fault);
        let params = [int_param("mem.swappiness", &target, 10, 60)];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut MemoryJournal::new());

        let record = &report.records[0];
        assert_eq!(record.outcome(), Outcome::Unverified);
        assert!(record.detail().unwrap().contains("EIO"));
        assert_eq!(report.summary().denied, 0);
    }

    #[test]
    fn test_optional_absent_is_unsupported_not_failure() {
        let present = MemTarget::new(Some("0"), Behavior::Accept);
        let absent = MemTarget::new(None, Behavior::Accept);
        let params = [
            int_param("present", &present, 1, 0),
            int_param("nic.ring", &absent, 4096, 1024).optional(true),
        ];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut MemoryJournal::new());

        assert_eq!(
            outcomes(&report),
            vec![Outcome::Applied, Outcome::Unsupported]
        );
        assert!(report.summary().is_clean());
        assert_eq!(absent.writes(), 0);
    }

    #[test]
    fn test_required_absent_is_unreadable_and_batch_continues() {
        let absent = MemTarget::new(None, Behavior::Accept);
        let present = MemTarget::new(Some("0"), Behavior::Accept);
        let params = [
            int_param("missing", &absent, 1, 0),
            int_param("present", &present, 1, 0),
        ];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut MemoryJournal::new());

        assert_eq!(outcomes(&report), vec![Outcome::Unreadable, Outcome::Applied]);
        assert_eq!(report.summary().failures(), 1);
    }

    #[test]
    fn test_dry_run_writes_nothing_and_skips_journal() {
        let target = MemTarget::new(Some("60"), Behavior::Accept);
        let matched = MemTarget::new(Some("1"), Behavior::Accept);
        let params = [
            int_param("mem.swappiness", &target, 10, 60),
            int_param("matched", &matched, 1, 0),
        ];
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut journal = MemoryJournal::new();

        let report = reconcile_simple(&refs, Mode::dry_run(), &mut journal);

        assert_eq!(
            outcomes(&report),
            vec![Outcome::WouldChange, Outcome::AlreadyMatched]
        );
        assert_eq!(report.records[0].requested_value(), Some(&Value::Int(10)));
        assert_eq!(target.writes(), 0);
        assert!(journal.is_empty());
    }

    #[test]
    fn test_rollback_restores_last_tuned_value() {
        let target = MemTarget::new(Some("60"), Behavior::Accept);
        let untouched = MemTarget::new(Some("0"), Behavior::Accept);
        let tuned = [int_param("mem.swappiness", &target, 10, 60)];
        let all = [
            int_param("mem.swappiness", &target, 10, 60),
            int_param("never.applied", &untouched, 1, 0),
        ];
        let mut journal = MemoryJournal::new();

        let tuned_refs: Vec<&Parameter> = tuned.iter().collect();
        reconcile_simple(&tuned_refs, Mode::apply(), &mut journal);
        reconcile_simple(&tuned_refs, Mode::revert_to_default(), &mut journal);
        assert_eq!(target.value().as_deref(), Some("60"));

        let all_refs: Vec<&Parameter> = all.iter().collect();
        let report = reconcile_simple(&all_refs, Mode::rollback(), &mut journal);

        assert_eq!(
            outcomes(&report),
            vec![Outcome::Applied, Outcome::Unsupported]
        );
        assert_eq!(target.value().as_deref(), Some("10"));
        assert_eq!(
            report.records[1].detail(),
            Some("no rollback point recorded")
        );
    }

    struct BrokenJournal;

    impl Journal for BrokenJournal {
        fn append(&mut self, _record: &ChangeRecord) -> io::Result<()> {
            Err(io::Error::other("disk full"))
        }

        fn history(&self, _parameter_id: Option<&str>) -> io::Result<Vec<ChangeRecord>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_journal_failure_is_reported_not_fatal() {
        let a = MemTarget::new(Some("0"), Behavior::Accept);
        let b = MemTarget::new(Some("0"), Behavior::Accept);
        let params = [int_param("a", &a, 1, 0), int_param("b", &b, 1, 0)];
        let refs: Vec<&Parameter> = params.iter().collect();

        let report = reconcile_simple(&refs, Mode::apply(), &mut BrokenJournal);

        assert_eq!(outcomes(&report), vec![Outcome::Applied, Outcome::Applied]);
        assert_eq!(report.journal_errors.len(), 2);
    }

    #[derive(Default)]
    struct Counting {
        started: usize,
        completed: Vec<String>,
        runs: usize,
    }

    impl ProgressCallback for Counting {
        fn on_run_start(&mut self, count: usize, _mode: Mode) {
            self.started = count;
        }
        fn on_parameter_start(&mut self, _id: &str, _description: &str) {}
        fn on_parameter_complete(&mut self, record: &ChangeRecord) {
            self.completed.push(record.parameter_id().to_string());
        }
        fn on_run_complete(&mut self) {
            self.runs += 1;
        }
    }

    #[test]
    fn test_progress_sees_registry_order() {
        let targets: Vec<MemTarget> = (0..3)
            .map(|_| MemTarget::new(Some("0"), Behavior::Accept))
            .collect();
        let params: Vec<Parameter> = ["z", "a", "m"]
            .iter()
            .zip(&targets)
            .map(|(id, t)| int_param(id, t, 1, 0))
            .collect();
        let refs: Vec<&Parameter> = params.iter().collect();
        let mut progress = Counting::default();

        reconcile(&refs, Mode::apply(), &mut MemoryJournal::new(), &mut progress);

        assert_eq!(progress.started, 3);
        assert_eq!(progress.completed, vec!["z", "a", "m"]);
        assert_eq!(progress.runs, 1);
    }
}
