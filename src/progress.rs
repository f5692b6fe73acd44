//! Progress bar for reconciliation runs

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reconcile::{ChangeRecord, Mode, Outcome, ProgressCallback};

/// Status symbol for an outcome, shared by the bar and the outcome table
pub fn symbol(outcome: Outcome) -> colored::ColoredString {
    match outcome {
        Outcome::Applied => "✓".green(),
        Outcome::AlreadyMatched => "○".dimmed(),
        Outcome::WouldChange => "→".cyan(),
        Outcome::Unsupported => "⊘".dimmed(),
        Outcome::Denied => "✗".red(),
        Outcome::Unverified => "⚠".yellow(),
        Outcome::Unreadable => "✗".red(),
    }
}

/// Drives an indicatif bar from reconciler callbacks
pub struct RunProgress {
    bar: ProgressBar,
}

impl RunProgress {
    /// `hidden` suppresses drawing (quiet mode, JSON output)
    pub fn new(hidden: bool) -> Self {
        let bar = ProgressBar::new(0);
        if hidden {
            bar.set_draw_target(ProgressDrawTarget::hidden());
        }
        Self { bar }
    }
}

impl ProgressCallback for RunProgress {
    fn on_run_start(&mut self, count: usize, mode: Mode) {
        self.bar.set_length(count as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")
        {
            self.bar.set_style(style.progress_chars("=>-"));
        }
        let verb = if mode.dry_run { "Checking" } else { "Reconciling" };
        self.bar.set_message(format!("{verb} ({})", mode.goal));
    }

    fn on_parameter_start(&mut self, id: &str, _description: &str) {
        self.bar.set_message(id.to_string());
    }

    fn on_parameter_complete(&mut self, record: &ChangeRecord) {
        self.bar.set_message(format!(
            "{} {}",
            symbol(record.outcome()),
            record.parameter_id()
        ));
        self.bar.inc(1);
    }

    fn on_run_complete(&mut self) {
        self.bar.finish_and_clear();
    }
}
