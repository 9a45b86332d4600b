// UI layer: what the user sees while an import runs. The orchestrator
// reports events through the `Reporter` trait; `ConsoleReporter` turns
// them into an indicatif progress bar and plain report lines.
//
// Nothing here makes decisions. Prompts for `login` live here too since
// they are terminal interaction, built on `dialoguer` like the rest.

use crate::batch::BatchSize;
use crate::import::{
    BatchImportError, BatchOutcome, DryRunSummary, EntityCreationError, ImportSession,
    VerificationError,
};
use anyhow::Result;
use dialoguer::{Input, Password};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::cell::RefCell;
use std::fmt::Write as _;
use std::io::{self, Write as _};

/// How many skipped emails to echo per batch before eliding the rest.
const SKIPPED_PREVIEW: usize = 5;

/// Import events. Every method defaults to doing nothing.
pub trait Reporter {
    fn client_creating(&self, _name: &str) {}
    fn client_created(&self, _name: &str, _slug: &str) {}
    fn client_failed(&self, _name: &str, _error: &EntityCreationError) {}
    fn import_started(&self, _records: usize, _batches: usize, _batch_size: BatchSize) {}
    fn batch_started(&self, _index: usize, _total: usize, _len: usize) {}
    fn batch_imported(&self, _index: usize, _outcome: &BatchOutcome) {}
    fn batch_failed(&self, _error: &BatchImportError, _lost: usize) {}
    fn verification_started(&self, _slug: &str) {}
    fn verified(&self, _slug: &str, _count: u64) {}
    fn verification_failed(&self, _error: &VerificationError) {}
    fn finished(&self, _session: &ImportSession) {}
}

pub struct ConsoleReporter {
    base_url: String,
    out: RefCell<Box<dyn io::Write>>,
    show_progress: bool,
    bar: RefCell<Option<ProgressBar>>,
}

impl ConsoleReporter {
    /// Report lines on stdout, progress bar on stderr.
    pub fn new(base_url: &str) -> Self {
        ConsoleReporter {
            base_url: base_url.to_string(),
            out: RefCell::new(Box::new(io::stdout())),
            show_progress: true,
            bar: RefCell::new(None),
        }
    }

    /// Report lines go to `out` and the progress bar is never drawn.
    pub fn with_output(base_url: &str, out: Box<dyn io::Write>) -> Self {
        ConsoleReporter {
            base_url: base_url.to_string(),
            out: RefCell::new(out),
            show_progress: false,
            bar: RefCell::new(None),
        }
    }

    // The bar is hidden when stderr is not a terminal, and a hidden bar
    // swallows `ProgressBar::println`. Suspending it and writing directly
    // keeps the lines either way.
    fn say(&self, text: &str) {
        let write = || {
            let mut out = self.out.borrow_mut();
            let _ = writeln!(out, "{}", text);
            let _ = out.flush();
        };
        match self.bar.borrow().as_ref() {
            Some(bar) => bar.suspend(write),
            None => write(),
        }
    }

    fn finish_bar(&self) {
        if let Some(bar) = self.bar.borrow_mut().take() {
            bar.finish_and_clear();
        }
    }
}

// Client creation failures are not reported here: they end the run and
// `main` prints the error.
impl Reporter for ConsoleReporter {
    fn client_creating(&self, name: &str) {
        self.say(&format!("Creating client: {}", name));
    }

    fn client_created(&self, _name: &str, slug: &str) {
        self.say(&format!("Client created with slug: {}", slug));
    }

    fn import_started(&self, records: usize, batches: usize, batch_size: BatchSize) {
        self.say(&format!(
            "Importing {} leads in {} batches of {}...",
            records, batches, batch_size
        ));
        let target = if self.show_progress {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        let bar = ProgressBar::with_draw_target(Some(batches as u64), target);
        bar.set_style(
            ProgressStyle::with_template("{bar:40} {pos}/{len} batches {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        *self.bar.borrow_mut() = Some(bar);
    }

    fn batch_started(&self, index: usize, total: usize, len: usize) {
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.set_message(format!("(batch {}/{}, {} leads)", index, total, len));
        }
    }

    fn batch_imported(&self, index: usize, outcome: &BatchOutcome) {
        self.say(&format_batch_line(index, outcome));
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.inc(1);
        }
    }

    fn batch_failed(&self, error: &BatchImportError, lost: usize) {
        self.say(&format!("  {} ({} leads not imported)", error, lost));
        if let Some(bar) = self.bar.borrow().as_ref() {
            bar.inc(1);
        }
    }

    fn verification_started(&self, slug: &str) {
        self.finish_bar();
        self.say(&format!("Verifying import for client: {}", slug));
    }

    fn verified(&self, _slug: &str, count: u64) {
        self.say(&format!("Verification: found {} leads", count));
    }

    fn verification_failed(&self, error: &VerificationError) {
        self.say(&format!("Verification failed: {}", error));
        self.say("  Leads may still have been imported. Check the UI manually.");
    }

    fn finished(&self, session: &ImportSession) {
        self.finish_bar();
        self.say(render_summary(session, &self.base_url).trim_end());
    }
}

/// One line per batch: counts, plus a short preview of skipped emails.
pub fn format_batch_line(index: usize, outcome: &BatchOutcome) -> String {
    let mut line = format!(
        "  Batch {}: created {}, skipped {}",
        index,
        outcome.created,
        outcome.skipped.len()
    );
    if !outcome.skipped.is_empty() {
        let preview: Vec<&str> = outcome
            .skipped
            .iter()
            .take(SKIPPED_PREVIEW)
            .map(String::as_str)
            .collect();
        let _ = write!(line, " ({}", preview.join(", "));
        if outcome.skipped.len() > SKIPPED_PREVIEW {
            let _ = write!(line, ", +{} more", outcome.skipped.len() - SKIPPED_PREVIEW);
        }
        line.push(')');
    }
    line
}

/// Final table printed once the run is over.
pub fn render_summary(session: &ImportSession, base_url: &str) -> String {
    let rule = "=".repeat(60);
    let mut out = String::new();
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "IMPORT SUMMARY");
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(out, "   Client:        {}", session.client_name);
    let _ = writeln!(out, "   Slug:          {}", session.client_slug);
    let _ = writeln!(out, "   Leads read:    {}", session.record_count);
    let _ = writeln!(out, "   Total created: {}", session.created);
    let _ = writeln!(out, "   Total skipped: {}", session.total_skipped());
    match session.verified_count {
        Some(count) => {
            let _ = writeln!(out, "   Verified:      {}", count);
        }
        None => {
            let _ = writeln!(out, "   Verified:      unavailable");
        }
    }
    if !session.failed_batches.is_empty() {
        let _ = writeln!(
            out,
            "   Failed batches: {} ({} leads lost)",
            session.failed_batches.len(),
            session.lost_count()
        );
        for failed in &session.failed_batches {
            let _ = writeln!(out, "     batch {}: {}", failed.index, failed.error);
            let _ = writeln!(out, "       lost: {}", failed.lost.join(", "));
        }
    }
    let _ = writeln!(out, "{}", rule);
    let _ = writeln!(
        out,
        "View in UI: {}/clients/{}",
        base_url.trim_end_matches('/'),
        session.client_slug
    );
    out
}

/// Dry-run report: the first parsed lead as JSON and the batch plan.
pub fn render_dry_run(summary: &DryRunSummary<'_>) -> Result<String> {
    let mut out = String::new();
    match summary.first {
        Some(record) => {
            let _ = writeln!(out, "DRY RUN - first lead:");
            let _ = writeln!(out, "{}", serde_json::to_string_pretty(record)?);
        }
        None => {
            let _ = writeln!(out, "DRY RUN - no leads in file");
        }
    }
    let _ = writeln!(out, "Total leads: {}", summary.record_count);
    let _ = writeln!(
        out,
        "Batches: {} (of up to {})",
        summary.batch_count, summary.batch_size
    );
    Ok(out)
}

/// Ask for whatever login details were not given on the command line.
/// `Password` hides input in the terminal.
pub fn prompt_credentials(
    email: Option<String>,
    password: Option<String>,
) -> Result<(String, String)> {
    let email = match email {
        Some(email) => email,
        None => Input::new().with_prompt("Email").interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::new().with_prompt("Password").interact()?,
    };
    Ok((email, password))
}
