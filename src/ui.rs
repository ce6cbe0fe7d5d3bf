//! Terminal rendering: live job spinners, the run summary and the job table.
//!
//! Uses `indicatif` for spinners and `console` for colors. The
//! [`ProgressReporter`] only reads orchestrator [`Event`]s; it has no way to
//! influence the run.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::Path;
use std::time::Duration;

use chrono::{Local, TimeZone};
use console::{Style, style};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::events::{Event, LogLevel};
use crate::openai::Batch;
use crate::orchestrator::RunReport;
use crate::state_machine::JobStatus;

/// Running counts derived from the event stream.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl Tally {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::UnitsDiscovered { count } => self.total = *count,
            Event::JobFinished { outcome, .. } if outcome.succeeded => self.completed += 1,
            Event::JobFinished { .. } | Event::UnitDropped { .. } => self.failed += 1,
            _ => {}
        }
    }

    pub fn in_progress(&self) -> usize {
        self.total.saturating_sub(self.completed + self.failed)
    }
}

/// Color for a status: green when done, red when it ended badly, yellow otherwise.
fn status_style(status: JobStatus) -> Style {
    match status {
        JobStatus::Completed => Style::new().green(),
        JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled => Style::new().red(),
        JobStatus::Queued | JobStatus::InProgress => Style::new().yellow(),
    }
}

/// Live view of a batch run.
pub struct ProgressReporter {
    multi: MultiProgress,
    overall: ProgressBar,
    jobs: HashMap<String, ProgressBar>,
    tally: Tally,
    green: Style,
    red: Style,
    yellow: Style,
}

impl Default for ProgressReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter {
    pub fn new() -> Self {
        let multi = MultiProgress::new();
        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.cyan} {msg} [{bar:30.green/blue}] {pos}/{len} ({elapsed})")
                .expect("invalid template")
                .progress_chars("=> "),
        );
        overall.set_message("Processing");
        overall.enable_steady_tick(Duration::from_millis(120));

        Self {
            multi,
            overall,
            jobs: HashMap::new(),
            tally: Tally::default(),
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Render events until every sender is gone, then return the final counts.
    pub async fn consume(mut self, mut rx: UnboundedReceiver<Event>) -> Tally {
        while let Some(event) = rx.recv().await {
            self.handle(&event);
        }
        self.overall.finish_and_clear();
        self.tally
    }

    fn job_bar(&mut self, job_id: &str) -> &ProgressBar {
        self.jobs.entry(job_id.to_string()).or_insert_with(|| {
            let pb = self.multi.add(ProgressBar::new_spinner());
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("  {spinner:.cyan} {prefix:.dim} {msg}")
                    .expect("invalid template"),
            );
            pb.set_prefix(job_id.to_string());
            pb.enable_steady_tick(Duration::from_millis(120));
            pb
        })
    }

    fn handle(&mut self, event: &Event) {
        self.tally.apply(event);

        match event {
            Event::UnitsDiscovered { count } => {
                self.overall.set_length(*count as u64);
            }
            Event::JobCreated { job_id, status } => {
                let msg = status_style(*status).apply_to(status).to_string();
                self.job_bar(job_id).set_message(msg);
            }
            Event::StatusChanged {
                job_id,
                status,
                progress_hint,
            } => {
                let mut msg = status_style(*status).apply_to(status).to_string();
                if let Some(hint) = progress_hint {
                    msg.push_str(&format!(" {}", style(hint).dim()));
                }
                self.job_bar(job_id).set_message(msg);
            }
            Event::JobFinished { job_id, outcome } => {
                let msg = if outcome.succeeded {
                    format!("{} completed", self.green.apply_to("✓"))
                } else {
                    let reason = outcome
                        .failure
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "failed".to_string());
                    format!("{} {reason}", self.red.apply_to("✗"))
                };
                self.job_bar(job_id).finish_with_message(msg);
                self.overall.inc(1);
            }
            Event::UnitDropped { unit } => {
                let _ = self.multi.println(format!(
                    "  {} {}: {}",
                    self.red.apply_to("✗"),
                    unit.input.display(),
                    unit.reason
                ));
                self.overall.inc(1);
            }
            Event::Log { level, message } => {
                let line = match level {
                    LogLevel::Info => style(message).dim().to_string(),
                    LogLevel::Warn => self.yellow.apply_to(message).to_string(),
                    LogLevel::Error => self.red.apply_to(message).to_string(),
                };
                let _ = self.multi.println(line);
            }
        }

        self.overall.set_message(format!(
            "Processing: {} done, {} failed, {} running",
            self.tally.completed,
            self.tally.failed,
            self.tally.in_progress()
        ));
    }
}

/// Final counts, printed whether or not anything failed.
pub fn print_summary(report: &RunReport, output_dir: &Path) {
    let green = Style::new().green().bold();
    let red = Style::new().red();

    println!();
    println!("{}", green.apply_to("Processing completed!"));
    println!("Total jobs:     {}", report.total());
    println!("Completed jobs: {}", report.completed());
    println!("Failed jobs:    {}", report.failed());

    for outcome in report.outcomes.iter().filter(|o| !o.succeeded) {
        if let Some(reason) = &outcome.failure {
            println!("  {} {}: {reason}", red.apply_to("✗"), outcome.job_id);
        }
    }
    for unit in &report.dropped {
        println!(
            "  {} {}: {}",
            red.apply_to("✗"),
            unit.input.display(),
            unit.reason
        );
    }

    if report.completed() > 0 {
        println!("Results saved in: {}", output_dir.display());
    }
}

/// `YYYY-MM-DD HH:MM:SS` for a unix timestamp in `tz`.
pub fn format_timestamp<Tz>(secs: i64, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    tz.timestamp_opt(secs, 0)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

const JOB_HEADERS: [&str; 5] = ["Job ID", "Status", "Created At", "Completed", "Failed"];

fn job_rows<Tz>(jobs: &[Batch], tz: &Tz) -> Vec<[String; 5]>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    jobs.iter()
        .map(|job| {
            let counts = job.request_counts.unwrap_or_default();
            [
                job.id.clone(),
                job.status.clone(),
                format_timestamp(job.created_at, tz),
                counts.completed.to_string(),
                counts.failed.to_string(),
            ]
        })
        .collect()
}

/// Print jobs as an aligned table in local time.
pub fn print_job_table(jobs: &[Batch]) {
    if jobs.is_empty() {
        println!("No batch jobs found.");
        return;
    }

    let rows = job_rows(jobs, &Local);
    let mut widths = JOB_HEADERS.map(str::len);
    for row in &rows {
        for (w, cell) in widths.iter_mut().zip(row) {
            *w = (*w).max(cell.chars().count());
        }
    }

    let header: Vec<String> = JOB_HEADERS
        .iter()
        .zip(widths)
        .map(|(h, w)| format!("{h:<w$}"))
        .collect();
    println!("{}", style(header.join("  ")).bold().magenta());

    for row in rows {
        let status = JobStatus::from_remote(&row[1]);
        let cells = [
            style(format!("{:<w$}", row[0], w = widths[0])).cyan().to_string(),
            status_style(status)
                .apply_to(format!("{:<w$}", row[1], w = widths[1]))
                .to_string(),
            style(format!("{:<w$}", row[2], w = widths[2])).green().to_string(),
            style(format!("{:>w$}", row[3], w = widths[3])).blue().to_string(),
            style(format!("{:>w$}", row[4], w = widths[4])).red().to_string(),
        ];
        println!("{}", cells.join("  "));
    }
}
