use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{Id, JoinError, JoinSet};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::config::RunSettings;
use crate::discovery::{SkippedInput, discover};
use crate::error::BatchError;
use crate::events::{Event, EventSink, LogLevel};
use crate::openai::JobClient;
use crate::state_machine::{
    DroppedUnit, FailureReason, InputUnit, JobOutcome, JobStatus, PollBackoff, RemoteJob, Stage,
    UnitTracker,
};

/// Everything a run produced.
#[derive(Debug, Default)]
pub struct RunReport {
    /// One entry per unit that got a remote job, in completion order.
    pub outcomes: Vec<JobOutcome>,
    /// Units whose upload or job creation failed.
    pub dropped: Vec<DroppedUnit>,
    /// Paths discovery passed over.
    pub skipped: Vec<SkippedInput>,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.succeeded).count()
    }

    /// Failed jobs plus dropped units.
    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.completed() + self.dropped.len()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len() + self.dropped.len()
    }
}

enum UnitResult {
    Finished(JobOutcome),
    Dropped(DroppedUnit),
}

/// What the orchestrator knows about a running task besides its result:
/// the input it was given and, once created, the remote job id.
struct TaskSlot {
    input: PathBuf,
    job_id: Arc<OnceLock<String>>,
}

/// Drives every input unit through upload → create → poll → download with a
/// bounded number of units in flight.
pub struct JobOrchestrator {
    client: Arc<dyn JobClient>,
    settings: RunSettings,
    events: EventSink,
}

impl JobOrchestrator {
    pub fn new(client: Arc<dyn JobClient>, settings: RunSettings) -> Self {
        Self {
            client,
            settings,
            events: EventSink::disabled(),
        }
    }

    /// Send progress events to `events` instead of discarding them.
    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    /// Discover units under `inputs` and process them all.
    ///
    /// Fails only for run-fatal problems (an unusable output directory),
    /// before any unit is touched. Per-unit failures end up in the report.
    pub async fn run(&self, inputs: &[PathBuf], extension: &str) -> Result<RunReport, BatchError> {
        self.settings.prepare_output_dir()?;

        let discovery = discover(inputs, extension);
        for skipped in &discovery.skipped {
            self.events.log(
                LogLevel::Warn,
                format!("Skipping {}: {}", skipped.path.display(), skipped.reason),
            );
        }

        let mut report = self.process_units(discovery.units).await;
        report.skipped = discovery.skipped;
        Ok(report)
    }

    /// Process already-discovered units. Admission follows `units` order.
    pub async fn process_units(&self, units: Vec<InputUnit>) -> RunReport {
        let mut report = RunReport::default();
        self.events.emit(Event::UnitsDiscovered { count: units.len() });

        if units.is_empty() {
            warn!("no input files to process");
            self.events.log(LogLevel::Warn, "No input files found");
            return report;
        }

        info!(
            units = units.len(),
            max_concurrent_jobs = self.settings.max_concurrent_jobs,
            "starting batch run"
        );

        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_jobs));
        let mut queue: VecDeque<InputUnit> = units.into();
        let mut tasks: JoinSet<UnitResult> = JoinSet::new();
        let mut slots: HashMap<Id, TaskSlot> = HashMap::new();

        loop {
            tokio::select! {
                biased;

                Some(joined) = tasks.join_next_with_id() => {
                    self.record(joined, &mut slots, &mut report);
                }

                permit = Arc::clone(&semaphore).acquire_owned(), if !queue.is_empty() => {
                    // `semaphore` is local and never closed.
                    let Ok(permit) = permit else { break };
                    let Some(unit) = queue.pop_front() else { continue };

                    let input = unit.path().to_path_buf();
                    let job_id = Arc::new(OnceLock::new());
                    let pipeline = self.pipeline(Arc::clone(&job_id));
                    let handle = tasks.spawn(async move {
                        let result = pipeline.run(unit).await;
                        drop(permit);
                        result
                    });
                    slots.insert(handle.id(), TaskSlot { input, job_id });
                }

                else => break,
            }
        }

        info!(
            completed = report.completed(),
            failed = report.failed(),
            "batch run finished"
        );
        report
    }

    fn pipeline(&self, job_id: Arc<OnceLock<String>>) -> Pipeline {
        Pipeline {
            client: Arc::clone(&self.client),
            job_id,
            events: self.events.clone(),
            check_interval: self.settings.check_interval,
            output_dir: self.settings.output_dir.clone(),
        }
    }

    fn record(
        &self,
        joined: Result<(Id, UnitResult), JoinError>,
        slots: &mut HashMap<Id, TaskSlot>,
        report: &mut RunReport,
    ) {
        match joined {
            Ok((id, UnitResult::Finished(outcome))) => {
                slots.remove(&id);
                report.outcomes.push(outcome);
            }
            Ok((id, UnitResult::Dropped(unit))) => {
                slots.remove(&id);
                report.dropped.push(unit);
            }
            Err(err) => {
                let (input, job_id) = match slots.remove(&err.id()) {
                    Some(slot) => (slot.input, slot.job_id.get().cloned()),
                    None => (PathBuf::new(), None),
                };

                // A remote job exists: report it by id so it can still be found.
                if let Some(job_id) = job_id {
                    error!(job_id = %job_id, input = %input.display(), error = %err, "pipeline task died");
                    self.events.log(
                        LogLevel::Error,
                        format!("Pipeline for job {job_id} aborted: {err}"),
                    );
                    let outcome =
                        JobOutcome::failure(&job_id, FailureReason::Panicked(err.to_string()));
                    self.events.emit(Event::JobFinished {
                        job_id,
                        outcome: outcome.clone(),
                    });
                    report.outcomes.push(outcome);
                    return;
                }

                error!(input = %input.display(), error = %err, "pipeline task died");
                let unit = DroppedUnit {
                    input,
                    stage: Stage::Failed,
                    reason: FailureReason::Panicked(err.to_string()),
                };
                self.events.log(
                    LogLevel::Error,
                    format!("Pipeline for {} aborted: {}", unit.input.display(), err),
                );
                self.events.emit(Event::UnitDropped { unit: unit.clone() });
                report.dropped.push(unit);
            }
        }
    }
}

/// Per-unit state handed to each spawned pipeline task. Nothing in here is
/// shared mutably between units.
struct Pipeline {
    client: Arc<dyn JobClient>,
    /// Set as soon as the remote job exists.
    job_id: Arc<OnceLock<String>>,
    events: EventSink,
    check_interval: Duration,
    output_dir: PathBuf,
}

impl Pipeline {
    async fn run(self, unit: InputUnit) -> UnitResult {
        let mut tracker = UnitTracker::new();

        self.enter(&mut tracker, Stage::Uploading, &unit);
        let file_id = match self.upload(&unit).await {
            Ok(id) => id,
            Err(reason) => return self.drop_unit(&unit, &mut tracker, reason),
        };
        self.enter(&mut tracker, Stage::Uploaded, &unit);
        info!(input = %unit, file_id = %file_id, "input uploaded");

        self.enter(&mut tracker, Stage::JobCreating, &unit);
        let job = match self.client.create_job(&file_id).await {
            Ok(batch) => RemoteJob::from(&batch),
            Err(e) => {
                return self.drop_unit(&unit, &mut tracker, FailureReason::CreateJob(e.to_string()));
            }
        };
        self.enter(&mut tracker, Stage::JobCreated, &unit);
        let _ = self.job_id.set(job.id.clone());
        info!(job_id = %job.id, input = %unit, input_file = %job.input_ref, status = %job.status, "batch job created");
        self.events.emit(Event::JobCreated {
            job_id: job.id.clone(),
            status: job.status,
        });
        self.events
            .log(LogLevel::Info, format!("Job created: {} ({})", job.id, unit.file_name()));

        self.enter(&mut tracker, Stage::Polling, &unit);
        let outcome = self.poll_until_done(&job, &unit).await;

        let last = if outcome.succeeded {
            Stage::Completed
        } else {
            Stage::Failed
        };
        self.enter(&mut tracker, last, &unit);
        debug!(job_id = %job.id, stages = ?tracker.history(), "pipeline finished");
        debug_assert!(tracker.stage().is_terminal());

        self.events.emit(Event::JobFinished {
            job_id: job.id.clone(),
            outcome: outcome.clone(),
        });
        UnitResult::Finished(outcome)
    }

    fn enter(&self, tracker: &mut UnitTracker, next: Stage, unit: &InputUnit) {
        match tracker.advance(next) {
            Ok(()) => debug!(input = %unit, stage = %next, in_flight = next.is_in_flight(), "pipeline stage"),
            Err(err) => error!(input = %unit, error = %err, "pipeline out of order"),
        }
    }

    async fn upload(&self, unit: &InputUnit) -> Result<String, FailureReason> {
        let content = tokio::fs::read(unit.path())
            .await
            .map_err(|e| FailureReason::ReadInput(e.to_string()))?;
        self.client
            .upload(content, &unit.file_name())
            .await
            .map_err(|e| FailureReason::Upload(e.to_string()))
    }

    fn drop_unit(
        &self,
        unit: &InputUnit,
        tracker: &mut UnitTracker,
        reason: FailureReason,
    ) -> UnitResult {
        let stage = tracker.stage();
        self.enter(tracker, Stage::Failed, unit);
        error!(input = %unit, stage = %stage, reason = %reason, "input dropped before a job existed");
        self.events.log(
            LogLevel::Error,
            format!("Failed to submit {}: {}", unit.file_name(), reason),
        );

        let dropped = DroppedUnit {
            input: unit.path().to_path_buf(),
            stage,
            reason,
        };
        self.events.emit(Event::UnitDropped {
            unit: dropped.clone(),
        });
        UnitResult::Dropped(dropped)
    }

    /// Poll with backoff until the job reaches a terminal status, then collect it.
    async fn poll_until_done(&self, job: &RemoteJob, unit: &InputUnit) -> JobOutcome {
        let mut backoff = PollBackoff::new(self.check_interval);
        let mut last_status = job.status;
        let mut checks: u32 = 0;

        loop {
            let raw = match self.client.get_status(&job.id).await {
                Ok(raw) => raw,
                Err(e) => return self.fail(&job.id, FailureReason::Poll(e.to_string())),
            };
            checks += 1;
            let status = JobStatus::from_remote(&raw);

            let delay = backoff.current();
            if status != last_status {
                let progress_hint = (!status.is_terminal())
                    .then(|| format!("check #{checks}, next in {:.1}s", delay.as_secs_f64()));
                self.events.emit(Event::StatusChanged {
                    job_id: job.id.clone(),
                    status,
                    progress_hint,
                });
                last_status = status;
            }

            match status {
                JobStatus::Completed => return self.collect(&job.id, unit).await,
                JobStatus::Failed | JobStatus::Expired | JobStatus::Cancelled => {
                    return self.fail(&job.id, FailureReason::RemoteStatus(status));
                }
                JobStatus::Queued | JobStatus::InProgress => {}
            }

            debug!(job_id = %job.id, %status, delay_secs = delay.as_secs_f64(), "job not finished");
            sleep(backoff.next_delay()).await;
        }
    }

    /// Fetch the finished job, download its output and write it locally.
    async fn collect(&self, job_id: &str, unit: &InputUnit) -> JobOutcome {
        let batch = match self.client.get_job(job_id).await {
            Ok(batch) => batch,
            Err(e) => return self.fail(job_id, FailureReason::Poll(e.to_string())),
        };

        let Some(output_ref) = RemoteJob::from(&batch).output_ref else {
            if let Some(error_file) = &batch.error_file_id {
                warn!(job_id, error_file = %error_file, "job produced only an error file");
            }
            return self.fail(job_id, FailureReason::MissingOutput);
        };

        let content = match self.client.download(&output_ref).await {
            Ok(content) => content,
            Err(e) => return self.fail(job_id, FailureReason::Download(e.to_string())),
        };

        let extension = unit.extension().unwrap_or("jsonl");
        let path = self
            .output_dir
            .join(format!("{job_id}_results.{extension}"));
        if let Err(e) = tokio::fs::write(&path, content).await {
            let message = e.to_string();
            return self.fail(job_id, FailureReason::WriteOutput { path, message });
        }

        info!(job_id, output = %path.display(), "results downloaded");
        self.events.log(
            LogLevel::Info,
            format!("Job {job_id} completed, results saved to {}", path.display()),
        );
        JobOutcome::success(job_id, path)
    }

    fn fail(&self, job_id: &str, reason: FailureReason) -> JobOutcome {
        match &reason {
            FailureReason::MissingOutput => {
                error!(job_id, "job reported completed but has no output file")
            }
            FailureReason::RemoteStatus(status) => error!(job_id, %status, "job failed remotely"),
            other => error!(job_id, local = other.is_local(), reason = %other, "job failed"),
        }
        self.events
            .log(LogLevel::Error, format!("Job {job_id} failed: {reason}"));
        JobOutcome::failure(job_id, reason)
    }
}
