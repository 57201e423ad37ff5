//! Export job submission and bounded status polling.

use crate::config::PollConfig;
use crate::error::{SyncError, SyncResult};
use crate::session::Session;
use crate::transport::MetadataTransport;
use metasync_archive::ExportArchive;
use metasync_protocol::RetrieveStatus;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Upper bound on a single sleep while waiting between polls.
const WAIT_SLICE: Duration = Duration::from_millis(25);

/// Outcome of a single status check.
pub type PollOutcome = RetrieveStatus;

/// A cloneable flag used to cancel a running poll from another thread.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns true once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Clears the flag.
    pub fn reset(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check(&self) -> SyncResult<()> {
        if self.is_cancelled() {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// State of the export poller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// No job submitted.
    Idle,
    /// A job was submitted and has not been checked yet.
    Submitted,
    /// At least one status check was made.
    Polling,
    /// The archive was delivered and decoded.
    Ready,
    /// Polling ended without an archive.
    Failed,
}

impl PollState {
    /// Returns true if `next` may follow this state.
    pub fn can_transition_to(self, next: PollState) -> bool {
        use PollState::*;
        matches!(
            (self, next),
            (Idle | Submitted | Ready | Failed, Submitted)
                | (Submitted | Polling, Polling)
                | (Polling, Ready)
                | (Submitted | Polling, Failed)
        )
    }

    /// Returns true if a new job can be submitted.
    pub fn can_submit(self) -> bool {
        self.can_transition_to(PollState::Submitted)
    }
}

/// Status of an export job as seen by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Not yet delivered.
    Pending,
    /// Archive delivered.
    Ready,
    /// Gave up or failed.
    Failed,
}

/// A submitted export job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    /// Server-assigned job id.
    pub job_id: String,
    /// Local view of the job status.
    pub status: JobStatus,
}

impl ExportJob {
    /// Creates a pending job.
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            status: JobStatus::Pending,
        }
    }
}

/// A delivered export.
#[derive(Debug, Clone)]
pub struct FetchedExport {
    /// The completed job.
    pub job: ExportJob,
    /// Decoded archive.
    pub archive: ExportArchive,
    /// Status checks made for this job.
    pub attempts: u32,
}

/// Submits export jobs and polls them until the archive is available.
///
/// One poller drives one job at a time. The state only moves along
/// `Idle -> Submitted -> Polling -> Ready | Failed`; a finished poller can
/// submit again.
pub struct ExportPoller<'a, T: MetadataTransport + ?Sized> {
    transport: &'a T,
    config: PollConfig,
    export_types: Vec<String>,
    state: RwLock<PollState>,
    attempts: AtomicU32,
}

impl<'a, T: MetadataTransport + ?Sized> ExportPoller<'a, T> {
    /// Creates a poller. Fails if `config` does not bound polling.
    pub fn new(transport: &'a T, config: PollConfig, export_types: Vec<String>) -> SyncResult<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            config,
            export_types,
            state: RwLock::new(PollState::Idle),
            attempts: AtomicU32::new(0),
        })
    }

    /// Current state.
    pub fn state(&self) -> PollState {
        *self.state.read()
    }

    /// Status checks made for the current job.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Polling configuration.
    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    fn transition(&self, next: PollState) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_transition_to(next) {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: format!("{:?}", next),
            });
        }
        *state = next;
        Ok(())
    }

    /// Starts an export job. Not retried.
    ///
    /// A job that was submitted but never polled is abandoned by the next
    /// submit.
    pub fn submit_export(&self, session: &Session) -> SyncResult<ExportJob> {
        if !self.state().can_submit() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", self.state()),
                to: format!("{:?}", PollState::Submitted),
            });
        }
        if !session.is_authenticated() {
            return Err(SyncError::NotAuthenticated);
        }

        let job_id = self
            .transport
            .submit_export(session, &self.export_types)
            .map_err(|e| SyncError::ExportSubmit(Box::new(e)))?;

        self.transition(PollState::Submitted)?;
        self.attempts.store(0, Ordering::SeqCst);
        info!(job_id = %job_id, types = self.export_types.len(), "export submitted");
        Ok(ExportJob::new(job_id))
    }

    /// Checks the job once.
    ///
    /// A fault in the response is reported as pending: the server answers
    /// the same way for a running job and for one that will never finish.
    pub fn poll_once(&self, session: &Session, job: &ExportJob) -> SyncResult<PollOutcome> {
        self.transition(PollState::Polling)?;
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;

        let outcome = self.transport.check_export(session, &job.job_id)?;
        match &outcome {
            RetrieveStatus::Pending { fault } => {
                warn!(job_id = %job.job_id, attempt, fault = %fault, "export not ready");
            }
            RetrieveStatus::Ready { .. } => {
                debug!(job_id = %job.job_id, attempt, "export ready");
            }
        }
        Ok(outcome)
    }

    /// Polls until the archive is available and decodes it.
    ///
    /// Gives up with `PollTimeout` once the attempt bound or the deadline is
    /// reached, and with `Cancelled` as soon as `cancel` fires. The job and
    /// the poller are marked failed on any error.
    pub fn poll_until_ready(
        &self,
        session: &Session,
        job: &mut ExportJob,
        cancel: &CancellationToken,
    ) -> SyncResult<ExportArchive> {
        match self.run_until_ready(session, job, cancel) {
            Ok(archive) => {
                self.transition(PollState::Ready)?;
                job.status = JobStatus::Ready;
                info!(
                    job_id = %job.job_id,
                    attempts = self.attempts(),
                    entries = archive.len(),
                    "export delivered"
                );
                Ok(archive)
            }
            Err(e) => {
                // Failed is reachable from every state this loop can leave.
                let _ = self.transition(PollState::Failed);
                job.status = JobStatus::Failed;
                warn!(job_id = %job.job_id, error = %e, "export polling failed");
                Err(e)
            }
        }
    }

    fn run_until_ready(
        &self,
        session: &Session,
        job: &ExportJob,
        cancel: &CancellationToken,
    ) -> SyncResult<ExportArchive> {
        let start = Instant::now();
        let mut attempts = 0u32;

        loop {
            cancel.check()?;
            if self.bound_reached(attempts, start.elapsed()) {
                return Err(SyncError::PollTimeout {
                    attempts,
                    elapsed: start.elapsed(),
                });
            }

            attempts += 1;
            if let RetrieveStatus::Ready { zip_file } = self.poll_once(session, job)? {
                return ExportArchive::from_base64(&zip_file).map_err(SyncError::ArchiveDecode);
            }

            if self.config.max_attempts.map_or(true, |max| attempts < max) {
                self.wait(cancel, start)?;
            }
        }
    }

    fn bound_reached(&self, attempts: u32, elapsed: Duration) -> bool {
        if let Some(max) = self.config.max_attempts {
            if attempts >= max {
                return true;
            }
        }
        if let Some(deadline) = self.config.deadline {
            // The first attempt always runs.
            if attempts > 0 && elapsed >= deadline {
                return true;
            }
        }
        false
    }

    /// Sleeps one interval, cut short by the deadline or by `cancel`.
    fn wait(&self, cancel: &CancellationToken, start: Instant) -> SyncResult<()> {
        let mut until = Instant::now() + self.config.interval;
        if let Some(deadline) = self.config.deadline {
            until = until.min(start + deadline);
        }
        loop {
            cancel.check()?;
            let now = Instant::now();
            if now >= until {
                return Ok(());
            }
            std::thread::sleep((until - now).min(WAIT_SLICE));
        }
    }

    /// Submits a job and polls it until the archive is available.
    pub fn fetch(&self, session: &Session, cancel: &CancellationToken) -> SyncResult<FetchedExport> {
        cancel.check()?;
        let mut job = self.submit_export(session)?;
        let archive = self.poll_until_ready(session, &mut job, cancel)?;
        Ok(FetchedExport {
            job,
            archive,
            attempts: self.attempts(),
        })
    }
}
