//! Sync engine state machine.

use crate::config::ClientConfig;
use crate::error::{SyncError, SyncResult};
use crate::poller::{CancellationToken, ExportPoller};
use crate::reconcile::{ReconciledArchive, Reconciler, WorkingTree};
use crate::session::{authenticate, Credentials, Session};
use crate::transport::MetadataTransport;
use metasync_protocol::{ExecuteAnonymousResult, MetadataItem};
use parking_lot::RwLock;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// The current state of the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// Engine is idle.
    Idle,
    /// Engine is logging in.
    Authenticating,
    /// Engine is submitting an export job.
    Exporting,
    /// Engine is waiting for the export to complete.
    Polling,
    /// Engine is comparing the archive with the working tree.
    Reconciling,
    /// Engine has completed a sync cycle.
    Synced,
    /// Engine encountered an error.
    Error,
}

impl SyncState {
    /// Returns true if the engine is in an active state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Authenticating
                | SyncState::Exporting
                | SyncState::Polling
                | SyncState::Reconciling
        )
    }

    /// Returns true if the engine can start a new sync.
    pub fn can_start_sync(&self) -> bool {
        matches!(self, SyncState::Idle | SyncState::Synced | SyncState::Error)
    }
}

/// Statistics about sync operations.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Total number of sync cycles completed.
    pub cycles_completed: u64,
    /// Total number of export status checks.
    pub poll_attempts: u64,
    /// Total number of entries taken from the working tree.
    pub local_entries: u64,
    /// Total number of entries kept from the server.
    pub remote_entries: u64,
    /// Last sync time.
    pub last_sync_time: Option<Instant>,
    /// Last error message.
    pub last_error: Option<String>,
}

/// Result of a sync cycle.
#[derive(Debug, Clone)]
pub struct SyncCycleResult {
    /// Export job that delivered the archive.
    pub job_id: String,
    /// The reconciled archive.
    pub archive: ReconciledArchive,
    /// Status checks made before the archive was delivered.
    pub poll_attempts: u32,
    /// Entries taken from the working tree.
    pub local_entries: usize,
    /// Entries kept from the server.
    pub remote_entries: usize,
    /// Duration of the sync cycle.
    pub duration: Duration,
}

/// The sync engine drives login, export, polling and reconciliation.
///
/// All work happens on the calling thread. Another thread may call
/// [`cancel`](Self::cancel) to stop a running cycle.
pub struct SyncEngine<T: MetadataTransport, W: WorkingTree> {
    config: ClientConfig,
    transport: T,
    tree: W,
    session: RwLock<Option<Session>>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
    cancel: CancellationToken,
}

impl<T: MetadataTransport, W: WorkingTree> SyncEngine<T, W> {
    /// Creates a new sync engine.
    pub fn new(config: ClientConfig, transport: T, tree: W) -> Self {
        Self {
            config,
            transport,
            tree,
            session: RwLock::new(None),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
            cancel: CancellationToken::new(),
        }
    }

    /// Gets the current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Gets the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Gets the transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Gets the working tree.
    pub fn working_tree(&self) -> &W {
        &self.tree
    }

    /// Returns a clone of the engine's cancellation token.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Cancels any ongoing sync operation.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns the current session, if logged in.
    pub fn session(&self) -> SyncResult<Session> {
        self.session.read().clone().ok_or(SyncError::NotAuthenticated)
    }

    /// Returns true if a login succeeded.
    pub fn is_authenticated(&self) -> bool {
        self.session.read().is_some()
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    /// Moves from a resting state to `next` under one lock.
    fn begin(&self, next: SyncState, to: &str) -> SyncResult<()> {
        let mut state = self.state.write();
        if !state.can_start_sync() {
            return Err(SyncError::InvalidStateTransition {
                from: format!("{:?}", *state),
                to: to.into(),
            });
        }
        *state = next;
        Ok(())
    }

    /// Logs in and replaces the current session.
    ///
    /// On failure the previous session is dropped.
    pub fn login(&self, credentials: &Credentials) -> SyncResult<()> {
        self.begin(SyncState::Authenticating, "login")?;

        match authenticate(&self.transport, credentials) {
            Ok(session) => {
                *self.session.write() = Some(session);
                self.set_state(SyncState::Idle);
                Ok(())
            }
            Err(e) => {
                *self.session.write() = None;
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    /// Performs a full sync cycle using the engine's cancellation token.
    ///
    /// The token is reset first, so a `cancel()` from an earlier cycle does
    /// not stop this one.
    pub fn synchronize(&self) -> SyncResult<SyncCycleResult> {
        self.cancel.reset();
        let cancel = self.cancel.clone();
        self.synchronize_with(&cancel)
    }

    /// Performs a full sync cycle: export, poll, reconcile.
    pub fn synchronize_with(&self, cancel: &CancellationToken) -> SyncResult<SyncCycleResult> {
        self.begin(SyncState::Exporting, "sync")?;

        let start = Instant::now();
        match self.run_cycle(cancel, start) {
            Ok(result) => {
                self.set_state(SyncState::Synced);
                {
                    let mut stats = self.stats.write();
                    stats.cycles_completed += 1;
                    stats.local_entries += result.local_entries as u64;
                    stats.remote_entries += result.remote_entries as u64;
                    stats.last_sync_time = Some(Instant::now());
                    stats.last_error = None;
                }
                info!(
                    job_id = %result.job_id,
                    entries = result.archive.len(),
                    local = result.local_entries,
                    attempts = result.poll_attempts,
                    duration_ms = result.duration.as_millis() as u64,
                    "sync cycle complete"
                );
                Ok(result)
            }
            Err(e) => {
                self.handle_error(&e);
                Err(e)
            }
        }
    }

    fn run_cycle(&self, cancel: &CancellationToken, start: Instant) -> SyncResult<SyncCycleResult> {
        self.config.validate()?;
        let session = self.session()?;

        let poller = ExportPoller::new(
            &self.transport,
            self.config.poll.clone(),
            self.config.export_types.clone(),
        )?;
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        let mut job = poller.submit_export(&session)?;

        self.set_state(SyncState::Polling);
        let polled = poller.poll_until_ready(&session, &mut job, cancel);
        self.stats.write().poll_attempts += u64::from(poller.attempts());
        let remote = polled?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        self.set_state(SyncState::Reconciling);
        let archive = Reconciler::new(self.config.mapping.clone()).reconcile(&remote, &self.tree)?;

        Ok(SyncCycleResult {
            job_id: job.job_id,
            local_entries: archive.local_count(),
            remote_entries: archive.remote_count(),
            archive,
            poll_attempts: poller.attempts(),
            duration: start.elapsed(),
        })
    }

    /// Runs an anonymous script.
    pub fn execute_anonymous(&self, source: &str) -> SyncResult<ExecuteAnonymousResult> {
        let session = self.session()?;
        self.transport.execute_anonymous(&session, source)
    }

    /// Lists the items of one metadata type.
    pub fn list_metadata(&self, metadata_type: &str) -> SyncResult<Vec<MetadataItem>> {
        let session = self.session()?;
        self.transport.list_metadata(&session, metadata_type)
    }

    /// Lists every configured export type, one request per type, in order.
    pub fn list_configured_metadata(&self) -> SyncResult<Vec<(String, Vec<MetadataItem>)>> {
        let session = self.session()?;
        let mut listings = Vec::with_capacity(self.config.export_types.len());
        for metadata_type in &self.config.export_types {
            let items = self.transport.list_metadata(&session, metadata_type)?;
            listings.push((metadata_type.clone(), items));
        }
        Ok(listings)
    }

    /// Handles an error by updating state and stats.
    fn handle_error(&self, error: &SyncError) {
        warn!(error = %error, state = ?self.state(), "sync engine error");
        self.set_state(SyncState::Error);
        self.stats.write().last_error = Some(error.to_string());
    }
}
