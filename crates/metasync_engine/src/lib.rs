//! # metasync engine
//!
//! Client-side sync engine for the metadata API.
//!
//! This crate provides:
//! - Login and an explicit, immutable `Session`
//! - SOAP transport over an abstract HTTP client (reqwest with the
//!   `blocking-http` feature)
//! - Export submission and bounded, cancellable status polling
//! - Checksum-based reconciliation of the delivered archive against a
//!   local working tree
//! - A sync state machine tying the steps together
//!
//! ## Architecture
//!
//! A sync cycle is strictly sequential:
//! 1. Submit an export job for the configured metadata types
//! 2. Poll the job until the archive is delivered or a bound is reached
//! 3. Replace every entry whose checksum differs from the local file with
//!    the local content
//!
//! ## Key Invariants
//!
//! - No authenticated request is sent without a session
//! - Polling is always bounded by attempts, a deadline, or both
//! - A status fault means "not ready yet"; only the bound ends a dead job
//! - Reconciliation preserves entry order and is idempotent
//! - Nothing is retried automatically

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod http;
mod poller;
mod reconcile;
mod session;
mod state;
mod transport;

pub use config::{ClientConfig, PollConfig, DEFAULT_EXPORT_TYPES};
pub use error::{SyncError, SyncResult};
#[cfg(feature = "blocking-http")]
pub use http::ReqwestClient;
pub use http::{HttpClient, HttpResponse, SoapTransport};
pub use poller::{
    CancellationToken, ExportJob, ExportPoller, FetchedExport, JobStatus, PollOutcome, PollState,
};
pub use reconcile::{
    EntrySource, FsWorkingTree, MemoryWorkingTree, PathMapping, ReconciledArchive,
    ReconciledEntry, Reconciler, WorkingTree,
};
pub use session::{authenticate, Credentials, Session};
pub use state::{SyncCycleResult, SyncEngine, SyncState, SyncStats};
pub use transport::{MetadataTransport, MockCall, MockTransport};
