//! Transport layer abstraction for the metadata API.

use crate::error::{SyncError, SyncResult};
use crate::session::{Credentials, Session};
use metasync_protocol::{ExecuteAnonymousResult, LoginResult, MetadataItem, RetrieveStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// The typed operation set of the remote API.
///
/// Each method is one request/response round trip. Implementations must
/// reject an unauthenticated session with `NotAuthenticated` before sending
/// anything.
pub trait MetadataTransport: Send + Sync {
    /// Logs in.
    fn login(&self, credentials: &Credentials) -> SyncResult<LoginResult>;

    /// Starts an export of the given metadata types and returns the job id.
    fn submit_export(&self, session: &Session, types: &[String]) -> SyncResult<String>;

    /// Checks an export job once.
    fn check_export(&self, session: &Session, job_id: &str) -> SyncResult<RetrieveStatus>;

    /// Runs an anonymous script.
    fn execute_anonymous(&self, session: &Session, source: &str)
        -> SyncResult<ExecuteAnonymousResult>;

    /// Lists the items of one metadata type.
    fn list_metadata(&self, session: &Session, metadata_type: &str)
        -> SyncResult<Vec<MetadataItem>>;
}

/// A call recorded by [`MockTransport`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// `login`.
    Login {
        /// User name sent.
        username: String,
    },
    /// `submit_export`.
    SubmitExport {
        /// Requested types.
        types: Vec<String>,
    },
    /// `check_export`.
    CheckExport {
        /// Polled job.
        job_id: String,
    },
    /// `execute_anonymous`.
    ExecuteAnonymous {
        /// Script source.
        source: String,
    },
    /// `list_metadata`.
    ListMetadata {
        /// Listed type.
        metadata_type: String,
    },
}

/// A scripted transport for testing.
///
/// Responses are queued per operation and consumed in order. An empty
/// queue yields a protocol error.
#[derive(Debug, Default)]
pub struct MockTransport {
    login: Mutex<VecDeque<SyncResult<LoginResult>>>,
    submit: Mutex<VecDeque<SyncResult<String>>>,
    status: Mutex<VecDeque<SyncResult<RetrieveStatus>>>,
    execute: Mutex<VecDeque<SyncResult<ExecuteAnonymousResult>>>,
    listings: Mutex<HashMap<String, Vec<MetadataItem>>>,
    calls: Mutex<Vec<MockCall>>,
}

impl MockTransport {
    /// Creates a mock transport with no scripted responses.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a login response.
    pub fn push_login_response(&self, response: SyncResult<LoginResult>) {
        self.login.lock().push_back(response);
    }

    /// Queues an export submission response.
    pub fn push_submit_response(&self, response: SyncResult<String>) {
        self.submit.lock().push_back(response);
    }

    /// Queues an export status response.
    pub fn push_status_response(&self, response: SyncResult<RetrieveStatus>) {
        self.status.lock().push_back(response);
    }

    /// Queues `count` pending status responses.
    pub fn push_pending(&self, count: usize) {
        let mut queue = self.status.lock();
        for _ in 0..count {
            queue.push_back(Ok(RetrieveStatus::Pending {
                fault: "Retrieve result has been deleted".into(),
            }));
        }
    }

    /// Queues an executeAnonymous response.
    pub fn push_execute_response(&self, response: SyncResult<ExecuteAnonymousResult>) {
        self.execute.lock().push_back(response);
    }

    /// Sets the items returned for a metadata type.
    pub fn set_listing(&self, metadata_type: impl Into<String>, items: Vec<MetadataItem>) {
        self.listings.lock().insert(metadata_type.into(), items);
    }

    /// Returns the recorded calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Returns how many export status checks were made.
    pub fn status_checks(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, MockCall::CheckExport { .. }))
            .count()
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().push(call);
    }

    fn next<R>(queue: &Mutex<VecDeque<SyncResult<R>>>, what: &str) -> SyncResult<R> {
        queue
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Protocol(format!("No mock {} response set", what))))
    }

    fn require_session(session: &Session) -> SyncResult<()> {
        session.authority("mock://{server}", "0").map(|_| ())
    }
}

impl MetadataTransport for MockTransport {
    fn login(&self, credentials: &Credentials) -> SyncResult<LoginResult> {
        self.record(MockCall::Login {
            username: credentials.username().to_string(),
        });
        Self::next(&self.login, "login")
    }

    fn submit_export(&self, session: &Session, types: &[String]) -> SyncResult<String> {
        Self::require_session(session)?;
        self.record(MockCall::SubmitExport {
            types: types.to_vec(),
        });
        Self::next(&self.submit, "submit")
    }

    fn check_export(&self, session: &Session, job_id: &str) -> SyncResult<RetrieveStatus> {
        Self::require_session(session)?;
        self.record(MockCall::CheckExport {
            job_id: job_id.to_string(),
        });
        Self::next(&self.status, "status")
    }

    fn execute_anonymous(
        &self,
        session: &Session,
        source: &str,
    ) -> SyncResult<ExecuteAnonymousResult> {
        Self::require_session(session)?;
        self.record(MockCall::ExecuteAnonymous {
            source: source.to_string(),
        });
        Self::next(&self.execute, "executeAnonymous")
    }

    fn list_metadata(
        &self,
        session: &Session,
        metadata_type: &str,
    ) -> SyncResult<Vec<MetadataItem>> {
        Self::require_session(session)?;
        self.record(MockCall::ListMetadata {
            metadata_type: metadata_type.to_string(),
        });
        Ok(self
            .listings
            .lock()
            .get(metadata_type)
            .cloned()
            .unwrap_or_default())
    }
}
