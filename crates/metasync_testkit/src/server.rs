//! An in-memory metadata API for driving `SoapTransport` end to end.
//!
//! `FakeMetadataServer` implements `HttpClient`, so requests never leave the
//! process. It parses every envelope, checks the session header, and answers
//! the way the real API does, including SOAP faults with status 500.

use crate::responses;
use metasync_archive::ExportArchive;
use metasync_engine::{HttpClient, HttpResponse};
use metasync_protocol::{ExecuteAnonymousResult, MetadataItem, XmlTree};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

/// Session token handed out by default.
pub const FAKE_SESSION_ID: &str = "00D000000000001!AQ4AQFakeSession";

/// Metadata URL returned by a successful login.
pub const FAKE_METADATA_URL: &str = "https://na1.salesforce.com/services/Soap/m/28.0/00D000000000001";

/// Export job id handed out by default.
pub const FAKE_JOB_ID: &str = "09S000000000001";

/// Fault text used for a job that is not ready yet.
pub const PENDING_FAULT: &str = "Retrieve result has been deleted.";

/// A request seen by the fake server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Request URL.
    pub url: String,
    /// Name of the first element of the SOAP body.
    pub operation: String,
    /// Session id from the session header, if any.
    pub session_id: Option<String>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
    /// Raw request body.
    pub body: String,
}

#[derive(Debug)]
struct ServerState {
    session_id: String,
    metadata_server_url: String,
    login_fault: Option<(String, String)>,
    job_id: String,
    pending_polls: usize,
    polls: usize,
    archive: ExportArchive,
    execute_result: ExecuteAnonymousResult,
    listings: HashMap<String, Vec<MetadataItem>>,
    injected: VecDeque<Result<HttpResponse, String>>,
    requests: Vec<RecordedRequest>,
}

/// A scripted metadata API.
#[derive(Debug)]
pub struct FakeMetadataServer {
    state: Mutex<ServerState>,
}

impl FakeMetadataServer {
    /// Creates a server that accepts any login and delivers an empty
    /// archive on the first status check.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ServerState {
                session_id: FAKE_SESSION_ID.to_string(),
                metadata_server_url: FAKE_METADATA_URL.to_string(),
                login_fault: None,
                job_id: FAKE_JOB_ID.to_string(),
                pending_polls: 0,
                polls: 0,
                archive: ExportArchive::default(),
                execute_result: ExecuteAnonymousResult {
                    compiled: true,
                    compile_problem: None,
                    success: Some(true),
                    exception_message: None,
                    debug_log: None,
                },
                listings: HashMap::new(),
                injected: VecDeque::new(),
                requests: Vec::new(),
            }),
        }
    }

    /// Sets the archive delivered by the export.
    pub fn with_archive(self, archive: ExportArchive) -> Self {
        self.state.lock().archive = archive;
        self
    }

    /// Answers this many status checks with a pending fault before the
    /// archive is delivered.
    pub fn with_pending_polls(self, count: usize) -> Self {
        self.state.lock().pending_polls = count;
        self
    }

    /// Rejects every login with the given fault.
    pub fn with_login_fault(self, code: impl Into<String>, message: impl Into<String>) -> Self {
        self.state.lock().login_fault = Some((code.into(), message.into()));
        self
    }

    /// Sets the metadata URL returned by login.
    pub fn with_metadata_server_url(self, url: impl Into<String>) -> Self {
        self.state.lock().metadata_server_url = url.into();
        self
    }

    /// Sets the result of executeAnonymous.
    pub fn with_execute_result(self, result: ExecuteAnonymousResult) -> Self {
        self.state.lock().execute_result = result;
        self
    }

    /// Sets the items listed for a metadata type.
    pub fn with_listing(self, metadata_type: impl Into<String>, items: Vec<MetadataItem>) -> Self {
        self.state.lock().listings.insert(metadata_type.into(), items);
        self
    }

    /// Answers the next request with `response` instead of routing it.
    pub fn inject(&self, response: Result<HttpResponse, String>) {
        self.state.lock().injected.push_back(response);
    }

    /// Requests seen so far.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.lock().requests.clone()
    }

    /// Operation names of the requests seen so far.
    pub fn operations(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|r| r.operation.clone())
            .collect()
    }

    /// Number of status checks answered.
    pub fn polls(&self) -> usize {
        self.state.lock().polls
    }

    fn route(state: &mut ServerState, request: &RecordedRequest, tree: &XmlTree) -> HttpResponse {
        if request.operation != "login" && request.session_id.as_deref() != Some(state.session_id.as_str()) {
            return fault_response("sf:INVALID_SESSION_ID", "Invalid Session ID found in SessionHeader");
        }

        match request.operation.as_str() {
            "login" => match &state.login_fault {
                Some((code, message)) => fault_response(code, message),
                None => ok(responses::login(&state.session_id, &state.metadata_server_url)),
            },
            "retrieve" => {
                state.polls = 0;
                ok(responses::retrieve(&state.job_id))
            }
            "checkRetrieveStatus" => {
                let job_id = tree.find_field("asyncProcessId").unwrap_or_default();
                if job_id != state.job_id {
                    return fault_response("sf:INVALID_ID_FIELD", "Invalid async process id");
                }
                state.polls += 1;
                if state.polls <= state.pending_polls {
                    return fault_response("sf:INVALID_LOCATOR", PENDING_FAULT);
                }
                match state.archive.to_base64() {
                    Ok(zip) => ok(responses::retrieve_ready(&state.job_id, &zip)),
                    Err(e) => fault_response("sf:UNKNOWN_EXCEPTION", &e.to_string()),
                }
            }
            "executeAnonymous" => ok(responses::execute_anonymous(&state.execute_result)),
            "listMetadata" => {
                let metadata_type = tree.find_field("type").unwrap_or_default();
                let items = state.listings.get(metadata_type).cloned().unwrap_or_default();
                ok(responses::list_metadata(&items))
            }
            other => fault_response("sf:UNKNOWN_OPERATION", &format!("No operation {}", other)),
        }
    }
}

impl Default for FakeMetadataServer {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpClient for FakeMetadataServer {
    fn post(&self, url: &str, body: Vec<u8>, headers: &[(&str, &str)]) -> Result<HttpResponse, String> {
        let body = String::from_utf8(body).map_err(|e| e.to_string())?;
        let tree = XmlTree::parse_str(&body).map_err(|e| e.to_string())?;

        let operation = tree
            .root()
            .find("Body")
            .and_then(|b| b.children().first())
            .map(|e| e.name().to_string())
            .unwrap_or_default();
        let session_id = tree
            .root()
            .find("SessionHeader")
            .and_then(|h| h.field("sessionId"))
            .map(str::to_string);

        let request = RecordedRequest {
            url: url.to_string(),
            operation,
            session_id,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body,
        };

        let mut state = self.state.lock();
        state.requests.push(request.clone());
        if let Some(injected) = state.injected.pop_front() {
            return injected;
        }
        Ok(Self::route(&mut state, &request, &tree))
    }
}

fn ok(body: String) -> HttpResponse {
    HttpResponse::new(200, body)
}

fn fault_response(code: &str, message: &str) -> HttpResponse {
    HttpResponse::new(500, responses::fault(code, message))
}
