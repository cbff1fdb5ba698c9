//! Job execution: upsert, execute, poll for a result identifier, fetch rows.
//!
//! [`Engine`] holds the stateless pieces (transport, authenticator, poller)
//! and takes the [`Session`] by mutable reference on every call.
//! [`DuneClient`] owns one engine and one session and adds the outer
//! retry policy of [`fetch_with_retries`].

use std::fmt;

use dune_interchange::{
    decode_results, read_envelope, require_fields, DashboardConfig, DecodeError, Envelope,
    Operation, Payload, Query, QueryResults, Record, ResultMetadata,
};

use crate::config::{ClientConfig, Credentials};
use crate::error::DuneError;
use crate::poll::{Clock, Poller, SystemClock};
use crate::session::{Authenticator, Session};
use crate::transport::{HttpRequest, RequestBody, Transport, UreqTransport};

// ── Job phase ───────────────────────────────────────────────────────

/// Where a client is in the execution of its current query.
///
/// `Created → Initiated → Executing → ResultPending → ResultReady →
/// Decoded`. A session failure returns to `Created` before logging in
/// again; running out of retries (or any non-retryable error) ends in
/// `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Created,
    Initiated,
    Executing,
    ResultPending,
    ResultReady,
    Decoded,
    Failed,
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobPhase::Created => "created",
            JobPhase::Initiated => "initiated",
            JobPhase::Executing => "executing",
            JobPhase::ResultPending => "result_pending",
            JobPhase::ResultReady => "result_ready",
            JobPhase::Decoded => "decoded",
            JobPhase::Failed => "failed",
        };
        f.write_str(name)
    }
}

// ── Engine ──────────────────────────────────────────────────────────

/// Sends payloads to the GraphQL endpoint and drives a job to completion.
pub struct Engine<T, C = SystemClock> {
    transport: T,
    auth: Authenticator,
    graph_url: String,
    poller: Poller<C>,
}

impl<T: Transport, C: Clock> Engine<T, C> {
    pub fn new(transport: T, auth: Authenticator, graph_url: impl Into<String>, poller: Poller<C>) -> Self {
        Engine {
            transport,
            auth,
            graph_url: graph_url.into(),
            poller,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn base_url(&self) -> &str {
        self.auth.base_url()
    }

    /// Log in and obtain a first bearer token.
    pub fn login(&self, session: &mut Session) -> Result<(), DuneError> {
        self.auth.login(&self.transport, session)?;
        self.auth.refresh_token(&self.transport, session)
    }

    /// Refresh the token, send `payload`, and return the response's `data`.
    ///
    /// An `errors` member in the body is a [`DuneError::RemoteRequest`]
    /// whatever the HTTP status.
    pub fn post(&self, session: &mut Session, payload: &Payload) -> Result<serde_json::Value, DuneError> {
        let operation = payload.operation();
        self.auth.refresh_token(&self.transport, session)?;

        let request = session.decorate(
            HttpRequest::post(&self.graph_url, RequestBody::Json(payload.to_json())),
            self.auth.base_url(),
        );
        let response = self.transport.send(&request)?;
        session.absorb(&request.url, &response);

        let envelope = match response.json() {
            Some(body) => read_envelope(&body),
            None => Err(DecodeError::MissingData),
        };
        let data = match envelope {
            Ok(Envelope::Errors(errors)) => {
                return Err(DuneError::RemoteRequest {
                    operation,
                    message: errors.to_string(),
                })
            }
            Ok(Envelope::Data(data)) if response.is_success() => data,
            Ok(Envelope::Data(_)) | Err(_) if !response.is_success() => {
                return Err(DuneError::Http {
                    operation,
                    status: response.status,
                })
            }
            Ok(Envelope::Data(data)) => data,
            Err(e) => return Err(e.into()),
        };

        require_fields(&data, operation.response_keys())?;
        Ok(data)
    }

    /// Upsert the definition of `query`.
    pub fn initiate(&self, session: &mut Session, query: &Query) -> Result<(), DuneError> {
        self.post(session, &Payload::upsert_query(query))?;
        Ok(())
    }

    /// Start a job for `query_id`. Does not wait for it.
    pub fn execute(&self, session: &mut Session, query_id: u64) -> Result<(), DuneError> {
        self.post(session, &Payload::execute(query_id))?;
        Ok(())
    }

    /// One non-blocking check for the result identifier of `query_id`.
    pub fn poll_result_id(&self, session: &mut Session, query_id: u64) -> Result<Option<String>, DuneError> {
        let data = self.post(session, &Payload::get_result_id(query_id))?;
        Ok(data
            .get("get_result")
            .and_then(|r| r.get("result_id"))
            .and_then(|id| id.as_str())
            .filter(|id| !id.is_empty())
            .map(str::to_string))
    }

    /// Poll until a result identifier appears. No deadline.
    pub fn await_result(&self, session: &mut Session, query_id: u64) -> Result<String, DuneError> {
        self.poller
            .wait_for(|| self.poll_result_id(session, query_id))
    }

    /// Rows and metadata of a completed job.
    pub fn fetch_rows(&self, session: &mut Session, result_id: &str) -> Result<QueryResults, DuneError> {
        let data = self.post(session, &Payload::fetch_rows(result_id))?;
        let results = decode_results(&data)?;
        if let Some(message) = &results.metadata.error {
            return Err(DuneError::JobFailed {
                result_id: result_id.to_string(),
                message: message.clone(),
            });
        }
        Ok(results)
    }

    /// Dashboard definition owned by `owner` under `slug`, if any.
    pub fn find_dashboard(
        &self,
        session: &mut Session,
        owner: &str,
        slug: &str,
    ) -> Result<Option<DashboardConfig>, DuneError> {
        let data = self.post(session, &Payload::find_dashboard(owner, slug))?;
        Ok(DashboardConfig::from_remote(&data)?)
    }
}

// ── Retry envelope ──────────────────────────────────────────────────

/// The steps [`fetch_with_retries`] composes.
pub trait QueryExecutor {
    /// Upsert the query definition.
    fn initiate(&mut self, query: &Query) -> Result<(), DuneError>;

    /// Start a job without waiting for it.
    fn execute(&mut self, query_id: u64) -> Result<(), DuneError>;

    /// Execute, wait for the result identifier, and fetch the rows.
    fn execute_and_await(&mut self, query_id: u64) -> Result<Vec<Record>, DuneError>;

    /// Log in again and refresh the token.
    fn reauthenticate(&mut self) -> Result<(), DuneError>;

    /// Observe a phase transition.
    fn enter_phase(&mut self, _phase: JobPhase) {}
}

/// Upsert `query`, then attempt execute-and-await up to `max_retries` times.
///
/// Every attempt that fails with a session failure
/// ([`DuneError::RemoteRequest`]) triggers a fresh login and a restart of
/// the whole execute-and-await sequence. Other errors are returned
/// immediately. With `max_retries == 0` nothing is executed.
pub fn fetch_with_retries<E: QueryExecutor + ?Sized>(
    executor: &mut E,
    query: &Query,
    max_retries: u32,
) -> Result<Vec<Record>, DuneError> {
    tracing::info!(
        query_id = query.query_id(),
        name = query.name(),
        network = %query.network(),
        "fetching query"
    );
    executor.enter_phase(JobPhase::Created);
    if let Err(e) = executor.initiate(query) {
        executor.enter_phase(JobPhase::Failed);
        return Err(e);
    }
    executor.enter_phase(JobPhase::Initiated);

    for attempt in 1..=max_retries {
        match executor.execute_and_await(query.query_id()) {
            Ok(records) => {
                tracing::info!(query_id = query.query_id(), records = records.len(), "got records");
                return Ok(records);
            }
            Err(e) if e.is_session_failure() => {
                tracing::warn!(
                    attempt,
                    max_retries,
                    error = %e,
                    "execution failed, re-establishing connection"
                );
                executor.enter_phase(JobPhase::Created);
                if let Err(auth) = executor.reauthenticate() {
                    executor.enter_phase(JobPhase::Failed);
                    return Err(auth);
                }
            }
            Err(e) => {
                executor.enter_phase(JobPhase::Failed);
                return Err(e);
            }
        }
    }

    executor.enter_phase(JobPhase::Failed);
    Err(DuneError::RetriesExhausted { max_retries })
}

// ── DuneClient ──────────────────────────────────────────────────────

/// One logical client: an engine plus the session it owns.
///
/// Each instance has its own session and token; instances never share
/// state. Several instances logged in to the same account may invalidate
/// each other's sessions.
pub struct DuneClient<T = UreqTransport, C = SystemClock> {
    engine: Engine<T, C>,
    session: Session,
    max_retries: u32,
    phase: JobPhase,
    last_metadata: Option<ResultMetadata>,
}

impl DuneClient {
    /// Client over HTTP with real sleeping. Does not log in.
    pub fn new(config: &ClientConfig, credentials: Credentials) -> Self {
        DuneClient::with_parts(
            config,
            credentials,
            UreqTransport::new(config.request_timeout),
            SystemClock,
        )
    }

    /// Configuration from defaults and environment, credentials from the
    /// environment, logged in and holding a token.
    pub fn from_env() -> Result<Self, DuneError> {
        let config = ClientConfig::load(None)?;
        let credentials = Credentials::from_env()?;
        let mut client = DuneClient::new(&config, credentials);
        client.login()?;
        Ok(client)
    }
}

impl<T: Transport, C: Clock> DuneClient<T, C> {
    pub fn with_parts(config: &ClientConfig, credentials: Credentials, transport: T, clock: C) -> Self {
        let auth = Authenticator::new(config.base_url(), credentials);
        let poller = Poller::new(config.poll.clone(), clock);
        DuneClient {
            engine: Engine::new(transport, auth, config.graph_url.clone(), poller),
            session: Session::new(),
            max_retries: config.max_retries,
            phase: JobPhase::Created,
            last_metadata: None,
        }
    }

    pub fn engine(&self) -> &Engine<T, C> {
        &self.engine
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn phase(&self) -> JobPhase {
        self.phase
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Metadata of the most recently decoded result.
    pub fn last_metadata(&self) -> Option<&ResultMetadata> {
        self.last_metadata.as_ref()
    }

    /// Log in and refresh the token.
    pub fn login(&mut self) -> Result<(), DuneError> {
        self.engine.login(&mut self.session)
    }

    /// Upsert, execute and wait for `query`, retrying on session failure.
    pub fn fetch(&mut self, query: &Query) -> Result<Vec<Record>, DuneError> {
        let max_retries = self.max_retries;
        fetch_with_retries(self, query, max_retries)
    }

    /// Wait for the current result of `query_id` and fetch its rows,
    /// without executing it again.
    pub fn latest_results(&mut self, query_id: u64) -> Result<QueryResults, DuneError> {
        let result_id = self.engine.await_result(&mut self.session, query_id)?;
        self.engine.fetch_rows(&mut self.session, &result_id)
    }

    pub(crate) fn find_dashboard(
        &mut self,
        owner: &str,
        slug: &str,
    ) -> Result<Option<DashboardConfig>, DuneError> {
        self.engine.find_dashboard(&mut self.session, owner, slug)
    }
}

impl<T: Transport, C: Clock> QueryExecutor for DuneClient<T, C> {
    fn initiate(&mut self, query: &Query) -> Result<(), DuneError> {
        self.engine.initiate(&mut self.session, query)
    }

    fn execute(&mut self, query_id: u64) -> Result<(), DuneError> {
        self.engine.execute(&mut self.session, query_id)
    }

    fn execute_and_await(&mut self, query_id: u64) -> Result<Vec<Record>, DuneError> {
        self.enter_phase(JobPhase::Executing);
        self.engine.execute(&mut self.session, query_id)?;

        self.enter_phase(JobPhase::ResultPending);
        let result_id = self.engine.await_result(&mut self.session, query_id)?;

        self.enter_phase(JobPhase::ResultReady);
        tracing::debug!(query_id, result_id = %result_id, "result available");
        let results = self.engine.fetch_rows(&mut self.session, &result_id)?;

        self.enter_phase(JobPhase::Decoded);
        self.last_metadata = Some(results.metadata);
        Ok(results.records)
    }

    fn reauthenticate(&mut self) -> Result<(), DuneError> {
        self.login()
    }

    fn enter_phase(&mut self, phase: JobPhase) {
        tracing::debug!(from = %self.phase, to = %phase, "job phase");
        self.phase = phase;
    }
}
