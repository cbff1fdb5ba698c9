//! End-to-end behaviour of `DuneClient` against an in-memory service.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use dune_client::transport::RequestBody;
use dune_client::{
    ClientConfig, Clock, Credentials, DashboardError, DashboardSource, DuneClient, DuneError,
    HttpRequest, HttpResponse, JobPhase, Transport, TransportError,
};
use dune_interchange::{Network, Operation, Query, Value};
use serde_json::json;

const BASE: &str = "http://dune.test";
const GRAPH: &str = "http://graph.dune.test/v1/graphql";

// ── Fake service ────────────────────────────────────────────────────

#[derive(Default)]
struct Script {
    /// Empty `get_result` responses before a result id is returned.
    pending_polls: u32,
    /// `ExecuteQuery` calls answered with an `errors` payload.
    execute_failures: u32,
    reject_login: bool,
    metadata_error: Option<String>,
    /// Fixed `(operation, status, body)` reply for one operation.
    override_reply: Option<(&'static str, u16, String)>,
    dashboards: Vec<serde_json::Value>,
}

#[derive(Default)]
struct State {
    script: Script,
    logins: u32,
    tokens_issued: u32,
    requests: Vec<HttpRequest>,
}

struct FakeService {
    state: Mutex<State>,
}

impl FakeService {
    fn new(script: Script) -> Self {
        FakeService {
            state: Mutex::new(State {
                script,
                ..State::default()
            }),
        }
    }

    fn logins(&self) -> u32 {
        self.state.lock().unwrap().logins
    }

    /// `operationName` of every GraphQL request, in order.
    fn operations(&self) -> Vec<String> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.url == GRAPH)
            .filter_map(|r| match &r.body {
                RequestBody::Json(body) => body["operationName"].as_str().map(str::to_string),
                _ => None,
            })
            .collect()
    }

    fn graph_requests(&self) -> Vec<HttpRequest> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|r| r.url == GRAPH)
            .cloned()
            .collect()
    }

    fn count(&self, operation: &str) -> usize {
        self.operations().iter().filter(|op| *op == operation).count()
    }
}

fn reply(status: u16, body: serde_json::Value) -> HttpResponse {
    HttpResponse {
        status,
        set_cookies: vec![],
        body: body.to_string(),
    }
}

fn with_cookie(mut response: HttpResponse, cookie: String) -> HttpResponse {
    response.set_cookies.push(cookie);
    response
}

fn row_envelope(metadata_error: Option<&str>) -> serde_json::Value {
    json!({
        "query_results": [{
            "id": "3158cc2c",
            "job_id": "093e440d",
            "error": metadata_error,
            "runtime": 1.5,
            "generated_at": "2022-03-19T07:11:37.344998+00:00",
            "columns": ["number", "time", "hash"],
            "__typename": "query_results"
        }],
        "get_result_by_result_id": [{
            "data": [
                {"number": 14412971, "time": "2022-03-19T07:11:37+00:00", "hash": "0xab"},
                {"number": 14412972, "time": "2022-03-19T07:11:49+00:00", "hash": "0xcd"}
            ]
        }]
    })
}

impl Transport for FakeService {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push(request.clone());
        let cookies = request.header_value("cookie").unwrap_or("").to_string();

        if request.url == GRAPH {
            let body = match &request.body {
                RequestBody::Json(body) => body.clone(),
                other => panic!("graph request with non-JSON body {:?}", other),
            };
            let operation = body["operationName"].as_str().unwrap_or("").to_string();
            assert!(
                request
                    .header_value("authorization")
                    .is_some_and(|v| v.starts_with("Bearer jwt-")),
                "{} sent without a token",
                operation
            );

            if let Some((op, status, text)) = &state.script.override_reply {
                if *op == operation {
                    return Ok(HttpResponse {
                        status: *status,
                        set_cookies: vec![],
                        body: text.clone(),
                    });
                }
            }

            let response = match operation.as_str() {
                "UpsertQuery" => reply(200, json!({"data": {"insert_queries_one": {"id": 42}}})),
                "ExecuteQuery" if state.script.execute_failures > 0 => {
                    state.script.execute_failures -= 1;
                    reply(200, json!({"errors": [{"message": "JWTExpired"}]}))
                }
                "ExecuteQuery" => reply(200, json!({"data": {"execute_query": {"job_id": "j-1"}}})),
                "GetResult" if state.script.pending_polls > 0 => {
                    state.script.pending_polls -= 1;
                    reply(200, json!({"data": {"get_result": {"job_id": "j-1", "result_id": null}}}))
                }
                "GetResult" => {
                    reply(200, json!({"data": {"get_result": {"job_id": null, "result_id": "r-1"}}}))
                }
                "FindResultDataByResult" => {
                    let error = state.script.metadata_error.clone();
                    reply(200, json!({"data": row_envelope(error.as_deref())}))
                }
                "FindDashboard" => {
                    reply(200, json!({"data": {"dashboards": state.script.dashboards.clone()}}))
                }
                other => panic!("unexpected operation {}", other),
            };
            return Ok(response);
        }

        let path = request.url.strip_prefix(BASE).unwrap_or(&request.url);
        let response = match path {
            "/auth/login" => with_cookie(reply(200, json!({})), "__cf=1; Path=/".to_string()),
            "/api/auth/csrf" => with_cookie(reply(200, json!({})), "csrf=tok123; Path=/".to_string()),
            "/api/auth" => {
                let form = match &request.body {
                    RequestBody::Form(pairs) => pairs.clone(),
                    other => panic!("login with non-form body {:?}", other),
                };
                assert!(form.contains(&("csrf".to_string(), "tok123".to_string())));
                assert!(form.contains(&("username".to_string(), "alice".to_string())));
                if state.script.reject_login {
                    reply(200, json!({}))
                } else {
                    state.logins += 1;
                    let cookie = format!("auth-refresh=refresh-{}; HttpOnly", state.logins);
                    with_cookie(reply(200, json!({})), cookie)
                }
            }
            "/api/auth/session" if cookies.contains("auth-refresh=") => {
                state.tokens_issued += 1;
                reply(200, json!({"token": format!("jwt-{}", state.tokens_issued)}))
            }
            "/api/auth/session" => reply(401, json!({})),
            other => panic!("unexpected path {}", other),
        };
        Ok(response)
    }
}

#[derive(Default)]
struct FakeClock {
    sleeps: Mutex<Vec<Duration>>,
}

impl Clock for FakeClock {
    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().unwrap().push(duration);
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn config() -> ClientConfig {
    ClientConfig {
        base_url: BASE.to_string(),
        graph_url: GRAPH.to_string(),
        ..ClientConfig::default()
    }
}

fn client<'a>(
    service: &'a FakeService,
    clock: &'a FakeClock,
) -> DuneClient<&'a FakeService, &'a FakeClock> {
    DuneClient::with_parts(&config(), Credentials::new("alice", "secret"), service, clock)
}

fn blocks_query() -> Query {
    Query::new(42, "Blocks", "select number, time, hash from ethereum.blocks", Network::Mainnet)
}

// ── Tests ───────────────────────────────────────────────────────────

#[test]
fn fetch_polls_until_result_then_decodes_rows() {
    let service = FakeService::new(Script {
        pending_polls: 2,
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);

    client.login().unwrap();
    assert!(client.session().is_logged_in());

    let records = client.fetch(&blocks_query()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0]["number"], Value::Number(14412971.into()));
    assert_eq!(records[1]["hash"], Value::Text("0xcd".to_string()));
    assert_eq!(
        records[0]["time"].as_timestamp(),
        Some(time::macros::datetime!(2022-03-19 07:11:37 UTC))
    );

    assert_eq!(
        service.operations(),
        vec![
            "UpsertQuery",
            "ExecuteQuery",
            "GetResult",
            "GetResult",
            "GetResult",
            "FindResultDataByResult"
        ]
    );
    assert_eq!(*clock.sleeps.lock().unwrap(), vec![Duration::from_secs(5); 2]);
    assert_eq!(client.phase(), JobPhase::Decoded);

    let metadata = client.last_metadata().unwrap();
    assert_eq!(metadata.columns, vec!["number", "time", "hash"]);
    assert_eq!(metadata.runtime, 1.5);
}

#[test]
fn token_is_refreshed_before_every_request() {
    let service = FakeService::new(Script::default());
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();
    client.fetch(&blocks_query()).unwrap();

    let tokens: Vec<String> = service
        .graph_requests()
        .iter()
        .filter_map(|r| r.header_value("authorization").map(str::to_string))
        .collect();
    // One token from login, then a fresh one per graph request.
    assert_eq!(tokens, vec!["Bearer jwt-2", "Bearer jwt-3", "Bearer jwt-4", "Bearer jwt-5"]);
}

#[test]
fn errors_payload_triggers_login_and_restart() {
    let service = FakeService::new(Script {
        execute_failures: 1,
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let records = client.fetch(&blocks_query()).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(service.logins(), 2);
    assert_eq!(service.count("UpsertQuery"), 1);
    assert_eq!(service.count("ExecuteQuery"), 2);
}

#[test]
fn persistent_errors_exhaust_retries() {
    let service = FakeService::new(Script {
        execute_failures: 10,
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let err = client.fetch(&blocks_query()).unwrap_err();
    assert!(matches!(err, DuneError::RetriesExhausted { max_retries: 2 }));
    assert_eq!(client.phase(), JobPhase::Failed);
    assert_eq!(service.count("ExecuteQuery"), 2);
    assert_eq!(service.logins(), 3);
}

#[test]
fn malformed_result_is_not_retried() {
    let service = FakeService::new(Script {
        override_reply: Some((
            "FindResultDataByResult",
            200,
            json!({"data": {"query_results": [], "unexpected": 1}}).to_string(),
        )),
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let err = client.fetch(&blocks_query()).unwrap_err();
    assert!(matches!(err, DuneError::MalformedResponse(_)), "got {:?}", err);
    assert_eq!(service.count("ExecuteQuery"), 1);
    assert_eq!(service.logins(), 1);
    assert_eq!(client.phase(), JobPhase::Failed);
}

#[test]
fn http_error_without_payload_is_not_retried() {
    let service = FakeService::new(Script {
        override_reply: Some(("ExecuteQuery", 502, "<html>bad gateway</html>".to_string())),
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let err = client.fetch(&blocks_query()).unwrap_err();
    assert!(matches!(
        err,
        DuneError::Http {
            operation: Operation::ExecuteQuery,
            status: 502
        }
    ));
    assert_eq!(service.count("ExecuteQuery"), 1);
}

#[test]
fn job_error_in_metadata_is_reported() {
    let service = FakeService::new(Script {
        metadata_error: Some("relation \"blocks\" does not exist".to_string()),
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let err = client.fetch(&blocks_query()).unwrap_err();
    match err {
        DuneError::JobFailed { result_id, message } => {
            assert_eq!(result_id, "r-1");
            assert!(message.contains("does not exist"));
        }
        other => panic!("expected JobFailed, got {:?}", other),
    }
}

#[test]
fn rejected_login_is_auth_error() {
    let service = FakeService::new(Script {
        reject_login: true,
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);

    let err = client.login().unwrap_err();
    assert!(matches!(err, DuneError::Auth(_)));
    assert!(err.to_string().contains("alice"));
    assert!(service.operations().is_empty());
}

#[test]
fn request_without_login_fails_on_token_refresh() {
    let service = FakeService::new(Script::default());
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);

    let err = client.fetch(&blocks_query()).unwrap_err();
    assert!(matches!(err, DuneError::Auth(_)));
    assert!(service.operations().is_empty());
}

#[test]
fn latest_results_skips_execution() {
    let service = FakeService::new(Script::default());
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let results = client.latest_results(42).unwrap();
    assert_eq!(results.records.len(), 2);
    assert_eq!(service.operations(), vec!["GetResult", "FindResultDataByResult"]);
}

#[test]
fn remote_dashboard_is_loaded() {
    let service = FakeService::new(Script {
        dashboards: vec![json!({
            "name": "Remote",
            "slug": "remote",
            "user": {"name": "alice"},
            "visualization_widgets": [
                {"visualization": {"query_details": {
                    "query_id": 42, "name": "Blocks", "query": "select 1",
                    "dataset_id": 4, "parameters": []
                }}}
            ]
        })],
        ..Script::default()
    });
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let source = DashboardSource::Remote {
        owner: "alice".to_string(),
        slug: "remote".to_string(),
    };
    let dashboard = client.load_dashboard(&source).unwrap();
    assert_eq!(dashboard.name(), "Remote");
    assert_eq!(dashboard.link(), "http://dune.test/alice/remote");
    assert_eq!(dashboard.queries()[0].query_id(), 42);

    client.refresh_dashboard(&dashboard).unwrap();
    assert_eq!(
        service.operations(),
        vec!["FindDashboard", "UpsertQuery", "ExecuteQuery"]
    );
}

#[test]
fn missing_remote_dashboard_is_not_found() {
    let service = FakeService::new(Script::default());
    let clock = FakeClock::default();
    let mut client = client(&service, &clock);
    client.login().unwrap();

    let err = client
        .load_dashboard(&DashboardSource::Remote {
            owner: "alice".to_string(),
            slug: "nothing".to_string(),
        })
        .unwrap_err();
    assert!(matches!(
        err,
        DuneError::Dashboard(DashboardError::NotFound { .. })
    ));
}
