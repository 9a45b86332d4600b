use lgp_import::api::{ApiError, ApiRequest, ApiResponse, ResponseBody, Transport};
use lgp_import::auth::Credentials;
use lgp_import::batch::BatchSize;
use lgp_import::config::ImportConfig;
use lgp_import::import::{
    dry_run, BatchImportError, BatchOutcome, EntityCreationError, ImportError, ImportPhase,
    Importer, NewClient, VerificationError,
};
use lgp_import::loader::{load_records, Record};
use lgp_import::retry::Sleeper;
use lgp_import::ui::Reporter;
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::Method;
use serde_json::{json, Value};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::io::Write;
use std::time::Duration;

/// Answers requests from a fixed script, in order, and keeps every
/// request it saw.
struct ScriptedServer {
    responses: RefCell<VecDeque<ApiResponse>>,
    requests: RefCell<Vec<ApiRequest>>,
}

impl ScriptedServer {
    fn new(responses: Vec<ApiResponse>) -> Self {
        ScriptedServer {
            responses: RefCell::new(responses.into()),
            requests: RefCell::new(Vec::new()),
        }
    }

    fn requests(&self) -> Vec<ApiRequest> {
        self.requests.borrow().clone()
    }

    fn remaining(&self) -> usize {
        self.responses.borrow().len()
    }
}

impl Transport for ScriptedServer {
    fn send(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.requests.borrow_mut().push(request.clone());
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ApiError::Transport {
                url: request.url.clone(),
                message: "unscripted request".into(),
            })
    }
}

#[derive(Default)]
struct RecordingSleeper(RefCell<Vec<Duration>>);

impl RecordingSleeper {
    fn waits(&self) -> Vec<Duration> {
        self.0.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.0.borrow_mut().push(duration);
    }
}

#[derive(Default)]
struct EventLog(RefCell<Vec<String>>);

impl EventLog {
    fn events(&self) -> Vec<String> {
        self.0.borrow().clone()
    }
}

impl Reporter for EventLog {
    fn client_failed(&self, name: &str, _error: &EntityCreationError) {
        self.0.borrow_mut().push(format!("client_failed {}", name));
    }
    fn batch_imported(&self, index: usize, outcome: &BatchOutcome) {
        self.0
            .borrow_mut()
            .push(format!("batch {} ok {}", index, outcome.created));
    }
    fn batch_failed(&self, error: &BatchImportError, lost: usize) {
        self.0
            .borrow_mut()
            .push(format!("batch {} failed {}", error.index, lost));
    }
    fn verified(&self, _slug: &str, count: u64) {
        self.0.borrow_mut().push(format!("verified {}", count));
    }
    fn verification_failed(&self, _error: &VerificationError) {
        self.0.borrow_mut().push("verification_failed".into());
    }
}

fn client_created(slug: &str) -> ApiResponse {
    ApiResponse::json_body(201, json!({"success": true, "client": {"client_id": slug}}))
}

fn leads_created(created: usize, skipped: &[&str]) -> ApiResponse {
    ApiResponse::json_body(201, json!({"created": created, "skipped": skipped}))
}

fn status(code: u16) -> ApiResponse {
    ApiResponse::new(code, ResponseBody::Text(format!("status {}", code)))
}

fn write_csv(rows: usize) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "firstName,lastName,email,companyName,title,notes,source").unwrap();
    for i in 1..=rows {
        writeln!(file, "First{i},Last{i},lead{i}@example.com,Co {i},,note,web").unwrap();
    }
    file
}

fn records(rows: usize) -> Vec<Record> {
    let file = write_csv(rows);
    load_records(file.path()).unwrap()
}

fn config(batch_size: usize, max_retries: u32) -> ImportConfig {
    ImportConfig {
        batch_size: BatchSize::new(batch_size).unwrap(),
        max_retries,
        ..ImportConfig::default()
    }
    .with_base_url("https://api.test/")
}

fn auth_headers() -> HeaderMap {
    Credentials::Bearer("test-token".into()).headers().unwrap()
}

fn leads_in(request: &ApiRequest) -> Vec<Value> {
    request.body.as_ref().unwrap()["leads"]
        .as_array()
        .unwrap()
        .clone()
}

#[test]
fn test_server_error_mid_run_is_retried_and_everything_accounted() {
    let records = records(120);
    let server = ScriptedServer::new(vec![
        client_created("acme-1"),
        leads_created(49, &["lead7@example.com"]),
        status(500),
        leads_created(50, &[]),
        leads_created(18, &["lead101@example.com", "lead102@example.com"]),
        ApiResponse::json_body(200, json!({"count": 117, "items": []})),
    ]);
    let sleeper = RecordingSleeper::default();
    let reporter = EventLog::default();

    let mut importer = Importer::new(
        &server,
        &sleeper,
        config(50, 5),
        auth_headers(),
        &reporter,
    );
    let session = importer.run(&NewClient::new("Acme Corp"), &records).unwrap();

    assert_eq!(importer.phase(), ImportPhase::Done);
    assert_eq!(session.client_slug, "acme-1");
    assert_eq!(session.batch_count, 3);
    assert_eq!(session.created, 117);
    assert_eq!(session.total_skipped(), 3);
    assert_eq!(session.accounted(), 120);
    assert!(session.failed_batches.is_empty());
    assert_eq!(session.verified_count, Some(117));
    assert_eq!(server.remaining(), 0);

    // Politeness pause, retry backoff for the 500, politeness pause.
    assert_eq!(
        sleeper.waits(),
        vec![
            Duration::from_millis(500),
            Duration::from_secs(10),
            Duration::from_millis(500)
        ]
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 6);
    for request in &requests {
        assert_eq!(request.headers.get(AUTHORIZATION).unwrap(), "Bearer test-token");
    }

    assert_eq!(requests[0].method, Method::POST);
    assert_eq!(requests[0].url, "https://api.test/api/clients");
    assert_eq!(
        requests[0].body.as_ref().unwrap(),
        &json!({
            "clientName": "Acme Corp",
            "companyURL": "https://acmecorp.com",
            "description": "Imported client: Acme Corp"
        })
    );

    let sizes: Vec<usize> = [1, 3, 4].iter().map(|&i| leads_in(&requests[i]).len()).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    // The retry resends the same batch.
    assert_eq!(leads_in(&requests[2]), leads_in(&requests[3]));

    let first = &leads_in(&requests[1])[0];
    assert_eq!(
        first,
        &json!({
            "firstName": "First1",
            "lastName": "Last1",
            "email": "lead1@example.com",
            "companyName": "Co 1",
            "notes": "note",
            "client_id": "acme-1"
        })
    );
    assert_eq!(leads_in(&requests[4])[19]["email"], "lead120@example.com");

    assert_eq!(requests[5].method, Method::GET);
    assert_eq!(
        requests[5].url,
        "https://api.test/api/leads?client_id=acme-1&limit=1"
    );

    assert_eq!(
        reporter.events(),
        vec!["batch 1 ok 49", "batch 2 ok 50", "batch 3 ok 18", "verified 117"]
    );
}

#[test]
fn test_forbidden_client_creation_aborts_before_any_batch() {
    let records = records(10);
    let server = ScriptedServer::new(vec![ApiResponse::json_body(
        403,
        json!({"error": "Forbidden"}),
    )]);
    let sleeper = RecordingSleeper::default();
    let reporter = EventLog::default();

    let mut importer = Importer::new(&server, &sleeper, config(50, 5), auth_headers(), &reporter);
    let err = importer.run(&NewClient::new("Acme"), &records).unwrap_err();

    match &err {
        ImportError::EntityCreation { name, source } => {
            assert_eq!(name, "Acme");
            assert!(matches!(
                source,
                EntityCreationError::Api(ApiError::Status { status: 403, .. })
            ));
        }
    }
    assert!(err.to_string().contains("Forbidden"));
    assert_eq!(importer.phase(), ImportPhase::Failed);
    assert_eq!(server.requests().len(), 1);
    assert!(sleeper.waits().is_empty());
    assert_eq!(reporter.events(), vec!["client_failed Acme"]);
}

#[test]
fn test_unconfirmed_or_anonymous_client_is_fatal() {
    let reporter = EventLog::default();
    let records = records(3);

    let server = ScriptedServer::new(vec![ApiResponse::json_body(
        201,
        json!({"success": false, "error": "quota"}),
    )]);
    let mut importer = Importer::new(
        &server,
        RecordingSleeper::default(),
        config(50, 5),
        auth_headers(),
        &reporter,
    );
    let err = importer.run(&NewClient::new("Acme"), &records).unwrap_err();
    assert!(matches!(
        err,
        ImportError::EntityCreation {
            source: EntityCreationError::NotConfirmed(_),
            ..
        }
    ));
    assert_eq!(server.requests().len(), 1);

    let server = ScriptedServer::new(vec![ApiResponse::json_body(
        201,
        json!({"success": true, "client": {}}),
    )]);
    let mut importer = Importer::new(
        &server,
        RecordingSleeper::default(),
        config(50, 5),
        auth_headers(),
        &reporter,
    );
    let err = importer.run(&NewClient::new("Acme"), &records).unwrap_err();
    assert!(matches!(
        err,
        ImportError::EntityCreation {
            source: EntityCreationError::MissingId(_),
            ..
        }
    ));
}

#[test]
fn test_exhausted_batch_is_lost_and_run_continues() {
    let records = records(5);
    let server = ScriptedServer::new(vec![
        client_created("acme-2"),
        leads_created(2, &[]),
        status(429),
        status(429),
        leads_created(1, &[]),
        status(502),
        status(502),
    ]);
    let sleeper = RecordingSleeper::default();
    let reporter = EventLog::default();

    let mut importer = Importer::new(&server, &sleeper, config(2, 2), auth_headers(), &reporter);
    let session = importer.run(&NewClient::new("Acme"), &records).unwrap();

    assert_eq!(importer.phase(), ImportPhase::Done);
    assert_eq!(session.created, 3);
    assert_eq!(session.failed_batches.len(), 1);
    let failed = &session.failed_batches[0];
    assert_eq!(failed.index, 2);
    assert_eq!(failed.lost, vec!["lead3@example.com", "lead4@example.com"]);
    assert!(failed.error.contains("max retries (2)"));
    assert_eq!(session.lost_count(), 2);
    assert_eq!(session.accounted() + session.lost_count(), 5);

    // Verification gave up too, but that is only a warning.
    assert_eq!(session.verified_count, None);
    assert!(session.verification_error.is_some());

    assert_eq!(
        sleeper.waits(),
        vec![
            Duration::from_millis(500),
            Duration::from_secs(60),
            Duration::from_millis(500),
            Duration::from_secs(10),
        ]
    );
    assert_eq!(
        reporter.events(),
        vec![
            "batch 1 ok 2",
            "batch 2 failed 2",
            "batch 3 ok 1",
            "verification_failed"
        ]
    );
}

#[test]
fn test_rejected_batch_is_not_retried() {
    let reporter = EventLog::default();
    let records = records(4);
    let server = ScriptedServer::new(vec![
        client_created("acme-3"),
        ApiResponse::json_body(400, json!({"error": "invalid email"})),
        leads_created(2, &[]),
        ApiResponse::json_body(200, json!({"count": 2})),
    ]);
    let sleeper = RecordingSleeper::default();

    let mut importer = Importer::new(
        &server,
        &sleeper,
        config(2, 5),
        auth_headers(),
        &reporter,
    );
    let session = importer.run(&NewClient::new("Acme"), &records).unwrap();

    assert_eq!(server.requests().len(), 4);
    assert_eq!(session.failed_batches[0].index, 1);
    assert!(session.failed_batches[0].error.contains("invalid email"));
    assert_eq!(session.created, 2);
    assert_eq!(session.verified_count, Some(2));
    assert_eq!(sleeper.waits(), vec![Duration::from_millis(500)]);
}

#[test]
fn test_verification_without_count_is_a_warning() {
    let reporter = EventLog::default();
    let records = records(1);
    let server = ScriptedServer::new(vec![
        client_created("acme-4"),
        leads_created(1, &[]),
        ApiResponse::json_body(200, json!({"items": []})),
    ]);
    let mut importer = Importer::new(
        &server,
        RecordingSleeper::default(),
        config(50, 5),
        auth_headers(),
        &reporter,
    );
    let session = importer.run(&NewClient::new("Acme"), &records).unwrap();
    assert_eq!(session.created, 1);
    assert_eq!(session.verified_count, None);
    assert!(session
        .verification_error
        .as_deref()
        .unwrap()
        .contains("no count"));
}

#[test]
fn test_empty_file_still_creates_and_verifies() {
    let reporter = EventLog::default();
    let server = ScriptedServer::new(vec![
        client_created("acme-5"),
        ApiResponse::json_body(200, json!({"count": 0})),
    ]);
    let sleeper = RecordingSleeper::default();
    let mut importer = Importer::new(
        &server,
        &sleeper,
        config(50, 5),
        auth_headers(),
        &reporter,
    );
    let session = importer.run(&NewClient::new("Acme"), &[]).unwrap();
    assert_eq!(session.batch_count, 0);
    assert_eq!(session.verified_count, Some(0));
    assert_eq!(server.requests().len(), 2);
    assert!(sleeper.waits().is_empty());
}

#[test]
fn test_dry_run_reports_batches_without_network() {
    for (rows, size, expected) in [(120, 50, 3), (100, 50, 2), (1, 50, 1), (7, 3, 3), (0, 10, 0)] {
        let records = records(rows);
        let summary = dry_run(&records, BatchSize::new(size).unwrap());
        assert_eq!(summary.record_count, rows);
        assert_eq!(summary.batch_count, expected);
        assert_eq!(summary.batch_count, rows.div_ceil(size));
    }

    let records = records(2);
    let summary = dry_run(&records, BatchSize::DEFAULT);
    let first = serde_json::to_value(summary.first.unwrap()).unwrap();
    assert_eq!(first["email"], "lead1@example.com");
    assert!(first.get("title").is_none());
    assert!(first.get("source").is_none());
}
