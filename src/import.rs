// Import orchestrator.
//
//   CreatingEntity -> Importing -> Verifying -> Done
//         |
//         +-> Failed
//
// Only a failed client creation stops the run. A failed batch is counted
// as lost and the next batch goes ahead; a failed verification is a
// warning. Everything is held in memory; nothing survives the process.

use crate::api::{endpoint, endpoint_with_query, ApiError, ApiRequest, ApiResponse, Transport};
use crate::batch::{Batch, BatchPlan, BatchSize};
use crate::config::ImportConfig;
use crate::loader::Record;
use crate::retry::{RetryingExecutor, Sleeper};
use crate::ui::Reporter;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EntityCreationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("server did not confirm creation: {0}")]
    NotConfirmed(String),

    #[error("response carried no client id: {0}")]
    MissingId(String),
}

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to create client '{name}': {source}")]
    EntityCreation {
        name: String,
        #[source]
        source: EntityCreationError,
    },
}

#[derive(Debug, Error)]
#[error("batch {index} failed: {source}")]
pub struct BatchImportError {
    pub index: usize,
    #[source]
    pub source: ApiError,
}

#[derive(Debug, Error)]
pub enum VerificationError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("response carried no count: {0}")]
    MissingCount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportPhase {
    CreatingEntity,
    Importing,
    Verifying,
    Done,
    Failed,
}

/// The parent entity to create.
#[derive(Debug, Clone)]
pub struct NewClient {
    pub name: String,
    pub company_url: Option<String>,
}

impl NewClient {
    pub fn new(name: impl Into<String>) -> Self {
        NewClient {
            name: name.into(),
            company_url: None,
        }
    }

    /// Given URL, or `https://<name, lowercased, spaces removed>.com`.
    pub fn company_url(&self) -> String {
        match &self.company_url {
            Some(url) => url.clone(),
            None => format!(
                "https://{}.com",
                self.name.to_lowercase().replace(' ', "")
            ),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateClientRequest<'a> {
    client_name: &'a str,
    #[serde(rename = "companyURL")]
    company_url: String,
    description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CreateClientResponse {
    success: bool,
    client: Option<ClientRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ClientRef {
    client_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct LeadPayload<'a> {
    #[serde(flatten)]
    record: &'a Record,
    client_id: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateLeadsRequest<'a> {
    leads: Vec<LeadPayload<'a>>,
}

/// What the server said about one batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub created: usize,
    pub skipped: Vec<String>,
}

impl BatchOutcome {
    /// Missing `created`/`skipped` read as zero/empty. `skipped` entries
    /// may be plain strings or objects carrying an `email`.
    pub fn from_response(response: &ApiResponse) -> Result<Self, ApiError> {
        let body = response.body.as_json().ok_or_else(|| {
            ApiError::Decode(format!("expected JSON, got text: {}", response.body))
        })?;

        let created = match body.get("created") {
            None | Some(Value::Null) => 0,
            Some(v) => v
                .as_u64()
                .ok_or_else(|| ApiError::Decode(format!("'created' is not a count: {}", v)))?
                as usize,
        };

        let skipped = match body.get("skipped") {
            Some(Value::Array(items)) => items.iter().map(skipped_identifier).collect(),
            _ => Vec::new(),
        };

        Ok(BatchOutcome { created, skipped })
    }

    pub fn accounted(&self) -> usize {
        self.created + self.skipped.len()
    }

    /// True when the server reports more rows than were sent.
    pub fn exceeds(&self, batch_len: usize) -> bool {
        self.accounted() > batch_len
    }
}

fn skipped_identifier(item: &Value) -> String {
    match item {
        Value::String(s) => s.clone(),
        Value::Object(map) => match map.get("email") {
            Some(Value::String(email)) => email.clone(),
            _ => item.to_string(),
        },
        other => other.to_string(),
    }
}

/// A batch that produced no outcome. Its rows were neither created nor
/// skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedBatch {
    pub index: usize,
    pub error: String,
    pub lost: Vec<String>,
}

/// Running state of one import.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSession {
    pub client_name: String,
    pub client_slug: String,
    pub record_count: usize,
    pub batch_count: usize,
    pub created: usize,
    pub skipped: Vec<String>,
    pub failed_batches: Vec<FailedBatch>,
    pub verified_count: Option<u64>,
    pub verification_error: Option<String>,
}

impl ImportSession {
    fn new(client_name: &str, client_slug: &str, record_count: usize, batch_count: usize) -> Self {
        ImportSession {
            client_name: client_name.to_string(),
            client_slug: client_slug.to_string(),
            record_count,
            batch_count,
            created: 0,
            skipped: Vec::new(),
            failed_batches: Vec::new(),
            verified_count: None,
            verification_error: None,
        }
    }

    fn record_outcome(&mut self, outcome: &BatchOutcome) {
        self.created += outcome.created;
        self.skipped.extend(outcome.skipped.iter().cloned());
    }

    fn record_failure(&mut self, batch: &Batch<'_, Record>, error: &BatchImportError) {
        self.failed_batches.push(FailedBatch {
            index: batch.index,
            error: error.source.to_string(),
            lost: batch.items.iter().map(Record::identifier).collect(),
        });
    }

    pub fn total_skipped(&self) -> usize {
        self.skipped.len()
    }

    /// Rows (by identifier) that went down with failed batches.
    pub fn lost(&self) -> impl Iterator<Item = &str> {
        self.failed_batches
            .iter()
            .flat_map(|f| f.lost.iter().map(String::as_str))
    }

    pub fn lost_count(&self) -> usize {
        self.failed_batches.iter().map(|f| f.lost.len()).sum()
    }

    /// Created plus skipped, as reported by the server.
    pub fn accounted(&self) -> usize {
        self.created + self.skipped.len()
    }
}

/// Result of a dry run. Nothing is sent anywhere.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DryRunSummary<'a> {
    pub record_count: usize,
    pub batch_size: BatchSize,
    pub batch_count: usize,
    pub first: Option<&'a Record>,
}

pub fn dry_run(records: &[Record], batch_size: BatchSize) -> DryRunSummary<'_> {
    let plan = BatchPlan::new(records, batch_size);
    DryRunSummary {
        record_count: records.len(),
        batch_size,
        batch_count: plan.batch_count(),
        first: records.first(),
    }
}

pub struct Importer<'r, T, S> {
    executor: RetryingExecutor<T, S>,
    config: ImportConfig,
    headers: HeaderMap,
    reporter: &'r dyn Reporter,
    phase: ImportPhase,
}

impl<'r, T: Transport, S: Sleeper> Importer<'r, T, S> {
    /// `headers` are the resolved credentials, sent with every call.
    pub fn new(
        transport: T,
        sleeper: S,
        config: ImportConfig,
        headers: HeaderMap,
        reporter: &'r dyn Reporter,
    ) -> Self {
        let executor = RetryingExecutor::new(transport, sleeper, config.max_retries);
        Importer {
            executor,
            config,
            headers,
            reporter,
            phase: ImportPhase::CreatingEntity,
        }
    }

    pub fn phase(&self) -> ImportPhase {
        self.phase
    }

    fn enter(&mut self, phase: ImportPhase) {
        tracing::debug!(from = ?self.phase, to = ?phase, "Import phase change");
        self.phase = phase;
    }

    /// Run the whole import. `Err` only when the client could not be
    /// created; batch and verification failures end up in the session.
    pub fn run(
        &mut self,
        client: &NewClient,
        records: &[Record],
    ) -> Result<ImportSession, ImportError> {
        self.enter(ImportPhase::CreatingEntity);
        self.reporter.client_creating(&client.name);

        let slug = match self.create_client(client) {
            Ok(slug) => slug,
            Err(source) => {
                self.enter(ImportPhase::Failed);
                tracing::error!(client = %client.name, error = %source, "Client creation failed");
                self.reporter.client_failed(&client.name, &source);
                return Err(ImportError::EntityCreation {
                    name: client.name.clone(),
                    source,
                });
            }
        };
        tracing::info!(client = %client.name, slug = %slug, "Client created");
        self.reporter.client_created(&client.name, &slug);

        let plan = BatchPlan::new(records, self.config.batch_size);
        let mut session =
            ImportSession::new(&client.name, &slug, records.len(), plan.batch_count());

        self.enter(ImportPhase::Importing);
        self.reporter
            .import_started(records.len(), plan.batch_count(), plan.size());

        for batch in plan.iter() {
            if batch.index > 1 && !self.config.batch_delay.is_zero() {
                self.executor.sleeper().sleep(self.config.batch_delay);
            }
            self.reporter
                .batch_started(batch.index, session.batch_count, batch.len());

            match self.import_batch(&slug, &batch) {
                Ok(outcome) => {
                    if outcome.exceeds(batch.len()) {
                        tracing::warn!(
                            batch = batch.index,
                            sent = batch.len(),
                            created = outcome.created,
                            skipped = outcome.skipped.len(),
                            "Server accounted for more leads than were sent"
                        );
                    }
                    tracing::info!(
                        batch = batch.index,
                        created = outcome.created,
                        skipped = outcome.skipped.len(),
                        "Batch imported"
                    );
                    session.record_outcome(&outcome);
                    self.reporter.batch_imported(batch.index, &outcome);
                }
                Err(err) => {
                    tracing::warn!(batch = batch.index, error = %err.source, "Batch failed");
                    session.record_failure(&batch, &err);
                    self.reporter.batch_failed(&err, batch.len());
                }
            }
        }

        self.enter(ImportPhase::Verifying);
        self.reporter.verification_started(&slug);
        match self.verify(&slug) {
            Ok(count) => {
                session.verified_count = Some(count);
                self.reporter.verified(&slug, count);
            }
            Err(err) => {
                tracing::warn!(slug = %slug, error = %err, "Verification failed");
                session.verification_error = Some(err.to_string());
                self.reporter.verification_failed(&err);
            }
        }

        self.enter(ImportPhase::Done);
        self.reporter.finished(&session);
        Ok(session)
    }

    fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.executor.execute(&request.with_headers(&self.headers))
    }

    fn create_client(&self, client: &NewClient) -> Result<String, EntityCreationError> {
        let url = endpoint(&self.config.base_url, "api/clients");
        let body = serde_json::to_value(CreateClientRequest {
            client_name: &client.name,
            company_url: client.company_url(),
            description: format!("Imported client: {}", client.name),
        })
        .map_err(ApiError::from)?;

        let res = self.send(ApiRequest::post(url, body))?;
        let parsed: CreateClientResponse = res.json()?;
        if !parsed.success {
            return Err(EntityCreationError::NotConfirmed(res.body.to_string()));
        }
        parsed
            .client
            .and_then(|c| c.client_id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| EntityCreationError::MissingId(res.body.to_string()))
    }

    fn import_batch(
        &self,
        slug: &str,
        batch: &Batch<'_, Record>,
    ) -> Result<BatchOutcome, BatchImportError> {
        let wrap = |source: ApiError| BatchImportError {
            index: batch.index,
            source,
        };

        let url = endpoint(&self.config.base_url, "api/leads");
        let payload = CreateLeadsRequest {
            leads: batch
                .items
                .iter()
                .map(|record| LeadPayload {
                    record,
                    client_id: slug,
                })
                .collect(),
        };
        let body = serde_json::to_value(&payload).map_err(|e| wrap(e.into()))?;

        let res = self.send(ApiRequest::post(url, body)).map_err(wrap)?;
        BatchOutcome::from_response(&res).map_err(wrap)
    }

    fn verify(&self, slug: &str) -> Result<u64, VerificationError> {
        let url = endpoint_with_query(
            &self.config.base_url,
            "api/leads",
            &[("client_id", slug), ("limit", "1")],
        )?;
        let res = self.send(ApiRequest::get(url))?;
        res.body
            .as_json()
            .and_then(|body| body.get("count"))
            .and_then(Value::as_u64)
            .ok_or_else(|| VerificationError::MissingCount(res.body.to_string()))
    }
}
