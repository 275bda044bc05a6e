//! Page fetching
//!
//! A [`PageFetcher`] performs one logical fetch: it builds the request for a
//! page or probe, runs it through the shared [`RetryPolicy`], and interprets a
//! successful body with the target's [`ResponseSchema`].

pub mod request;
pub mod schema;

pub use request::RequestTemplate;
pub use schema::{Extracted, JsonPointerSchema, ResponseSchema, SchemaConfig, SingleRecordSchema};

use crate::credentials::{CredentialError, CredentialProvider};
use crate::registry::{CountConfig, TargetConfig};
use crate::retry::{FailureKind, FetchFailure, RetryPolicy};
use crate::shutdown::SharedShutdown;
use crate::transport::{HttpRequest, Transport};
use crate::{Item, PageKey, PageRequest};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

/// A page that was fetched and matched the schema
#[derive(Debug, Clone, PartialEq)]
pub struct PageOutcome {
    /// Page index or probed id
    pub key: PageKey,
    /// Records in response order; empty for an empty page or absent id
    pub items: Vec<Item>,
    /// Total collection size reported by the response
    pub total_known: Option<u64>,
    /// Attempts spent, including the first
    pub attempts: u32,
    /// Categories of the attempts that were retried
    pub retried: Vec<FailureKind>,
}

/// Result of one logical fetch
pub type PageResult = Result<PageOutcome, FetchFailure>;

/// Fetches pages of one target
#[derive(Clone)]
pub struct PageFetcher {
    target: String,
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    schema: Arc<dyn ResponseSchema>,
    credentials: Arc<dyn CredentialProvider>,
    template: RequestTemplate,
    count: Option<CountConfig>,
    shutdown: Option<SharedShutdown>,
}

impl std::fmt::Debug for PageFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageFetcher")
            .field("target", &self.target)
            .field("policy", &self.policy)
            .field("schema", &self.schema)
            .field("template", &self.template)
            .finish_non_exhaustive()
    }
}

impl PageFetcher {
    /// Fetcher for a configured target
    pub fn new(target: &TargetConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            target: target.id.clone(),
            transport,
            policy: target.settings.retry_policy(),
            schema: Arc::from(target.schema.build()),
            credentials: Arc::from(target.credential.provider()),
            template: RequestTemplate::from_target(target),
            count: target.count.clone(),
            shutdown: None,
        }
    }

    /// Replace the retry policy
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Replace the response schema
    pub fn with_schema(mut self, schema: Arc<dyn ResponseSchema>) -> Self {
        self.schema = schema;
        self
    }

    /// Replace the credential provider
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Let backoff sleeps end early on shutdown
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Retry policy in use
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Fetch one page or probe one id.
    ///
    /// A 404 surfaces as a [`FailureKind::TerminalNotFound`] failure; deciding
    /// whether that means "absent" is the caller's business.
    pub async fn fetch_page(&self, request: &PageRequest) -> PageResult {
        let authorization = self.authorization()?;
        let http = self.template.build(request, authorization.as_deref());
        let label = format!("{} {}", self.target, request.key);

        debug!(target_id = %self.target, key = %request.key, url = %http.url, "Fetching");
        let outcome = self.send_with_retry(&label, http).await?;

        let status = outcome.response.status;
        let extracted = self
            .schema
            .extract(&outcome.response.body, request.key)
            .map_err(|e| {
                warn!(
                    target_id = %self.target,
                    key = %request.key,
                    status,
                    error = %e,
                    "Response does not match schema"
                );
                FetchFailure {
                    retried: outcome.retried.clone(),
                    ..FetchFailure::schema_mismatch(outcome.attempts, status, e.to_string())
                }
            })?;

        let fetched_at = Utc::now();
        let items = extracted
            .items
            .into_iter()
            .map(|(id, payload)| Item {
                id,
                payload,
                fetched_at,
            })
            .collect();

        Ok(PageOutcome {
            key: request.key,
            items,
            total_known: extracted.total,
            attempts: outcome.attempts,
            retried: outcome.retried,
        })
    }

    /// Ask the count endpoint for the collection size.
    ///
    /// Returns `Ok(None)` when the target has no count query or the response
    /// carries a null total.
    pub async fn fetch_count(&self) -> Result<Option<u64>, FetchFailure> {
        let Some(count) = &self.count else {
            return Ok(None);
        };

        let authorization = self.authorization()?;
        let path = count.path.as_deref().unwrap_or(self.template.path());
        let http = self
            .template
            .build_at(path, count.query.clone(), authorization.as_deref());
        let label = format!("{} count", self.target);

        let outcome = self.send_with_retry(&label, http).await?;
        let status = outcome.response.status;
        let document: serde_json::Value = serde_json::from_slice(&outcome.response.body)
            .map_err(|e| FetchFailure::schema_mismatch(outcome.attempts, status, e.to_string()))?;

        match document.pointer(&count.total) {
            None => Err(FetchFailure::schema_mismatch(
                outcome.attempts,
                status,
                format!("missing field at {}", count.total),
            )),
            Some(serde_json::Value::Null) => Ok(None),
            Some(value) => schema::as_count(value).map(Some).ok_or_else(|| {
                FetchFailure::schema_mismatch(
                    outcome.attempts,
                    status,
                    format!("field at {} is not a non-negative count", count.total),
                )
            }),
        }
    }

    fn authorization(&self) -> Result<Option<String>, FetchFailure> {
        self.credentials.bearer().map_err(|e: CredentialError| {
            warn!(target_id = %self.target, error = %e, "No usable credentials");
            FetchFailure::new(FailureKind::TerminalAuth, e.to_string())
        })
    }

    async fn send_with_retry(
        &self,
        label: &str,
        http: HttpRequest,
    ) -> Result<crate::retry::RetryOutcome, FetchFailure> {
        let transport: &dyn Transport = self.transport.as_ref();
        self.policy
            .execute(label, self.shutdown.as_deref(), move |_| {
                transport.send(http.clone())
            })
            .await
    }
}
