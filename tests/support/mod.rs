//! Shared fixtures: an in-memory registry served through the `Transport` trait

#![allow(dead_code)]

use async_trait::async_trait;
use registry_harvester::registry::TargetConfig;
use registry_harvester::resume::{CheckpointStore, CollectionState};
use registry_harvester::retry::RetryPolicy;
use registry_harvester::transport::{HttpRequest, RawResponse, Transport, TransportError};
use serde_json::json;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Base URL used by fixture targets
pub const BASE_URL: &str = "https://registry.test";

/// Path of the count endpoint answered by [`FakeRegistry`]
pub const COUNT_PATH: &str = "/api/items/count";

type Hook = Box<dyn FnMut(usize) + Send>;

enum Collection {
    /// `total` records with ids `1..=total`, served in pages
    Paged { total: u64, revision: u64 },
    /// One record per present id, 404 otherwise
    Ids { present: BTreeSet<u64> },
}

/// A request as seen by the fake server
#[derive(Debug, Clone)]
pub struct Recorded {
    /// Page index or probed id; `None` for the count endpoint
    pub ordinal: Option<u64>,
    /// When the request arrived
    pub at: Instant,
    /// The full request
    pub request: HttpRequest,
}

/// In-memory registry with scripted per-ordinal responses
pub struct FakeRegistry {
    collection: Mutex<Collection>,
    scripted: Mutex<HashMap<u64, VecDeque<RawResponse>>>,
    log: Mutex<Vec<Recorded>>,
    latency: Duration,
    hook: Mutex<Option<Hook>>,
}

impl FakeRegistry {
    fn with(collection: Collection) -> Self {
        Self {
            collection: Mutex::new(collection),
            scripted: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
            hook: Mutex::new(None),
        }
    }

    /// Paged collection of `total` records
    pub fn paged(total: u64) -> Self {
        Self::with(Collection::Paged { total, revision: 0 })
    }

    /// ID-addressed collection holding `present`
    pub fn ids(present: impl IntoIterator<Item = u64>) -> Self {
        Self::with(Collection::Ids {
            present: present.into_iter().collect(),
        })
    }

    /// Delay every response
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Serve `responses` for `ordinal` before falling back to the collection
    pub fn script(self, ordinal: u64, responses: Vec<RawResponse>) -> Self {
        self.scripted
            .lock()
            .unwrap()
            .entry(ordinal)
            .or_default()
            .extend(responses);
        self
    }

    /// Call `hook` with the running request count on every request
    pub fn on_request(self, hook: impl FnMut(usize) + Send + 'static) -> Self {
        *self.hook.lock().unwrap() = Some(Box::new(hook));
        self
    }

    /// Change every payload of a paged collection
    pub fn bump_revision(&self) {
        if let Collection::Paged { revision, .. } = &mut *self.collection.lock().unwrap() {
            *revision += 1;
        }
    }

    /// Wrap for use as a transport
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Every request received
    pub fn recorded(&self) -> Vec<Recorded> {
        self.log.lock().unwrap().clone()
    }

    /// Ordinals requested, in arrival order, excluding count queries
    pub fn ordinals(&self) -> Vec<u64> {
        self.recorded().iter().filter_map(|r| r.ordinal).collect()
    }

    /// Arrival times of requests for `ordinal`
    pub fn arrivals(&self, ordinal: u64) -> Vec<Instant> {
        self.recorded()
            .iter()
            .filter(|r| r.ordinal == Some(ordinal))
            .map(|r| r.at)
            .collect()
    }

    fn respond(&self, ordinal: u64, request: &HttpRequest) -> RawResponse {
        match &*self.collection.lock().unwrap() {
            Collection::Paged { total, revision } => {
                let size = query_value(request, "size").unwrap_or(100);
                let first = ordinal * size + 1;
                let last = ((ordinal + 1) * size).min(*total);
                let content: Vec<_> = (first..=last).map(|id| record(id, *revision)).collect();
                json_response(json!({
                    "content": content,
                    "totalElements": total,
                    "number": ordinal,
                }))
            }
            Collection::Ids { present } => {
                if present.contains(&ordinal) {
                    json_response(record(ordinal, 0))
                } else {
                    RawResponse::new(404, "")
                }
            }
        }
    }

    fn total(&self) -> u64 {
        match &*self.collection.lock().unwrap() {
            Collection::Paged { total, .. } => *total,
            Collection::Ids { present } => present.len() as u64,
        }
    }
}

#[async_trait]
impl Transport for FakeRegistry {
    async fn send(&self, request: HttpRequest) -> Result<RawResponse, TransportError> {
        let ordinal = ordinal_of(&request);
        let count = {
            let mut log = self.log.lock().unwrap();
            log.push(Recorded {
                ordinal,
                at: Instant::now(),
                request: request.clone(),
            });
            log.len()
        };
        if let Some(hook) = self.hook.lock().unwrap().as_mut() {
            hook(count);
        }

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let Some(ordinal) = ordinal else {
            return Ok(json_response(json!({ "totalElements": self.total() })));
        };
        let scripted = self
            .scripted
            .lock()
            .unwrap()
            .get_mut(&ordinal)
            .and_then(VecDeque::pop_front);
        Ok(scripted.unwrap_or_else(|| self.respond(ordinal, &request)))
    }
}

fn query_value(request: &HttpRequest, name: &str) -> Option<u64> {
    request
        .query
        .iter()
        .find(|(key, _)| key == name)
        .and_then(|(_, value)| value.parse().ok())
}

fn ordinal_of(request: &HttpRequest) -> Option<u64> {
    if request.url.ends_with(COUNT_PATH) {
        return None;
    }
    query_value(request, "page")
        .or_else(|| query_value(request, "id"))
        .or_else(|| request.url.rsplit('/').next().and_then(|s| s.parse().ok()))
}

fn record(id: u64, revision: u64) -> serde_json::Value {
    json!({ "id": id, "name": format!("item-{id}"), "revision": revision })
}

/// 200 response with a JSON body
pub fn json_response(body: serde_json::Value) -> RawResponse {
    RawResponse::new(200, serde_json::to_vec(&body).unwrap())
}

/// Retry policy with millisecond backoff
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
        .with_max_delay(Duration::from_millis(20))
        .with_jitter(0.0)
}

/// Paged target over [`FakeRegistry`]
pub fn paged_target(id: &str, page_size: u32, concurrency: usize) -> TargetConfig {
    let mut target = TargetConfig::paged(id, BASE_URL, "/api/items", page_size);
    target.settings.concurrency = concurrency;
    target
}

/// ID-sweep target over [`FakeRegistry`] starting at id 1
pub fn sweep_target(id: &str, empty_threshold: u64, concurrency: usize) -> TargetConfig {
    let mut target = TargetConfig::id_sweep(id, BASE_URL, "/api/items/{id}", 1);
    target.settings.concurrency = concurrency;
    target.settings.empty_threshold = empty_threshold;
    target
}

/// Load the checkpoint written for `target` under `dir`
pub fn load_state(dir: &Path, target: &str) -> CollectionState {
    CheckpointStore::new(dir, target)
        .load()
        .unwrap()
        .expect("checkpoint should exist")
}
