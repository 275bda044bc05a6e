//! Request construction for a target

use crate::registry::{StrategyConfig, TargetConfig};
use crate::transport::{HttpRequest, Method};
use crate::{PageKey, PageRequest};
use std::collections::BTreeMap;

/// User agent sent unless a target overrides it
pub const USER_AGENT: &str = concat!("registry-harvester/", env!("CARGO_PKG_VERSION"));

/// Everything needed to turn a [`PageRequest`] into an [`HttpRequest`]
#[derive(Debug, Clone, PartialEq)]
pub struct RequestTemplate {
    method: Method,
    base_url: String,
    path: String,
    query: BTreeMap<String, String>,
    headers: BTreeMap<String, String>,
    body: Option<serde_json::Value>,
    page_param: String,
    size_param: String,
    id_param: Option<String>,
}

impl RequestTemplate {
    /// Template for a configured target
    pub fn from_target(target: &TargetConfig) -> Self {
        let (page_param, size_param, id_param) = match &target.strategy {
            StrategyConfig::Paged {
                page_param,
                size_param,
                ..
            } => (page_param.clone(), size_param.clone(), None),
            StrategyConfig::IdSweep { id_param, .. } => {
                ("page".to_string(), "size".to_string(), id_param.clone())
            }
        };

        let mut headers = BTreeMap::from([
            ("accept".to_string(), "application/json".to_string()),
            ("user-agent".to_string(), USER_AGENT.to_string()),
        ]);
        for (name, value) in &target.headers {
            headers.insert(name.to_ascii_lowercase(), value.clone());
        }

        Self {
            method: target.method,
            base_url: target.base_url.clone(),
            path: target.path.clone(),
            query: target.query.clone(),
            headers,
            body: target.body.clone(),
            page_param,
            size_param,
            id_param,
        }
    }

    /// Join the base URL with `path`
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// Build the HTTP request for one page or probe
    pub fn build(&self, request: &PageRequest, authorization: Option<&str>) -> HttpRequest {
        let mut query: BTreeMap<String, String> = self.query.clone();
        query.extend(request.filter.clone());

        let path = match request.key {
            PageKey::Page(index) => {
                query.insert(self.page_param.clone(), index.to_string());
                if let Some(size) = request.page_size {
                    query.insert(self.size_param.clone(), size.to_string());
                }
                self.path.clone()
            }
            PageKey::Id(id) => {
                if let Some(param) = &self.id_param {
                    query.insert(param.clone(), id.to_string());
                }
                self.path.replace("{id}", &id.to_string())
            }
        };

        self.assemble(self.url_for(&path), query, authorization)
    }

    /// Build a request to an arbitrary path with explicit query parameters
    pub fn build_at(
        &self,
        path: &str,
        query: BTreeMap<String, String>,
        authorization: Option<&str>,
    ) -> HttpRequest {
        let mut merged = self.query.clone();
        merged.extend(query);
        self.assemble(self.url_for(path), merged, authorization)
    }

    /// Target path
    pub fn path(&self) -> &str {
        &self.path
    }

    fn assemble(
        &self,
        url: String,
        query: BTreeMap<String, String>,
        authorization: Option<&str>,
    ) -> HttpRequest {
        let mut headers: Vec<(String, String)> = self
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if let Some(value) = authorization {
            headers.push(("authorization".to_string(), value.to_string()));
        }

        HttpRequest {
            method: self.method,
            url,
            query: query.into_iter().collect(),
            headers,
            body: match self.method {
                Method::Post => self.body.clone(),
                Method::Get => None,
            },
        }
    }
}
