//! Target registry
//!
//! Targets are described in a TOML file: a `[defaults]` table of collector
//! settings and one `[[targets]]` entry per remote collection. Each target may
//! override any default in its own `settings` table.
//!
//! ```toml
//! state_dir = ".harvest"
//!
//! [defaults]
//! concurrency = 4
//! empty_threshold = 3
//!
//! [[targets]]
//! id = "ral-companies"
//! base_url = "https://pub.fsa.gov.ru"
//! path = "/api/v1/ral/common/companies"
//! strategy = { kind = "paged", page_size = 1000 }
//! query = { sort = "id,asc" }
//! credential = { kind = "env", var = "HARVESTER_TOKEN" }
//! count = { query = { page = "0", size = "1" } }
//! export = { format = "csv", path = "out/companies.csv", delimiter = ";" }
//! ```

use crate::collector::config::{CollectorSettings, DEFAULT_PAGE_SIZE};
use crate::credentials::CredentialConfig;
use crate::fetcher::schema::SchemaConfig;
use crate::output::ExportConfig;
use crate::transport::Method;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default directory for checkpoint files
pub const DEFAULT_STATE_DIR: &str = ".harvest";

/// How a target is swept
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum StrategyConfig {
    /// Server-side pagination
    Paged {
        /// Records per page
        #[serde(default = "default_page_size")]
        page_size: u32,
        /// Query parameter carrying the page index
        #[serde(default = "default_page_param")]
        page_param: String,
        /// Query parameter carrying the page size
        #[serde(default = "default_size_param")]
        size_param: String,
        /// Index of the first page
        #[serde(default)]
        first_page: u64,
    },
    /// Probe sequential identifiers
    IdSweep {
        /// First identifier probed
        #[serde(default = "default_start_id")]
        start_id: u64,
        /// Optional last identifier probed (inclusive)
        #[serde(default)]
        end_id: Option<u64>,
        /// Query parameter carrying the id when the path has no `{id}`
        #[serde(default)]
        id_param: Option<String>,
    },
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_size_param() -> String {
    "size".to_string()
}

fn default_start_id() -> u64 {
    1
}

impl StrategyConfig {
    /// Whether this is an ID-sweep
    pub fn is_id_sweep(&self) -> bool {
        matches!(self, StrategyConfig::IdSweep { .. })
    }

    /// First ordinal of a fresh sweep
    pub fn origin(&self) -> u64 {
        match self {
            StrategyConfig::Paged { first_page, .. } => *first_page,
            StrategyConfig::IdSweep { start_id, .. } => *start_id,
        }
    }

    /// Page size for paged strategies
    pub fn page_size(&self) -> Option<u32> {
        match self {
            StrategyConfig::Paged { page_size, .. } => Some(*page_size),
            StrategyConfig::IdSweep { .. } => None,
        }
    }
}

/// Optional total-count query issued once before a sweep
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CountConfig {
    /// Path of the count endpoint; the target path when omitted
    #[serde(default)]
    pub path: Option<String>,
    /// Query parameters, merged over the target's query
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    /// Pointer to the total in the response
    #[serde(default = "default_count_pointer")]
    pub total: String,
}

fn default_count_pointer() -> String {
    "/totalElements".to_string()
}

impl Default for CountConfig {
    fn default() -> Self {
        Self {
            path: None,
            query: BTreeMap::new(),
            total: default_count_pointer(),
        }
    }
}

/// A fully resolved collection target
#[derive(Debug, Clone, PartialEq)]
pub struct TargetConfig {
    /// Unique target identifier, also used in state file names
    pub id: String,
    /// Scheme and host, e.g. `https://pub.fsa.gov.ru`
    pub base_url: String,
    /// Collection path; may contain `{id}` for ID-sweep
    pub path: String,
    /// HTTP method
    pub method: Method,
    /// Sweep strategy
    pub strategy: StrategyConfig,
    /// Static query parameters (filters, sort)
    pub query: BTreeMap<String, String>,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    /// Static JSON body for POST targets
    pub body: Option<serde_json::Value>,
    /// Token source
    pub credential: CredentialConfig,
    /// Response interpretation
    pub schema: SchemaConfig,
    /// Optional count query
    pub count: Option<CountConfig>,
    /// Optional export sink
    pub export: Option<ExportConfig>,
    /// Effective collector settings
    pub settings: CollectorSettings,
}

impl TargetConfig {
    /// Minimal paged target with default settings
    pub fn paged(id: impl Into<String>, base_url: impl Into<String>, path: impl Into<String>, page_size: u32) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            path: path.into(),
            method: Method::Get,
            strategy: StrategyConfig::Paged {
                page_size,
                page_param: default_page_param(),
                size_param: default_size_param(),
                first_page: 0,
            },
            query: BTreeMap::new(),
            headers: BTreeMap::new(),
            body: None,
            credential: CredentialConfig::None,
            schema: SchemaConfig::default(),
            count: None,
            export: None,
            settings: CollectorSettings::default(),
        }
    }

    /// Minimal ID-sweep target; `path` should contain `{id}`
    pub fn id_sweep(id: impl Into<String>, base_url: impl Into<String>, path: impl Into<String>, start_id: u64) -> Self {
        Self {
            strategy: StrategyConfig::IdSweep {
                start_id,
                end_id: None,
                id_param: None,
            },
            schema: SchemaConfig::Single {
                id: None,
                require: Vec::new(),
            },
            ..Self::paged(id, base_url, path, DEFAULT_PAGE_SIZE)
        }
    }

    /// Validate target integrity
    pub fn validate(&self) -> Result<(), String> {
        if self.id.is_empty() {
            return Err("target id cannot be empty".to_string());
        }
        if !self
            .id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        {
            return Err(format!(
                "target id '{}' may only contain ASCII letters, digits, '-', '_' and '.'",
                self.id
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(format!(
                "target '{}': base_url must start with http:// or https://",
                self.id
            ));
        }
        match &self.strategy {
            StrategyConfig::Paged { page_size, .. } => {
                if *page_size == 0 {
                    return Err(format!("target '{}': page_size must be positive", self.id));
                }
            }
            StrategyConfig::IdSweep {
                start_id,
                end_id,
                id_param,
            } => {
                if !self.path.contains("{id}") && id_param.is_none() {
                    return Err(format!(
                        "target '{}': id_sweep needs '{{id}}' in path or an id_param",
                        self.id
                    ));
                }
                if end_id.is_some_and(|end| end < *start_id) {
                    return Err(format!("target '{}': end_id is before start_id", self.id));
                }
            }
        }
        self.settings
            .validate()
            .map_err(|e| format!("target '{}': {e}", self.id))
    }
}

/// Target entry as written in the file, before defaults are applied
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTarget {
    id: String,
    base_url: String,
    path: String,
    #[serde(default)]
    method: Method,
    strategy: StrategyConfig,
    #[serde(default)]
    query: BTreeMap<String, String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<toml::Value>,
    #[serde(default)]
    credential: CredentialConfig,
    #[serde(default)]
    schema: Option<SchemaConfig>,
    #[serde(default)]
    count: Option<CountConfig>,
    #[serde(default)]
    export: Option<ExportConfig>,
    #[serde(default)]
    settings: toml::Table,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRegistry {
    #[serde(default)]
    state_dir: Option<PathBuf>,
    #[serde(default)]
    defaults: toml::Table,
    #[serde(default)]
    targets: Vec<RawTarget>,
}

/// Registry of configured targets
#[derive(Debug, Clone)]
pub struct TargetRegistry {
    state_dir: PathBuf,
    targets: Vec<TargetConfig>,
    index: HashMap<String, usize>,
}

impl TargetRegistry {
    /// Load a registry file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            RegistryError::IoError(format!("failed to read {}: {e}", path.display()))
        })?;
        let registry = Self::from_toml(&contents)?;
        debug!(
            path = %path.display(),
            targets = registry.targets.len(),
            "Loaded target registry"
        );
        Ok(registry)
    }

    /// Parse a registry from TOML text
    pub fn from_toml(contents: &str) -> Result<Self, RegistryError> {
        let raw: RawRegistry =
            toml::from_str(contents).map_err(|e| RegistryError::ParseError(e.to_string()))?;

        let mut targets = Vec::with_capacity(raw.targets.len());
        let mut index = HashMap::new();

        for entry in raw.targets {
            let target = resolve_target(entry, &raw.defaults)?;
            target.validate().map_err(RegistryError::Invalid)?;
            if index.insert(target.id.clone(), targets.len()).is_some() {
                return Err(RegistryError::Invalid(format!(
                    "duplicate target id '{}'",
                    target.id
                )));
            }
            targets.push(target);
        }

        Ok(Self {
            state_dir: raw
                .state_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_DIR)),
            targets,
            index,
        })
    }

    /// Directory holding checkpoint files
    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Look up a target by id
    pub fn get(&self, id: &str) -> Result<&TargetConfig, RegistryError> {
        self.index
            .get(id)
            .map(|&i| &self.targets[i])
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// All targets in file order
    pub fn targets(&self) -> &[TargetConfig] {
        &self.targets
    }
}

fn resolve_target(raw: RawTarget, defaults: &toml::Table) -> Result<TargetConfig, RegistryError> {
    let mut merged = defaults.clone();
    merged.extend(raw.settings);
    let settings: CollectorSettings = toml::Value::Table(merged)
        .try_into()
        .map_err(|e| RegistryError::ParseError(format!("target '{}' settings: {e}", raw.id)))?;

    let body = raw
        .body
        .map(|value| serde_json::to_value(value))
        .transpose()
        .map_err(|e| RegistryError::ParseError(format!("target '{}' body: {e}", raw.id)))?;

    let schema = raw.schema.unwrap_or_else(|| {
        if raw.strategy.is_id_sweep() {
            SchemaConfig::Single {
                id: None,
                require: Vec::new(),
            }
        } else {
            SchemaConfig::default()
        }
    });

    Ok(TargetConfig {
        id: raw.id,
        base_url: raw.base_url,
        path: raw.path,
        method: raw.method,
        strategy: raw.strategy,
        query: raw.query,
        headers: raw.headers,
        body,
        credential: raw.credential,
        schema,
        count: raw.count,
        export: raw.export,
        settings,
    })
}

/// Registry errors
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// File could not be read
    #[error("IO error: {0}")]
    IoError(String),

    /// File is not valid TOML or does not match the expected layout
    #[error("parse error: {0}")]
    ParseError(String),

    /// A target failed validation
    #[error("invalid target: {0}")]
    Invalid(String),

    /// Unknown target id
    #[error("target '{0}' is not configured")]
    NotFound(String),
}
