use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use once_cell::sync::OnceCell;

pub static CONFIG: OnceCell<Configuration> = OnceCell::new();

/// Fallback used whenever the configured concurrency limit is missing or unparsable.
pub const DEFAULT_CONCURRENT_QUERY_COUNT: usize = 10;

/// Connection settings for the Prometheus-compatible backend
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Base URL of the backend, e.g. `http://localhost:9090`
    pub url: String,
    /// Scrape interval of the data source, used as the default step floor
    pub scrape_interval: String,
    /// HTTP method used for query calls (POST or GET)
    pub http_method: String,
    /// Request timeout for a single backend call
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
    /// Extra query parameters (`a=b&c=d`) appended to every backend call
    pub custom_query_parameters: Option<String>,
}

impl Default for DataSourceConfig {
    fn default() -> Self {
        Self {
            url: String::from("http://localhost:9090"),
            scrape_interval: String::from("15s"),
            http_method: String::from("POST"),
            timeout: Duration::from_secs(30),
            custom_query_parameters: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Run queries (and their instant/range/exemplar calls) concurrently
    pub parallel: bool,
    /// Maximum number of queries in flight; kept as text so that a bad value
    /// falls back to the default instead of rejecting the whole configuration
    #[serde(deserialize_with = "lenient_string")]
    pub concurrent_query_count: String,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            concurrent_query_count: DEFAULT_CONCURRENT_QUERY_COUNT.to_string(),
        }
    }
}

impl ExecutionConfig {
    pub fn concurrency_limit(&self) -> usize {
        match self.concurrent_query_count.trim().parse::<usize>() {
            Ok(limit) if limit > 0 => limit,
            _ => {
                log::warn!(
                    "Invalid concurrent_query_count '{}', falling back to {}",
                    self.concurrent_query_count,
                    DEFAULT_CONCURRENT_QUERY_COUNT
                );
                DEFAULT_CONCURRENT_QUERY_COUNT
            }
        }
    }
}

/// Environment values like `4` arrive as numbers; accept them as text.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Int(value) => value.to_string(),
        Raw::Float(value) => value.to_string(),
    })
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SamplerKind {
    /// Keep exemplars that stand out from the running mean
    #[default]
    Stddev,
    /// Keep every exemplar
    Noop,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExemplarConfig {
    pub sampler: SamplerKind,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Backend connection settings
    pub datasource: DataSourceConfig,
    /// Query fan-out settings
    pub execution: ExecutionConfig,
    /// Exemplar reduction settings
    pub exemplars: ExemplarConfig,
}

impl Configuration {
    pub fn load() -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file("promplan.toml"))
            .extract()
            .map_err(Box::new)
    }

    pub fn load_from_path(path: &Path) -> Result<Self, Box<figment::Error>> {
        Self::figment(Toml::file(path))
            .extract()
            .map_err(Box::new)
    }

    fn figment(file: figment::providers::Data<Toml>) -> Figment {
        Figment::from(Serialized::defaults(Configuration::default()))
            .merge(file)
            .merge(Env::prefixed("PROMPLAN__").split("__"))
    }
}
