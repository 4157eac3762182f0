//! Catalog configuration: YAML file plus `GEOCATALOG_*` environment overlay.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{CatalogError, Result};
use crate::model::DEFAULT_LIMIT;

pub const ENV_PREFIX: &str = "GEOCATALOG_";
/// Names the YAML file `Config::from_env` starts from.
pub const CONFIG_ENV: &str = "GEOCATALOG_CONFIG";

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub metadata: MetadataConfig,
    pub repository: RepositoryConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub url: String,
    pub mimetype: String,
    pub encoding: String,
    pub language: String,
    pub pretty_print: bool,
    /// Page size when a request does not carry one
    pub limit: usize,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8000".to_string(),
            mimetype: "application/json; charset=UTF-8".to_string(),
            encoding: "utf-8".to_string(),
            language: "en-US".to_string(),
            pretty_print: false,
            limit: DEFAULT_LIMIT,
            port: 8000,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub level: String,
    pub logfile: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            logfile: None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct MetadataConfig {
    pub identification: Identification,
    pub provider: Provider,
    pub contact: Contact,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Identification {
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    pub keywords: Vec<String>,
    pub keywords_type: String,
    pub fees: String,
    pub access_constraints: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Provider {
    pub name: String,
    pub url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Contact {
    pub name: String,
    pub position: String,
    pub address: String,
    pub city: String,
    pub state_or_province: String,
    pub postal_code: String,
    pub country: String,
    pub phone: String,
    pub fax: String,
    pub email: String,
    pub url: String,
    pub hours_of_service: String,
    pub instructions: String,
    pub role: String,
}

/// Which backend `repository::open` builds.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryKind {
    #[default]
    Memory,
    Segment,
    Elasticsearch,
}

impl RepositoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepositoryKind::Memory => "memory",
            RepositoryKind::Segment => "segment",
            RepositoryKind::Elasticsearch => "elasticsearch",
        }
    }
}

impl fmt::Display for RepositoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RepositoryKind {
    type Err = CatalogError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(RepositoryKind::Memory),
            "segment" => Ok(RepositoryKind::Segment),
            "elasticsearch" => Ok(RepositoryKind::Elasticsearch),
            other => Err(CatalogError::config(format!(
                "unknown repository type '{}' (expected memory, segment or elasticsearch)",
                other
            ))),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct RepositoryConfig {
    #[serde(rename = "type")]
    pub kind: RepositoryKind,
    /// Preload JSON file (memory), segment file path, or the engine index URL
    pub url: String,
    /// Logical field name -> backend field name
    pub mappings: BTreeMap<String, String>,
    /// Embedded backend only; unset disables background compaction
    pub compaction_interval_secs: Option<u64>,
}

impl RepositoryConfig {
    pub fn field<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.mappings.get(key).map(String::as_str).unwrap_or(default)
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            CatalogError::config(format!("cannot read {}: {}", path.display(), e)).with_source(e)
        })?;
        Self::from_yaml_str(&source)
    }

    pub fn from_yaml_str(source: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(source)?)
    }

    /// File named by `GEOCATALOG_CONFIG` (defaults when unset), then the environment overlay.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        Ok(config)
    }

    /// Overlay `GEOCATALOG_*` variables. Unknown names are ignored.
    pub fn apply_env<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in vars {
            let Some(key) = name.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value: String = value.into();

            if let Some(mapping) = key.strip_prefix("REPOSITORY_MAPPINGS_") {
                self.repository.mappings.insert(mapping.to_lowercase(), value);
                continue;
            }

            match key {
                "SERVER_URL" => self.server.url = value,
                "SERVER_MIMETYPE" => self.server.mimetype = value,
                "SERVER_ENCODING" => self.server.encoding = value,
                "SERVER_LANGUAGE" => self.server.language = value,
                "SERVER_PRETTY_PRINT" => self.server.pretty_print = parse_env(key, &value)?,
                "SERVER_LIMIT" => self.server.limit = parse_env(key, &value)?,
                "SERVER_PORT" => self.server.port = parse_env(key, &value)?,
                "LOGGING_LEVEL" => self.logging.level = value,
                "LOGGING_LOGFILE" => self.logging.logfile = Some(PathBuf::from(value)),
                "METADATA_IDENTIFICATION_TITLE" => self.metadata.identification.title = value,
                "METADATA_IDENTIFICATION_ABSTRACT" => {
                    self.metadata.identification.abstract_text = value
                }
                "METADATA_IDENTIFICATION_KEYWORDS" => {
                    self.metadata.identification.keywords =
                        value.split(',').map(|k| k.trim().to_string()).collect()
                }
                "METADATA_IDENTIFICATION_KEYWORDS_TYPE" => {
                    self.metadata.identification.keywords_type = value
                }
                "METADATA_IDENTIFICATION_FEES" => self.metadata.identification.fees = value,
                "METADATA_IDENTIFICATION_ACCESSCONSTRAINTS" => {
                    self.metadata.identification.access_constraints = value
                }
                "METADATA_PROVIDER_NAME" => self.metadata.provider.name = value,
                "METADATA_PROVIDER_URL" => self.metadata.provider.url = value,
                "METADATA_CONTACT_NAME" => self.metadata.contact.name = value,
                "METADATA_CONTACT_POSITION" => self.metadata.contact.position = value,
                "METADATA_CONTACT_ADDRESS" => self.metadata.contact.address = value,
                "METADATA_CONTACT_CITY" => self.metadata.contact.city = value,
                "METADATA_CONTACT_STATEORPROVINCE" => self.metadata.contact.state_or_province = value,
                "METADATA_CONTACT_POSTALCODE" => self.metadata.contact.postal_code = value,
                "METADATA_CONTACT_COUNTRY" => self.metadata.contact.country = value,
                "METADATA_CONTACT_PHONE" => self.metadata.contact.phone = value,
                "METADATA_CONTACT_FAX" => self.metadata.contact.fax = value,
                "METADATA_CONTACT_EMAIL" => self.metadata.contact.email = value,
                "METADATA_CONTACT_URL" => self.metadata.contact.url = value,
                "METADATA_CONTACT_HOURS_OF_SERVICE" => self.metadata.contact.hours_of_service = value,
                "METADATA_CONTACT_INSTRUCTIONS" => self.metadata.contact.instructions = value,
                "METADATA_CONTACT_ROLE" => self.metadata.contact.role = value,
                "REPOSITORY_TYPE" => self.repository.kind = value.parse()?,
                "REPOSITORY_URL" => self.repository.url = value,
                "REPOSITORY_COMPACTION_INTERVAL_SECS" => {
                    self.repository.compaction_interval_secs = Some(parse_env(key, &value)?)
                }
                _ => {}
            }
        }
        Ok(())
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| {
        CatalogError::config(format!("{}{}: cannot parse '{}': {}", ENV_PREFIX, key, value, e))
    })
}
