//! Configuration types for data-extractor
//!
//! Configuration is read from a TOML file whose location is usually given by
//! the [`PROPERTIES_ENV`] environment variable.
//!
//! ```toml
//! query_location = "query.sparql"
//!
//! [service]
//! url = "https://agent.example.com/ds"
//!
//! [auth]
//! provider = "keycloak"
//! url = "https://idp.example.com/realms/main/protocol/openid-connect/token"
//! client_id = "extractor"
//! grant_type = "password"
//! username = "svc-extractor"
//! password = "secret"
//!
//! [sink]
//! kind = "s3"
//! bucket = "extracts"
//! region = "eu-west-2"
//! access_key_id = "AKIA..."
//! secret_access_key = "..."
//! ```

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable holding the path of the configuration file
pub const PROPERTIES_ENV: &str = "DATA_EXTRACTOR_PROPERTIES";

/// Main configuration for the extractor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// File containing the query sent to the secure agent
    pub query_location: PathBuf,

    /// Secure agent endpoint settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Identity provider used to obtain bearer tokens
    pub auth: AuthConfig,

    /// Where the response is dumped (default: log)
    #[serde(default)]
    pub sink: SinkConfig,
}

/// Secure agent endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Query endpoint (default: "http://localhost:3030/ds")
    #[serde(default = "default_service_url")]
    pub url: String,

    /// Overall request timeout in seconds (None = wait for the full response)
    #[serde(default, with = "optional_duration_serde")]
    pub timeout: Option<Duration>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            url: default_service_url(),
            timeout: None,
        }
    }
}

/// Identity provider selection
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum AuthConfig {
    /// OpenID Connect token endpoint with token caching
    Keycloak(KeycloakConfig),
    /// Cognito user-password flow, one handshake per token
    Cognito(CognitoConfig),
}

impl AuthConfig {
    /// Name of the selected provider, as written in configuration
    pub fn provider_name(&self) -> &'static str {
        match self {
            AuthConfig::Keycloak(_) => "keycloak",
            AuthConfig::Cognito(_) => "cognito",
        }
    }
}

/// Keycloak token endpoint configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KeycloakConfig {
    /// Token endpoint (default: "http://0.0.0.0:9229")
    #[serde(default = "default_keycloak_url")]
    pub url: String,

    /// OAuth client id
    pub client_id: String,

    /// OAuth grant type (usually "password")
    pub grant_type: String,

    /// Username
    pub username: String,

    /// Password
    pub password: String,
}

/// Cognito identity provider configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CognitoConfig {
    /// Endpoint override (default: the regional Cognito endpoint)
    #[serde(default)]
    pub url: Option<String>,

    /// App client id
    pub client_id: String,

    /// AWS region of the user pool
    pub region: String,

    /// Username
    pub username: String,

    /// Password
    pub password: String,
}

impl CognitoConfig {
    /// Endpoint the InitiateAuth call is sent to
    pub fn endpoint(&self) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => format!("https://cognito-idp.{}.amazonaws.com/", self.region),
        }
    }
}

/// Sink selection
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SinkConfig {
    /// Write each response line to the log
    #[default]
    Log,
    /// Upload the response to an S3 bucket
    S3(S3Config),
}

impl SinkConfig {
    /// Name of the selected sink, as written in configuration
    pub fn kind_name(&self) -> &'static str {
        match self {
            SinkConfig::Log => "log",
            SinkConfig::S3(_) => "s3",
        }
    }
}

/// S3 bucket configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct S3Config {
    /// Destination bucket
    pub bucket: String,

    /// AWS region
    pub region: String,

    /// Access key id
    pub access_key_id: String,

    /// Secret access key
    pub secret_access_key: String,

    /// Endpoint override for S3-compatible stores
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Allow plain HTTP endpoints (default: false)
    #[serde(default)]
    pub allow_http: bool,

    /// Multipart part size in bytes (default: 8 MiB)
    #[serde(default = "default_part_size")]
    pub part_size: usize,

    /// Maximum parts uploaded concurrently (default: 8)
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Config {
    /// Load configuration from the file named by [`PROPERTIES_ENV`]
    pub fn from_env() -> Result<Self> {
        let location = std::env::var_os(PROPERTIES_ENV).ok_or_else(|| {
            Error::config(
                format!("{PROPERTIES_ENV} environment variable not set"),
                PROPERTIES_ENV,
            )
        })?;
        Self::load(Path::new(&location))
    }

    /// Load and validate configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::config(
                format!("{} does not exist", path.display()),
                PROPERTIES_ENV,
            ));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::config(
                format!("could not read {}: {e}", path.display()),
                PROPERTIES_ENV,
            )
        })?;
        let config: Config = toml::from_str(&raw).map_err(|e| Error::Config {
            message: format!("could not parse {}: {e}", path.display()),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check URLs parse and required credentials are present
    pub fn validate(&self) -> Result<()> {
        check_url(&self.service.url, "service.url")?;

        match &self.auth {
            AuthConfig::Keycloak(keycloak) => {
                check_url(&keycloak.url, "auth.url")?;
                check_present(&keycloak.client_id, "auth.client_id")?;
                check_present(&keycloak.grant_type, "auth.grant_type")?;
                check_present(&keycloak.username, "auth.username")?;
                check_present(&keycloak.password, "auth.password")?;
            }
            AuthConfig::Cognito(cognito) => {
                check_url(&cognito.endpoint(), "auth.url")?;
                check_present(&cognito.client_id, "auth.client_id")?;
                check_present(&cognito.region, "auth.region")?;
                check_present(&cognito.username, "auth.username")?;
                check_present(&cognito.password, "auth.password")?;
            }
        }

        if let SinkConfig::S3(s3) = &self.sink {
            check_present(&s3.bucket, "sink.bucket")?;
            check_present(&s3.region, "sink.region")?;
            if let Some(endpoint) = &s3.endpoint {
                check_url(endpoint, "sink.endpoint")?;
            }
            if s3.part_size == 0 {
                return Err(Error::config("must be greater than zero", "sink.part_size"));
            }
            if s3.max_concurrency == 0 {
                return Err(Error::config(
                    "must be greater than zero",
                    "sink.max_concurrency",
                ));
            }
        }

        Ok(())
    }

    /// Read the query text from [`Config::query_location`]
    pub fn read_query(&self) -> Result<String> {
        std::fs::read_to_string(&self.query_location).map_err(|source| Error::Query {
            path: self.query_location.clone(),
            source,
        })
    }
}

fn check_url(value: &str, key: &str) -> Result<()> {
    Url::parse(value)
        .map(|_| ())
        .map_err(|e| Error::config(format!("invalid URL '{value}': {e}"), key))
}

fn check_present(value: &str, key: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::config("must not be empty", key));
    }
    Ok(())
}

fn default_service_url() -> String {
    "http://localhost:3030/ds".to_string()
}

fn default_keycloak_url() -> String {
    "http://0.0.0.0:9229".to_string()
}

fn default_part_size() -> usize {
    crate::dump::MIN_PART_SIZE
}

fn default_max_concurrency() -> usize {
    8
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
