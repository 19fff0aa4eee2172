//! Application settings and configuration

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Azure AD credentials
    pub azure: AzureSettings,
    /// Billing scopes to extract, as full scope paths
    pub scopes: Vec<String>,
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageSettings,
    /// HTTP client configuration
    #[serde(default)]
    pub http: HttpSettings,
    /// Pipeline configuration
    #[serde(default)]
    pub pipeline: PipelineSettings,
}

/// Azure AD client-credential settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AzureSettings {
    /// Azure AD tenant id
    pub tenant_id: String,
    /// Service principal client id
    pub client_id: String,
    /// Service principal client secret
    pub client_secret: String,
    /// Identity provider base URL
    #[serde(default = "default_authority_host")]
    pub authority_host: String,
    /// Management API base URL (also the token resource)
    #[serde(default = "default_management_host")]
    pub management_host: String,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_management_host() -> String {
    "https://management.azure.com".to_string()
}

/// Target storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageMode {
    /// Partitioned Postgres table (production)
    Postgres,
    /// Per-date CSV files (local testing)
    Csv,
}

/// Storage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Storage backend
    #[serde(default = "default_storage_mode")]
    pub mode: StorageMode,
    /// Postgres connection URL (postgres mode)
    #[serde(default)]
    pub database_url: String,
    /// Target table name (postgres mode)
    #[serde(default = "default_table_name")]
    pub table_name: String,
    /// Output directory (csv mode)
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Row-identifying columns forming the merge key when present
    #[serde(default = "default_key_columns")]
    pub key_columns: Vec<String>,
    /// Maximum number of pooled connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Rows per insert statement
    #[serde(default = "default_batch_size")]
    pub batch_insert_size: usize,
}

fn default_storage_mode() -> StorageMode {
    StorageMode::Csv
}

fn default_table_name() -> String {
    "azure_costs".to_string()
}

fn default_output_dir() -> String {
    "./cost_data".to_string()
}

fn default_key_columns() -> Vec<String> {
    vec![
        "ResourceId".to_string(),
        "MeterId".to_string(),
        "SubscriptionId".to_string(),
    ]
}

fn default_max_connections() -> u32 {
    5
}

fn default_batch_size() -> usize {
    500
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            mode: default_storage_mode(),
            database_url: String::new(),
            table_name: default_table_name(),
            output_dir: default_output_dir(),
            key_columns: default_key_columns(),
            max_connections: default_max_connections(),
            batch_insert_size: default_batch_size(),
        }
    }
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpSettings {
    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Total time budget for walking one scope's pagination, in seconds
    #[serde(default = "default_pagination_timeout")]
    pub pagination_timeout_secs: u64,
    /// Maximum attempts per request
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Initial backoff delay in seconds
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_secs: u64,
    /// Backoff ceiling in seconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_secs: u64,
}

fn default_request_timeout() -> u64 {
    60
}

fn default_pagination_timeout() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    5
}

fn default_retry_base_delay() -> u64 {
    2
}

fn default_retry_max_delay() -> u64 {
    120
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout(),
            pagination_timeout_secs: default_pagination_timeout(),
            max_retries: default_max_retries(),
            retry_base_delay_secs: default_retry_base_delay(),
            retry_max_delay_secs: default_retry_max_delay(),
        }
    }
}

/// Pipeline settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSettings {
    /// Scopes extracted concurrently within one date
    #[serde(default = "default_scope_concurrency")]
    pub scope_concurrency: usize,
}

fn default_scope_concurrency() -> usize {
    4
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            scope_concurrency: default_scope_concurrency(),
        }
    }
}

impl Settings {
    /// Load settings from configuration files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_prefix("COST_MANAGER")
    }

    /// Load settings with a custom environment variable prefix
    pub fn load_with_prefix(env_prefix: &str) -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let config_dir = Self::config_dir();

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::with_name(&format!("{}/default", config_dir)).required(false))
            // Add environment-specific configuration
            .add_source(File::with_name(&format!("{}/{}", config_dir, run_mode)).required(false))
            // Add local overrides (not checked into git)
            .add_source(File::with_name(&format!("{}/local", config_dir)).required(false))
            // Add environment variables (e.g., COST_MANAGER__AZURE__TENANT_ID)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("scopes")
                    .with_list_parse_key("storage.key_columns"),
            )
            .build()?;

        s.try_deserialize()
    }

    /// Get the configuration directory path
    fn config_dir() -> String {
        std::env::var("COST_MANAGER_CONFIG_DIR").unwrap_or_else(|_| "config".into())
    }

    /// Validate required fields before any network call.
    ///
    /// Placeholder values (anything starting with `your-`) count as
    /// unconfigured, matching the shape of a freshly copied .env file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("azure.tenant_id", &self.azure.tenant_id),
            ("azure.client_id", &self.azure.client_id),
            ("azure.client_secret", &self.azure.client_secret),
        ];
        for (key, value) in required {
            if value.trim().is_empty() || value.starts_with("your-") {
                return Err(ConfigError::Message(format!(
                    "missing or unconfigured setting: {key}"
                )));
            }
        }

        if self.scopes.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::Message(
                "scopes must contain at least one scope path".to_string(),
            ));
        }

        match self.storage.mode {
            StorageMode::Postgres if self.storage.database_url.trim().is_empty() => {
                Err(ConfigError::Message(
                    "storage.database_url is required in postgres mode".to_string(),
                ))
            }
            StorageMode::Csv if self.storage.output_dir.trim().is_empty() => {
                Err(ConfigError::Message(
                    "storage.output_dir is required in csv mode".to_string(),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Create settings suitable for tests, pointed at the given hosts.
    pub fn for_tests(authority_host: &str, management_host: &str, scopes: Vec<String>) -> Self {
        Settings {
            azure: AzureSettings {
                tenant_id: "test-tenant".to_string(),
                client_id: "test-client".to_string(),
                client_secret: "test-secret".to_string(),
                authority_host: authority_host.to_string(),
                management_host: management_host.to_string(),
            },
            scopes,
            storage: StorageSettings::default(),
            http: HttpSettings {
                retry_base_delay_secs: 0,
                ..HttpSettings::default()
            },
            pipeline: PipelineSettings::default(),
        }
    }
}
