use serde::{Deserialize, Serialize};
use std::env;
use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::compiler::QueryCacheConfig;
use crate::sql_generator::{DialectPolicy, BUILTIN_DIALECTS};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Parse error for {field}: {value} - {source}")]
    Parse {
        field: String,
        value: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Compiler settings shared by the CLI and the server
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Built-in dialect name or path to a YAML dialect file
    #[validate(custom(function = "validate_dialect"))]
    pub dialect: String,

    pub query_cache_enabled: bool,

    #[validate(range(
        min = 1,
        max = 1_000_000,
        message = "Query cache entries must be between 1 and 1000000"
    ))]
    pub query_cache_max_entries: usize,

    #[validate(range(
        min = 1,
        max = 10_240,
        message = "Query cache size must be between 1 and 10240 MB"
    ))]
    pub query_cache_max_size_mb: usize,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            dialect: "sqlserver".to_string(),
            query_cache_enabled: true,
            query_cache_max_entries: 1000,
            query_cache_max_size_mb: 100,
        }
    }
}

impl CompilerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self {
            dialect: env::var("QUERYFORGE_DIALECT").unwrap_or_else(|_| "sqlserver".to_string()),
            query_cache_enabled: parse_env_var("QUERYFORGE_QUERY_CACHE_ENABLED", "true")?,
            query_cache_max_entries: parse_env_var("QUERYFORGE_QUERY_CACHE_MAX_ENTRIES", "1000")?,
            query_cache_max_size_mb: parse_env_var("QUERYFORGE_QUERY_CACHE_MAX_SIZE_MB", "100")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn cache_config(&self) -> QueryCacheConfig {
        QueryCacheConfig {
            enabled: self.query_cache_enabled,
            max_entries: self.query_cache_max_entries,
            max_size_bytes: self.query_cache_max_size_mb * 1024 * 1024,
        }
    }
}

fn validate_dialect(dialect: &str) -> Result<(), ValidationError> {
    if DialectPolicy::builtin(dialect).is_some() || dialect.ends_with(".yaml") || dialect.ends_with(".yml") {
        return Ok(());
    }
    let mut error = ValidationError::new("unknown_dialect");
    error.message = Some(
        format!(
            "Dialect must be one of {} or a .yaml dialect file",
            BUILTIN_DIALECTS.join(", ")
        )
        .into(),
    );
    Err(error)
}

/// Server configuration with validation
#[derive(Clone, Debug, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server host address
    #[validate(length(min = 1, message = "HTTP host cannot be empty"))]
    pub http_host: String,

    /// HTTP server port (1-65535)
    #[validate(range(
        min = 1,
        max = 65535,
        message = "HTTP port must be between 1 and 65535"
    ))]
    pub http_port: u16,

    /// Model definition files served by this instance
    #[validate(length(min = 1, message = "At least one model file is required"))]
    pub model_paths: Vec<String>,

    /// Per-request timeout
    #[validate(range(
        min = 1,
        max = 300,
        message = "Request timeout must be between 1 and 300 seconds"
    ))]
    pub request_timeout_secs: u64,

    /// Maximum request body size
    #[validate(range(
        min = 1024,
        max = 16_777_216,
        message = "Max body size must be between 1 KiB and 16 MiB"
    ))]
    pub max_body_bytes: usize,

    #[validate(nested)]
    pub compiler: CompilerConfig,

    /// Whether to run server in daemon mode
    pub daemon: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_host: "0.0.0.0".to_string(),
            http_port: 8080,
            model_paths: Vec::new(),
            request_timeout_secs: 30,
            max_body_bytes: 1024 * 1024,
            compiler: CompilerConfig::default(),
            daemon: false,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables with validation
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Self::from_env_unvalidated()?;
        config.validate()?;
        Ok(config)
    }

    fn from_env_unvalidated() -> Result<Self, ConfigError> {
        Ok(Self {
            http_host: env::var("QUERYFORGE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            http_port: parse_env_var("QUERYFORGE_PORT", "8080")?,
            model_paths: env::var("QUERYFORGE_MODELS")
                .map(|paths| split_paths(&paths))
                .unwrap_or_default(),
            request_timeout_secs: parse_env_var("QUERYFORGE_REQUEST_TIMEOUT_SECS", "30")?,
            max_body_bytes: parse_env_var("QUERYFORGE_MAX_BODY_BYTES", "1048576")?,
            compiler: CompilerConfig::from_env()?,
            daemon: false, // Environment-based config always runs in foreground
        })
    }

    /// Environment configuration with CLI values taking precedence
    pub fn from_cli(cli: CliConfig) -> Result<Self, ConfigError> {
        let mut config = Self::from_env_unvalidated()?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    /// Create configuration from YAML file
    pub fn from_yaml_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            field: "yaml_file".to_string(),
            value: "file read failed".to_string(),
            source: Box::new(e),
        })?;

        let config: Self = serde_yaml::from_str(&content).map_err(|e| ConfigError::Parse {
            field: "yaml_content".to_string(),
            value: content,
            source: Box::new(e),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Overrides fields that were given on the command line
    pub fn apply_cli(&mut self, cli: CliConfig) {
        if let Some(host) = cli.http_host {
            self.http_host = host;
        }
        if let Some(port) = cli.http_port {
            self.http_port = port;
        }
        if !cli.model_paths.is_empty() {
            self.model_paths = cli.model_paths;
        }
        if let Some(dialect) = cli.dialect {
            self.compiler.dialect = dialect;
        }
        if cli.disable_cache {
            self.compiler.query_cache_enabled = false;
        }
        self.daemon = cli.daemon;
    }

    /// Applies command line overrides and validates the result
    pub fn with_cli(mut self, cli: CliConfig) -> Result<Self, ConfigError> {
        self.apply_cli(cli);
        self.validate()?;
        Ok(self)
    }
}

/// CLI configuration (parsed from command line arguments)
#[derive(Clone, Debug, Default)]
pub struct CliConfig {
    pub http_host: Option<String>,
    pub http_port: Option<u16>,
    pub model_paths: Vec<String>,
    pub dialect: Option<String>,
    pub disable_cache: bool,
    pub daemon: bool,
}

fn split_paths(paths: &str) -> Vec<String> {
    paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}

/// Parse an environment variable with a default value
fn parse_env_var<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let value = env::var(key).unwrap_or_else(|_| default.to_string());
    value.parse().map_err(|e| ConfigError::Parse {
        field: key.to_string(),
        value,
        source: Box::new(e),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig {
            model_paths: vec!["shop.yaml".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.compiler.dialect, "sqlserver");
    }

    #[test]
    fn test_models_are_required() {
        assert!(ServerConfig::default().validate().is_err());
    }

    #[test]
    fn test_invalid_port_range() {
        let config = ServerConfig {
            http_port: 0,
            model_paths: vec!["shop.yaml".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nested_compiler_validation() {
        let config = ServerConfig {
            model_paths: vec!["shop.yaml".to_string()],
            compiler: CompilerConfig {
                dialect: "oracle".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = CompilerConfig {
            dialect: "dialects/custom.yaml".to_string(),
            query_cache_max_entries: 0,
            ..Default::default()
        };
        let errors = config.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("query_cache_max_entries"));
        assert!(!errors.field_errors().contains_key("dialect"));
    }

    #[test]
    fn test_cli_overrides() {
        let mut config = ServerConfig::default();
        config.apply_cli(CliConfig {
            http_port: Some(9090),
            model_paths: vec!["a.yaml".to_string(), "b.yaml".to_string()],
            dialect: Some("postgres".to_string()),
            disable_cache: true,
            ..Default::default()
        });
        assert_eq!(config.http_port, 9090);
        assert_eq!(config.http_host, "0.0.0.0");
        assert_eq!(config.model_paths.len(), 2);
        assert_eq!(config.compiler.dialect, "postgres");
        assert!(!config.compiler.cache_config().enabled);
    }

    #[test]
    fn test_split_paths() {
        assert_eq!(split_paths("a.yaml, b.yaml,,"), vec!["a.yaml", "b.yaml"]);
    }
}
