//! Unit tests for server and compiler configuration
//!
//! Environment variable tests are serialized because they mutate process
//! state.

#[cfg(test)]
mod config_tests {
    use std::env;
    use std::io::Write;

    use queryforge::config::{CliConfig, CompilerConfig, ConfigError, ServerConfig};
    use serial_test::serial;

    const VARS: &[&str] = &[
        "QUERYFORGE_HOST",
        "QUERYFORGE_PORT",
        "QUERYFORGE_MODELS",
        "QUERYFORGE_DIALECT",
        "QUERYFORGE_REQUEST_TIMEOUT_SECS",
        "QUERYFORGE_MAX_BODY_BYTES",
        "QUERYFORGE_QUERY_CACHE_ENABLED",
        "QUERYFORGE_QUERY_CACHE_MAX_ENTRIES",
        "QUERYFORGE_QUERY_CACHE_MAX_SIZE_MB",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    #[serial]
    fn test_from_env_reads_all_settings() {
        clear_env();
        env::set_var("QUERYFORGE_HOST", "127.0.0.1");
        env::set_var("QUERYFORGE_PORT", "9000");
        env::set_var("QUERYFORGE_MODELS", "models/shop.yaml, models/crm.yaml");
        env::set_var("QUERYFORGE_DIALECT", "postgres");
        env::set_var("QUERYFORGE_QUERY_CACHE_MAX_ENTRIES", "50");

        let config = ServerConfig::from_env().unwrap();
        clear_env();

        assert_eq!(config.http_host, "127.0.0.1");
        assert_eq!(config.http_port, 9000);
        assert_eq!(config.model_paths, vec!["models/shop.yaml", "models/crm.yaml"]);
        assert_eq!(config.compiler.dialect, "postgres");
        let cache = config.compiler.cache_config();
        assert!(cache.enabled);
        assert_eq!(cache.max_entries, 50);
        assert_eq!(cache.max_size_bytes, 100 * 1024 * 1024);
    }

    #[test]
    #[serial]
    fn test_from_env_rejects_bad_values() {
        clear_env();
        env::set_var("QUERYFORGE_MODELS", "shop.yaml");
        env::set_var("QUERYFORGE_PORT", "not-a-port");
        let err = ServerConfig::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Parse { ref field, .. } if field == "QUERYFORGE_PORT"));

        env::set_var("QUERYFORGE_PORT", "8080");
        env::set_var("QUERYFORGE_DIALECT", "oracle");
        let err = ServerConfig::from_env().unwrap_err();
        clear_env();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    #[serial]
    fn test_cli_values_take_precedence_over_env() {
        clear_env();
        env::set_var("QUERYFORGE_PORT", "9000");
        env::set_var("QUERYFORGE_MODELS", "env.yaml");

        let config = ServerConfig::from_cli(CliConfig {
            http_port: Some(9100),
            model_paths: vec!["cli.yaml".to_string()],
            ..Default::default()
        })
        .unwrap();
        clear_env();

        assert_eq!(config.http_port, 9100);
        assert_eq!(config.model_paths, vec!["cli.yaml"]);
    }

    #[test]
    fn test_yaml_file_with_partial_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "http_port: 8181\nmodel_paths: [shop.yaml]\ncompiler:\n  dialect: sqlite\n  query_cache_enabled: false"
        )
        .unwrap();

        let config = ServerConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(config.http_port, 8181);
        assert_eq!(config.http_host, "0.0.0.0");
        assert_eq!(config.compiler.dialect, "sqlite");
        assert!(!config.compiler.query_cache_enabled);
        assert_eq!(config.compiler.query_cache_max_entries, 1000);

        let config = config
            .with_cli(CliConfig {
                dialect: Some("cosmos".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(config.compiler.dialect, "cosmos");
    }

    #[test]
    fn test_yaml_file_is_validated() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http_port: 8181\nmodel_paths: []").unwrap();
        assert!(matches!(
            ServerConfig::from_yaml_file(file.path()),
            Err(ConfigError::Validation(_))
        ));
        assert!(matches!(
            ServerConfig::from_yaml_file("/nonexistent/server.yaml"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn test_compiler_defaults() {
        let config = CompilerConfig::default();
        assert_eq!(config.dialect, "sqlserver");
        assert!(config.cache_config().enabled);
    }
}
