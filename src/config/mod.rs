//! Client configuration module
//!
//! Type-safe configuration loading from environment variables using the
//! `config` and `dotenvy` crates. Variables use the `CLINIC_SYNC` prefix and
//! nested values are separated by double underscores.
//!
//! # Example
//!
//! ```no_run
//! use clinic_sync::config::SyncConfig;
//!
//! let config = SyncConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Syncing tenant {}", config.session.tenant_id);
//! ```

mod cache;
mod connection;
mod error;
mod logging;
mod session;

pub use cache::CacheConfig;
pub use connection::ConnectionConfig;
pub use error::{ConfigError, ValidationError};
pub use logging::LoggingConfig;
pub use session::SessionConfig;

use std::path::Path;

use serde::Deserialize;

const ENV_PREFIX: &str = "CLINIC_SYNC";

/// Root configuration for the sync client.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Tenant and credentials
    pub session: SessionConfig,

    /// Push channel settings
    #[serde(default)]
    pub connection: ConnectionConfig,

    /// Cache and merge settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SyncConfig {
    /// Load configuration from environment variables
    ///
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with the `CLINIC_SYNC` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    ///
    /// # Environment Variable Format
    ///
    /// - `CLINIC_SYNC__SESSION__TENANT_ID=doctor-7` -> `session.tenant_id`
    /// - `CLINIC_SYNC__CONNECTION__CONNECT_TIMEOUT_SECS=5` -> `connection.connect_timeout_secs`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if required values are missing or cannot be parsed.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Load configuration from an optional file, overridden by the environment.
    ///
    /// The file format follows its extension (`.toml`, `.json`, ...). A missing
    /// file is not an error.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the file is malformed or required values are
    /// missing from both sources.
    pub fn load_with_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` for the first invalid section.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.session.validate()?;
        self.connection.validate()?;
        self.cache.validate()?;
        self.logging.validate()?;
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::default()
        .prefix(ENV_PREFIX)
        .separator("__")
        .list_separator(",")
        .with_list_parse_key("cache.revision_fields")
        .try_parsing(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::env;
    use std::io::Write;
    use std::sync::Mutex;
    use std::time::Duration;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn set_minimal_env() {
        env::set_var("CLINIC_SYNC__SESSION__TENANT_ID", "doctor-7");
    }

    fn clear_env() {
        env::remove_var("CLINIC_SYNC__SESSION__TENANT_ID");
        env::remove_var("CLINIC_SYNC__SESSION__AUTH_TOKEN");
        env::remove_var("CLINIC_SYNC__CONNECTION__CONNECT_TIMEOUT_SECS");
        env::remove_var("CLINIC_SYNC__CACHE__REVISION_FIELDS");
    }

    #[test]
    fn test_load_from_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("CLINIC_SYNC__SESSION__AUTH_TOKEN", "secret-token");
        let result = SyncConfig::load();
        clear_env();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.session.tenant_id, "doctor-7");
        assert_eq!(
            config.session.auth_token.as_ref().map(|t| t.expose_secret().as_str()),
            Some("secret-token")
        );
    }

    #[test]
    fn test_defaults_applied() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let result = SyncConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.connection.connect_timeout(), Duration::from_secs(10));
        assert_eq!(config.cache.change_channel_capacity, 256);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_tenant_fails() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let result = SyncConfig::load();

        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_revision_fields_parse_as_list() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        env::set_var("CLINIC_SYNC__CACHE__REVISION_FIELDS", "seq,modified_at");
        let result = SyncConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.cache.revision_fields, vec!["seq", "modified_at"]);
    }

    #[test]
    fn test_file_values_overridden_by_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[session]\ntenant_id = \"from-file\"\n\n[connection]\nconnect_timeout_secs = 3"
        )
        .unwrap();
        env::set_var("CLINIC_SYNC__SESSION__TENANT_ID", "from-env");
        let result = SyncConfig::load_with_file(file.path());
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.session.tenant_id, "from-env");
        assert_eq!(config.connection.connect_timeout_secs, 3);
    }

    #[test]
    fn test_missing_file_is_tolerated() {
        let _guard = ENV_MUTEX.lock().unwrap();
        set_minimal_env();
        let dir = tempfile::tempdir().unwrap();
        let result = SyncConfig::load_with_file(dir.path().join("absent.toml"));
        clear_env();

        assert!(result.is_ok());
    }
}
