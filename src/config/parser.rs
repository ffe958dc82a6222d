//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};

use super::spec::SyncConfig;

/// Environment variable holding the API token.
pub const API_TOKEN_ENV: &str = "PROTECTSYNC_API_TOKEN";

/// Configuration parser for loading membership declarations.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving `.env`.
    base_path: Option<PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<SyncConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }
            .into());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<SyncConfig> {
        debug!("Parsing YAML configuration");

        let config: SyncConfig = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: source.map(|p| p.display().to_string()),
        })?;

        debug!("Parsed {} grouping(s)", config.groupings.len());
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// Recognized overrides: `PROTECTSYNC_ENDPOINT`,
    /// `PROTECTSYNC_STATE_PATH` and `PROTECTSYNC_POLL_INTERVAL_SECS`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or an
    /// override has an invalid value.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<SyncConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    fn apply_env_overrides(
        config: &mut SyncConfig,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<()> {
        if let Some(endpoint) = lookup("PROTECTSYNC_ENDPOINT") {
            debug!("Overriding service.endpoint from environment");
            config.service.endpoint = endpoint;
        }

        if let Some(path) = lookup("PROTECTSYNC_STATE_PATH") {
            debug!("Overriding state.path from environment");
            config.state.path = Some(path);
        }

        if let Some(interval) = lookup("PROTECTSYNC_POLL_INTERVAL_SECS") {
            debug!("Overriding reconcile.poll_interval_secs from environment");
            config.reconcile.poll_interval_secs = interval.parse().map_err(|_| {
                ConfigError::validation(
                    format!("PROTECTSYNC_POLL_INTERVAL_SECS must be a number of seconds, got '{interval}'"),
                    "reconcile.poll_interval_secs",
                )
            })?;
        }

        Ok(())
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to load .env file: {e}"),
                location: Some(env_path.display().to_string()),
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Gets the API token from the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is not set.
    pub fn get_api_token() -> Result<String> {
        match std::env::var(API_TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(token),
            Ok(_) => {
                warn!("{API_TOKEN_ENV} is set but empty");
                Err(missing_token())
            }
            Err(_) => Err(missing_token()),
        }
    }
}

fn missing_token() -> crate::error::SyncError {
    ConfigError::MissingEnvVar {
        name: API_TOKEN_ENV.to_string(),
    }
    .into()
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["protectsync.yaml", "protectsync.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::model::GroupingKind;
    use std::collections::HashMap;
    use tempfile::TempDir;

    const FULL: &str = r"
service:
  endpoint: https://rsc.example.com/api/graphql
  timeout_secs: 10

state:
  path: /var/lib/protectsync/state.json

reconcile:
  poll_interval_secs: 2
  convergence_timeout_secs: 120
  continue_on_error: true

groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: 8b0f1c34-0000-4000-8000-000000000001
    members: [vm-1, vm-2]
  - name: prod-scope
    kind: TAG_RULE_SCOPE
    id: tag-rule-1
    members: [account-1]
  - name: aws-prod
    kind: ACCOUNT_FEATURE_SET
    id: account-1
    members: [CLOUD_NATIVE_PROTECTION, EXOCOMPUTE, CUSTOM_FEATURE]
    dependencies:
      CUSTOM_FEATURE: [EXOCOMPUTE]
";

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
groupings:
  - name: gold
    kind: SLA_DOMAIN
    id: sla-1
";
        let config = ConfigParser::new().parse_yaml(yaml, None).unwrap();
        assert_eq!(config.groupings.len(), 1);
        assert!(config.groupings[0].members.is_empty());
        assert_eq!(config.reconcile.poll_interval_secs, 5);
    }

    #[test]
    fn test_parse_full_config() {
        let config = ConfigParser::new().parse_yaml(FULL, None).unwrap();

        assert_eq!(config.service.timeout_secs, 10);
        assert!(config.reconcile.continue_on_error);
        assert_eq!(config.groupings.len(), 3);
        assert_eq!(config.groupings[1].kind, GroupingKind::TagRuleScope);
        assert_eq!(
            config.groupings[2].dependencies.get("CUSTOM_FEATURE"),
            Some(&vec![String::from("EXOCOMPUTE")])
        );
    }

    #[test]
    fn test_unknown_kind_is_parse_error() {
        let yaml = r"
groupings:
  - name: gold
    kind: SLA_POLICY
    id: sla-1
";
        let result = ConfigParser::new().parse_yaml(yaml, None);
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::ParseError { .. }))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ConfigParser::new().parse_yaml(FULL, None).unwrap();
        let env: HashMap<&str, &str> = HashMap::from([
            ("PROTECTSYNC_ENDPOINT", "https://other.example.com/api/graphql"),
            ("PROTECTSYNC_POLL_INTERVAL_SECS", "9"),
        ]);

        ConfigParser::apply_env_overrides(&mut config, |name| env.get(name).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.service.endpoint, "https://other.example.com/api/graphql");
        assert_eq!(config.reconcile.poll_interval_secs, 9);
        assert_eq!(
            config.state.path.as_deref(),
            Some("/var/lib/protectsync/state.json")
        );
    }

    #[test]
    fn test_invalid_env_override() {
        let mut config = SyncConfig::default();
        let result = ConfigParser::apply_env_overrides(&mut config, |name| {
            (name == "PROTECTSYNC_POLL_INTERVAL_SECS").then(|| String::from("soon"))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_load_and_find_config_file() {
        let temp = TempDir::new().unwrap();
        let nested = temp.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(temp.path().join("protectsync.yaml"), FULL).unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, temp.path().join("protectsync.yaml"));

        let config = ConfigParser::new().load_file(&found).unwrap();
        assert_eq!(config.grouping_names(), vec!["gold", "prod-scope", "aws-prod"]);
    }

    #[test]
    fn test_missing_file() {
        let temp = TempDir::new().unwrap();
        let result = ConfigParser::new().load_file(temp.path().join("nope.yaml"));
        assert!(matches!(
            result,
            Err(SyncError::Config(ConfigError::FileNotFound { .. }))
        ));
    }
}
