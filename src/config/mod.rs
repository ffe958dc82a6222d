//! Configuration module for protectsync.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `protectsync.yaml`
//! - Validation of groupings, members and member relations
//! - Computing membership hashes for change detection

mod spec;
mod parser;
mod validator;
mod hash;

pub use spec::{GroupingConfig, ReconcileConfig, ServiceConfig, StateConfig, SyncConfig};
pub use parser::{find_config_file, ConfigParser, API_TOKEN_ENV, DEFAULT_CONFIG_FILES};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use hash::ConfigHasher;
