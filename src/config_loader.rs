use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use std::path::Path;

use crate::config::AuditConfig;
use crate::errors::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "audit.toml";
pub const ENV_PREFIX: &str = "AUDIT_";
pub const CONFIG_PATH_VAR: &str = "AUDIT_CONFIG_PATH";

/// Defaults, then the TOML file, then `AUDIT_*` variables (`__` nests).
pub fn config_figment(path: Option<&Path>) -> Figment {
    let file = path
        .map(|p| p.to_path_buf())
        .or_else(|| std::env::var(CONFIG_PATH_VAR).ok().map(Into::into))
        .unwrap_or_else(|| DEFAULT_CONFIG_FILE.into());

    Figment::from(Serialized::defaults(AuditConfig::default()))
        .merge(Toml::file(file))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Extract and validate a configuration from any figment.
pub fn extract_config(figment: &Figment) -> Result<AuditConfig, ConfigError> {
    let config: AuditConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: Option<&Path>) -> Result<AuditConfig, ConfigError> {
    extract_config(&config_figment(path))
}
