// config.rs
// Runtime configuration for the audit recorder

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::audit_sink_sled::DEFAULT_TREE;
use crate::errors::ConfigError;
use crate::serializer::SerializerSettings;

/// Where rendered records go.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkConfig {
    File {
        root: PathBuf,
    },
    Sled {
        path: PathBuf,
        #[serde(default = "default_tree")]
        tree: String,
    },
    /// Auditing disabled
    Null,
}

fn default_tree() -> String {
    DEFAULT_TREE.to_string()
}

/// `{data_local_dir}/audit_recorder/audit`, or `./audit` when the platform has none.
pub fn default_audit_root() -> PathBuf {
    dirs::data_local_dir()
        .map(|dir| dir.join(env!("CARGO_PKG_NAME")).join("audit"))
        .unwrap_or_else(|| PathBuf::from("./audit"))
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig::File {
            root: default_audit_root(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Recorded as `Application` on every entry
    pub application: String,
    pub log_level: String,
    pub store_timeout_ms: Option<u64>,
    pub serializer: SerializerSettings,
    pub sink: SinkConfig,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            application: env!("CARGO_PKG_NAME").to_string(),
            log_level: "info".to_string(),
            store_timeout_ms: None,
            serializer: SerializerSettings::default(),
            sink: SinkConfig::default(),
        }
    }
}

impl AuditConfig {
    pub fn store_timeout(&self) -> Option<Duration> {
        self.store_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application.trim().is_empty() {
            return Err(ConfigError::invalid("application", "cannot be empty"));
        }

        // The envelope and its Record object need two levels on their own.
        if self.serializer.max_depth < 2 {
            return Err(ConfigError::invalid(
                "serializer.max_depth",
                format!("must be at least 2, got {}", self.serializer.max_depth),
            ));
        }

        if self.store_timeout_ms == Some(0) {
            return Err(ConfigError::invalid("store_timeout_ms", "must be positive"));
        }

        match &self.sink {
            SinkConfig::File { root } if root.as_os_str().is_empty() => {
                Err(ConfigError::invalid("sink.root", "cannot be empty"))
            }
            SinkConfig::Sled { path, .. } if path.as_os_str().is_empty() => {
                Err(ConfigError::invalid("sink.path", "cannot be empty"))
            }
            SinkConfig::Sled { tree, .. } if tree.trim().is_empty() => {
                Err(ConfigError::invalid("sink.tree", "cannot be empty"))
            }
            _ => Ok(()),
        }
    }
}
