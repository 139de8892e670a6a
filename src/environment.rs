//! Ambient context captured at the moment an event is recorded.
//!
//! `ProcessEnvironment` reads who, where and when from the running process.
//! Request handlers that know the acting user (and their client address)
//! scope it over the work with [`with_actor`]; every capture made inside that
//! task sees it.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::OnceLock;

/// Placeholder for any signal that cannot be read.
pub const UNKNOWN: &str = "unknown";

/// Who did it, from where, on which machine, and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    pub actor: String,
    pub client_ip_address: Option<String>,
    pub machine: String,
    pub process_id: u32,
    pub application: String,
    pub timestamp: DateTime<Utc>,
}

/// Source of environment snapshots. Must never fail.
pub trait EnvironmentCapture: Send + Sync {
    fn capture(&self) -> EnvironmentSnapshot;
}

/// Identity of the caller on whose behalf events are recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorContext {
    pub actor: String,
    pub client_ip_address: Option<String>,
}

impl ActorContext {
    pub fn new(actor: &str) -> Self {
        Self {
            actor: actor.to_string(),
            client_ip_address: None,
        }
    }

    pub fn with_client_ip(mut self, ip: &str) -> Self {
        self.client_ip_address = Some(ip.to_string());
        self
    }
}

tokio::task_local! {
    static CURRENT_ACTOR: ActorContext;
}

/// Runs `fut` with `actor` as the acting identity for every capture inside it.
pub async fn with_actor<F: Future>(actor: ActorContext, fut: F) -> F::Output {
    CURRENT_ACTOR.scope(actor, fut).await
}

/// The actor scoped over the current task, if any.
pub fn current_actor() -> Option<ActorContext> {
    CURRENT_ACTOR.try_with(|ctx| ctx.clone()).ok()
}

/// Reads the snapshot from the live process.
#[derive(Debug, Clone)]
pub struct ProcessEnvironment {
    application: String,
}

impl ProcessEnvironment {
    pub fn new(application: &str) -> Self {
        Self {
            application: application.to_string(),
        }
    }
}

impl Default for ProcessEnvironment {
    fn default() -> Self {
        Self::new(env!("CARGO_PKG_NAME"))
    }
}

impl EnvironmentCapture for ProcessEnvironment {
    fn capture(&self) -> EnvironmentSnapshot {
        let (actor, client_ip_address) = match current_actor() {
            Some(ctx) => (ctx.actor, ctx.client_ip_address),
            None => (os_user(), None),
        };

        EnvironmentSnapshot {
            actor,
            client_ip_address,
            machine: machine_name().to_string(),
            process_id: std::process::id(),
            application: self.application.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Always returns the same snapshot.
#[derive(Debug, Clone)]
pub struct FixedEnvironment {
    snapshot: EnvironmentSnapshot,
}

impl FixedEnvironment {
    pub fn new(snapshot: EnvironmentSnapshot) -> Self {
        Self { snapshot }
    }
}

impl EnvironmentCapture for FixedEnvironment {
    fn capture(&self) -> EnvironmentSnapshot {
        self.snapshot.clone()
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn os_user() -> String {
    non_empty_var("USER")
        .or_else(|| non_empty_var("USERNAME"))
        .unwrap_or_else(|| UNKNOWN.to_string())
}

// Host name does not change for the life of the process.
fn machine_name() -> &'static str {
    static MACHINE: OnceLock<String> = OnceLock::new();
    MACHINE.get_or_init(|| {
        non_empty_var("HOSTNAME")
            .or_else(|| non_empty_var("COMPUTERNAME"))
            .or_else(|| {
                std::fs::read_to_string("/etc/hostname")
                    .ok()
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
            })
            .unwrap_or_else(|| UNKNOWN.to_string())
    })
}
