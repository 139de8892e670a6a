use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use serde_json::Value;
use std::path::PathBuf;

use crate::audit::StructuredEvent;
use crate::auditing_service::AuditingService;
use crate::config::AuditConfig;
use crate::environment::{with_actor, ActorContext};

/// Top-level CLI interface for the audit recorder
#[derive(Parser, Debug)]
#[command(
    name = "auditctl",
    version,
    about = "Record and inspect immutable audit entries"
)]
pub struct Cli {
    /// Configuration file (defaults to audit.toml or $AUDIT_CONFIG_PATH)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record an event through the configured sink and print its reference
    Record(EventArgs),

    /// Print the rendered record and its key without storing anything
    Render(EventArgs),

    /// Print a stored record by storage key
    Show {
        #[arg(short, long)]
        key: String,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct EventArgs {
    #[arg(short = 't', long)]
    pub resource_type: String,

    #[arg(short, long)]
    pub path: String,

    #[arg(short, long)]
    pub action: Option<String>,

    /// JSON object, or @file to read it from disk
    #[arg(long)]
    pub payload: Option<String>,

    /// Record on behalf of this actor instead of the OS user
    #[arg(long)]
    pub actor: Option<String>,

    #[arg(long, requires = "actor")]
    pub client_ip: Option<String>,
}

impl EventArgs {
    pub fn to_event(&self) -> anyhow::Result<StructuredEvent> {
        let mut event = StructuredEvent::new(&self.resource_type, &self.path);
        if let Some(action) = &self.action {
            event = event.with_action(action);
        }
        if let Some(raw) = &self.payload {
            event = event.with_payload(parse_payload(raw)?);
        }
        Ok(event)
    }

    fn actor_context(&self) -> Option<ActorContext> {
        self.actor.as_deref().map(|actor| {
            let ctx = ActorContext::new(actor);
            match &self.client_ip {
                Some(ip) => ctx.with_client_ip(ip),
                None => ctx,
            }
        })
    }
}

/// Inline JSON, or `@path` to a JSON file.
pub fn parse_payload(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("reading payload file {path}"))?,
        None => raw.to_string(),
    };
    let value: Value = serde_json::from_str(&text).context("payload is not valid JSON")?;
    if !value.is_object() {
        bail!("payload must be a JSON object");
    }
    Ok(value)
}

pub async fn run(cli: Cli, config: AuditConfig) -> anyhow::Result<()> {
    match cli.command {
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
        Commands::Render(args) => {
            let service = AuditingService::from_config(&config)?;
            let event = args.to_event()?;
            let prepared = match args.actor_context() {
                Some(ctx) => with_actor(ctx, async { service.prepare(&event) }).await,
                None => service.prepare(&event),
            }?;
            println!("{}", prepared.key());
            println!("{}", String::from_utf8_lossy(prepared.bytes()));
        }
        Commands::Record(args) => {
            let service = AuditingService::from_config(&config)?;
            let event = args.to_event()?;
            let reference = match args.actor_context() {
                Some(ctx) => with_actor(ctx, service.record(&event)).await,
                None => service.record(&event).await,
            }
            .context("recording audit event")?;
            println!("{reference}");
        }
        Commands::Show { key } => {
            let service = AuditingService::from_config(&config)?;
            let bytes = service
                .sink()
                .fetch_key(&key)
                .await
                .with_context(|| format!("reading {key} from {} sink", service.sink().kind()))?;
            println!("{}", String::from_utf8_lossy(&bytes));
        }
    }
    Ok(())
}
