mod runtime;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use incident_model::{ReplayRequest, DEFAULT_REPLAY_PAYLOAD};
use incident_sync::{Action, ActionDispatcher, ActionReceipt, Dashboard, HttpIncidentApi, IncidentApi, SyncConfig};
use runtime::{EventSink, Follow, StdoutSink, TracingSink};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "incident-watch", version, about = "Follow incidents from the response pipeline")]
struct Cli {
    /// Backend base URL (defaults to INCIDENT_API_URL)
    #[arg(long, global = true)]
    api_url: Option<String>,
    /// Number of recent incidents to hold
    #[arg(long, global = true)]
    limit: Option<usize>,
    /// List refresh interval in milliseconds
    #[arg(long, global = true)]
    list_interval_ms: Option<u64>,
    /// Detail refresh interval while the pipeline is working
    #[arg(long, global = true)]
    fast_ms: Option<u64>,
    /// Detail refresh interval once resolved
    #[arg(long, global = true)]
    slow_ms: Option<u64>,
    /// Per-request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll the incident list and one incident, printing events as they happen
    Watch {
        /// Incident to follow (defaults to the newest)
        #[arg(long)]
        follow: Option<String>,
        /// Where presentation events go
        #[arg(long, value_enum, default_value = "stdout")]
        events: EventTarget,
    },
    /// Resolve an incident
    Resolve { incident_id: String },
    /// Replay a recorded alert through the pipeline
    Replay {
        /// Named payload on the backend
        #[arg(long, default_value = DEFAULT_REPLAY_PAYLOAD)]
        payload: String,
        /// JSON file sent as the alert body instead of the named payload
        #[arg(long)]
        custom: Option<PathBuf>,
        /// Keep watching the created incident
        #[arg(long)]
        watch: bool,
    },
    /// Print an incident's postmortem
    Postmortem { incident_id: String },
    /// List connected repositories
    Repos,
}

#[derive(Clone, Copy, ValueEnum)]
enum EventTarget {
    Stdout,
    Log,
}

impl Cli {
    fn config(&self) -> SyncConfig {
        let mut config = SyncConfig::from_env();
        if let Some(url) = &self.api_url {
            config.base_url = url.clone();
        }
        if let Some(limit) = self.limit.filter(|n| *n > 0) {
            config.list_limit = limit;
        }
        let override_ms = |target: &mut Duration, value: Option<u64>| {
            if let Some(ms) = value.filter(|ms| *ms > 0) {
                *target = Duration::from_millis(ms);
            }
        };
        override_ms(&mut config.list_interval, self.list_interval_ms);
        override_ms(&mut config.detail_fast_interval, self.fast_ms);
        override_ms(&mut config.detail_slow_interval, self.slow_ms);
        override_ms(&mut config.request_timeout, self.timeout_ms);
        config
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if env_bool("INCIDENT_LOG_JSON", false) {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_replay(receipt: &ActionReceipt) -> Result<()> {
    print_json(&serde_json::json!({ "incident_id": receipt.incident_id(), "status": "ingested" }))
}

async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %err, "ctrl-c handler unavailable");
        std::future::pending::<()>().await;
    }
}

async fn watch(config: SyncConfig, follow: Follow, sink: &impl EventSink) -> Result<()> {
    let dashboard = Dashboard::connect(config).context("starting dashboard")?;
    runtime::run_watch(dashboard, follow, sink, ctrl_c()).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = cli.config();

    match cli.cmd {
        Command::Watch { follow, events } => {
            let follow = follow.map_or(Follow::Newest, Follow::Incident);
            match events {
                EventTarget::Stdout => watch(config, follow, &StdoutSink).await,
                EventTarget::Log => watch(config, follow, &TracingSink).await,
            }
        }
        Command::Resolve { incident_id } => {
            let api = HttpIncidentApi::new(&config.base_url, config.request_timeout)?;
            let receipt = ActionDispatcher::new(Arc::new(api))
                .dispatch(Action::resolve(incident_id))
                .await
                .context("resolve failed")?;
            print_json(&serde_json::json!({ "incident_id": receipt.incident_id(), "status": "resolved" }))
        }
        Command::Replay {
            payload,
            custom,
            watch: keep_watching,
        } => {
            let request = match custom {
                Some(path) => {
                    let raw = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let body = serde_json::from_str(&raw)
                        .with_context(|| format!("parsing {}", path.display()))?;
                    ReplayRequest::custom(payload, body)
                }
                None => ReplayRequest::named(payload),
            };
            if !keep_watching {
                let api = HttpIncidentApi::new(&config.base_url, config.request_timeout)?;
                let receipt = ActionDispatcher::new(Arc::new(api))
                    .dispatch(Action::replay(request))
                    .await
                    .context("replay failed")?;
                return print_replay(&receipt);
            }

            // The list needs its baseline before the replay for the new incident to arrive.
            let dashboard = Dashboard::connect(config).context("starting dashboard")?;
            let receipt = match runtime::replay_then_select(&dashboard, request).await {
                Ok(receipt) => receipt,
                Err(err) => {
                    dashboard.shutdown().await;
                    return Err(err).context("replay failed");
                }
            };
            print_replay(&receipt)?;
            runtime::run_watch(dashboard, Follow::Current, &StdoutSink, ctrl_c()).await;
            Ok(())
        }
        Command::Postmortem { incident_id } => {
            let api = HttpIncidentApi::new(&config.base_url, config.request_timeout)?;
            let postmortem = api
                .get_postmortem(&incident_id)
                .await
                .with_context(|| format!("postmortem for {incident_id}"))?;
            println!("{}", postmortem.content);
            Ok(())
        }
        Command::Repos => {
            let api = HttpIncidentApi::new(&config.base_url, config.request_timeout)?;
            let repos = api.list_repos().await.context("listing repos")?;
            print_json(&repos)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_environment_defaults() {
        let cli = Cli::parse_from([
            "incident-watch",
            "--api-url",
            "http://ops.internal:9000",
            "--limit",
            "5",
            "--slow-ms",
            "30000",
            "watch",
        ]);
        let config = cli.config();
        assert_eq!(config.base_url, "http://ops.internal:9000");
        assert_eq!(config.list_limit, 5);
        assert_eq!(config.detail_slow_interval, Duration::from_secs(30));
    }

    #[test]
    fn replay_defaults_to_named_payload() {
        let cli = Cli::parse_from(["incident-watch", "replay"]);
        match cli.cmd {
            Command::Replay { payload, custom, watch } => {
                assert_eq!(payload, DEFAULT_REPLAY_PAYLOAD);
                assert!(custom.is_none());
                assert!(!watch);
            }
            _ => panic!("expected replay"),
        }
    }
}
