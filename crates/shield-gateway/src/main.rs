//! The composed Plasma Shield gateway.
//!
//! Runs the forward proxy (outbound agent traffic), the reverse proxy
//! (inbound traffic to agents), the management API, and optionally the SSH
//! bastion, wired over one set of shared components.

use std::net::SocketAddr;
use std::os::unix::fs::DirBuilderExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shield_api::ApiContext;
use shield_bastion::{BastionConfig, BastionServer, GrantStore, SessionLogStore, SessionLogger};
use shield_fleet::{FleetConfig, FleetRegistry};
use shield_mode::ModeManager;
use shield_proxy::{ForwardProxy, Inspector, ReverseProxy, TrafficLog};
use shield_rules::{RuleAction, RuleEngine};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Network gateway for untrusted agent fleets.
#[derive(Parser, Debug)]
#[command(name = "plasma-shield-gateway", version, about)]
struct Args {
    /// Forward proxy listen address (outbound agent traffic)
    #[arg(long, default_value = "0.0.0.0:8080")]
    outbound: SocketAddr,

    /// Reverse proxy listen address (inbound traffic to agents)
    #[arg(long, default_value = "0.0.0.0:8443")]
    inbound: SocketAddr,

    /// Management API listen address (keep this loopback-only)
    #[arg(long, default_value = "127.0.0.1:9000")]
    api: SocketAddr,

    /// SSH bastion listen address (bastion disabled when omitted)
    #[arg(long)]
    bastion: Option<SocketAddr>,

    /// Authorized-keys file admitting raw (non-certificate) keys at the
    /// bastion
    #[arg(long)]
    authorized_keys: Option<PathBuf>,

    /// Directory for persistent state (keys, grants)
    #[arg(long, default_value = "/var/lib/plasma-shield")]
    data_dir: PathBuf,

    /// Rules file (YAML)
    #[arg(long)]
    rules: Option<PathBuf>,

    /// Fleet config file (tenants, agents, tokens)
    #[arg(long)]
    agents: Option<PathBuf>,

    /// Action when no rule matches: allow or block
    #[arg(long, default_value = "allow")]
    default_action: String,

    /// Bearer token guarding the management API
    #[arg(long, env = "PLASMA_MGMT_TOKEN")]
    mgmt_token: Option<String>,

    /// Increase logging verbosity (RUST_LOG=debug)
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(version = VERSION, "plasma shield gateway starting");

    let default_action = match args.default_action.as_str() {
        "allow" => RuleAction::Allow,
        "block" => RuleAction::Block,
        other => anyhow::bail!("invalid default action '{other}' (use allow or block)"),
    };

    // Core components.
    let engine = Arc::new(RuleEngine::with_default_action(default_action));
    if let Some(rules_path) = &args.rules {
        match engine.load_from_path(rules_path) {
            Ok(()) => info!(rules = engine.rule_count(), path = %rules_path.display(), "rules loaded"),
            Err(e) => warn!(path = %rules_path.display(), error = %e, "failed to load rules"),
        }
    }

    let modes = Arc::new(ModeManager::new());
    let registry = Arc::new(FleetRegistry::new());
    let traffic = Arc::new(TrafficLog::default());
    let inspector = Arc::new(Inspector::new(Arc::clone(&engine), Arc::clone(&modes)));

    let reverse = Arc::new(ReverseProxy::new(Arc::clone(&registry))?);

    // Fleet config must land before the forward proxy starts admitting, so
    // the IP index is populated.
    if let Some(agents_path) = &args.agents {
        match FleetConfig::load(agents_path) {
            Ok(config) => {
                let tokens = config.apply(&registry)?;
                for token in tokens {
                    reverse.register_token(&token.token, &token.tenant_id);
                    info!(tenant = %token.tenant_id, name = token.name.as_deref().unwrap_or(""), "token registered");
                }
            }
            Err(e) => warn!(path = %agents_path.display(), error = %e, "failed to load fleet config"),
        }
    }

    let forward = Arc::new(
        ForwardProxy::new(Arc::clone(&inspector), Arc::clone(&traffic))?
            .with_registry(Arc::clone(&registry)),
    );

    // Persistent state directory.
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(&args.data_dir)
        .with_context(|| format!("create data dir {}", args.data_dir.display()))?;

    let grants = Arc::new(GrantStore::new(Some(args.data_dir.join("bastion_grants.json"))));
    let sessions = Arc::new(SessionLogStore::default());
    let session_logger = Arc::new(SessionLogger::new(Arc::clone(&sessions)));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    // Forward proxy.
    let outbound_listener = TcpListener::bind(args.outbound)
        .await
        .with_context(|| format!("bind forward proxy to {}", args.outbound))?;
    tasks.push(tokio::spawn(
        Arc::clone(&forward).run(outbound_listener, shutdown_rx.clone()),
    ));

    // Reverse proxy.
    let inbound_listener = TcpListener::bind(args.inbound)
        .await
        .with_context(|| format!("bind reverse proxy to {}", args.inbound))?;
    info!(addr = %args.inbound, "reverse proxy listening");
    tasks.push(serve_http(
        inbound_listener,
        Arc::clone(&reverse).router(),
        shutdown_rx.clone(),
        "reverse proxy",
    ));

    // SSH bastion (optional).
    let bastion = match args.bastion {
        Some(addr) => {
            let server = Arc::new(BastionServer::new(BastionConfig {
                host_key_path: args.data_dir.join("bastion_host_key"),
                ca_key_path: args.data_dir.join("bastion_ca_key"),
                authorized_keys_path: args.authorized_keys.clone(),
                grants: Arc::clone(&grants),
                logger: Arc::clone(&session_logger),
            })?);
            let listener = TcpListener::bind(addr)
                .await
                .with_context(|| format!("bind bastion to {addr}"))?;
            tasks.push(tokio::spawn(
                Arc::clone(&server).run(listener, shutdown_rx.clone()),
            ));
            Some(server)
        }
        None => None,
    };

    // Management API.
    let ctx = Arc::new(ApiContext::new(
        Arc::clone(&engine),
        Arc::clone(&modes),
        Arc::clone(&registry),
        Arc::clone(&traffic),
        Arc::clone(&grants),
        Arc::clone(&sessions),
        VERSION,
        args.mgmt_token.clone(),
    ));
    for agent in registry.all_agents() {
        ctx.register_agent(&agent);
    }
    let api_listener = TcpListener::bind(args.api)
        .await
        .with_context(|| format!("bind management API to {}", args.api))?;
    info!(addr = %args.api, "management API listening");
    tasks.push(serve_http(
        api_listener,
        shield_api::router(ctx),
        shutdown_rx.clone(),
        "management API",
    ));

    info!(
        outbound = %args.outbound,
        inbound = %args.inbound,
        api = %args.api,
        bastion = bastion.is_some(),
        "plasma shield gateway running"
    );

    wait_for_signal().await;
    info!("shutting down");
    let _ = shutdown_tx.send(true);

    let drain = async {
        for task in tasks {
            let _ = task.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
        warn!("grace period elapsed; forcing remaining connections closed");
    }

    info!("shutdown complete");
    Ok(())
}

/// Serve an axum router until the shutdown signal flips.
fn serve_http(
    listener: TcpListener,
    router: axum::Router,
    mut shutdown: watch::Receiver<bool>,
    name: &'static str,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|&stop| stop).await;
            })
            .await;
        if let Err(e) = result {
            error!(server = name, error = %e, "server error");
        }
    })
}

async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            error!(error = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}
