//! Plasma Shield CLI.
//!
//! Human-only management interface for the shield gateway. Install on your
//! personal machine, not on agent hosts: every subcommand is a call to the
//! management API.

mod client;
mod commands;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use client::ApiClient;

/// Plasma Shield -- network security for AI agent fleets.
#[derive(Parser, Debug)]
#[command(name = "plasma-shield", version, about)]
struct Cli {
    /// Shield management API URL
    #[arg(long, global = true, env = "PLASMA_API_URL", default_value = "http://localhost:9000")]
    api_url: String,

    /// Bearer auth token
    #[arg(long, global = true, env = "PLASMA_TOKEN")]
    token: Option<String>,

    /// Output JSON for machine parsing
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show shield status
    Status,

    /// Set the global operating mode
    Mode {
        /// enforce (block matches), audit (log only), or lockdown (block all)
        mode: String,
    },

    /// Manage agents
    Agent {
        #[command(subcommand)]
        action: AgentCommands,
    },

    /// Manage blocking rules
    Rules {
        #[command(subcommand)]
        action: RuleCommands,
    },

    /// View traffic logs
    Logs {
        /// Number of entries to return
        #[arg(long, default_value = "100")]
        limit: usize,

        /// Offset for pagination
        #[arg(long, default_value = "0")]
        offset: usize,

        /// Filter by agent id
        #[arg(long)]
        agent: Option<String>,

        /// Filter by action (allow/block/audit/reject)
        #[arg(long)]
        action: Option<String>,
    },

    /// Manage SSH bastion access grants
    Access {
        #[command(subcommand)]
        action: AccessCommands,
    },
}

#[derive(Subcommand, Debug)]
enum AgentCommands {
    /// List registered agents
    List,
    /// Pause an agent (all traffic blocked)
    Pause { agent_id: String },
    /// Emergency stop an agent
    Kill { agent_id: String },
    /// Resume a paused agent
    Resume { agent_id: String },
}

#[derive(Subcommand, Debug)]
enum RuleCommands {
    /// List rules
    List,
    /// Add a rule
    Add {
        /// Command pattern to match (glob)
        #[arg(long)]
        pattern: Option<String>,

        /// Domain pattern to match
        #[arg(long)]
        domain: Option<String>,

        /// Action: block or allow
        #[arg(long, default_value = "block")]
        action: String,

        /// Rule description
        #[arg(long)]
        desc: Option<String>,

        /// Tiers the rule applies to (repeatable)
        #[arg(long)]
        tier: Vec<String>,
    },
    /// Remove a rule
    Remove { rule_id: String },
}

#[derive(Subcommand, Debug)]
enum AccessCommands {
    /// Create a time-limited access grant
    Grant {
        /// Target agent id (or * for any)
        #[arg(long)]
        target: String,

        /// Grant duration (e.g. 30m, 1h, 24h)
        #[arg(long, default_value = "30m")]
        duration: String,

        /// Who may use the grant
        #[arg(long, default_value = "*")]
        principal: String,
    },
    /// List grants
    List {
        /// Show only active grants
        #[arg(long, default_value_t = true)]
        active: bool,
    },
    /// Revoke a grant
    Revoke { grant_id: String },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let client = ApiClient::new(&cli.api_url, cli.token.as_deref())?;
    let json = cli.json;

    match cli.command {
        Commands::Status => commands::status::run(&client, json),
        Commands::Mode { mode } => commands::mode::run(&client, &mode, json),
        Commands::Agent { action } => match action {
            AgentCommands::List => commands::agent::list(&client, json),
            AgentCommands::Pause { agent_id } => commands::agent::pause(&client, &agent_id, json),
            AgentCommands::Kill { agent_id } => commands::agent::kill(&client, &agent_id, json),
            AgentCommands::Resume { agent_id } => commands::agent::resume(&client, &agent_id, json),
        },
        Commands::Rules { action } => match action {
            RuleCommands::List => commands::rules::list(&client, json),
            RuleCommands::Add {
                pattern,
                domain,
                action,
                desc,
                tier,
            } => commands::rules::add(&client, pattern, domain, &action, desc, tier, json),
            RuleCommands::Remove { rule_id } => commands::rules::remove(&client, &rule_id, json),
        },
        Commands::Logs {
            limit,
            offset,
            agent,
            action,
        } => commands::logs::run(&client, limit, offset, agent, action, json),
        Commands::Access { action } => match action {
            AccessCommands::Grant {
                target,
                duration,
                principal,
            } => commands::access::grant(&client, &target, &duration, &principal, json),
            AccessCommands::List { active } => commands::access::list(&client, active, json),
            AccessCommands::Revoke { grant_id } => commands::access::revoke(&client, &grant_id, json),
        },
    }
}
