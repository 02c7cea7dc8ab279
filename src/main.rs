use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing_subscriber::EnvFilter;

use hostbridge::api::{PollResponse, SubmitBatchResponse};
use hostbridge::config::BridgeConfig;
use hostbridge::scheduler::{CommandQueue, QueueStatus, TicketStore};
use hostbridge::server::{self, BridgeState};
use hostbridge::sim::SimulatedHost;

#[derive(Parser, Debug)]
#[command(name = "hostbridge")]
#[command(version)]
#[command(about = "A domain-reload-aware command queue for editor automation agents")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the bridge service against the simulated editor host
    Serve(ServeArgs),

    /// Batch management commands
    Batch {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: BatchCommands,
    },

    /// Queue inspection commands
    Queue {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: QueueCommands,
    },
}

// =============================================================================
// Serve Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Host to bind the HTTP API to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind the HTTP API to
    #[arg(long, default_value = "8750")]
    port: u16,

    /// State file for the job table; omit to keep everything in memory
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Scheduling tick cadence in milliseconds
    #[arg(long, default_value = "200")]
    tick_ms: u64,

    /// How long finished jobs stay pollable, in seconds
    #[arg(long, default_value = "3600")]
    retention_secs: i64,

    /// Batch sizes past this log a warning
    #[arg(long, default_value = "25")]
    soft_cap: usize,

    /// Batch sizes past this are rejected
    #[arg(long, default_value = "100")]
    hard_cap: usize,

    /// How long the simulated editor stays busy after a reload-causing
    /// command, in milliseconds
    #[arg(long, default_value = "1500")]
    sim_busy_ms: u64,
}

// =============================================================================
// Client Arguments (shared by batch and queue commands)
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Bridge server address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8750")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// Batch Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum BatchCommands {
    /// Submit a batch of commands
    Submit {
        /// A command as JSON, e.g. '{"tool":"scene","params":{"action":"load","path":"Main.unity"}}'.
        /// Repeat for multi-command batches; order is preserved.
        #[arg(short = 'c', long = "command", required = true)]
        commands: Vec<String>,

        /// Submitting agent identity (scopes cancellation rights)
        #[arg(long, default_value = "")]
        agent: String,

        /// Free-text label for the batch
        #[arg(long, default_value = "")]
        label: String,

        /// Flush the state file before the ticket is returned
        #[arg(long)]
        persist: bool,
    },
    /// Get status of a submitted batch
    Status {
        /// The ticket, e.g. t-000042
        ticket: String,
    },
    /// Cancel a queued batch
    Cancel {
        /// The ticket, e.g. t-000042
        ticket: String,

        /// Agent that submitted the batch
        #[arg(long, default_value = "")]
        agent: String,
    },
}

// =============================================================================
// Queue Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum QueueCommands {
    /// Show queue depth, heavy-mutex state, and per-agent counts
    Status,
}

#[derive(Deserialize)]
struct CancelOutput {
    cancelled: bool,
}

#[derive(Deserialize)]
struct ErrorOutput {
    error: String,
}

// =============================================================================
// Serve Implementation
// =============================================================================

async fn run_serve(args: ServeArgs) -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let listen_addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
    let mut config = BridgeConfig::new(listen_addr)
        .with_batch_caps(args.soft_cap, args.hard_cap);
    config.tick_interval = Duration::from_millis(args.tick_ms);
    config.retention = chrono::Duration::seconds(args.retention_secs);
    config.state_path = args.state_file;

    let host = Arc::new(SimulatedHost::new(Duration::from_millis(args.sim_busy_ms)));
    let mut queue = CommandQueue::new(TicketStore::new(), Box::new(host.clone()));
    if let Some(path) = config.state_path.as_deref() {
        queue.load_from(path)?;
    }

    tracing::info!(
        addr = %config.listen_addr,
        state_file = ?config.state_path,
        tick_ms = args.tick_ms,
        retention_secs = args.retention_secs,
        "Starting hostbridge"
    );

    let state = BridgeState {
        queue: Arc::new(RwLock::new(queue)),
        config: Arc::new(config.clone()),
    };

    let shutdown = server::install_shutdown_handler();
    let pump = server::spawn_pump(state.clone(), host, shutdown.clone());

    // run_server cancels the token when it returns, so the pump drains
    // whether the server stopped cleanly or never came up at all.
    let served = server::run_server(config.listen_addr, state, shutdown).await;
    if let Err(e) = pump.await {
        tracing::error!(error = %e, "Pump task failed");
    }
    served?;

    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_batch_submit(
    client: &reqwest::Client,
    client_args: &ClientArgs,
    commands: Vec<String>,
    agent: String,
    label: String,
    persist: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parsed = Vec::with_capacity(commands.len());
    for (index, raw) in commands.iter().enumerate() {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(value) => parsed.push(value),
            Err(e) => {
                eprintln!("Error: command {} is not valid JSON: {}", index + 1, e);
                std::process::exit(1);
            }
        }
    }

    let body = serde_json::json!({
        "agent": agent,
        "label": label,
        "persist": persist,
        "commands": parsed,
    });

    let response = client
        .post(format!("{}/api/batches", client_args.addr))
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        let message = response
            .json::<ErrorOutput>()
            .await
            .map(|e| e.error)
            .unwrap_or_else(|_| "submission rejected".to_string());
        eprintln!("Error: {}", message);
        std::process::exit(1);
    }

    let submitted: SubmitBatchResponse = response.json().await?;
    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&submitted)?);
        }
        OutputFormat::Table => {
            println!("Batch submitted.");
            println!("Ticket: {}", submitted.ticket);
            println!("Tier:   {}", submitted.tier);
            if submitted.causes_domain_reload {
                println!("Note:   this batch will trigger a domain reload");
            }
        }
    }
    Ok(())
}

async fn handle_batch_status(
    client: &reqwest::Client,
    client_args: &ClientArgs,
    ticket: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/batches/{}", client_args.addr, ticket))
        .send()
        .await?;

    if response.status() == reqwest::StatusCode::NOT_FOUND {
        eprintln!("Error: unknown ticket {}", ticket);
        std::process::exit(1);
    }
    if !response.status().is_success() {
        eprintln!("Error: status request failed: {}", response.status());
        std::process::exit(1);
    }

    let snapshot: PollResponse = response.json().await?;
    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        OutputFormat::Table => {
            println!("Ticket:   {}", snapshot.ticket);
            println!("Agent:    {}", snapshot.agent);
            if !snapshot.label.is_empty() {
                println!("Label:    {}", snapshot.label);
            }
            println!("Status:   {}", snapshot.status);
            println!("Tier:     {}", snapshot.tier);
            println!("Commands: {}", snapshot.commands);
            println!("Created:  {}", snapshot.created_at);
            if let Some(completed_at) = snapshot.completed_at {
                println!("Finished: {}", completed_at);
            }
            if let Some(ahead) = snapshot.queued_ahead {
                println!("Ahead:    {} job(s) queued before this one", ahead);
            }
            if let Some(reason) = &snapshot.blocked_reason {
                println!("Blocked:  {}", reason);
            }
            if let Some(error) = &snapshot.error {
                println!("Error:");
                for line in error.lines() {
                    println!("  {}", line);
                }
            }
        }
    }
    Ok(())
}

async fn handle_batch_cancel(
    client: &reqwest::Client,
    client_args: &ClientArgs,
    ticket: String,
    agent: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let body = serde_json::json!({ "agent": agent });
    let response = client
        .post(format!("{}/api/batches/{}/cancel", client_args.addr, ticket))
        .json(&body)
        .send()
        .await?;

    if !response.status().is_success() {
        eprintln!("Error: cancel request failed: {}", response.status());
        std::process::exit(1);
    }

    let result: CancelOutput = response.json().await?;
    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::json!({ "cancelled": result.cancelled }));
        }
        OutputFormat::Table => {
            if result.cancelled {
                println!("Batch cancelled.");
            } else {
                println!(
                    "Cancel refused (job may be running, finished, unknown, or owned by another agent)."
                );
            }
        }
    }
    Ok(())
}

async fn handle_queue_status(
    client: &reqwest::Client,
    client_args: &ClientArgs,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = client
        .get(format!("{}/api/queue", client_args.addr))
        .send()
        .await?;

    if !response.status().is_success() {
        eprintln!("Error: queue status request failed: {}", response.status());
        std::process::exit(1);
    }

    let status: QueueStatus = response.json().await?;
    match client_args.output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
        OutputFormat::Table => {
            println!("Queue Status");
            println!("{}", "=".repeat(40));
            println!("Depth:        {}", status.depth);
            println!(
                "Active heavy: {}",
                if status.active_heavy { "yes" } else { "no" }
            );
            if !status.agents.is_empty() {
                println!();
                println!(
                    "{:<20} {:>7} {:>8} {:>6} {:>7} {:>10}",
                    "AGENT", "QUEUED", "RUNNING", "DONE", "FAILED", "CANCELLED"
                );
                println!("{}", "-".repeat(62));
                let mut agents: Vec<_> = status.agents.iter().collect();
                agents.sort_by(|a, b| a.0.cmp(b.0));
                for (agent, stats) in agents {
                    println!(
                        "{:<20} {:>7} {:>8} {:>6} {:>7} {:>10}",
                        agent,
                        stats.queued,
                        stats.running,
                        stats.done,
                        stats.failed,
                        stats.cancelled
                    );
                }
            }
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Serve(serve_args) => {
            run_serve(serve_args).await?;
        }
        Commands::Batch { client, command } => {
            let http = reqwest::Client::new();
            match command {
                BatchCommands::Submit {
                    commands,
                    agent,
                    label,
                    persist,
                } => {
                    handle_batch_submit(&http, &client, commands, agent, label, persist).await?;
                }
                BatchCommands::Status { ticket } => {
                    handle_batch_status(&http, &client, ticket).await?;
                }
                BatchCommands::Cancel { ticket, agent } => {
                    handle_batch_cancel(&http, &client, ticket, agent).await?;
                }
            }
        }
        Commands::Queue { client, command } => {
            let http = reqwest::Client::new();
            match command {
                QueueCommands::Status => {
                    handle_queue_status(&http, &client).await?;
                }
            }
        }
    }

    Ok(())
}
