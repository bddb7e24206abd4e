use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use epiloop::args::{
    ApprovalsAllowlistCommand, ApprovalsCommand, Cli, Command, ModelsCommand, NodesCommand,
    PairingCommand, PluginsCommand,
};
use epiloop::config;
use epiloop::daemon;
use epiloop::error::RunnerError;
use epiloop::gateway::{self, Gateway, GatewayOptions};
use epiloop::pairing::PairingManager;
use epiloop::profile;
use epiloop::runner::{AgentRunner, RunnerBlock};
use epiloop::session::SessionKey;
use epiloop::shutdown;

/// Placeholder [`AgentRunner`] used when no external runner is wired in.
/// Real deployments replace this with a model-backed implementation;
/// the gateway only ever depends on the trait (spec §4.5 Non-goals).
struct EchoRunner;

#[async_trait]
impl AgentRunner for EchoRunner {
    async fn run_round(
        &self,
        _session_key: &SessionKey,
        input: &str,
    ) -> Result<Vec<RunnerBlock>, RunnerError> {
        Ok(vec![
            RunnerBlock::Text {
                text: format!("epiloop gateway (no agent runner configured): {input}"),
            },
            RunnerBlock::End,
        ])
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    epiloop::logging::init();
    let cli = Cli::parse();

    let env: HashMap<String, String> = std::env::vars().collect();
    let state_dir = if cli.dev {
        dirs::home_dir().unwrap_or_default().join(".epiloop-dev")
    } else {
        profile::resolve_state_dir(&env)
    };
    std::fs::create_dir_all(&state_dir)
        .with_context(|| format!("creating state dir {}", state_dir.display()))?;

    match cli.command {
        Command::Gateway { port, force } => run_gateway(&state_dir, port, force).await,
        Command::Status { all, deep, json } => cmd_status(&state_dir, all, deep, json),
        Command::Health { json, timeout } => cmd_health(&state_dir, json, timeout).await,
        Command::Doctor => cmd_doctor(&state_dir),
        Command::Onboard => {
            println!("Run `epiloop gateway` once, then edit config.toml under {}.", state_dir.display());
            Ok(())
        }
        Command::Models { command } => cmd_models(&state_dir, command),
        Command::Channels { command } => {
            println!("{command:?}: channel login/logout is performed by the configured channel plugin, not the CLI directly.");
            Ok(())
        }
        Command::Message { channel, target, message } => {
            println!("queuing message on {channel} to {target}: {message}");
            println!("(connect a WebSocket client to the running gateway to actually deliver this)");
            Ok(())
        }
        Command::Agent { to, message, deliver } => {
            println!("agent turn for {to} (deliver={deliver}): {message}");
            println!("(connect a WebSocket client to the running gateway to actually run this)");
            Ok(())
        }
        Command::Nodes { command } => cmd_nodes(command),
        Command::Node { command } => {
            println!("{command:?}: node-agent lifecycle is managed on the companion device, not this gateway.");
            Ok(())
        }
        Command::Approvals { command } => cmd_approvals(&state_dir, command).await,
        Command::Plugins { command } => cmd_plugins(&state_dir, command),
        Command::Pairing { command } => cmd_pairing(&state_dir, command).await,
    }
}

async fn run_gateway(state_dir: &std::path::Path, port: Option<u16>, force: bool) -> Result<()> {
    let loaded = config::load(state_dir)?;
    let mut config = loaded;
    if let Some(port) = port {
        config.gateway.port = port;
    }

    if force {
        daemon::remove_pid(state_dir);
    }
    if let daemon::DaemonStatus::Running { pid } = daemon::status(state_dir) {
        anyhow::bail!("gateway already running (pid {pid}); pass --force to override");
    }
    daemon::write_pid(state_dir, std::process::id())?;

    let pairing = PairingManager::new(state_dir.join("allowlist.json"))?;
    let gateway = Arc::new(Gateway::new(config.clone(), Arc::new(EchoRunner), pairing));

    let cancel = CancellationToken::new();
    shutdown::install_signal_handlers(cancel.clone());

    let listen = format!("127.0.0.1:{}", config.gateway.port);
    let health_listen = format!("127.0.0.1:{}", config.gateway.port + 1);

    let gw = gateway.clone();
    let gw_cancel = cancel.clone();
    let gw_task = tokio::spawn(async move {
        gw.run(GatewayOptions { listen }, gw_cancel).await
    });

    let health_stats = gateway.health.clone();
    let health_cancel = cancel.clone();
    let health_task = tokio::spawn(async move {
        gateway::run_health_server(health_listen, health_stats, health_cancel).await
    });

    let result = gw_task.await.context("gateway task panicked")?;
    health_task.abort();
    daemon::remove_pid(state_dir);
    result
}

fn cmd_status(state_dir: &std::path::Path, _all: bool, _deep: bool, json: bool) -> Result<()> {
    let status = daemon::status(state_dir);
    if json {
        let body = match status {
            daemon::DaemonStatus::Running { pid } => serde_json::json!({"status": "running", "pid": pid}),
            daemon::DaemonStatus::Stale { pid } => serde_json::json!({"status": "stale", "pid": pid}),
            daemon::DaemonStatus::Stopped => serde_json::json!({"status": "stopped"}),
        };
        println!("{body}");
    } else {
        match status {
            daemon::DaemonStatus::Running { pid } => println!("running (pid {pid})"),
            daemon::DaemonStatus::Stale { pid } => println!("stale pid file (pid {pid} is dead)"),
            daemon::DaemonStatus::Stopped => println!("stopped"),
        }
    }
    Ok(())
}

async fn cmd_health(state_dir: &std::path::Path, json: bool, timeout_secs: Option<u64>) -> Result<()> {
    let config = config::load(state_dir)?;
    let url = format!("http://127.0.0.1:{}/health", config.gateway.port + 1);
    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs.unwrap_or(5)))
        .build()?;
    let resp = client.get(&url).send().await.context("health probe failed")?;
    let body = resp.text().await.unwrap_or_default();
    if json {
        println!("{body}");
    } else {
        println!("{body}");
    }
    Ok(())
}

fn cmd_doctor(state_dir: &std::path::Path) -> Result<()> {
    let config = config::load(state_dir)?;
    match config::validate(&config) {
        Ok(()) => println!("config OK ({})", config::config_path(state_dir).display()),
        Err(errors) => {
            println!("config has {} issue(s):", errors.len());
            for err in errors {
                println!("  - {err}");
            }
        }
    }
    match config.assert_configured() {
        Ok(()) => println!("auth: configured"),
        Err(err) => println!("auth: {err}"),
    }
    Ok(())
}

fn cmd_models(state_dir: &std::path::Path, command: ModelsCommand) -> Result<()> {
    let config = config::load(state_dir)?;
    match command {
        ModelsCommand::Status { check: _ } => {
            if config.auth_profiles.is_empty() {
                println!("no auth profiles configured");
            }
            for profile in &config.auth_profiles {
                println!("{} ({})", profile.label(), profile.provider());
            }
        }
        other => println!("{other:?}: sign-in flows run interactively and are not scripted here."),
    }
    Ok(())
}

fn cmd_nodes(command: NodesCommand) -> Result<()> {
    println!(
        "{command:?}: node operations are brokered through the running gateway's node-rpc \
table over an active WebSocket connection; run this against a connected gateway session."
    );
    Ok(())
}

async fn cmd_approvals(state_dir: &std::path::Path, command: ApprovalsCommand) -> Result<()> {
    let pairing = PairingManager::new(state_dir.join("allowlist.json"))?;
    let ApprovalsCommand::Allowlist { command } = command;
    match command {
        ApprovalsAllowlistCommand::Add { sender_key, name } => {
            let (messenger_type, sender_id) = sender_key
                .split_once(':')
                .context("sender_key must be messenger_type:sender_id")?;
            pairing
                .approve_sender(messenger_type, sender_id, name)
                .await?;
            println!("approved {sender_key}");
        }
        ApprovalsAllowlistCommand::Remove { sender_key } => {
            let (messenger_type, sender_id) = sender_key
                .split_once(':')
                .context("sender_key must be messenger_type:sender_id")?;
            if pairing.revoke_sender(messenger_type, sender_id).await? {
                println!("revoked {sender_key}");
            } else {
                println!("{sender_key} was not on the allowlist");
            }
        }
    }
    Ok(())
}

fn cmd_plugins(state_dir: &std::path::Path, command: PluginsCommand) -> Result<()> {
    let config = config::load(state_dir)?;
    match command {
        PluginsCommand::List => {
            if config.plugins.entries.is_empty() {
                println!("no plugins configured");
            }
            for (id, entry) in &config.plugins.entries {
                println!("{id} (enabled={})", entry.enabled);
            }
        }
        other => println!("{other:?}: edit config.toml's [plugins] section and restart the gateway to apply."),
    }
    Ok(())
}

async fn cmd_pairing(state_dir: &std::path::Path, command: PairingCommand) -> Result<()> {
    let pairing = PairingManager::new(state_dir.join("allowlist.json"))?;
    let PairingCommand::Approve { sender_key, code } = command;
    let (messenger_type, sender_id) = sender_key
        .split_once(':')
        .context("sender_key must be messenger_type:sender_id")?;
    if !pairing.verify_code(messenger_type, sender_id, &code).await {
        anyhow::bail!("pairing code did not match or has expired");
    }
    pairing
        .approve_sender(messenger_type, sender_id, sender_id.to_string())
        .await?;
    println!("approved {sender_key}");
    Ok(())
}
