//! Command-line surface (spec §6).
//!
//! `--profile`/`--dev` are global flags handled ahead of subcommand
//! dispatch so every subcommand sees an already-resolved [`crate::profile::Profile`].

use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "epiloop", version, about = "Multi-tenant messaging gateway")]
pub struct Cli {
    /// Named profile — selects a separate state dir and port range.
    #[arg(long, global = true, env = "EPILOOP_PROFILE")]
    pub profile: Option<String>,

    /// Use the development state dir/config regardless of profile.
    #[arg(long, global = true)]
    pub dev: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the gateway in the foreground.
    Gateway {
        #[arg(long)]
        port: Option<u16>,
        /// Overwrite an existing PID file from a stale process.
        #[arg(long)]
        force: bool,
    },
    /// Report daemon status.
    Status {
        #[arg(long)]
        all: bool,
        #[arg(long)]
        deep: bool,
        #[arg(long)]
        json: bool,
    },
    /// Probe the health endpoint.
    Health {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Check configuration and environment for common misconfigurations.
    Doctor,
    /// Interactive first-run setup wizard.
    Onboard,
    /// Model-provider auth/status surface.
    Models {
        #[command(subcommand)]
        command: ModelsCommand,
    },
    /// Channel login/logout.
    Channels {
        #[command(subcommand)]
        command: ChannelsCommand,
    },
    /// Send a one-off message to a resolved target.
    Message {
        #[arg(long)]
        channel: String,
        #[arg(long)]
        target: String,
        #[arg(long)]
        message: String,
    },
    /// Inject an agent turn, optionally delivering the result outbound.
    Agent {
        #[arg(long = "to")]
        to: String,
        #[arg(long)]
        message: String,
        #[arg(long)]
        deliver: bool,
    },
    /// Companion node management.
    Nodes {
        #[command(subcommand)]
        command: NodesCommand,
    },
    /// Local node agent lifecycle.
    Node {
        #[command(subcommand)]
        command: NodeCommand,
    },
    /// Pairing allowlist management.
    Approvals {
        #[command(subcommand)]
        command: ApprovalsCommand,
    },
    /// Channel plugin management.
    Plugins {
        #[command(subcommand)]
        command: PluginsCommand,
    },
    /// Approve a pending pairing code.
    Pairing {
        #[command(subcommand)]
        command: PairingCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModelsCommand {
    Status {
        #[arg(long)]
        check: bool,
    },
    Auth {
        #[command(subcommand)]
        command: ModelsAuthCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModelsAuthCommand {
    Login,
    SetupToken,
    PasteToken { token: String },
    Order {
        #[command(subcommand)]
        command: ModelsAuthOrderCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ModelsAuthOrderCommand {
    Get,
    Set { providers: Vec<String> },
    Clear,
}

#[derive(Debug, Subcommand)]
pub enum ChannelsCommand {
    Login { channel: String },
    Logout { channel: String },
}

#[derive(Debug, Subcommand)]
pub enum NodesCommand {
    List,
    Pending,
    Approve { node_id: String },
    Reject { node_id: String },
    Describe { node_id: String },
    Rename { node_id: String, name: String },
    Invoke {
        node_id: String,
        command: String,
        #[arg(long, default_value = "{}")]
        arguments: String,
    },
    Canvas {
        #[command(subcommand)]
        command: NodeCanvasCommand,
    },
    Camera {
        #[command(subcommand)]
        command: NodeCameraCommand,
    },
    Screen {
        #[command(subcommand)]
        command: NodeScreenCommand,
    },
    Location {
        #[command(subcommand)]
        command: NodeLocationCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum NodeCanvasCommand {
    Snapshot { node_id: String },
    Present { node_id: String, url: String },
    Navigate { node_id: String, url: String },
    Eval { node_id: String, script: String },
}

#[derive(Debug, Subcommand)]
pub enum NodeCameraCommand {
    Snap { node_id: String },
    Clip { node_id: String, #[arg(long, default_value_t = 10)] seconds: u64 },
    List { node_id: String },
}

#[derive(Debug, Subcommand)]
pub enum NodeScreenCommand {
    Record { node_id: String, #[arg(long, default_value_t = 10)] seconds: u64 },
}

#[derive(Debug, Subcommand)]
pub enum NodeLocationCommand {
    Get { node_id: String },
}

#[derive(Debug, Subcommand)]
pub enum NodeCommand {
    Run,
    Install,
    Restart,
}

#[derive(Debug, Subcommand)]
pub enum ApprovalsCommand {
    Allowlist {
        #[command(subcommand)]
        command: ApprovalsAllowlistCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum ApprovalsAllowlistCommand {
    Add { sender_key: String, name: String },
    Remove { sender_key: String },
}

#[derive(Debug, Subcommand)]
pub enum PluginsCommand {
    Install { id: String },
    Enable { id: String },
    Disable { id: String },
    List,
}

#[derive(Debug, Subcommand)]
pub enum PairingCommand {
    Approve { sender_key: String, code: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn profile_flag_is_global_and_precedes_subcommand() {
        let cli = Cli::parse_from(["epiloop", "--profile", "work", "doctor"]);
        assert_eq!(cli.profile.as_deref(), Some("work"));
        assert!(matches!(cli.command, Command::Doctor));
    }

    #[test]
    fn gateway_subcommand_parses_port_and_force() {
        let cli = Cli::parse_from(["epiloop", "gateway", "--port", "9100", "--force"]);
        match cli.command {
            Command::Gateway { port, force } => {
                assert_eq!(port, Some(9100));
                assert!(force);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
