use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kalpana_core::types::{ActionKind, Decision};

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "kalpana",
    version,
    about = "Talk to the Kalpana core authority"
)]
struct Cli {
    /// Authority socket (defaults to the configured path)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Ask the authority whether a command may run
    Execute {
        /// Process name to present as the requester
        #[arg(long, default_value = "kalpana-cli")]
        process: String,
        /// Extra parameters as key=value
        #[arg(long = "arg", value_name = "KEY=VALUE")]
        args: Vec<String>,
        #[arg(long)]
        json: bool,
        #[arg(required = true, trailing_var_arg = true)]
        command: Vec<String>,
    },
    Status {
        #[arg(long)]
        json: bool,
    },
    /// Show recent audit entries
    Audit {
        #[arg(long, default_value_t = 50)]
        limit: usize,
        #[arg(long)]
        action: Option<ActionKind>,
        #[arg(long)]
        decision: Option<Decision>,
        /// Read a persisted audit log instead of asking the authority
        #[arg(long)]
        file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Explain the most recent decision
    Explain,
    Daemon {
        #[command(subcommand)]
        action: DaemonCommand,
    },
    /// Write a default config file
    Init {
        #[arg(long)]
        path: Option<PathBuf>,
        #[arg(long)]
        force: bool,
    },
    Config {
        #[arg(long)]
        print: bool,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommand {
    Start {
        #[arg(long)]
        pid: Option<PathBuf>,
    },
    Stop {
        #[arg(long)]
        pid: Option<PathBuf>,
    },
    SocketPath,
    PidPath,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let socket = cli.socket;

    match cli.command {
        Commands::Execute {
            process,
            args,
            json,
            command,
        } => commands::execute::execute(commands::execute::ExecuteInputs {
            socket,
            process,
            args,
            command,
            json,
        }),
        Commands::Status { json } => commands::status::execute(socket, json),
        Commands::Audit {
            limit,
            action,
            decision,
            file,
            json,
        } => commands::audit::execute(commands::audit::AuditInputs {
            socket,
            limit,
            action,
            decision,
            file,
            json,
        }),
        Commands::Explain => commands::explain::execute(socket),
        Commands::Daemon { action } => {
            let action = match action {
                DaemonCommand::Start { pid } => commands::daemon::DaemonAction::Start { socket, pid },
                DaemonCommand::Stop { pid } => commands::daemon::DaemonAction::Stop { pid },
                DaemonCommand::SocketPath => commands::daemon::DaemonAction::SocketPath { socket },
                DaemonCommand::PidPath => commands::daemon::DaemonAction::PidPath,
            };
            commands::daemon::execute(action)
        }
        Commands::Init { path, force } => commands::config::init(path, force),
        Commands::Config { print } => {
            if print {
                commands::config::print_effective()
            } else {
                Ok(())
            }
        }
    }
}
