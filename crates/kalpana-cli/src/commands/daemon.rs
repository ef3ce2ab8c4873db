use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

#[derive(Debug)]
pub enum DaemonAction {
    Start {
        socket: Option<PathBuf>,
        pid: Option<PathBuf>,
    },
    Stop {
        pid: Option<PathBuf>,
    },
    SocketPath {
        socket: Option<PathBuf>,
    },
    PidPath,
}

pub fn execute(action: DaemonAction) -> Result<()> {
    match action {
        DaemonAction::Start { socket, pid } => start_daemon(socket, pid),
        DaemonAction::Stop { pid } => stop_daemon(pid),
        DaemonAction::SocketPath { socket } => {
            println!("{}", super::resolve_socket(socket)?.display());
            Ok(())
        }
        DaemonAction::PidPath => {
            println!("{}", super::load_config()?.pid_path().display());
            Ok(())
        }
    }
}

fn start_daemon(socket: Option<PathBuf>, pid: Option<PathBuf>) -> Result<()> {
    let mut cmd = Command::new("kalpana-daemon");
    if let Some(socket) = socket {
        cmd.env("KALPANA_SOCKET", socket);
    }
    if let Some(pid) = pid {
        cmd.env("KALPANA_PID", pid);
    }
    cmd.spawn().context("start kalpana-daemon")?;
    println!("Kalpana core authority started.");
    Ok(())
}

fn stop_daemon(pid_override: Option<PathBuf>) -> Result<()> {
    let pid_path = match pid_override {
        Some(path) => path,
        None => super::load_config()?.pid_path(),
    };
    let pid_text = std::fs::read_to_string(&pid_path)
        .with_context(|| format!("read pid file {}", pid_path.display()))?;
    let pid: i32 = pid_text.trim().parse().context("parse pid")?;
    let rc = unsafe { libc::kill(pid, libc::SIGTERM) };
    if rc != 0 {
        return Err(anyhow::anyhow!("failed to stop authority with pid {pid}"));
    }
    println!("Kalpana core authority stopped.");
    Ok(())
}
