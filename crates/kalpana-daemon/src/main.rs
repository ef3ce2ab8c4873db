use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{info, warn};

use kalpana_core::config::{AuthorityMode, Config, ConfigPaths};

mod authority;
mod ipc;
mod logging;

use authority::Authority;
use ipc::ServerSettings;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init_tracing();

    let paths = ConfigPaths::resolve()?;
    let config = Config::load_or_default(&paths, AuthorityMode::from_env())
        .with_context(|| format!("load config {}", paths.config_path.display()))?;

    let authority = Arc::new(Authority::from_config(&config));
    let settings = ServerSettings::from_config(&config);
    let listener = ipc::bind(&settings)?;

    let pid_path = config.pid_path();
    if let Err(error) = write_pid_file(&pid_path) {
        warn!(error = %format!("{error:#}"), "pid file not written");
    }

    info!(
        socket = %settings.socket_path.display(),
        audit_log = %config.paths.audit_log.display(),
        policy_dir = %config.paths.policy_dir.display(),
        policies_loaded = authority.policy().policies_loaded(),
        mode = authority.mode().as_str(),
        "Kalpana core authority online"
    );

    let socket_path = settings.socket_path.clone();
    ipc::serve(listener, authority, Arc::new(settings), shutdown_signal()).await?;

    info!("Kalpana core authority shutting down");
    if let Err(error) = ipc::remove_socket(&socket_path) {
        warn!(error = %format!("{error:#}"), "socket not removed");
    }
    if let Err(error) = std::fs::remove_file(&pid_path) {
        warn!(%error, path = %pid_path.display(), "pid file not removed");
    }
    info!("Kalpana core authority offline");
    Ok(())
}

async fn shutdown_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(error) => {
            warn!(%error, "SIGTERM handler unavailable, waiting for Ctrl-C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

fn write_pid_file(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create pid dir {}", parent.display()))?;
    }
    let pid = std::process::id();
    std::fs::write(path, pid.to_string())
        .with_context(|| format!("write pid file {}", path.display()))?;
    let perms = std::fs::Permissions::from_mode(0o600);
    std::fs::set_permissions(path, perms)
        .with_context(|| format!("set pid permissions {}", path.display()))?;
    Ok(())
}
