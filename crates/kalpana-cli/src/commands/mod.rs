use std::path::PathBuf;

use anyhow::Result;

use kalpana_core::config::{AuthorityMode, Config, ConfigPaths};
use kalpana_core::ipc::{send_request, AuthorityRequest, AuthorityResponse};

pub mod audit;
pub mod config;
pub mod daemon;
pub mod execute;
pub mod explain;
pub mod status;

pub fn load_config() -> Result<Config> {
    let paths = ConfigPaths::resolve()?;
    Config::load_or_default(&paths, AuthorityMode::from_env())
}

pub fn resolve_socket(socket: Option<PathBuf>) -> Result<PathBuf> {
    match socket {
        Some(socket) => Ok(socket),
        None => Ok(load_config()?.socket_path()),
    }
}

/// Sends one request and turns an `error` payload into an `Err`.
pub fn request(socket: Option<PathBuf>, request: &AuthorityRequest) -> Result<AuthorityResponse> {
    let socket = resolve_socket(socket)?;
    match send_request(&socket, request)? {
        AuthorityResponse::Error(error) => Err(anyhow::anyhow!(error.error)),
        response => Ok(response),
    }
}

pub fn unexpected(response: AuthorityResponse) -> anyhow::Error {
    anyhow::anyhow!("unexpected response: {response:?}")
}
