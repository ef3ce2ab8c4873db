use std::path::PathBuf;

use anyhow::{Context, Result};

use kalpana_core::ipc::{AuthorityRequest, AuthorityResponse};

pub fn execute(socket: Option<PathBuf>, json: bool) -> Result<()> {
    match super::request(socket, &AuthorityRequest::Status)? {
        AuthorityResponse::Status(payload) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&payload).context("render status")?);
                return Ok(());
            }
            println!("Kalpana core authority is {}.", payload.status);
            println!("Mode: {}", payload.mode.as_str());
            println!("Uptime: {}s", payload.uptime_seconds);
            println!("Requests processed: {}", payload.requests_processed);
            println!("Audit entries: {}", payload.audit_entries);
            println!("Policies loaded: {}", payload.policies_loaded);
            Ok(())
        }
        other => Err(super::unexpected(other)),
    }
}
