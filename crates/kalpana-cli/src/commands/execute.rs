use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

use kalpana_core::ipc::{AuthorityRequest, AuthorityResponse, ExecutePayload};

pub struct ExecuteInputs {
    pub socket: Option<PathBuf>,
    pub process: String,
    pub args: Vec<String>,
    pub command: Vec<String>,
    pub json: bool,
}

pub fn execute(inputs: ExecuteInputs) -> Result<()> {
    let payload = ExecutePayload {
        cmd: inputs.command.join(" "),
        args: parse_args(&inputs.args)?,
        pid: std::process::id(),
        uid: unsafe { libc::getuid() },
        process: inputs.process,
    };

    let response = super::request(inputs.socket, &AuthorityRequest::Execute(payload))?;
    match response {
        AuthorityResponse::Execute(result) => {
            if inputs.json {
                println!("{}", serde_json::to_string_pretty(&result).context("render result")?);
            } else {
                let verdict = if result.allowed { "may run" } else { "may not run freely" };
                println!("{} {}: {}", result.request_id, result.decision.as_str().to_uppercase(), result.reason);
                println!("The command {verdict}.");
            }
            Ok(())
        }
        other => Err(super::unexpected(other)),
    }
}

fn parse_args(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut args = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("expected KEY=VALUE, got {pair}"))?;
        args.insert(key.to_string(), Value::String(value.to_string()));
    }
    Ok(args)
}
