use std::path::PathBuf;

use anyhow::Result;

use kalpana_core::ipc::{AuthorityRequest, AuthorityResponse};

pub fn execute(socket: Option<PathBuf>) -> Result<()> {
    match super::request(socket, &AuthorityRequest::Explain)? {
        AuthorityResponse::Explain(explanation) => {
            println!("{}: {}", explanation.request_id, explanation.explanation);
            Ok(())
        }
        AuthorityResponse::NoDecision(body) => {
            println!("{}", body.explanation);
            Ok(())
        }
        other => Err(super::unexpected(other)),
    }
}
