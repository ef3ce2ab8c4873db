use std::path::PathBuf;

use anyhow::{Context, Result};

use audit_log::timeline::timeline;
use audit_log::{read_records, AuditRecord, AuditStats};
use kalpana_core::ipc::{AuditQueryPayload, AuthorityRequest, AuthorityResponse};
use kalpana_core::types::{ActionKind, Decision};

pub struct AuditInputs {
    pub socket: Option<PathBuf>,
    pub limit: usize,
    pub action: Option<ActionKind>,
    pub decision: Option<Decision>,
    pub file: Option<PathBuf>,
    pub json: bool,
}

pub fn execute(inputs: AuditInputs) -> Result<()> {
    let records = match &inputs.file {
        Some(path) => select(read_records(path)?, &inputs),
        None => fetch(&inputs)?,
    };

    if inputs.json {
        println!("{}", serde_json::to_string_pretty(&records).context("render audit records")?);
        return Ok(());
    }
    for line in timeline(&records) {
        println!("{line}");
    }
    let stats = AuditStats::from_decisions(records.iter().map(|record| record.decision));
    println!("{}", stats.summary());
    Ok(())
}

fn fetch(inputs: &AuditInputs) -> Result<Vec<AuditRecord>> {
    let query = AuditQueryPayload {
        limit: inputs.limit,
        action: inputs.action,
        decision: inputs.decision,
    };
    match super::request(inputs.socket.clone(), &AuthorityRequest::Audit(query))? {
        AuthorityResponse::Audit(payload) => Ok(payload.entries.iter().map(AuditRecord::from).collect()),
        other => Err(super::unexpected(other)),
    }
}

/// Applies the same filters the authority would to records read from disk.
fn select(records: Vec<AuditRecord>, inputs: &AuditInputs) -> Vec<AuditRecord> {
    let matching: Vec<AuditRecord> = records
        .into_iter()
        .filter(|record| inputs.action.map_or(true, |action| record.action == action))
        .filter(|record| inputs.decision.map_or(true, |decision| record.decision == decision))
        .collect();
    let skip = matching.len().saturating_sub(inputs.limit);
    matching.into_iter().skip(skip).collect()
}
