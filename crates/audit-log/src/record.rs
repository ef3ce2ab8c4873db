use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use kalpana_core::ids::RequestId;
use kalpana_core::types::{ActionKind, AuditEntry, Decision};

/// One line of the persisted audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub request_id: RequestId,
    pub action: ActionKind,
    pub requestor: String,
    pub target: String,
    pub decision: Decision,
    pub reason: String,
}

impl From<&AuditEntry> for AuditRecord {
    fn from(entry: &AuditEntry) -> Self {
        Self {
            timestamp: entry.timestamp,
            request_id: entry.request.id.clone(),
            action: entry.request.action,
            requestor: entry.request.requester.name.clone(),
            target: entry.request.target.clone(),
            decision: entry.response.decision,
            reason: entry.response.reason.clone(),
        }
    }
}

pub fn render_line(record: &AuditRecord) -> Result<String> {
    let mut line = serde_json::to_string(record).context("render audit record")?;
    line.push('\n');
    Ok(line)
}

/// Reads a persisted audit log back. Blank lines are ignored.
pub fn read_records(path: &Path) -> Result<Vec<AuditRecord>> {
    let file = File::open(path).with_context(|| format!("open audit log {}", path.display()))?;
    let reader = BufReader::new(file);
    let mut records = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("read audit log {}", path.display()))?;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line)
            .with_context(|| format!("parse audit record on line {}", index + 1))?;
        records.push(record);
    }
    Ok(records)
}
