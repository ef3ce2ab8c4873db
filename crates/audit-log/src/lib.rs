use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use kalpana_core::types::{ActionKind, AuditEntry, Decision};

pub mod record;
pub mod timeline;

pub use record::{read_records, AuditRecord};

/// Conjunctive filter over the audit sequence. `None` matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditQuery {
    pub action: Option<ActionKind>,
    pub decision: Option<Decision>,
    pub limit: usize,
}

impl AuditQuery {
    pub fn latest(limit: usize) -> Self {
        Self {
            action: None,
            decision: None,
            limit,
        }
    }

    fn matches(&self, entry: &AuditEntry) -> bool {
        self.action.map_or(true, |action| entry.request.action == action)
            && self.decision.map_or(true, |decision| entry.response.decision == decision)
    }
}

/// Append-only audit trail kept in memory and mirrored to a JSON-lines file.
///
/// `log` is the only mutator. A file that cannot be opened or written is
/// reported and retried on the next entry; the in-memory sequence always grows.
#[derive(Debug)]
pub struct AuditLogger {
    path: Option<PathBuf>,
    file: Option<File>,
    entries: Vec<AuditEntry>,
}

impl AuditLogger {
    pub fn open(path: &Path) -> Self {
        let mut logger = Self {
            path: Some(path.to_path_buf()),
            file: None,
            entries: Vec::new(),
        };
        if let Err(error) = logger.writer() {
            warn!(path = %path.display(), error = %format!("{error:#}"), "audit log unavailable, keeping entries in memory");
        }
        logger
    }

    /// A logger with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            file: None,
            entries: Vec::new(),
        }
    }

    pub fn log(&mut self, entry: AuditEntry) {
        let line = record::render_line(&AuditRecord::from(&entry));
        self.entries.push(entry);

        if self.path.is_none() {
            return;
        }
        let result = line.and_then(|line| {
            let file = self.writer()?;
            file.write_all(line.as_bytes()).context("append audit record")?;
            file.flush().context("flush audit log")?;
            Ok(())
        });
        if let Err(error) = result {
            // Drop the handle so the next entry reopens the file.
            self.file = None;
            warn!(error = %format!("{error:#}"), "failed to persist audit entry");
        }
    }

    /// Newest `limit` matching entries, oldest first.
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let matching: Vec<&AuditEntry> = self.entries.iter().filter(|entry| query.matches(entry)).collect();
        let skip = matching.len().saturating_sub(query.limit);
        matching.into_iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn writer(&mut self) -> Result<&mut File> {
        if self.file.is_none() {
            let path = self
                .path
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("audit logger has no file"))?;
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("create audit dir {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("open audit log {}", path.display()))?;
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("audit log not open"))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditStats {
    pub total: u32,
    pub allowed: u32,
    pub denied: u32,
    pub audited: u32,
    pub sandboxed: u32,
}

impl AuditStats {
    pub fn from_decisions<I: IntoIterator<Item = Decision>>(decisions: I) -> Self {
        let mut stats = AuditStats::default();
        for decision in decisions {
            stats.total = stats.total.saturating_add(1);
            match decision {
                Decision::Allow => stats.allowed = stats.allowed.saturating_add(1),
                Decision::Deny => stats.denied = stats.denied.saturating_add(1),
                Decision::Audit => stats.audited = stats.audited.saturating_add(1),
                Decision::Sandbox => stats.sandboxed = stats.sandboxed.saturating_add(1),
            }
        }
        stats
    }

    pub fn summary(&self) -> String {
        format!(
            "{} decisions: {} allowed, {} denied, {} audited, {} sandboxed",
            self.total, self.allowed, self.denied, self.audited, self.sandboxed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kalpana_core::ids::RequestId;
    use kalpana_core::types::{ActionRequest, ActionResponse, Requester};
    use serde_json::Map;
    use time::OffsetDateTime;

    fn entry(seq: u32, action: ActionKind, decision: Decision) -> AuditEntry {
        let id = RequestId(format!("REQ-20240101000000-{seq:06}"));
        AuditEntry {
            timestamp: OffsetDateTime::now_utc(),
            request: ActionRequest {
                id: id.clone(),
                action,
                requester: Requester {
                    pid: seq,
                    uid: 0,
                    name: "unknown-script".to_string(),
                },
                target: format!("target-{seq}"),
                parameters: Map::new(),
                created_at: OffsetDateTime::now_utc(),
            },
            response: ActionResponse::new(id, decision, "because"),
            execution_result: None,
        }
    }

    fn ids(entries: &[AuditEntry]) -> Vec<String> {
        entries.iter().map(|entry| entry.request.id.to_string()).collect()
    }

    #[test]
    fn log_appends_in_arrival_order() {
        let mut logger = AuditLogger::in_memory();
        for seq in 1..=5 {
            logger.log(entry(seq, ActionKind::SystemCommand, Decision::Sandbox));
        }
        assert_eq!(logger.len(), 5);
        let all = logger.query(&AuditQuery::latest(100));
        assert_eq!(all.len(), 5);
        assert_eq!(ids(&all)[0], "REQ-20240101000000-000001");
        assert_eq!(ids(&all)[4], "REQ-20240101000000-000005");
    }

    #[test]
    fn limit_keeps_most_recent() {
        let mut logger = AuditLogger::in_memory();
        for seq in 1..=10 {
            logger.log(entry(seq, ActionKind::SystemCommand, Decision::Sandbox));
        }
        let latest = logger.query(&AuditQuery::latest(3));
        assert_eq!(
            ids(&latest),
            vec![
                "REQ-20240101000000-000008",
                "REQ-20240101000000-000009",
                "REQ-20240101000000-000010",
            ]
        );
        assert!(logger.query(&AuditQuery::latest(0)).is_empty());
    }

    #[test]
    fn filters_are_conjunctive() {
        let mut logger = AuditLogger::in_memory();
        logger.log(entry(1, ActionKind::FileWrite, Decision::Deny));
        logger.log(entry(2, ActionKind::FileWrite, Decision::Allow));
        logger.log(entry(3, ActionKind::PrivilegeEscalate, Decision::Deny));

        let query = AuditQuery {
            action: Some(ActionKind::FileWrite),
            decision: Some(Decision::Deny),
            limit: 50,
        };
        assert_eq!(ids(&logger.query(&query)), vec!["REQ-20240101000000-000001"]);

        let query = AuditQuery {
            action: None,
            decision: Some(Decision::Deny),
            limit: 50,
        };
        assert_eq!(logger.query(&query).len(), 2);
        assert_eq!(logger.len(), 3);
    }

    #[test]
    fn entries_are_persisted_as_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("core.log");
        let mut logger = AuditLogger::open(&path);
        logger.log(entry(1, ActionKind::NetworkConnect, Decision::Audit));
        logger.log(entry(2, ActionKind::FileDelete, Decision::Deny));

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        let first: serde_json::Value = serde_json::from_str(contents.lines().next().unwrap()).unwrap();
        assert_eq!(first["action"], "network_connect");
        assert_eq!(first["decision"], "audit");
        assert_eq!(first["requestor"], "unknown-script");
        assert_eq!(first["target"], "target-1");

        let records = read_records(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].decision, Decision::Deny);
    }

    #[test]
    fn reopening_appends_instead_of_truncating() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("core.log");
        AuditLogger::open(&path).log(entry(1, ActionKind::SystemCommand, Decision::Sandbox));
        let mut second = AuditLogger::open(&path);
        second.log(entry(2, ActionKind::SystemCommand, Decision::Sandbox));

        assert_eq!(read_records(&path).unwrap().len(), 2);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn unwritable_log_keeps_memory_state() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, "x").unwrap();

        let mut logger = AuditLogger::open(&blocker.join("core.log"));
        logger.log(entry(1, ActionKind::SystemCommand, Decision::Sandbox));
        assert_eq!(logger.len(), 1);
    }

    #[test]
    fn stats_count_each_decision() {
        let stats = AuditStats::from_decisions([
            Decision::Allow,
            Decision::Deny,
            Decision::Deny,
            Decision::Audit,
            Decision::Sandbox,
        ]);
        assert_eq!(stats.total, 5);
        assert_eq!(stats.denied, 2);
        assert_eq!(
            stats.summary(),
            "5 decisions: 1 allowed, 2 denied, 1 audited, 1 sandboxed"
        );
    }
}
