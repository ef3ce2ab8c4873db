use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::ids::RequestId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    ProcessStart,
    ProcessKill,
    FileRead,
    FileWrite,
    FileDelete,
    NetworkConnect,
    NetworkListen,
    SystemCommand,
    PrivilegeEscalate,
    PackageInstall,
    ServiceControl,
}

impl ActionKind {
    pub const ALL: [ActionKind; 11] = [
        ActionKind::ProcessStart,
        ActionKind::ProcessKill,
        ActionKind::FileRead,
        ActionKind::FileWrite,
        ActionKind::FileDelete,
        ActionKind::NetworkConnect,
        ActionKind::NetworkListen,
        ActionKind::SystemCommand,
        ActionKind::PrivilegeEscalate,
        ActionKind::PackageInstall,
        ActionKind::ServiceControl,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::ProcessStart => "process_start",
            ActionKind::ProcessKill => "process_kill",
            ActionKind::FileRead => "file_read",
            ActionKind::FileWrite => "file_write",
            ActionKind::FileDelete => "file_delete",
            ActionKind::NetworkConnect => "network_connect",
            ActionKind::NetworkListen => "network_listen",
            ActionKind::SystemCommand => "system_command",
            ActionKind::PrivilegeEscalate => "privilege_escalate",
            ActionKind::PackageInstall => "package_install",
            ActionKind::ServiceControl => "service_control",
        }
    }

    /// Writes and deletes: the kinds that can damage a protected path.
    pub fn is_modification(&self) -> bool {
        matches!(self, ActionKind::FileWrite | ActionKind::FileDelete)
    }

    pub fn is_network(&self) -> bool {
        matches!(self, ActionKind::NetworkConnect | ActionKind::NetworkListen)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase().replace('-', "_");
        ActionKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown action kind: {value}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
    /// Allowed, but flagged for later review.
    Audit,
    /// Allowed only inside a restricted execution context.
    Sandbox,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Allow => "allow",
            Decision::Deny => "deny",
            Decision::Audit => "audit",
            Decision::Sandbox => "sandbox",
        }
    }

    /// True for the outcomes a caller may go ahead with unrestricted.
    pub fn permits(&self) -> bool {
        matches!(self, Decision::Allow | Decision::Audit)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "allow" => Ok(Decision::Allow),
            "deny" => Ok(Decision::Deny),
            "audit" => Ok(Decision::Audit),
            "sandbox" => Ok(Decision::Sandbox),
            _ => Err(format!("unknown decision: {value}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requester {
    pub pid: u32,
    pub uid: u32,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: RequestId,
    pub action: ActionKind,
    pub requester: Requester,
    pub target: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResponse {
    pub request_id: RequestId,
    pub decision: Decision,
    pub reason: String,
    #[serde(default)]
    pub constraints: Map<String, Value>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
}

impl ActionResponse {
    pub fn new(request_id: RequestId, decision: Decision, reason: impl Into<String>) -> Self {
        Self {
            request_id,
            decision,
            reason: reason.into(),
            constraints: Map::new(),
            expires_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub request: ActionRequest,
    pub response: ActionResponse,
    pub execution_result: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_only_allow_and_audit() {
        assert!(Decision::Allow.permits());
        assert!(Decision::Audit.permits());
        assert!(!Decision::Deny.permits());
        assert!(!Decision::Sandbox.permits());
    }

    #[test]
    fn action_kind_parses_wire_names() {
        for kind in ActionKind::ALL {
            assert_eq!(kind.as_str().parse::<ActionKind>().unwrap(), kind);
        }
        assert_eq!("network-connect".parse::<ActionKind>().unwrap(), ActionKind::NetworkConnect);
        assert!("teleport".parse::<ActionKind>().is_err());
    }

    #[test]
    fn serde_names_match_display() {
        let json = serde_json::to_string(&ActionKind::PrivilegeEscalate).unwrap();
        assert_eq!(json, "\"privilege_escalate\"");
        let json = serde_json::to_string(&Decision::Sandbox).unwrap();
        assert_eq!(json, "\"sandbox\"");
    }
}
